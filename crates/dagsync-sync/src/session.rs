//! Receive sessions.
//!
//! A session tracks one inbound DAG transfer: the blocks the receiver asked
//! for, which of them have arrived, and whether the completed DAG has been
//! finalized (pinned). Sessions are independent; each has its own lock and no
//! lock is held across an await.
//!
//! Completion is claimed atomically: however many pushes race to deliver the
//! last block, exactly one of them runs finalization. A completed session
//! leaves a tombstone so late pushes get [`SyncError::NoSuchSession`] and
//! status queries still answer [`SessionStatus::Complete`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use dagsync_core::{BlockId, Manifest};
use dagsync_store::BlockStore;

use crate::error::{Result, SyncError};
use crate::messages::{Meta, SessionId};

/// Session lifecycle settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions with no activity for this long are discarded.
    pub idle_ttl: Duration,
    /// How long a completed session stays queryable.
    pub tombstone_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(5 * 60),
            tombstone_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Waiting for blocks.
    Receiving { received: usize, expected: usize },
    /// All blocks arrived; finalization in progress.
    Finalizing,
    /// Finalized. The session no longer accepts blocks.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Receiving,
    Finalizing,
}

/// What recording a block did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    /// False if the block had already been recorded.
    pub newly_recorded: bool,
    /// Every block of the diff has now been received.
    pub complete: bool,
}

struct Session {
    root: BlockId,
    expected: HashSet<BlockId>,
    received: HashSet<BlockId>,
    pin_on_complete: bool,
    meta: Meta,
    phase: Phase,
    last_active: Instant,
}

impl Session {
    fn is_complete(&self) -> bool {
        self.received.len() == self.expected.len()
    }
}

type SessionCell = Arc<Mutex<Session>>;

/// Owns every receive session of one receiver.
pub struct SessionManager {
    config: SessionConfig,
    live: RwLock<HashMap<SessionId, SessionCell>>,
    /// Completed sessions and when they completed.
    completed: RwLock<HashMap<SessionId, Instant>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            live: RwLock::new(HashMap::new()),
            completed: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a session expecting the blocks of `diff`.
    pub fn create(
        &self,
        root: BlockId,
        diff: &Manifest,
        pin_on_complete: bool,
        meta: Meta,
    ) -> Result<SessionId> {
        let session = Session {
            root,
            expected: diff.entries.iter().map(|e| e.id).collect(),
            received: HashSet::new(),
            pin_on_complete,
            meta,
            phase: Phase::Receiving,
            last_active: Instant::now(),
        };

        let id = SessionId::random();
        write(&self.live)?.insert(id.clone(), Arc::new(Mutex::new(session)));
        tracing::debug!(session = %id, root = %root, expected = diff.len(), "session opened");
        Ok(id)
    }

    /// Check that `id` is a block `session` is waiting for, without recording it.
    pub fn expects(&self, session: &SessionId, id: &BlockId) -> Result<()> {
        let cell = self.live_session(session)?;
        let mut s = lock(&cell)?;
        s.last_active = Instant::now();
        if !s.expected.contains(id) {
            return Err(SyncError::Protocol(format!(
                "block {id} is not part of session {session}"
            )));
        }
        Ok(())
    }

    /// Record that `id` has been durably stored for `session`.
    ///
    /// Recording a block twice is harmless and reports the same completeness.
    pub fn record_block(&self, session: &SessionId, id: &BlockId) -> Result<Recorded> {
        let cell = self.live_session(session)?;
        let mut s = lock(&cell)?;
        if !s.expected.contains(id) {
            return Err(SyncError::Protocol(format!(
                "block {id} is not part of session {session}"
            )));
        }
        s.last_active = Instant::now();
        let newly_recorded = s.received.insert(*id);
        Ok(Recorded {
            newly_recorded,
            complete: s.is_complete(),
        })
    }

    /// Finalize `session` if it is complete and nobody else is doing so.
    ///
    /// Pins the root when the session asked for it, then retires the session.
    /// Returns `Ok(false)` when another caller holds the claim or already
    /// finished. If pinning fails the claim is released and the session stays
    /// open, so a later call can try again.
    pub async fn finalize<S>(&self, session: &SessionId, store: &S) -> Result<bool>
    where
        S: BlockStore + ?Sized,
    {
        let cell = match self.live_session(session) {
            Ok(cell) => cell,
            Err(SyncError::NoSuchSession(_)) if self.is_completed(session)? => return Ok(false),
            Err(err) => return Err(err),
        };

        let (root, pin) = {
            let mut s = lock(&cell)?;
            match s.phase {
                Phase::Finalizing => return Ok(false),
                Phase::Receiving if !s.is_complete() => {
                    return Err(SyncError::Protocol(format!(
                        "session {session} still waiting for {} blocks",
                        s.expected.len() - s.received.len()
                    )))
                }
                Phase::Receiving => s.phase = Phase::Finalizing,
            }
            (s.root, s.pin_on_complete)
        };

        if pin {
            if let Err(source) = store.pin(&root).await {
                tracing::warn!(session = %session, root = %root, error = %source, "pin failed");
                lock(&cell)?.phase = Phase::Receiving;
                return Err(SyncError::Finalize {
                    session: session.clone(),
                    source,
                });
            }
        }

        write(&self.completed)?.insert(session.clone(), Instant::now());
        write(&self.live)?.remove(session);
        tracing::info!(session = %session, root = %root, pinned = pin, "session complete");
        Ok(true)
    }

    /// Current state of `session`.
    pub fn status(&self, session: &SessionId) -> Result<SessionStatus> {
        match self.live_session(session) {
            Ok(cell) => {
                let s = lock(&cell)?;
                Ok(match s.phase {
                    Phase::Receiving => SessionStatus::Receiving {
                        received: s.received.len(),
                        expected: s.expected.len(),
                    },
                    Phase::Finalizing => SessionStatus::Finalizing,
                })
            }
            Err(SyncError::NoSuchSession(_)) if self.is_completed(session)? => {
                Ok(SessionStatus::Complete)
            }
            Err(err) => Err(err),
        }
    }

    /// Metadata the sender supplied when opening `session`.
    pub fn meta(&self, session: &SessionId) -> Result<Meta> {
        let cell = self.live_session(session)?;
        let meta = lock(&cell)?.meta.clone();
        Ok(meta)
    }

    /// Drop a live session without finalizing it.
    pub fn abort(&self, session: &SessionId) -> Result<bool> {
        let removed = write(&self.live)?.remove(session).is_some();
        if removed {
            tracing::debug!(session = %session, "session aborted");
        }
        Ok(removed)
    }

    /// Discard idle sessions and stale tombstones. Returns the number of
    /// live sessions discarded.
    pub fn reap_idle(&self) -> Result<usize> {
        self.reap_idle_at(Instant::now())
    }

    /// [`reap_idle`](Self::reap_idle) as if the current time were `now`.
    pub fn reap_idle_at(&self, now: Instant) -> Result<usize> {
        let ttl = self.config.idle_ttl;
        let mut live = write(&self.live)?;
        let before = live.len();
        live.retain(|id, cell| {
            // A session being finalized is never idle.
            let keep = match cell.lock() {
                Ok(s) => s.phase == Phase::Finalizing || now.duration_since(s.last_active) < ttl,
                Err(_) => false,
            };
            if !keep {
                tracing::info!(session = %id, "expiring idle session");
            }
            keep
        });
        let reaped = before - live.len();
        drop(live);

        let tombstone_ttl = self.config.tombstone_ttl;
        write(&self.completed)?.retain(|_, at| now.duration_since(*at) < tombstone_ttl);
        Ok(reaped)
    }

    /// Drop every session and tombstone.
    pub fn clear(&self) -> Result<()> {
        write(&self.live)?.clear();
        write(&self.completed)?.clear();
        Ok(())
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.live.read().map(|live| live.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_session(&self, session: &SessionId) -> Result<SessionCell> {
        self.live
            .read()
            .map_err(|e| SyncError::Internal(e.to_string()))?
            .get(session)
            .cloned()
            .ok_or_else(|| SyncError::NoSuchSession(session.to_string()))
    }

    fn is_completed(&self, session: &SessionId) -> Result<bool> {
        Ok(self
            .completed
            .read()
            .map_err(|e| SyncError::Internal(e.to_string()))?
            .contains_key(session))
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

fn lock(cell: &SessionCell) -> Result<MutexGuard<'_, Session>> {
    cell.lock().map_err(|e| SyncError::Internal(e.to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|e| SyncError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagsync_core::ManifestEntry;
    use dagsync_store::MemoryStore;

    fn manifest(ids: &[BlockId]) -> Manifest {
        Manifest::new(ids.iter().map(|id| ManifestEntry { id: *id, size: 1 }).collect())
    }

    #[test]
    fn test_record_until_complete() {
        let sessions = SessionManager::default();
        let (a, b) = (BlockId::of(b"a"), BlockId::of(b"b"));
        let sid = sessions
            .create(a, &manifest(&[a, b]), false, Meta::new())
            .unwrap();

        let first = sessions.record_block(&sid, &a).unwrap();
        assert!(first.newly_recorded);
        assert!(!first.complete);

        let again = sessions.record_block(&sid, &a).unwrap();
        assert!(!again.newly_recorded);
        assert!(!again.complete);

        assert_eq!(
            sessions.status(&sid).unwrap(),
            SessionStatus::Receiving {
                received: 1,
                expected: 2
            }
        );
        assert!(sessions.record_block(&sid, &b).unwrap().complete);
    }

    #[test]
    fn test_record_rejects_foreign_block() {
        let sessions = SessionManager::default();
        let a = BlockId::of(b"a");
        let sid = sessions.create(a, &manifest(&[a]), false, Meta::new()).unwrap();

        let stranger = BlockId::of(b"stranger");
        assert!(matches!(
            sessions.expects(&sid, &stranger),
            Err(SyncError::Protocol(_))
        ));
        assert!(matches!(
            sessions.record_block(&sid, &stranger),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn test_unknown_session() {
        let sessions = SessionManager::default();
        let err = sessions
            .record_block(&SessionId::from("nope"), &BlockId::of(b"a"))
            .unwrap_err();
        assert!(matches!(err, SyncError::NoSuchSession(_)));
    }

    #[tokio::test]
    async fn test_finalize_pins_once_and_leaves_tombstone() {
        let store = MemoryStore::new();
        let sessions = SessionManager::default();
        let root = BlockId::of(b"root");
        let sid = sessions
            .create(root, &manifest(&[root]), true, Meta::new())
            .unwrap();
        sessions.record_block(&sid, &root).unwrap();

        assert!(sessions.finalize(&sid, &store).await.unwrap());
        assert!(!sessions.finalize(&sid, &store).await.unwrap());
        assert!(store.is_pinned(&root).await.unwrap());
        assert_eq!(sessions.status(&sid).unwrap(), SessionStatus::Complete);
        assert!(sessions.is_empty());

        let late = sessions.record_block(&sid, &root).unwrap_err();
        assert!(matches!(late, SyncError::NoSuchSession(_)));
    }

    #[tokio::test]
    async fn test_finalize_incomplete_session_fails() {
        let store = MemoryStore::new();
        let sessions = SessionManager::default();
        let (a, b) = (BlockId::of(b"a"), BlockId::of(b"b"));
        let sid = sessions
            .create(a, &manifest(&[a, b]), false, Meta::new())
            .unwrap();
        sessions.record_block(&sid, &a).unwrap();

        assert!(matches!(
            sessions.finalize(&sid, &store).await,
            Err(SyncError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_finalize_claims_once() {
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(SessionManager::default());
        let root = BlockId::of(b"root");
        let sid = sessions
            .create(root, &manifest(&[root]), true, Meta::new())
            .unwrap();
        sessions.record_block(&sid, &root).unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let sessions = sessions.clone();
            let store = store.clone();
            let sid = sid.clone();
            handles.push(tokio::spawn(async move {
                sessions.finalize(&sid, store.as_ref()).await.unwrap()
            }));
        }

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[test]
    fn test_reap_idle_sessions() {
        let sessions = SessionManager::new(SessionConfig {
            idle_ttl: Duration::from_secs(10),
            ..SessionConfig::default()
        });
        let a = BlockId::of(b"a");
        let sid = sessions.create(a, &manifest(&[a]), false, Meta::new()).unwrap();

        assert_eq!(sessions.reap_idle_at(Instant::now()).unwrap(), 0);
        assert_eq!(
            sessions
                .reap_idle_at(Instant::now() + Duration::from_secs(11))
                .unwrap(),
            1
        );
        assert!(matches!(
            sessions.status(&sid),
            Err(SyncError::NoSuchSession(_))
        ));
    }

    #[test]
    fn test_abort_and_clear() {
        let sessions = SessionManager::default();
        let a = BlockId::of(b"a");
        let sid = sessions.create(a, &manifest(&[a]), false, Meta::new()).unwrap();
        let mut meta = Meta::new();
        meta.insert("k".into(), "v".into());
        let other = sessions.create(a, &manifest(&[a]), false, meta).unwrap();

        assert_eq!(sessions.meta(&other).unwrap().get("k").map(String::as_str), Some("v"));
        assert!(sessions.abort(&sid).unwrap());
        assert!(!sessions.abort(&sid).unwrap());
        assert_eq!(sessions.len(), 1);

        sessions.clear().unwrap();
        assert!(sessions.is_empty());
    }
}
