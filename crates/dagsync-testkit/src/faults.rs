//! Fault-injecting test doubles.
//!
//! [`FlakyTransport`] wraps any transport and fails, corrupts or drops the
//! acknowledgement of chosen blocks. [`CountingStore`] wraps a store, counts
//! calls and can fail pins or writes on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use dagsync_core::{BlockId, DagInfo, Manifest};
use dagsync_store::{BlockStore, PutResult, StoreError};
use dagsync_sync::{
    ErrorCode, Meta, Result, SessionId, SyncError, TransferOutcome, Transport, WireError,
};

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Fail with a transient error this many more times.
    Transient(u32),
    /// Deliver, then report a transient error this many more times.
    LoseAck(u32),
    /// Send or return bytes that do not hash to the block.
    Corrupt,
}

/// A transport that misbehaves for selected blocks.
pub struct FlakyTransport<T: ?Sized> {
    inner: Arc<T>,
    faults: Mutex<HashMap<BlockId, Fault>>,
    calls: Mutex<HashMap<BlockId, usize>>,
    opens: AtomicUsize,
}

impl<T: Transport + ?Sized> FlakyTransport<T> {
    pub fn new(inner: Arc<T>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            opens: AtomicUsize::new(0),
        }
    }

    /// Fail pushes and fetches of `id` with a transient error `times` times.
    pub fn fail_times(&self, id: BlockId, times: u32) -> &Self {
        self.faults.lock().unwrap().insert(id, Fault::Transient(times));
        self
    }

    /// Deliver `id` but report a transient error `times` times, as if the
    /// acknowledgement were lost.
    pub fn lose_ack(&self, id: BlockId, times: u32) -> &Self {
        self.faults.lock().unwrap().insert(id, Fault::LoseAck(times));
        self
    }

    /// Always tamper with the bytes of `id`.
    pub fn corrupt(&self, id: BlockId) -> &Self {
        self.faults.lock().unwrap().insert(id, Fault::Corrupt);
        self
    }

    /// Push or fetch attempts made for `id`.
    pub fn calls(&self, id: &BlockId) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    /// Total push or fetch attempts.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Sessions opened through this transport.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Record a call and take the fault to apply to it, if any.
    fn next_fault(&self, id: &BlockId) -> Option<Fault> {
        *self.calls.lock().unwrap().entry(*id).or_default() += 1;

        let mut faults = self.faults.lock().unwrap();
        let fault = faults.get_mut(id)?;
        match fault {
            Fault::Transient(0) | Fault::LoseAck(0) => None,
            Fault::Transient(n) => {
                *n -= 1;
                Some(Fault::Transient(*n + 1))
            }
            Fault::LoseAck(n) => {
                *n -= 1;
                Some(Fault::LoseAck(*n + 1))
            }
            Fault::Corrupt => Some(Fault::Corrupt),
        }
    }
}

fn transient(op: &'static str) -> SyncError {
    SyncError::Transport {
        op,
        message: "injected transient failure".into(),
    }
}

fn tamper(data: &Bytes) -> Bytes {
    let mut bytes = data.to_vec();
    bytes.push(0xff);
    Bytes::from(bytes)
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for FlakyTransport<T> {
    async fn open_receive_session(
        &self,
        info: &DagInfo,
        pin_on_complete: bool,
        meta: &Meta,
    ) -> Result<(SessionId, Manifest)> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner
            .open_receive_session(info, pin_on_complete, meta)
            .await
    }

    async fn push_block(&self, session: &SessionId, id: &BlockId, data: Bytes) -> TransferOutcome {
        match self.next_fault(id) {
            None => self.inner.push_block(session, id, data).await,
            Some(Fault::Transient(_)) => TransferOutcome::from_error(*id, &transient("push_block")),
            Some(Fault::LoseAck(_)) => {
                let _ = self.inner.push_block(session, id, data).await;
                TransferOutcome::Retryable {
                    id: *id,
                    cause: WireError::new(ErrorCode::Unavailable, "acknowledgement lost"),
                }
            }
            Some(Fault::Corrupt) => self.inner.push_block(session, id, tamper(&data)).await,
        }
    }

    async fn fetch_dag_info(&self, root: &BlockId, meta: &Meta) -> Result<DagInfo> {
        self.inner.fetch_dag_info(root, meta).await
    }

    async fn fetch_block(&self, id: &BlockId) -> Result<Bytes> {
        match self.next_fault(id) {
            None | Some(Fault::LoseAck(_)) => self.inner.fetch_block(id).await,
            Some(Fault::Transient(_)) => Err(transient("fetch_block")),
            Some(Fault::Corrupt) => Ok(tamper(&self.inner.fetch_block(id).await?)),
        }
    }

    async fn remove_dag(&self, root: &BlockId, meta: &Meta) -> Result<()> {
        self.inner.remove_dag(root, meta).await
    }
}

/// A store that counts calls and fails on demand.
pub struct CountingStore<S> {
    inner: S,
    puts: AtomicUsize,
    pins: AtomicUsize,
    pin_failures: AtomicU32,
    put_failures: AtomicU32,
}

impl<S: BlockStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
            pins: AtomicUsize::new(0),
            pin_failures: AtomicU32::new(0),
            put_failures: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Successful `put` calls (including ones that found the block present).
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Successful `pin` calls.
    pub fn pins(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }

    /// Make the next `times` pins fail.
    pub fn fail_pins(&self, times: u32) {
        self.pin_failures.store(times, Ordering::SeqCst);
    }

    /// Make the next `times` puts fail.
    pub fn fail_puts(&self, times: u32) {
        self.put_failures.store(times, Ordering::SeqCst);
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl<S: BlockStore> BlockStore for CountingStore<S> {
    async fn has(&self, id: &BlockId) -> dagsync_store::Result<bool> {
        self.inner.has(id).await
    }

    async fn get(&self, id: &BlockId) -> dagsync_store::Result<Option<Bytes>> {
        self.inner.get(id).await
    }

    async fn put(&self, id: &BlockId, data: Bytes) -> dagsync_store::Result<PutResult> {
        if take_failure(&self.put_failures) {
            return Err(StoreError::WriteRejected("injected put failure".into()));
        }
        let result = self.inner.put(id, data).await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }

    async fn pin(&self, root: &BlockId) -> dagsync_store::Result<()> {
        if take_failure(&self.pin_failures) {
            return Err(StoreError::WriteRejected("injected pin failure".into()));
        }
        self.inner.pin(root).await?;
        self.pins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unpin(&self, root: &BlockId) -> dagsync_store::Result<bool> {
        self.inner.unpin(root).await
    }

    async fn is_pinned(&self, root: &BlockId) -> dagsync_store::Result<bool> {
        self.inner.is_pinned(root).await
    }

    async fn pins(&self) -> dagsync_store::Result<Vec<BlockId>> {
        self.inner.pins().await
    }
}
