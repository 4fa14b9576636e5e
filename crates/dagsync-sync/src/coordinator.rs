//! Concurrent, retrying transfer of a manifest's blocks.
//!
//! The coordinator keeps at most `concurrency` block transfers in flight,
//! retries retryable failures with capped exponential backoff and reports
//! all-or-nothing: either every block was stored or the caller gets a
//! [`TransferFailure`] saying what is still outstanding.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use dagsync_core::{BlockId, Manifest, ManifestEntry};

use crate::messages::{ErrorCode, TransferOutcome, WireError};

/// Limits for one transfer.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Max block transfers in flight.
    pub concurrency: usize,
    /// Retries per block after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any retry delay.
    pub max_backoff: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl CoordinatorConfig {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Transfer progress, published after every stored block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total_blocks: usize,
    pub stored_blocks: usize,
    pub total_bytes: u64,
    pub stored_bytes: u64,
}

impl Progress {
    pub fn is_done(&self) -> bool {
        self.stored_blocks == self.total_blocks
    }
}

/// A transfer in which every block was stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Stored blocks, in completion order.
    pub stored: Vec<BlockId>,
    pub bytes: u64,
    /// Retries spent across all blocks.
    pub retries: u32,
}

/// Why a transfer stopped short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// A block failed fatally or ran out of retries.
    Block { id: BlockId, cause: WireError },
    /// The caller cancelled.
    Cancelled,
    /// A transfer task panicked.
    Aborted(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Block { id, cause } => write!(f, "block {id}: {cause}"),
            FailureCause::Cancelled => f.write_str("cancelled"),
            FailureCause::Aborted(msg) => write!(f, "task aborted: {msg}"),
        }
    }
}

/// A transfer that did not store every block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transfer failed ({cause}); {} stored, {} outstanding", .stored.len(), .outstanding.len())]
pub struct TransferFailure {
    pub cause: FailureCause,
    /// Blocks confirmed stored before the transfer stopped.
    pub stored: Vec<BlockId>,
    /// Blocks not confirmed, in manifest order.
    pub outstanding: Vec<BlockId>,
}

impl TransferFailure {
    pub fn is_cancelled(&self) -> bool {
        self.cause == FailureCause::Cancelled
    }

    /// The peer no longer knows the session the blocks were pushed to.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            &self.cause,
            FailureCause::Block { cause, .. } if cause.code == ErrorCode::NoSuchSession
        )
    }
}

enum BlockResult {
    Stored { retries: u32 },
    Failed(WireError),
    Cancelled,
}

/// Drives the blocks of one manifest through a transfer operation.
pub struct TransferCoordinator {
    config: CoordinatorConfig,
    progress: watch::Sender<Progress>,
}

impl TransferCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self { config, progress }
    }

    /// Publish progress on `sender` instead of an internal channel.
    pub fn with_progress(mut self, sender: watch::Sender<Progress>) -> Self {
        self.progress = sender;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Watch progress of the current transfer.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Transfer every block of `manifest` with `op`.
    ///
    /// `op` is called once per attempt. On a fatal outcome no further blocks
    /// are started; blocks already in flight are allowed to settle. On
    /// cancellation in-flight attempts are abandoned.
    pub async fn run<F, Fut>(
        &self,
        manifest: &Manifest,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<TransferReport, TransferFailure>
    where
        F: Fn(ManifestEntry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransferOutcome> + Send + 'static,
    {
        let op = Arc::new(op);
        let limit = self.config.concurrency.max(1);
        let mut queue: VecDeque<ManifestEntry> = manifest.entries.iter().copied().collect();
        let mut tasks = JoinSet::new();

        let mut progress = Progress {
            total_blocks: manifest.len(),
            total_bytes: manifest.total_bytes(),
            ..Progress::default()
        };
        self.progress.send_replace(progress);

        let mut report = TransferReport::default();
        let mut failure: Option<FailureCause> = None;

        loop {
            while failure.is_none() && !cancel.is_cancelled() && tasks.len() < limit {
                let Some(entry) = queue.pop_front() else {
                    break;
                };
                tasks.spawn(transfer_block(
                    op.clone(),
                    entry,
                    self.config.clone(),
                    cancel.clone(),
                ));
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((entry, BlockResult::Stored { retries })) => {
                    report.stored.push(entry.id);
                    report.bytes += entry.size;
                    report.retries += retries;
                    progress.stored_blocks += 1;
                    progress.stored_bytes += entry.size;
                    self.progress.send_replace(progress);
                }
                Ok((entry, BlockResult::Failed(cause))) => {
                    tracing::warn!(block = %entry.id, error = %cause, "block transfer failed");
                    failure.get_or_insert(FailureCause::Block {
                        id: entry.id,
                        cause,
                    });
                }
                Ok((_, BlockResult::Cancelled)) => {}
                Err(err) => {
                    failure.get_or_insert(FailureCause::Aborted(err.to_string()));
                }
            }
        }

        if failure.is_none() && report.stored.len() < manifest.len() {
            failure = Some(FailureCause::Cancelled);
        }

        match failure {
            None => Ok(report),
            Some(cause) => {
                let stored: HashSet<&BlockId> = report.stored.iter().collect();
                let outstanding = manifest
                    .entries
                    .iter()
                    .map(|e| e.id)
                    .filter(|id| !stored.contains(id))
                    .collect();
                Err(TransferFailure {
                    cause,
                    stored: report.stored,
                    outstanding,
                })
            }
        }
    }
}

async fn transfer_block<F, Fut>(
    op: Arc<F>,
    entry: ManifestEntry,
    config: CoordinatorConfig,
    cancel: CancellationToken,
) -> (ManifestEntry, BlockResult)
where
    F: Fn(ManifestEntry) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TransferOutcome> + Send + 'static,
{
    let mut attempt = 0;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (entry, BlockResult::Cancelled),
            outcome = op(entry) => outcome,
        };

        let cause = match outcome {
            TransferOutcome::Stored(_) => {
                return (entry, BlockResult::Stored { retries: attempt })
            }
            TransferOutcome::Fatal { cause, .. } => return (entry, BlockResult::Failed(cause)),
            TransferOutcome::Retryable { cause, .. } => cause,
        };

        if attempt >= config.max_retries {
            let cause = WireError::new(
                cause.code,
                format!("gave up after {} attempts: {}", attempt + 1, cause.message),
            );
            return (entry, BlockResult::Failed(cause));
        }

        let delay = config.backoff(attempt);
        attempt += 1;
        tracing::warn!(block = %entry.id, attempt, ?delay, error = %cause, "retrying block");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return (entry, BlockResult::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Outcome for a block that cannot be read from the local store.
pub(crate) fn missing_locally(id: BlockId) -> TransferOutcome {
    TransferOutcome::Fatal {
        id,
        cause: WireError::new(ErrorCode::NotFound, format!("block {id} missing locally")),
    }
}
