use crate::rules::RuleError;
use std::io;
use std::path::PathBuf;
use storage::StoreError;
use thiserror::Error;

/// Errors that stop a whole run. Per-file problems never surface here; they
/// are recorded as error outcomes instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error("invalid worker bounds: min_workers={min}, max_workers={max}")]
    InvalidWorkerBounds { min: usize, max: usize },
    #[error("destination {path} is not writable: {source}")]
    DestinationUnwritable { path: PathBuf, source: io::Error },
    #[error("scanning the source directory failed: {0:#}")]
    Scan(anyhow::Error),
    #[error("progress snapshot is corrupt: {0}")]
    CorruptState(StoreError),
    #[error("progress store failed: {0}")]
    Store(StoreError),
    #[error("could not persist progress after {attempts} attempts: {source}")]
    Persist { attempts: u32, source: StoreError },
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),
    #[error("outcome channel closed after {received} of {expected} outcomes")]
    ChannelClosed { received: usize, expected: usize },
}
