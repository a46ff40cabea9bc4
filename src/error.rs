use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapErrorCode {
    Io,
    Store,
    Decode,
    InvalidConfig,
    VersionMismatch,
    LogCorrupt,
    Incomplete,
    WorkerPanicked,
    WorkerSpawn,
}

impl SwapErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            SwapErrorCode::Io => "io",
            SwapErrorCode::Store => "store",
            SwapErrorCode::Decode => "decode",
            SwapErrorCode::InvalidConfig => "invalid_config",
            SwapErrorCode::VersionMismatch => "version_mismatch",
            SwapErrorCode::LogCorrupt => "log_corrupt",
            SwapErrorCode::Incomplete => "incomplete",
            SwapErrorCode::WorkerPanicked => "worker_panicked",
            SwapErrorCode::WorkerSpawn => "worker_spawn",
        }
    }
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("repository version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: u32, actual: String },
    #[error("migration log corrupt at line {line}: {message}")]
    LogCorrupt { line: u64, message: String },
    #[error(
        "{errors} errors happened during the migration ({swapped} keys swapped); consider running it again"
    )]
    Incomplete { swapped: u64, errors: u64 },
    #[error("swap worker panicked")]
    WorkerPanicked,
    #[error("failed to spawn swap worker: {0}")]
    WorkerSpawn(String),
}

impl SwapError {
    pub fn code(&self) -> SwapErrorCode {
        match self {
            SwapError::Io(_) => SwapErrorCode::Io,
            SwapError::Store(_) => SwapErrorCode::Store,
            SwapError::Decode(_) => SwapErrorCode::Decode,
            SwapError::InvalidConfig { .. } => SwapErrorCode::InvalidConfig,
            SwapError::VersionMismatch { .. } => SwapErrorCode::VersionMismatch,
            SwapError::LogCorrupt { .. } => SwapErrorCode::LogCorrupt,
            SwapError::Incomplete { .. } => SwapErrorCode::Incomplete,
            SwapError::WorkerPanicked => SwapErrorCode::WorkerPanicked,
            SwapError::WorkerSpawn(_) => SwapErrorCode::WorkerSpawn,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Per-key failures leave the store in a state the same pass can resume
    /// from; every other error needs operator attention first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SwapError::Incomplete { .. })
    }

    /// Keys swapped before the pass gave up, when the error carries it.
    pub fn partial_count(&self) -> Option<u64> {
        match self {
            SwapError::Incomplete { swapped, .. } => Some(*swapped),
            _ => None,
        }
    }
}
