use crate::error::SwapError;

pub const DEFAULT_SYNC_SIZE_BYTES: u64 = 20 * 1024 * 1024;
pub const DEFAULT_WORKER_THREADS: usize = 4;
pub const DEFAULT_SWAP_QUEUE_CAPACITY: usize = 1000;

/// Tunables for a key migration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapConfig {
    /// Bytes copied by one worker before it syncs and applies its pending
    /// deletions.
    pub sync_size_bytes: u64,
    /// Workers used by forward passes. Reversal always runs one worker.
    pub worker_threads: usize,
    /// Capacity of the bounded queues carrying swap records (log writer,
    /// log reader).
    pub swap_queue_capacity: usize,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            sync_size_bytes: DEFAULT_SYNC_SIZE_BYTES,
            worker_threads: DEFAULT_WORKER_THREADS,
            swap_queue_capacity: DEFAULT_SWAP_QUEUE_CAPACITY,
        }
    }
}

impl SwapConfig {
    pub fn with_sync_size(mut self, bytes: u64) -> Self {
        self.sync_size_bytes = bytes;
        self
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    pub fn with_swap_queue_capacity(mut self, capacity: usize) -> Self {
        self.swap_queue_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), SwapError> {
        if self.sync_size_bytes == 0 {
            return Err(SwapError::InvalidConfig {
                message: "sync_size_bytes must be > 0".into(),
            });
        }
        if self.worker_threads == 0 {
            return Err(SwapError::InvalidConfig {
                message: "worker_threads must be > 0".into(),
            });
        }
        if self.swap_queue_capacity == 0 {
            return Err(SwapError::InvalidConfig {
                message: "swap_queue_capacity must be > 0".into(),
            });
        }
        Ok(())
    }
}
