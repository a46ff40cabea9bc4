use crate::error::SwapError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use tracing::error;

/// Outcome of one worker: keys swapped and per-key errors absorbed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WorkerTally {
    pub(crate) swapped: u64,
    pub(crate) errored: u64,
}

/// Runs `work` on `worker_count` scoped threads and sums their tallies.
///
/// Any per-key error turns the whole call into `SwapError::Incomplete`, which
/// still carries the number of keys swapped.
pub(crate) fn run_workers<F>(worker_count: usize, work: F) -> Result<u64, SwapError>
where
    F: Fn() -> WorkerTally + Sync,
{
    let total = AtomicU64::new(0);
    let errors = AtomicU64::new(0);
    let mut panicked = false;
    let mut spawn_error = None;

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(worker_count.max(1));
        for idx in 0..worker_count.max(1) {
            let spawned = thread::Builder::new()
                .name(format!("cid-swap-{idx}"))
                .spawn_scoped(scope, || {
                    let tally = work();
                    total.fetch_add(tally.swapped, Ordering::Relaxed);
                    errors.fetch_add(tally.errored, Ordering::Relaxed);
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    spawn_error = Some(e.to_string());
                    break;
                }
            }
        }
        for handle in handles {
            if handle.join().is_err() {
                error!("swap worker panicked");
                panicked = true;
            }
        }
    });

    if panicked {
        return Err(SwapError::WorkerPanicked);
    }
    if let Some(message) = spawn_error {
        return Err(SwapError::WorkerSpawn(message));
    }
    let swapped = total.load(Ordering::Relaxed);
    let errors = errors.load(Ordering::Relaxed);
    if errors > 0 {
        return Err(SwapError::Incomplete { swapped, errors });
    }
    Ok(swapped)
}
