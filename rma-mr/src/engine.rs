//! Per-thread put loop.
use crate::{EpochToken, OneSided, Result, WorkerSlot};
use std::time::Instant;

/// Run `batch_count` batches of `batch_size` puts of `staging` into `slot`,
/// flushing after each batch. Returns the elapsed wall-clock seconds.
///
/// Every put of a batch overwrites the same bytes of the slot. The first
/// failing put or flush ends the loop.
pub fn run_batches<G: OneSided>(
    token: &EpochToken<'_, G>,
    slot: WorkerSlot,
    staging: &[u8],
    batch_count: usize,
    batch_size: usize,
) -> Result<f64> {
    debug_assert_eq!(staging.len(), slot.len());
    let disp = slot.offset();

    let start = Instant::now();
    for _ in 0..batch_count {
        for _ in 0..batch_size {
            token.put(staging, disp)?;
        }
        token.flush()?;
    }
    Ok(start.elapsed().as_secs_f64())
}
