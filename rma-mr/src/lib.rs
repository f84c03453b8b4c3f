//! Multi-threaded one-sided put message-rate and bandwidth benchmark.
//!
//! One peer (the sender) opens a single shared access epoch over a window
//! exposed by the other peer (the target) and drives `num_threads` workers,
//! each writing batches of puts into its own slot of the window followed by
//! a flush. Elapsed time per worker is turned into message rate and
//! bandwidth.
use serde::{Deserialize, Serialize};

mod buffer;
mod engine;
mod epoch;
mod error;
pub mod logging;
pub mod loopback;
mod metrics;
#[cfg(feature = "mpi")]
mod mpi;
mod orchestrator;
mod params;
mod report;
mod timing;
mod window;

pub use buffer::AlignedBuffer;
pub use engine::run_batches;
pub use epoch::EpochToken;
pub use error::{BenchError, ErrorKind, Result};
pub use metrics::{aggregate, RateReport, ThreadRate};
#[cfg(feature = "mpi")]
pub use mpi::{init_standard_mpi, MPIWorld, MPIWindow};
pub use orchestrator::{run, Outcome, Phase};
pub use params::{defaults, BenchParams};
pub use report::ReportFormat;
pub use timing::ElapsedTimeStore;
pub use window::{Role, TargetWindow, WorkerSlot, SENDER_RANK, TARGET_RANK};

/// Level of thread support a substrate was initialized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreadLevel {
    Single,
    Funneled,
    Serialized,
    Multiple,
}

/// One-sided communication substrate shared by every worker thread of a peer.
pub trait OneSided: Sync {
    /// Handle to a collectively created window.
    type Window: Send + Sync;

    /// Get the rank of this peer.
    fn rank(&self) -> u32;
    /// Get the number of peers in the run.
    fn size(&self) -> u32;
    /// Thread support the substrate actually provides.
    fn thread_level(&self) -> ThreadLevel;
    /// Block until every peer has entered the barrier.
    fn barrier(&self) -> Result<()>;
    /// Collectively register `len` bytes at `base` for remote writes.
    ///
    /// A peer that exposes nothing passes a null `base` and a zero `len`, but
    /// still has to take part in the call.
    ///
    /// # Safety
    ///
    /// The region must stay allocated until the returned window has been
    /// passed to [`OneSided::win_free`], and must not be read or written
    /// locally while remote writes may be in flight.
    unsafe fn win_create(&self, base: *mut u8, len: usize) -> Result<Self::Window>;
    /// Collectively release a window.
    fn win_free(&self, win: Self::Window) -> Result<()>;
    /// Open a shared access epoch to every peer of the window.
    fn lock_all(&self, win: &Self::Window) -> Result<()>;
    /// Close the epoch opened by [`OneSided::lock_all`].
    fn unlock_all(&self, win: &Self::Window) -> Result<()>;
    /// Write `src` at byte displacement `disp` of `target`'s region.
    fn put(&self, win: &Self::Window, src: &[u8], target: u32, disp: usize) -> Result<()>;
    /// Wait until every put issued to `target` is complete at the target.
    fn flush(&self, win: &Self::Window, target: u32) -> Result<()>;
    /// Tear down the whole run on every peer.
    fn abort(&self, code: i32);
}
