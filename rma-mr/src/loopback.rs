//! In-process substrate: every peer is a thread of the same process.
//!
//! Puts are plain memory copies into the region the target registered, so
//! they are complete as soon as they return and a flush only orders them.
//! Barriers are generation-counted rendezvous that give up with
//! [`BenchError::Aborted`] once any peer aborts, which keeps the other peer
//! from hanging on a fatal error.
use crate::{BenchError, OneSided, Result, ThreadLevel};
use std::sync::atomic::{self, AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{error, trace};

#[derive(Debug, Clone, Copy, Default)]
struct Region {
    addr: usize,
    len: usize,
}

#[derive(Debug, Default)]
struct Rendezvous {
    arrived: u32,
    generation: u64,
    aborted: Option<i32>,
}

/// State shared by all peers of one in-process run.
#[derive(Debug)]
pub struct Fabric {
    size: u32,
    level: ThreadLevel,
    fail_put_after: Option<u64>,
    state: Mutex<Rendezvous>,
    cv: Condvar,
    aborted: AtomicBool,
    exchange: Mutex<Vec<Region>>,
    puts: AtomicU64,
    flushes: AtomicU64,
    windows_created: AtomicU64,
    windows_freed: AtomicU64,
}

pub struct FabricBuilder {
    size: u32,
    level: ThreadLevel,
    fail_put_after: Option<u64>,
}

impl FabricBuilder {
    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Thread support the fabric reports as provided.
    pub fn thread_level(mut self, level: ThreadLevel) -> Self {
        self.level = level;
        self
    }

    /// Make every put after the first `n` fail.
    pub fn fail_put_after(mut self, n: u64) -> Self {
        self.fail_put_after = Some(n);
        self
    }

    pub fn build(self) -> Arc<Fabric> {
        Arc::new(Fabric {
            size: self.size,
            level: self.level,
            fail_put_after: self.fail_put_after,
            state: Mutex::new(Rendezvous::default()),
            cv: Condvar::new(),
            aborted: AtomicBool::new(false),
            exchange: Mutex::new(vec![Region::default(); self.size as usize]),
            puts: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            windows_created: AtomicU64::new(0),
            windows_freed: AtomicU64::new(0),
        })
    }
}

impl Fabric {
    pub fn builder() -> FabricBuilder {
        FabricBuilder {
            size: 2,
            level: ThreadLevel::Multiple,
            fail_put_after: None,
        }
    }

    pub fn new(size: u32) -> Arc<Fabric> {
        Fabric::builder().size(size).build()
    }

    /// Handle for peer `rank`. Each peer is meant to be driven by its own thread.
    pub fn peer(self: &Arc<Self>, rank: u32) -> LoopbackPeer {
        LoopbackPeer {
            fabric: Arc::clone(self),
            rank,
        }
    }

    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn windows_created(&self) -> u64 {
        self.windows_created.load(Ordering::Relaxed)
    }

    pub fn windows_freed(&self) -> u64 {
        self.windows_freed.load(Ordering::Relaxed)
    }

    /// Abort code, if any peer aborted.
    pub fn aborted(&self) -> Option<i32> {
        if !self.aborted.load(Ordering::Acquire) {
            return None;
        }
        self.lock_state().aborted
    }

    fn lock_state(&self) -> MutexGuard<'_, Rendezvous> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn barrier(&self) -> Result<()> {
        let mut st = self.lock_state();
        if let Some(code) = st.aborted {
            return Err(BenchError::Aborted(code));
        }
        let generation = st.generation;
        st.arrived += 1;
        if st.arrived == self.size {
            st.arrived = 0;
            st.generation += 1;
            self.cv.notify_all();
            return Ok(());
        }
        while st.generation == generation && st.aborted.is_none() {
            st = self.cv.wait(st).unwrap_or_else(|e| e.into_inner());
        }
        match st.aborted {
            Some(code) if st.generation == generation => Err(BenchError::Aborted(code)),
            _ => Ok(()),
        }
    }

    fn abort(&self, code: i32) {
        let mut st = self.lock_state();
        st.aborted.get_or_insert(code);
        self.aborted.store(true, Ordering::Release);
        self.cv.notify_all();
    }

    fn check_aborted(&self) -> Result<()> {
        match self.aborted() {
            Some(code) => Err(BenchError::Aborted(code)),
            None => Ok(()),
        }
    }
}

/// One peer's view of a [`Fabric`].
#[derive(Debug, Clone)]
pub struct LoopbackPeer {
    fabric: Arc<Fabric>,
    rank: u32,
}

/// Window handle: every peer's registered region plus this peer's epoch flag.
#[derive(Debug)]
pub struct LoopbackWindow {
    regions: Vec<Region>,
    epoch: AtomicBool,
}

impl LoopbackWindow {
    fn in_epoch(&self, op: &'static str) -> Result<()> {
        if self.epoch.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BenchError::NoEpoch(op))
        }
    }
}

impl LoopbackPeer {
    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }
}

impl OneSided for LoopbackPeer {
    type Window = LoopbackWindow;

    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.fabric.size
    }

    fn thread_level(&self) -> ThreadLevel {
        self.fabric.level
    }

    fn barrier(&self) -> Result<()> {
        self.fabric.barrier()
    }

    unsafe fn win_create(&self, base: *mut u8, len: usize) -> Result<LoopbackWindow> {
        {
            let mut exchange = self.fabric.exchange.lock().unwrap_or_else(|e| e.into_inner());
            exchange[self.rank as usize] = Region {
                addr: base as usize,
                len,
            };
        }
        self.fabric.barrier()?;
        let regions = self
            .fabric
            .exchange
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        // Nobody may overwrite the exchange before every peer has read it.
        self.fabric.barrier()?;
        if self.rank == 0 {
            self.fabric.windows_created.fetch_add(1, Ordering::Relaxed);
        }
        trace!(rank = self.rank, len, "loopback window registered");
        Ok(LoopbackWindow {
            regions,
            epoch: AtomicBool::new(false),
        })
    }

    fn win_free(&self, win: LoopbackWindow) -> Result<()> {
        if win.epoch.load(Ordering::Acquire) {
            return Err(BenchError::Substrate {
                op: "win_free",
                code: -1,
            });
        }
        self.fabric.barrier()?;
        if self.rank == 0 {
            self.fabric.windows_freed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn lock_all(&self, win: &LoopbackWindow) -> Result<()> {
        if win.epoch.swap(true, Ordering::AcqRel) {
            return Err(BenchError::Substrate {
                op: "lock_all",
                code: -1,
            });
        }
        Ok(())
    }

    fn unlock_all(&self, win: &LoopbackWindow) -> Result<()> {
        if !win.epoch.swap(false, Ordering::AcqRel) {
            return Err(BenchError::NoEpoch("unlock_all"));
        }
        Ok(())
    }

    fn put(&self, win: &LoopbackWindow, src: &[u8], target: u32, disp: usize) -> Result<()> {
        self.fabric.check_aborted()?;
        win.in_epoch("put")?;
        let issued = self.fabric.puts.fetch_add(1, Ordering::Relaxed);
        if self.fabric.fail_put_after.is_some_and(|n| issued >= n) {
            return Err(BenchError::Substrate { op: "put", code: -1 });
        }
        let region = win.regions.get(target as usize).copied().unwrap_or_default();
        let end = disp.checked_add(src.len());
        if region.addr == 0 || end.map_or(true, |end| end > region.len) {
            return Err(BenchError::OutOfBounds {
                disp,
                len: src.len(),
                region: region.len,
            });
        }
        // The target keeps the region alive until win_free, and no other
        // writer addresses these bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), (region.addr as *mut u8).add(disp), src.len());
        }
        Ok(())
    }

    fn flush(&self, win: &LoopbackWindow, _target: u32) -> Result<()> {
        self.fabric.check_aborted()?;
        win.in_epoch("flush")?;
        atomic::fence(Ordering::Release);
        self.fabric.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn abort(&self, code: i32) {
        error!(rank = self.rank, code, "aborting loopback run");
        self.fabric.abort(code);
    }
}
