//! The sender's single shared access epoch.
use crate::{OneSided, Result};
use tracing::{debug, warn};

/// Capability to issue puts and flushes against one target of a window.
///
/// Opened once with `lock_all` before the worker threads start and shared by
/// reference between all of them; closed once after they have been joined.
pub struct EpochToken<'w, G: OneSided> {
    group: &'w G,
    window: &'w G::Window,
    target: u32,
    open: bool,
}

impl<'w, G: OneSided> EpochToken<'w, G> {
    pub fn open(group: &'w G, window: &'w G::Window, target: u32) -> Result<Self> {
        group.lock_all(window)?;
        debug!(target, "shared access epoch opened");
        Ok(EpochToken {
            group,
            window,
            target,
            open: true,
        })
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    /// Put `src` at byte displacement `disp` of the target's region.
    #[inline]
    pub fn put(&self, src: &[u8], disp: usize) -> Result<()> {
        self.group.put(self.window, src, self.target, disp)
    }

    /// Block until every put issued through this token has completed remotely.
    #[inline]
    pub fn flush(&self) -> Result<()> {
        self.group.flush(self.window, self.target)
    }

    pub fn close(mut self) -> Result<()> {
        self.open = false;
        self.group.unlock_all(self.window)?;
        debug!(target = self.target, "shared access epoch closed");
        Ok(())
    }
}

impl<G: OneSided> Drop for EpochToken<'_, G> {
    fn drop(&mut self) {
        if self.open {
            warn!(target = self.target, "access epoch dropped while open, unlocking");
            if let Err(e) = self.group.unlock_all(self.window) {
                warn!(error = %e, "unlock on drop failed");
            }
        }
    }
}
