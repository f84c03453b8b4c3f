//! The target's exposed memory window and its per-thread slots.
use crate::{AlignedBuffer, BenchParams, OneSided, Result};
use std::mem::ManuallyDrop;
use std::ops::Range;
use tracing::{debug, warn};

/// Rank that drives the worker threads and issues puts.
pub const SENDER_RANK: u32 = 0;
/// Rank that exposes memory and only takes part in barriers.
pub const TARGET_RANK: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Target,
}

impl Role {
    pub fn of_rank(rank: u32) -> Role {
        if rank % 2 == 0 {
            Role::Sender
        } else {
            Role::Target
        }
    }
}

/// Message-sized partition of the target window owned by one worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSlot {
    index: usize,
    message_size: usize,
}

impl WorkerSlot {
    pub fn new(index: usize, message_size: usize) -> Self {
        WorkerSlot {
            index,
            message_size,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Byte displacement of the slot inside the window.
    pub fn offset(&self) -> usize {
        self.index * self.message_size
    }

    pub fn len(&self) -> usize {
        self.message_size
    }

    pub fn is_empty(&self) -> bool {
        self.message_size == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.offset()..self.offset() + self.message_size
    }
}

/// Window created collectively by both peers.
///
/// The target allocates and registers a page-aligned region holding one slot
/// per sender thread; the sender registers nothing and only addresses the
/// target's region through the handle.
pub struct TargetWindow<'g, G: OneSided> {
    group: &'g G,
    handle: ManuallyDrop<G::Window>,
    registered: bool,
    region: Option<AlignedBuffer>,
    role: Role,
    message_size: usize,
    slots: usize,
}

impl<'g, G: OneSided> TargetWindow<'g, G> {
    pub fn create(group: &'g G, role: Role, params: &BenchParams) -> Result<Self> {
        let mut region = match role {
            Role::Target => Some(AlignedBuffer::new(params.region_len())?),
            Role::Sender => None,
        };
        let handle = match region.as_mut() {
            // The region moves into `self` and is released only after win_free.
            Some(buf) => unsafe { group.win_create(buf.as_mut_ptr(), buf.len())? },
            None => unsafe { group.win_create(std::ptr::null_mut(), 0)? },
        };
        debug!(
            ?role,
            bytes = region.as_ref().map_or(0, |r| r.len()),
            "window created"
        );
        Ok(TargetWindow {
            group,
            handle: ManuallyDrop::new(handle),
            registered: true,
            region,
            role,
            message_size: params.message_size(),
            slots: params.num_threads(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn handle(&self) -> &G::Window {
        &self.handle
    }

    /// Slot for worker `index`, or `None` past the last thread.
    pub fn slot(&self, index: usize) -> Option<WorkerSlot> {
        (index < self.slots).then(|| WorkerSlot::new(index, self.message_size))
    }

    /// Collectively free the window, handing back the target's region.
    pub fn destroy(mut self) -> Result<Option<AlignedBuffer>> {
        // Drop never reads the handle, so it is taken exactly once.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        self.group.win_free(handle)?;
        self.registered = false;
        debug!(role = ?self.role, "window freed");
        Ok(self.region.take())
    }
}

impl<G: OneSided> Drop for TargetWindow<'_, G> {
    fn drop(&mut self) {
        if self.registered {
            // Remote writes may still land in the region; leak it instead.
            warn!(role = ?self.role, "window dropped while registered, leaking its region");
            if let Some(region) = self.region.take() {
                std::mem::forget(region);
            }
        }
    }
}
