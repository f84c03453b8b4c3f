//! Phase sequencing for the sender and the target.
//!
//! Sender: `Idle -> WindowReady -> EpochOpen -> Warmup -> Barrier1 ->
//! Measuring -> Barrier2 -> EpochClosed -> WindowFreed -> Barrier3 ->
//! Reported`. The target only creates its window, meets the sender at the
//! first barrier, frees the window (which completes once the sender has
//! closed its epoch and freed its side) and meets it again at the last
//! barrier.
use crate::{
    aggregate, run_batches, AlignedBuffer, BenchError, BenchParams, ElapsedTimeStore,
    EpochToken, OneSided, RateReport, Result, Role, TargetWindow, ThreadLevel, WorkerSlot,
    TARGET_RANK,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Barrier, Condvar, Mutex};
use std::thread;
use tracing::{debug, error, info, info_span, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    WindowReady,
    EpochOpen,
    Warmup,
    Barrier1,
    Measuring,
    Barrier2,
    EpochClosed,
    WindowFreed,
    Barrier3,
    Reported,
}

/// What a peer holds once the run completes.
#[derive(Debug)]
pub enum Outcome {
    Sender(RateReport),
    /// The target's region, readable now that the window is gone.
    Target(Option<AlignedBuffer>),
}

struct PhaseTracker {
    role: Role,
    phase: Phase,
}

impl PhaseTracker {
    fn new(role: Role) -> Self {
        PhaseTracker {
            role,
            phase: Phase::Idle,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(next > self.phase, "{:?} after {:?}", next, self.phase);
        debug!(role = ?self.role, from = ?self.phase, to = ?next, "phase");
        self.phase = next;
    }
}

/// Run the benchmark on this peer.
///
/// Any error is fatal: the substrate is aborted, tearing down the other
/// peer as well, before the error is returned.
pub fn run<G: OneSided>(group: &G, params: &BenchParams) -> Result<Outcome> {
    let span = info_span!("peer", rank = group.rank());
    let _enter = span.enter();

    run_peer(group, params).map_err(|e| {
        error!(error = %e, kind = ?e.kind(), "fatal error, aborting the run");
        group.abort(e.exit_code());
        e
    })
}

fn run_peer<G: OneSided>(group: &G, params: &BenchParams) -> Result<Outcome> {
    check_runtime(group)?;
    match Role::of_rank(group.rank()) {
        Role::Sender => run_sender(group, params).map(Outcome::Sender),
        Role::Target => run_target(group, params).map(Outcome::Target),
    }
}

fn check_runtime<G: OneSided>(group: &G) -> Result<()> {
    if group.size() != 2 {
        return Err(BenchError::PeerCount(group.size()));
    }
    if group.thread_level() != ThreadLevel::Multiple {
        return Err(BenchError::ThreadSupport(group.thread_level()));
    }
    Ok(())
}

fn run_sender<G: OneSided>(group: &G, params: &BenchParams) -> Result<RateReport> {
    let mut phase = PhaseTracker::new(Role::Sender);
    info!(
        threads = params.num_threads(),
        message_size = params.message_size(),
        messages_per_thread = params.num_messages(),
        window_size = params.window_size(),
        "starting sender"
    );

    let window = TargetWindow::create(group, Role::Sender, params)?;
    phase.advance(Phase::WindowReady);

    let epoch = EpochToken::open(group, window.handle(), TARGET_RANK)?;
    phase.advance(Phase::EpochOpen);

    let store = ElapsedTimeStore::new(params.num_threads());
    let slots: Vec<WorkerSlot> = (0..params.num_threads())
        .filter_map(|tid| window.slot(tid))
        .collect();
    phase.advance(Phase::Warmup);
    run_workers(group, &epoch, &store, &slots, params)?;
    phase.advance(Phase::Barrier2);

    epoch.close()?;
    phase.advance(Phase::EpochClosed);

    window.destroy()?;
    phase.advance(Phase::WindowFreed);

    group.barrier()?;
    phase.advance(Phase::Barrier3);

    let report = aggregate(&store.samples()?, params.message_size(), params.num_messages())
        .with_approximate(params.approximate());
    phase.advance(Phase::Reported);
    info!(
        message_rate = report.total_message_rate,
        bandwidth = report.total_bandwidth,
        "run complete"
    );
    Ok(report)
}

fn run_target<G: OneSided>(group: &G, params: &BenchParams) -> Result<Option<AlignedBuffer>> {
    let mut phase = PhaseTracker::new(Role::Target);

    let window = TargetWindow::create(group, Role::Target, params)?;
    phase.advance(Phase::WindowReady);

    group.barrier()?;
    phase.advance(Phase::Barrier1);

    // The sender measures now; the target has nothing to do until teardown.
    phase.advance(Phase::Barrier2);

    let region = window.destroy()?;
    phase.advance(Phase::WindowFreed);

    group.barrier()?;
    phase.advance(Phase::Barrier3);
    Ok(region)
}

/// Fork one worker per slot, run warmup and measurement, and join them.
///
/// Workers hold at a start gate until every thread has been spawned; if a
/// spawn fails the gate tells the ones already running to return at once,
/// so nobody waits at a thread barrier sized for threads that never exist.
fn run_workers<G: OneSided>(
    group: &G,
    epoch: &EpochToken<'_, G>,
    store: &ElapsedTimeStore,
    slots: &[WorkerSlot],
    params: &BenchParams,
) -> Result<()> {
    let workers = Workers {
        group,
        epoch,
        store,
        params,
        start: StartGate::new(),
        threads: Barrier::new(slots.len()),
        failed: AtomicBool::new(false),
        failure: Mutex::new(None),
    };
    let parent = Span::current();

    thread::scope(|s| {
        let mut handles = Vec::with_capacity(slots.len());
        for &slot in slots {
            let workers = &workers;
            let parent = &parent;
            let spawned = thread::Builder::new()
                .name(format!("put-worker-{}", slot.index()))
                .spawn_scoped(s, move || {
                    if !workers.start.wait() {
                        return;
                    }
                    let _enter = info_span!(parent: parent, "worker", tid = slot.index()).entered();
                    workers.work(slot)
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    workers.fail(
                        slot.index(),
                        BenchError::ThreadSpawn {
                            tid: slot.index(),
                            source,
                        },
                    );
                    break;
                }
            }
        }
        workers.start.open(handles.len() == slots.len());

        for (tid, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                workers.fail(tid, BenchError::WorkerPanicked(tid));
            }
        }
    });

    match workers.failure.into_inner().unwrap_or_else(|e| e.into_inner()) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// One-shot signal releasing the workers, or telling them to bail.
struct StartGate {
    go: Mutex<Option<bool>>,
    cv: Condvar,
}

impl StartGate {
    fn new() -> Self {
        StartGate {
            go: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn open(&self, go: bool) {
        *self.go.lock().unwrap_or_else(|e| e.into_inner()) = Some(go);
        self.cv.notify_all();
    }

    /// Block until opened; true means start working.
    fn wait(&self) -> bool {
        let mut go = self.go.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match *go {
                Some(start) => return start,
                None => go = self.cv.wait(go).unwrap_or_else(|e| e.into_inner()),
            }
        }
    }
}

struct Workers<'a, 'w, G: OneSided> {
    group: &'a G,
    epoch: &'a EpochToken<'w, G>,
    store: &'a ElapsedTimeStore,
    params: &'a BenchParams,
    start: StartGate,
    threads: Barrier,
    failed: AtomicBool,
    failure: Mutex<Option<BenchError>>,
}

impl<G: OneSided> Workers<'_, '_, G> {
    fn work(&self, slot: WorkerSlot) {
        let tid = slot.index();
        let batches = self.params.batches();
        let batch_size = self.params.window_size();

        let staging = self.attempt(tid, || {
            let mut buf = AlignedBuffer::new(slot.len())?;
            buf.as_mut_slice().fill(tid as u8);
            Ok(buf)
        });

        if let Some(buf) = &staging {
            self.attempt(tid, || {
                run_batches(self.epoch, slot, buf.as_slice(), batches, batch_size)
            });
        }

        self.rendezvous(tid);

        if let Some(buf) = &staging {
            if let Some(secs) = self.attempt(tid, || {
                run_batches(self.epoch, slot, buf.as_slice(), batches, batch_size)
            }) {
                debug!(tid, secs, "measured");
                self.attempt(tid, || self.store.record(tid, secs));
            }
        }
    }

    /// All workers finish warmup, one of them meets the target at the
    /// cross-peer barrier, then all start measuring together.
    fn rendezvous(&self, tid: usize) {
        if self.threads.wait().is_leader() && !self.failed.load(Ordering::Acquire) {
            debug!(to = ?Phase::Barrier1, "phase");
            self.attempt(tid, || self.group.barrier());
            debug!(to = ?Phase::Measuring, "phase");
        }
        self.threads.wait();
    }

    /// Run `f` unless a worker already failed; record its error or panic
    /// otherwise.
    ///
    /// Failed workers still reach every thread barrier so the others never
    /// block on them.
    fn attempt<T>(&self, tid: usize, f: impl FnOnce() -> Result<T>) -> Option<T> {
        if self.failed.load(Ordering::Acquire) {
            return None;
        }
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(v)) => Some(v),
            Ok(Err(e)) => {
                self.fail(tid, e);
                None
            }
            Err(_) => {
                self.fail(tid, BenchError::WorkerPanicked(tid));
                None
            }
        }
    }

    fn fail(&self, tid: usize, e: BenchError) {
        error!(tid, error = %e, "worker failed");
        self.failed.store(true, Ordering::Release);
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_or_insert(e);
    }
}
