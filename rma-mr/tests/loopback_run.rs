//! Both peers of a run driven over the in-process substrate.
use rma_mr::loopback::{Fabric, LoopbackPeer, LoopbackWindow};
use rma_mr::{run, BenchError, BenchParams, OneSided, Outcome, Result, ThreadLevel};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

fn run_pair(fabric: &Arc<Fabric>, params: &BenchParams) -> (Result<Outcome>, Result<Outcome>) {
    thread::scope(|s| {
        let target = fabric.peer(1);
        let handle = s.spawn(move || run(&target, params));
        let sender = fabric.peer(0);
        let sent = run(&sender, params);
        (sent, handle.join().expect("target thread panicked"))
    })
}

#[test]
fn full_run_fills_every_slot() {
    let fabric = Fabric::new(2);
    let params = BenchParams::new(4, 16, 1280, 64).unwrap();
    assert_eq!(params.num_messages(), 320);

    let (sent, received) = run_pair(&fabric, &params);

    let report = match sent.unwrap() {
        Outcome::Sender(report) => report,
        other => panic!("rank 0 should be the sender, got {other:?}"),
    };
    assert_eq!(report.num_threads, 4);
    assert_eq!(report.message_size, 16);
    assert_eq!(report.messages_per_thread, 320);
    assert!(!report.approximate);
    assert!(report.threads.iter().all(|t| t.message_rate > 0.0 && t.bandwidth > 0.0));
    let sum: f64 = report.threads.iter().map(|t| t.message_rate).sum();
    assert!((sum - report.total_message_rate).abs() < 1e-9 * sum);

    let region = match received.unwrap() {
        Outcome::Target(Some(region)) => region,
        other => panic!("rank 1 should hold the target region, got {other:?}"),
    };
    assert_eq!(region.len(), 64);
    for (tid, slot) in region.as_slice().chunks(16).enumerate() {
        assert!(slot.iter().all(|&b| b == tid as u8), "slot {tid} holds {slot:?}");
    }

    // Warmup and measurement each put every message and flush every batch.
    assert_eq!(fabric.puts(), 2 * 4 * 320);
    assert_eq!(fabric.flushes(), 2 * 4 * 5);
    assert_eq!(fabric.windows_created(), 1);
    assert_eq!(fabric.windows_freed(), 1);
    assert_eq!(fabric.aborted(), None);
}

#[test]
fn uneven_count_marks_report_approximate() {
    let fabric = Fabric::new(2);
    let params = BenchParams::new(3, 8, 1000, 64).unwrap();
    assert_eq!(params.num_messages(), 320);

    let (sent, received) = run_pair(&fabric, &params);
    match sent.unwrap() {
        Outcome::Sender(report) => {
            assert!(report.approximate);
            assert_eq!(report.threads.len(), 3);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(received.unwrap(), Outcome::Target(Some(_))));
}

#[test]
fn wrong_peer_count_aborts_before_any_window() {
    let fabric = Fabric::new(3);
    let params = BenchParams::new(1, 8, 640, 64).unwrap();

    let err = run(&fabric.peer(0), &params).unwrap_err();
    assert!(matches!(err, BenchError::PeerCount(3)));
    assert_eq!(fabric.windows_created(), 0);
    assert_eq!(fabric.aborted(), Some(1));
}

#[test]
fn missing_thread_multiple_aborts() {
    let fabric = Fabric::builder().thread_level(ThreadLevel::Serialized).build();
    let params = BenchParams::new(2, 8, 1280, 64).unwrap();

    let (sent, received) = run_pair(&fabric, &params);
    assert!(matches!(
        sent.unwrap_err(),
        BenchError::ThreadSupport(ThreadLevel::Serialized)
    ));
    assert!(matches!(
        received.unwrap_err(),
        BenchError::ThreadSupport(ThreadLevel::Serialized)
    ));
    assert_eq!(fabric.windows_created(), 0);
}

#[test]
fn put_failure_during_warmup_aborts_both_peers() {
    let fabric = Fabric::builder().fail_put_after(100).build();
    let params = BenchParams::new(2, 8, 1280, 64).unwrap();

    let (sent, received) = run_pair(&fabric, &params);
    let err = sent.unwrap_err();
    assert!(matches!(err, BenchError::Substrate { op: "put", .. }));
    assert!(matches!(received.unwrap_err(), BenchError::Aborted(3)));
    assert_eq!(fabric.aborted(), Some(3));
}

#[test]
fn put_failure_while_measuring_aborts_both_peers() {
    // Warmup issues 2 x 640 puts; fail partway through measurement.
    let fabric = Fabric::builder().fail_put_after(1280 + 300).build();
    let params = BenchParams::new(2, 8, 1280, 64).unwrap();

    let (sent, received) = run_pair(&fabric, &params);
    assert!(matches!(
        sent.unwrap_err(),
        BenchError::Substrate { op: "put", .. } | BenchError::Aborted(_)
    ));
    assert!(matches!(received.unwrap_err(), BenchError::Aborted(3)));
    assert_eq!(fabric.windows_freed(), 0);
}

/// Loopback peer whose `put` panics once `panic_at` puts have been issued.
struct PanickingPeer {
    inner: LoopbackPeer,
    puts: AtomicU64,
    panic_at: u64,
}

impl OneSided for PanickingPeer {
    type Window = LoopbackWindow;

    fn rank(&self) -> u32 {
        self.inner.rank()
    }

    fn size(&self) -> u32 {
        self.inner.size()
    }

    fn thread_level(&self) -> ThreadLevel {
        self.inner.thread_level()
    }

    fn barrier(&self) -> Result<()> {
        self.inner.barrier()
    }

    unsafe fn win_create(&self, base: *mut u8, len: usize) -> Result<LoopbackWindow> {
        unsafe { self.inner.win_create(base, len) }
    }

    fn win_free(&self, win: LoopbackWindow) -> Result<()> {
        self.inner.win_free(win)
    }

    fn lock_all(&self, win: &LoopbackWindow) -> Result<()> {
        self.inner.lock_all(win)
    }

    fn unlock_all(&self, win: &LoopbackWindow) -> Result<()> {
        self.inner.unlock_all(win)
    }

    fn put(&self, win: &LoopbackWindow, src: &[u8], target: u32, disp: usize) -> Result<()> {
        if self.puts.fetch_add(1, Ordering::SeqCst) + 1 == self.panic_at {
            panic!("put {} blew up", self.panic_at);
        }
        self.inner.put(win, src, target, disp)
    }

    fn flush(&self, win: &LoopbackWindow, target: u32) -> Result<()> {
        self.inner.flush(win, target)
    }

    fn abort(&self, code: i32) {
        self.inner.abort(code)
    }
}

#[test]
fn panicking_worker_aborts_instead_of_hanging() {
    let fabric = Fabric::new(2);
    let params = BenchParams::new(4, 8, 1280, 64).unwrap();
    let (tx, rx) = mpsc::channel();

    let driver = {
        let fabric = Arc::clone(&fabric);
        thread::spawn(move || {
            let sender = PanickingPeer {
                inner: fabric.peer(0),
                puts: AtomicU64::new(0),
                panic_at: 11,
            };
            let target = fabric.peer(1);
            let results = thread::scope(|s| {
                let handle = s.spawn(|| run(&target, &params));
                let sent = run(&sender, &params);
                (sent, handle.join().expect("target thread panicked"))
            });
            let _ = tx.send(results);
        })
    };

    let (sent, received) = rx
        .recv_timeout(Duration::from_secs(30))
        .expect("run hung after a worker panicked");
    driver.join().unwrap();

    assert!(matches!(sent.unwrap_err(), BenchError::WorkerPanicked(_)));
    assert!(matches!(received.unwrap_err(), BenchError::Aborted(3)));
    assert_eq!(fabric.aborted(), Some(3));
    assert_eq!(fabric.windows_freed(), 0);
}
