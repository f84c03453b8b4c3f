use crate::{BenchError, Result};
use std::sync::OnceLock;

/// Fixed-size table of measured seconds, one write-once slot per worker.
#[derive(Debug)]
pub struct ElapsedTimeStore {
    slots: Box<[OnceLock<f64>]>,
}

impl ElapsedTimeStore {
    pub fn new(num_threads: usize) -> Self {
        ElapsedTimeStore {
            slots: (0..num_threads).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record the measured time of thread `tid`. A second write is an error.
    pub fn record(&self, tid: usize, seconds: f64) -> Result<()> {
        self.slots
            .get(tid)
            .ok_or(BenchError::UnknownThread(tid))?
            .set(seconds)
            .map_err(|_| BenchError::DuplicateSample(tid))
    }

    /// All samples in thread order, once every thread has recorded one.
    pub fn samples(&self) -> Result<Vec<f64>> {
        self.slots
            .iter()
            .enumerate()
            .map(|(tid, slot)| slot.get().copied().ok_or(BenchError::MissingSample(tid)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn each_thread_writes_its_own_slot() {
        let store = ElapsedTimeStore::new(4);
        thread::scope(|s| {
            for tid in 0..4 {
                let store = &store;
                s.spawn(move || store.record(tid, tid as f64 + 0.5).unwrap());
            }
        });
        assert_eq!(store.samples().unwrap(), vec![0.5, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn written_at_most_once() {
        let store = ElapsedTimeStore::new(1);
        store.record(0, 1.0).unwrap();
        assert!(matches!(
            store.record(0, 2.0),
            Err(BenchError::DuplicateSample(0))
        ));
        assert_eq!(store.samples().unwrap(), vec![1.0]);
    }

    #[test]
    fn missing_sample_reported() {
        let store = ElapsedTimeStore::new(2);
        store.record(1, 1.0).unwrap();
        assert!(matches!(store.samples(), Err(BenchError::MissingSample(0))));
    }

    #[test]
    fn thread_outside_the_table_rejected() {
        let store = ElapsedTimeStore::new(2);
        assert!(matches!(
            store.record(5, 1.0),
            Err(BenchError::UnknownThread(5))
        ));
        assert!(matches!(store.samples(), Err(BenchError::MissingSample(0))));
    }
}
