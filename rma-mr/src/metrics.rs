//! Reduction of per-thread elapsed time into message rate and bandwidth.
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreadRate {
    pub thread_id: usize,
    pub elapsed_secs: f64,
    /// Millions of messages per second.
    pub message_rate: f64,
    /// MB/s, with 1 MB = 2^20 bytes.
    pub bandwidth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateReport {
    pub message_size: usize,
    pub num_threads: usize,
    pub messages_per_thread: usize,
    pub threads: Vec<ThreadRate>,
    /// Sum of the per-thread message rates.
    pub total_message_rate: f64,
    /// Sum of the per-thread bandwidths.
    pub total_bandwidth: f64,
    /// Set when the message count was cut down to a multiple of the batch size.
    pub approximate: bool,
}

impl RateReport {
    pub fn with_approximate(mut self, approximate: bool) -> Self {
        self.approximate = approximate;
        self
    }
}

/// Turn per-thread seconds into rates. Totals are sums, not averages,
/// since the threads ran concurrently.
pub fn aggregate(samples: &[f64], message_size: usize, total_messages_per_thread: usize) -> RateReport {
    let messages = total_messages_per_thread as f64;
    let bytes = message_size as f64 * messages;

    let threads: Vec<ThreadRate> = samples
        .iter()
        .enumerate()
        .map(|(thread_id, &secs)| ThreadRate {
            thread_id,
            elapsed_secs: secs,
            message_rate: messages / secs / 1e6,
            bandwidth: bytes / BYTES_PER_MB / secs,
        })
        .collect();

    let (total_message_rate, total_bandwidth) = threads
        .iter()
        .fold((0.0, 0.0), |(rate, bw), t| (rate + t.message_rate, bw + t.bandwidth));

    RateReport {
        message_size,
        num_threads: samples.len(),
        messages_per_thread: total_messages_per_thread,
        threads,
        total_message_rate,
        total_bandwidth,
        approximate: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn two_threads_sum_rates() {
        let report = aggregate(&[1.0, 2.0], 1024, 1_000_000);
        assert!(close(report.threads[0].message_rate, 1.0));
        assert!(close(report.threads[0].bandwidth, 976.5625));
        assert!(close(report.threads[1].message_rate, 0.5));
        assert!(close(report.threads[1].bandwidth, 488.28125));
        assert!(close(report.total_message_rate, 1.5));
        assert!(close(report.total_bandwidth, 1464.84375));
        assert_eq!(report.num_threads, 2);
        assert!(!report.approximate);
    }

    #[test]
    fn aggregation_is_repeatable() {
        let samples = [0.731, 0.402, 1.19];
        let a = aggregate(&samples, 8, 159_936);
        let b = aggregate(&samples, 8, 159_936);
        assert_eq!(a, b);
        for (x, y) in a.threads.iter().zip(&b.threads) {
            assert_eq!(x.message_rate.to_bits(), y.message_rate.to_bits());
            assert_eq!(x.bandwidth.to_bits(), y.bandwidth.to_bits());
        }
    }

    proptest! {
        #[test]
        fn slower_means_lower_rates(
            size in 1usize..1_000_000,
            messages in 1usize..10_000_000,
            fast in 1e-6f64..100.0,
            extra in 1e-3f64..100.0,
        ) {
            let slow = fast + extra;
            let r = aggregate(&[fast, slow], size, messages);
            prop_assert!(r.threads[1].message_rate < r.threads[0].message_rate);
            prop_assert!(r.threads[1].bandwidth < r.threads[0].bandwidth);
        }
    }
}
