//! Run parameters and their normalization.
use crate::{BenchError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default values used when the command line leaves a parameter unset.
pub mod defaults {
    /// Alignment of window and staging buffers.
    pub const PAGE_SIZE: usize = 4096;

    pub const NUM_THREADS: usize = 1;

    /// Default message size in bytes.
    pub const MESSAGE_SIZE: usize = 8;

    /// Default number of puts issued between two flushes.
    pub const WINDOW_SIZE: usize = 64;

    pub const NUM_MESSAGES: usize = 640_000;

    /// Messages above this size fall back to [`LARGE_NUM_MESSAGES`].
    pub const LARGE_MSG_THRESHOLD: usize = 16_384;

    pub const LARGE_NUM_MESSAGES: usize = 64_000;

    /// Message count actually run for `requested` messages of `message_size`.
    ///
    /// A request equal to [`NUM_MESSAGES`] is taken as the default, whether
    /// or not it was given explicitly, and shrinks for large messages.
    pub fn num_messages_for(message_size: usize, requested: usize) -> usize {
        if message_size > LARGE_MSG_THRESHOLD && requested == NUM_MESSAGES {
            LARGE_NUM_MESSAGES
        } else {
            requested
        }
    }
}

/// Immutable benchmark parameters.
///
/// `num_messages` is the per-thread count after normalization: the largest
/// multiple of `window_size` not exceeding the requested count divided
/// evenly among the threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchParams {
    num_threads: usize,
    message_size: usize,
    num_messages: usize,
    window_size: usize,
    requested_messages: usize,
}

impl BenchParams {
    pub fn new(
        num_threads: usize,
        message_size: usize,
        num_messages: usize,
        window_size: usize,
    ) -> Result<Self> {
        for (name, value) in [
            ("num_threads", num_threads),
            ("message_size", message_size),
            ("num_messages", num_messages),
            ("window_size", window_size),
        ] {
            if value == 0 {
                return Err(BenchError::InvalidParams(format!("{name} must be positive")));
            }
        }
        let per_thread = window_size * (num_messages / num_threads / window_size);
        if per_thread == 0 {
            return Err(BenchError::InvalidParams(format!(
                "{num_messages} messages over {num_threads} threads do not fill one batch of {window_size}"
            )));
        }
        if message_size.checked_mul(num_threads).is_none() {
            return Err(BenchError::InvalidParams(format!(
                "window of {num_threads} x {message_size} bytes overflows"
            )));
        }

        let params = BenchParams {
            num_threads,
            message_size,
            num_messages: per_thread,
            window_size,
            requested_messages: num_messages,
        };
        if params.approximate() {
            warn!(
                requested = num_messages,
                per_thread,
                dropped = num_messages - per_thread * num_threads,
                "the final reported numbers will be off, choose the number of messages to be a multiple of threads x window size"
            );
        }
        Ok(params)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// Messages each thread puts in one phase.
    pub fn num_messages(&self) -> usize {
        self.num_messages
    }

    /// Batch size: puts issued between two flushes.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn requested_messages(&self) -> usize {
        self.requested_messages
    }

    /// Batches each thread runs per phase; at least one.
    pub fn batches(&self) -> usize {
        self.num_messages / self.window_size
    }

    /// True when normalization dropped messages from the requested count.
    pub fn approximate(&self) -> bool {
        self.num_messages * self.num_threads != self.requested_messages
    }

    /// Bytes the target exposes: one message-sized slot per thread.
    pub fn region_len(&self) -> usize {
        self.message_size * self.num_threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_thread_exact_multiple() {
        let p = BenchParams::new(1, 8, 640_000, 64).unwrap();
        assert_eq!(p.num_messages(), 640_000);
        assert_eq!(p.batches(), 10_000);
        assert!(!p.approximate());
    }

    #[test]
    fn four_threads_split_evenly() {
        let p = BenchParams::new(4, 8, 640_000, 64).unwrap();
        assert_eq!(p.num_messages(), 160_000);
        assert_eq!(p.batches(), 2500);
        assert!(!p.approximate());
    }

    #[test]
    fn four_threads_drop_partial_batch() {
        // 160_000 per thread is not a multiple of 96.
        let p = BenchParams::new(4, 8, 640_000, 96).unwrap();
        assert_eq!(p.num_messages(), 159_936);
        assert_eq!(p.batches(), 1666);
        assert!(p.approximate());
    }

    #[test]
    fn zero_rejected() {
        assert!(BenchParams::new(0, 8, 640, 64).is_err());
        assert!(BenchParams::new(1, 0, 640, 64).is_err());
        assert!(BenchParams::new(1, 8, 0, 64).is_err());
        assert!(BenchParams::new(1, 8, 640, 0).is_err());
    }

    #[test]
    fn too_few_messages_for_one_batch() {
        assert!(matches!(
            BenchParams::new(4, 8, 200, 64),
            Err(BenchError::InvalidParams(_))
        ));
    }

    #[test]
    fn large_messages_get_smaller_default() {
        use defaults::{num_messages_for, LARGE_NUM_MESSAGES, NUM_MESSAGES};

        assert_eq!(num_messages_for(8, NUM_MESSAGES), NUM_MESSAGES);
        assert_eq!(num_messages_for(16_384, NUM_MESSAGES), NUM_MESSAGES);
        assert_eq!(num_messages_for(16_385, NUM_MESSAGES), LARGE_NUM_MESSAGES);
        // An explicit 640000 is indistinguishable from the default.
        assert_eq!(num_messages_for(65_536, 640_000), LARGE_NUM_MESSAGES);
        assert_eq!(num_messages_for(65_536, 1_000), 1_000);
        assert_eq!(num_messages_for(8, 1_000), 1_000);
    }

    proptest! {
        #[test]
        fn normalized_count_is_batch_multiple(
            threads in 1usize..64,
            window in 1usize..256,
            messages in 1usize..2_000_000,
        ) {
            match BenchParams::new(threads, 8, messages, window) {
                Ok(p) => {
                    prop_assert_eq!(p.num_messages(), window * (messages / threads / window));
                    prop_assert_eq!(p.num_messages() % window, 0);
                    prop_assert!(p.batches() >= 1);
                    prop_assert!(p.num_messages() * threads <= messages);
                }
                Err(_) => prop_assert!(messages / threads < window),
            }
        }
    }
}
