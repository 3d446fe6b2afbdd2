//! Property-based test generators using proptest.
//!
//! Provides strategies for generating payloads, subscriber names and
//! journal operation sequences.

use fanlog_core::LogId;
use proptest::prelude::*;

/// Strategy for arbitrary log ids.
pub fn log_id_strategy() -> impl Strategy<Value = LogId> {
    (any::<u32>(), any::<u32>()).prop_map(|(epoch, sequence)| LogId::new(epoch, sequence))
}

/// Strategy for log ids in a small space, where orderings collide often.
pub fn small_log_id_strategy() -> impl Strategy<Value = LogId> {
    (0u32..4, 0u32..8).prop_map(|(epoch, sequence)| LogId::new(epoch, sequence))
}

/// Strategy for valid subscriber names.
pub fn subscriber_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_.-]{0,31}").expect("Invalid regex")
}

/// Strategy for message payloads (arbitrary bytes, possibly empty).
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for a batch of payloads.
pub fn payload_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(payload_strategy(), 1..max)
}

/// One step of a single-writer, single-subscriber journal run.
#[derive(Debug, Clone)]
pub enum JournalOperation {
    /// Append a message.
    Write {
        /// Message payload.
        payload: Vec<u8>,
    },
    /// Read the next interval and checkpoint its end.
    Consume,
    /// Read the next interval without checkpointing it.
    Peek,
    /// Close the reader and open it again.
    ReopenReader,
}

/// Strategy for journal operations.
pub fn journal_operation_strategy() -> impl Strategy<Value = JournalOperation> {
    prop_oneof![
        4 => payload_strategy().prop_map(|payload| JournalOperation::Write { payload }),
        2 => Just(JournalOperation::Consume),
        1 => Just(JournalOperation::Peek),
        1 => Just(JournalOperation::ReopenReader),
    ]
}

/// Strategy for a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<JournalOperation>> {
    prop::collection::vec(journal_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    ///
    /// Journal properties touch the filesystem, so most suites use this.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn subscriber_names_are_nonempty(name in subscriber_name_strategy()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.len() <= 32);
        }

        #[test]
        fn small_ids_stay_small(id in small_log_id_strategy()) {
            prop_assert!(id.epoch < 4);
            prop_assert!(id.sequence < 8);
        }
    }
}
