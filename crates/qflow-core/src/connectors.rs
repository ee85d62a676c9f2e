//! Graph-construction primitives used to wire operators together (§5).
//!
//! Each connector takes the already-created inbound channels of the
//! consumer(s) and returns the sender handle(s) the producer should push
//! [`Message`]s into. The original expressed these as distinct
//! `connect_*` helpers on its query-plan builder; here they are free
//! functions the plan calls while it builds the operator graph.

use crate::{BatchTx, ScalarValue};

/// One producer feeds exactly one consumer: hand back the consumer's sender
/// unmodified.
pub fn one_to_one(consumer: BatchTx) -> BatchTx {
    consumer
}

/// `producers.len()` producers each feed the index-aligned consumer in
/// `consumers` (e.g. each partition of a `Scan` feeds the same-indexed
/// partition of the downstream operator). Returns the senders in producer
/// order.
pub fn many_to_many(consumers: Vec<BatchTx>) -> Vec<BatchTx> {
    consumers
}

/// Every producer feeds the same single consumer (fan-in), expressed by
/// cloning the consumer's `Sender` once per producer — `tokio::mpsc`
/// already serializes concurrent sends from clones onto the one
/// `Receiver`, so no merge logic is needed.
pub fn many_to_one(consumer: BatchTx, num_producers: usize) -> Vec<BatchTx> {
    (0..num_producers).map(|_| consumer.clone()).collect()
}

/// Hash-partitions rows across `consumers` by a join/group key (fan-out).
/// The producer calls [`partition_of`] per row (or per batch key) and
/// routes accordingly; this connector just exposes the consumer set plus
/// the routing function in one place so callers don't duplicate the
/// modulus arithmetic.
pub fn all_to_all(consumers: Vec<BatchTx>) -> Vec<BatchTx> {
    consumers
}

/// Maps a join/group key's hash to a partition index in `[0, num_partitions)`.
/// Used by `Map` (the repartitioner, §4.5) and by `HashJoinBuild`/`Probe`
/// when the build and probe sides are both partitioned.
pub fn partition_of(key: &ScalarValue, num_partitions: usize) -> usize {
    if num_partitions <= 1 {
        return 0;
    }
    let bytes = key.hash_bytes();
    let mut hasher = twox_hash::XxHash64::with_seed(0);
    use std::hash::Hasher;
    hasher.write(&bytes);
    (hasher.finish() % num_partitions as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_of_is_stable_and_in_range() {
        let key = ScalarValue::Int64(42);
        let p1 = partition_of(&key, 8);
        let p2 = partition_of(&key, 8);
        assert_eq!(p1, p2);
        assert!(p1 < 8);
    }

    #[test]
    fn single_partition_always_zero() {
        assert_eq!(partition_of(&ScalarValue::Int64(7), 1), 0);
    }

    #[test]
    fn distinct_keys_spread_across_partitions() {
        let mut seen = std::collections::HashSet::new();
        for i in 0..64i64 {
            seen.insert(partition_of(&ScalarValue::Int64(i), 16));
        }
        assert!(seen.len() > 1, "all keys landed on the same partition");
    }
}
