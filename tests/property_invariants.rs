//! Property-based invariants for the reducer, channel, and checkpoint
//! layers: the pieces whose correctness is defined by an algebraic law
//! rather than a single worked example.

use latticeflow::channels::{Channel, ChannelDef, ChannelWrite};
use latticeflow::checkpoint::Checkpoint;
use latticeflow::state::reducers::{AppendReducer, MergeReducer, OverwriteReducer, Reducer};
use latticeflow::types::ChannelName;
use proptest::collection::{hash_map, vec as pvec};
use proptest::prelude::*;

fn json_scalar() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::Bool),
        any::<i64>().prop_map(|n| serde_json::json!(n)),
        ".{0,12}".prop_map(serde_json::Value::String),
    ]
}

fn json_list() -> impl Strategy<Value = serde_json::Value> {
    pvec(json_scalar(), 0..6).prop_map(serde_json::Value::Array)
}

fn json_object() -> impl Strategy<Value = serde_json::Value> {
    hash_map(".{1,6}", json_scalar(), 0..6).prop_map(|map| serde_json::Value::Object(map.into_iter().collect()))
}

proptest! {
    /// Overwrite is idempotent: applying the same update twice never
    /// differs from applying it once, regardless of what it overwrote.
    #[test]
    fn overwrite_is_idempotent(existing in json_scalar(), update in json_scalar()) {
        let once = OverwriteReducer.apply(&existing, &update);
        let twice = OverwriteReducer.apply(&once, &update);
        prop_assert_eq!(once, twice);
    }

    /// Merge is idempotent: re-merging the same update's keys in again
    /// changes nothing, since every key it touches already carries its value.
    #[test]
    fn merge_is_idempotent(existing in json_object(), update in json_object()) {
        let once = MergeReducer.apply(&existing, &update);
        let twice = MergeReducer.apply(&once, &update);
        prop_assert_eq!(once, twice);
    }

    /// Append is associative: folding three updates left-to-right or
    /// grouping the last two first yields the same concatenated list.
    #[test]
    fn append_is_associative(a in json_list(), b in json_list(), c in json_list()) {
        let left = AppendReducer.apply(&AppendReducer.apply(&a, &b), &c);
        let right = AppendReducer.apply(&a, &AppendReducer.apply(&b, &c));
        prop_assert_eq!(left, right);
    }

    /// A `LastValue` channel's version strictly increases by exactly one
    /// per write and never decreases, regardless of the values written.
    #[test]
    fn last_value_channel_version_is_monotonic(writes in pvec(json_scalar(), 0..20)) {
        let mut channel = Channel::new(ChannelName::from("c"), &ChannelDef::last_value());
        let mut expected = 0u64;
        for (step, value) in writes.into_iter().enumerate() {
            let changed = channel.update(ChannelWrite::Value(value), step as u64);
            prop_assert!(changed);
            expected += 1;
            prop_assert_eq!(channel.version(), expected);
        }
    }

    /// A Barrier channel becomes satisfied exactly once every expected
    /// sender has written, independent of the order they arrive in.
    #[test]
    fn barrier_satisfied_iff_every_expected_sender_has_written(
        senders in pvec("[a-z]{1,4}", 1..5).prop_map(|mut v| { v.sort(); v.dedup(); v }),
        order_seed in any::<u64>(),
    ) {
        let expected: Vec<_> = senders.iter().map(|s| latticeflow::types::NodeId::from(s.as_str())).collect();
        let mut channel = Channel::new(ChannelName::from("join"), &ChannelDef::barrier(expected));
        let mut order = senders.clone();
        // Deterministic shuffle from the seed, no external randomness source.
        let n = order.len();
        for i in (1..n).rev() {
            let j = (order_seed as usize).wrapping_add(i) % (i + 1);
            order.swap(i, j);
        }
        for (step, sender) in order.iter().enumerate() {
            prop_assert!(!channel.barrier_satisfied(), "must not be satisfied before every sender has written");
            channel.update(ChannelWrite::BarrierSender(sender.clone()), step as u64);
        }
        prop_assert!(channel.barrier_satisfied());
    }

    /// A checkpoint survives a JSON round-trip byte-for-byte in its typed
    /// form: every field the scheduler persists comes back unchanged.
    #[test]
    fn checkpoint_round_trips_through_json(
        channel_versions in hash_map("[a-z]{1,6}", any::<u64>(), 0..6),
        updated_channels in pvec("[a-z]{1,6}", 0..6),
        next_nodes in pvec("[a-z]{1,6}", 0..6),
    ) {
        let mut checkpoint = Checkpoint::new("checkpoint-1");
        checkpoint.channel_versions = channel_versions.into_iter().collect();
        checkpoint.updated_channels = updated_channels;
        checkpoint.next_nodes = next_nodes;

        let encoded = serde_json::to_vec(&checkpoint).unwrap();
        let decoded: Checkpoint = serde_json::from_slice(&encoded).unwrap();

        prop_assert_eq!(decoded.id, checkpoint.id);
        prop_assert_eq!(decoded.channel_versions, checkpoint.channel_versions);
        prop_assert_eq!(decoded.updated_channels, checkpoint.updated_channels);
        prop_assert_eq!(decoded.next_nodes, checkpoint.next_nodes);
    }
}
