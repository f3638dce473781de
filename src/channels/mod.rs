//! The channel layer: named, versioned communication slots between nodes.
//!
//! A [`Channel`] tracks its current value(s), a monotonic version, the step
//! it was last updated on, an `available` flag consumed by the planner,
//! and — for `Barrier` channels — the set of senders it still expects.
//! All mutating operations are guarded by the channel's own lock so a
//! `ChannelManager` can be shared across concurrently-dispatched tasks
//! without a global lock (spec §4.2, §5).

pub mod behavior;
pub mod errors;
pub mod manager;

pub use behavior::{ChannelBehaviorKind, ChannelView, ChannelWrite};
pub use errors::{ErrorEvent, ErrorScope, LadderError};
pub use manager::ChannelManager;

use std::collections::BTreeSet;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by strict [`ChannelManager`] accessors that need to
/// distinguish "channel does not exist" from a no-op write (most of the
/// manager's API returns `bool`/`Option` instead; this is for call sites —
/// graph compilation, scheduler dispatch — that must fail loudly).
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("unknown channel: {name}")]
    #[diagnostic(code(latticeflow::channel::not_found))]
    NotFound { name: String },
}
use serde_json::Value;
use tracing::instrument;

use crate::types::{ChannelName, NodeId};

/// Declares one channel's fixed behavior and, for `Barrier` channels, its
/// expected sender set. Part of the compiled [`crate::graph::Graph`]'s
/// `channelDefs`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelDef {
    pub behavior: ChannelBehaviorKind,
    #[serde(default)]
    pub barrier_expected: Vec<NodeId>,
}

impl ChannelDef {
    pub fn last_value() -> Self {
        Self {
            behavior: ChannelBehaviorKind::LastValue,
            barrier_expected: Vec::new(),
        }
    }

    pub fn topic() -> Self {
        Self {
            behavior: ChannelBehaviorKind::Topic,
            barrier_expected: Vec::new(),
        }
    }

    pub fn ephemeral() -> Self {
        Self {
            behavior: ChannelBehaviorKind::Ephemeral,
            barrier_expected: Vec::new(),
        }
    }

    pub fn barrier(expected: Vec<NodeId>) -> Self {
        Self {
            behavior: ChannelBehaviorKind::Barrier,
            barrier_expected: expected,
        }
    }
}

/// A live, per-run channel instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
    name: ChannelName,
    behavior: ChannelBehaviorKind,
    value: Option<Value>,
    values: Vec<Value>,
    barrier_expected: BTreeSet<String>,
    barrier_seen: BTreeSet<String>,
    version: u64,
    last_updated_step: u64,
    available: bool,
}

impl Channel {
    pub fn new(name: ChannelName, def: &ChannelDef) -> Self {
        Self {
            name,
            behavior: def.behavior,
            value: None,
            values: Vec::new(),
            barrier_expected: def.barrier_expected.iter().map(|n| n.as_str().to_string()).collect(),
            barrier_seen: BTreeSet::new(),
            version: 0,
            last_updated_step: 0,
            available: false,
        }
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    pub fn behavior(&self) -> ChannelBehaviorKind {
        self.behavior
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_updated_step(&self) -> u64 {
        self.last_updated_step
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Applies one write. Returns `true` if the channel's observable state
    /// changed and its version was bumped.
    #[instrument(skip(self, write), fields(channel = %self.name, behavior = ?self.behavior))]
    pub fn update(&mut self, write: ChannelWrite, step: u64) -> bool {
        let changed = match (self.behavior, write) {
            (ChannelBehaviorKind::LastValue, ChannelWrite::Value(v)) => {
                self.value = Some(v);
                true
            }
            (ChannelBehaviorKind::Topic, ChannelWrite::Value(v)) => {
                self.values.push(v);
                true
            }
            (ChannelBehaviorKind::Ephemeral, ChannelWrite::Value(v)) => {
                self.value = Some(v);
                true
            }
            (ChannelBehaviorKind::Barrier, ChannelWrite::BarrierSender(sender)) => {
                if self.barrier_expected.is_empty() || self.barrier_expected.contains(&sender) {
                    self.barrier_seen.insert(sender)
                } else {
                    false
                }
            }
            // Value write against a Barrier channel, or sender write
            // against a non-Barrier channel: not interpretable, ignored.
            _ => false,
        };

        if changed {
            self.version += 1;
            self.last_updated_step = step;
            self.available = true;
        }
        changed
    }

    pub fn get(&self) -> ChannelView<'_> {
        match self.behavior {
            ChannelBehaviorKind::LastValue | ChannelBehaviorKind::Ephemeral => {
                ChannelView::Value(self.value.as_ref())
            }
            ChannelBehaviorKind::Topic => ChannelView::List(&self.values),
            ChannelBehaviorKind::Barrier => ChannelView::BarrierSeen(&self.barrier_seen),
        }
    }

    /// Ephemeral-only: clears the stored value and marks the channel
    /// unavailable. No-op (returns `None`) for any other behavior.
    pub fn consume(&mut self) -> Option<Value> {
        if self.behavior != ChannelBehaviorKind::Ephemeral {
            return None;
        }
        self.available = false;
        self.value.take()
    }

    /// Marks the channel unavailable without touching its version. Called
    /// by the planner once it has used this channel's availability to
    /// decide which nodes run in the current step.
    pub fn acknowledge(&mut self) {
        self.available = false;
    }

    pub fn is_updated_in_step(&self, step: u64) -> bool {
        self.last_updated_step == step
    }

    /// Whether this Barrier channel's expected senders have all written.
    pub fn barrier_satisfied(&self) -> bool {
        self.behavior == ChannelBehaviorKind::Barrier
            && !self.barrier_expected.is_empty()
            && self.barrier_expected.is_subset(&self.barrier_seen)
    }

    pub fn barrier_seen(&self) -> &BTreeSet<String> {
        &self.barrier_seen
    }

    /// Restores runtime fields from a checkpoint: version, last-updated
    /// step, and (for Barrier channels) the seen-sender set. Used when
    /// resuming a run.
    pub fn restore_runtime(&mut self, version: u64, barrier_seen: BTreeSet<String>) {
        self.version = version;
        self.barrier_seen = barrier_seen;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn last_value_update_bumps_version_and_marks_available() {
        let mut ch = Channel::new(ChannelName::from("c"), &ChannelDef::last_value());
        assert!(ch.update(ChannelWrite::Value(json!(1)), 3));
        assert_eq!(ch.version(), 1);
        assert_eq!(ch.last_updated_step(), 3);
        assert!(ch.is_available());
    }

    #[test]
    fn topic_accumulates_writes() {
        let mut ch = Channel::new(ChannelName::from("c"), &ChannelDef::topic());
        ch.update(ChannelWrite::Value(json!("a")), 1);
        ch.update(ChannelWrite::Value(json!("b")), 2);
        match ch.get() {
            ChannelView::List(items) => assert_eq!(items, &[json!("a"), json!("b")]),
            _ => panic!("expected list view"),
        }
    }

    #[test]
    fn ephemeral_consume_clears_and_marks_unavailable() {
        let mut ch = Channel::new(ChannelName::from("c"), &ChannelDef::ephemeral());
        ch.update(ChannelWrite::Value(json!("x")), 1);
        assert_eq!(ch.consume(), Some(json!("x")));
        assert!(!ch.is_available());
        assert_eq!(ch.consume(), None);
    }

    #[test]
    fn barrier_becomes_satisfied_once_all_expected_senders_write() {
        let starts = vec![NodeId::from("b"), NodeId::from("c")];
        let mut ch = Channel::new(ChannelName::from("join"), &ChannelDef::barrier(starts));
        assert!(!ch.barrier_satisfied());
        ch.update(ChannelWrite::BarrierSender("b".into()), 1);
        assert!(!ch.barrier_satisfied());
        ch.update(ChannelWrite::BarrierSender("c".into()), 2);
        assert!(ch.barrier_satisfied());
    }

    #[test]
    fn barrier_ignores_unexpected_sender() {
        let starts = vec![NodeId::from("b")];
        let mut ch = Channel::new(ChannelName::from("join"), &ChannelDef::barrier(starts));
        assert!(!ch.update(ChannelWrite::BarrierSender("z".into()), 1));
    }

    #[test]
    fn acknowledge_clears_available_but_not_version() {
        let mut ch = Channel::new(ChannelName::from("c"), &ChannelDef::last_value());
        ch.update(ChannelWrite::Value(json!(1)), 1);
        ch.acknowledge();
        assert!(!ch.is_available());
        assert_eq!(ch.version(), 1);
    }
}
