//! Core identifier newtypes and the reserved state-key wire contract.
//!
//! Node and channel identities are plain strings in the graph model (unlike
//! the closed `NodeKind`/`ChannelType` enums of earlier revisions of this
//! crate) because the graph schema is author-defined: any node id the
//! caller registers, and any channel name a trigger/edge references, must
//! be representable without a central registry of variants.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a node within a compiled [`crate::graph::Graph`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifies a named, versioned [`crate::channels::Channel`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelName(pub String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic barrier-channel name for a join targeting `target`
    /// from the set of `starts`. Kept stable across restarts so a resumed
    /// run addresses the same barrier channel.
    pub fn join_channel(target: &NodeId, starts: &[NodeId]) -> Self {
        let mut sorted: Vec<&str> = starts.iter().map(NodeId::as_str).collect();
        sorted.sort_unstable();
        Self(format!("__join__:{}:[{}]", target.as_str(), sorted.join(",")))
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ChannelName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Reserved state keys forming the wire contract between the core and node
/// implementations. Node bodies may read these out of the state overlay
/// they are handed, but must never write them directly (see
/// [`is_protected`]).
pub mod reserved {
    pub const COMMAND: &str = "__command__";
    pub const RESUME: &str = "__resume__";
    pub const RESUME_MAP: &str = "__resume_map__";
    pub const USED_INTERRUPTS: &str = "__used_interrupts__";
    pub const NEXT_NODES: &str = "__next_nodes__";
    pub const GRAPH_INTERRUPT_INPUTS: &str = "__graph_interrupt_inputs__";
    pub const SESSION: &str = "__session__";
    pub const CURRENT_NODE: &str = "__current_node__";
    pub const EXEC_CONTEXT: &str = "__exec_context__";
    pub const NODE_CALLBACKS: &str = "__node_callbacks__";
    pub const ONE_SHOT_MESSAGES: &str = "__one_shot_messages__";

    pub const ALL: &[&str] = &[
        COMMAND,
        RESUME,
        RESUME_MAP,
        USED_INTERRUPTS,
        NEXT_NODES,
        GRAPH_INTERRUPT_INPUTS,
        SESSION,
        CURRENT_NODE,
        EXEC_CONTEXT,
        NODE_CALLBACKS,
        ONE_SHOT_MESSAGES,
    ];

    /// True if `key` is one of the reserved internal keys, or carries the
    /// reserved `__..__` prefix/suffix convention used for future internal
    /// keys.
    pub fn is_protected(key: &str) -> bool {
        ALL.contains(&key) || (key.starts_with("__") && key.ends_with("__"))
    }
}

/// Checkpoint addressing coordinate: `(lineage, namespace, checkpoint id)`.
///
/// `namespace` is the empty string by default; `lineage` groups all
/// checkpoints belonging to one run/conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub lineage_id: String,
    #[serde(default)]
    pub namespace: String,
    /// Empty means "resolve to the latest checkpoint in (lineage, ns)".
    #[serde(default)]
    pub checkpoint_id: String,
}

impl CheckpointRef {
    pub fn new(lineage_id: impl Into<String>) -> Self {
        Self {
            lineage_id: lineage_id.into(),
            namespace: String::new(),
            checkpoint_id: String::new(),
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = checkpoint_id.into();
        self
    }

    pub fn is_latest(&self) -> bool {
        self.checkpoint_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_channel_name_is_order_independent() {
        let target = NodeId::from("join");
        let a = ChannelName::join_channel(&target, &[NodeId::from("b"), NodeId::from("c")]);
        let b = ChannelName::join_channel(&target, &[NodeId::from("c"), NodeId::from("b")]);
        assert_eq!(a, b);
    }

    #[test]
    fn protected_keys_cover_reserved_set() {
        assert!(reserved::is_protected(reserved::COMMAND));
        assert!(reserved::is_protected("__future_internal__"));
        assert!(!reserved::is_protected("counter"));
    }
}
