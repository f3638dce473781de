//! The compiled, immutable graph: nodes, edges (direct/conditional/join),
//! triggers, entry/finish points, per-node `ends`, and the schema (spec
//! §2, §4.3). Built via [`GraphBuilder`] and validated by `compile()`.

pub mod builder;
pub mod compile;
pub mod edges;

#[cfg(feature = "petgraph-compat")]
pub mod petgraph_compat;

pub use builder::GraphBuilder;
pub use compile::GraphCompileError;
pub use edges::{Condition, ConditionalEdge, JoinEdge};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::channels::ChannelDef;
use crate::node::Node;
use crate::state::StateSchema;
use crate::types::{ChannelName, NodeId};

pub type ChannelDefs = FxHashMap<ChannelName, ChannelDef>;
pub type Triggers = FxHashMap<ChannelName, Vec<NodeId>>;

/// An immutable, compiled workflow graph. Shared (`Arc`-wrapped by
/// callers) across every run dispatched against it; all mutable per-run
/// state lives in the scheduler's `ExecutionContext` instead (spec §5).
pub struct Graph {
    schema: StateSchema,
    nodes: FxHashMap<NodeId, Arc<dyn Node>>,
    direct_edges: FxHashMap<NodeId, Vec<NodeId>>,
    conditional_edges: FxHashMap<NodeId, ConditionalEdge>,
    join_edges: Vec<JoinEdge>,
    joins_by_start: FxHashMap<NodeId, Vec<JoinEdge>>,
    ends: FxHashMap<NodeId, FxHashMap<String, NodeId>>,
    entry: NodeId,
    finish_points: BTreeSet<NodeId>,
    channel_defs: ChannelDefs,
    triggers: Triggers,
    node_triggers: FxHashMap<NodeId, Vec<ChannelName>>,
    interrupt_before: BTreeSet<NodeId>,
    interrupt_after: BTreeSet<NodeId>,
    node_timeouts: FxHashMap<NodeId, Duration>,
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn entry(&self) -> &NodeId {
        &self.entry
    }

    pub fn finish_points(&self) -> &BTreeSet<NodeId> {
        &self.finish_points
    }

    pub fn is_finish_point(&self, id: &NodeId) -> bool {
        self.finish_points.contains(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn channel_defs(&self) -> &ChannelDefs {
        &self.channel_defs
    }

    /// Channels that trigger `node`, i.e. the channels the planner checks
    /// this node's eligibility against (spec §4.4.a).
    pub fn node_triggers(&self, node: &NodeId) -> &[ChannelName] {
        self.node_triggers.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes triggered by `channel` — the reverse of `node_triggers`.
    pub fn triggers_for_channel(&self, channel: &ChannelName) -> &[NodeId] {
        self.triggers.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn direct_edges_from(&self, from: &NodeId) -> &[NodeId] {
        self.direct_edges.get(from).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn conditional_edge(&self, from: &NodeId) -> Option<&ConditionalEdge> {
        self.conditional_edges.get(from)
    }

    /// Joins for which `node` is one of the barrier's expected starts.
    pub fn joins_by_start(&self, node: &NodeId) -> &[JoinEdge] {
        self.joins_by_start.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ends_for(&self, node: &NodeId) -> Option<&FxHashMap<String, NodeId>> {
        self.ends.get(node)
    }

    /// Resolves a `Command::GoTo`/conditional-edge symbol to a concrete
    /// node id: the source node's `ends` map wins; otherwise the symbol is
    /// treated as a literal node id (spec §4.4, §9 "Ends symbolism").
    pub fn resolve_symbol(&self, from: &NodeId, symbol: &str) -> Option<NodeId> {
        if let Some(ends) = self.ends.get(from) {
            if let Some(target) = ends.get(symbol) {
                return Some(target.clone());
            }
        }
        let candidate = NodeId::from(symbol);
        self.nodes.contains_key(&candidate).then_some(candidate)
    }

    pub fn interrupt_before(&self, node: &NodeId) -> bool {
        self.interrupt_before.contains(node)
    }

    pub fn interrupt_after(&self, node: &NodeId) -> bool {
        self.interrupt_after.contains(node)
    }

    /// The configured `nodeTimeout` for `node`, if any (spec §4.4.c).
    pub fn node_timeout(&self, node: &NodeId) -> Option<Duration> {
        self.node_timeouts.get(node).copied()
    }

    /// The deterministic channel naming a direct/conditional routing edge
    /// uses, so the same branch is addressed across restarts.
    pub fn branch_channel(from: &NodeId, to: &NodeId) -> ChannelName {
        ChannelName::new(format!("branch::{}->{}", from.as_str(), to.as_str()))
    }

    /// The single channel that triggers the entry node at run start.
    pub fn entry_channel() -> ChannelName {
        ChannelName::new("__entry__")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeContext, NodeError, NodePartial};
    use crate::state::StateSnapshot;
    use async_trait::async_trait;

    struct NoopNode;

    #[async_trait]
    impl Node for NoopNode {
        async fn run(&self, _snapshot: StateSnapshot, _ctx: NodeContext) -> Result<NodePartial, NodeError> {
            Ok(NodePartial::default())
        }
    }

    #[test]
    fn compile_requires_entry() {
        let err = GraphBuilder::new().add_node("a", NoopNode).compile().unwrap_err();
        assert!(matches!(err, GraphCompileError::MissingEntry));
    }

    #[test]
    fn compile_rejects_unknown_edge_destination() {
        let err = GraphBuilder::new()
            .add_node("a", NoopNode)
            .set_entry("a")
            .add_edge("a", "missing")
            .compile()
            .unwrap_err();
        assert!(matches!(err, GraphCompileError::UnknownDestination { .. }));
    }

    #[test]
    fn compile_registers_branch_channel_and_trigger() {
        let graph = GraphBuilder::new()
            .add_node("a", NoopNode)
            .add_node("b", NoopNode)
            .set_entry("a")
            .add_finish_point("b")
            .add_edge("a", "b")
            .compile()
            .unwrap();

        let channel = Graph::branch_channel(&NodeId::from("a"), &NodeId::from("b"));
        assert!(graph.channel_defs().contains_key(&channel));
        assert_eq!(graph.triggers_for_channel(&channel), &[NodeId::from("b")]);
        assert_eq!(graph.node_triggers(&NodeId::from("b")), &[channel]);
    }

    #[test]
    fn resolve_symbol_prefers_ends_map_then_literal_id() {
        let mut ends = FxHashMap::default();
        ends.insert("toB".to_string(), NodeId::from("b"));
        let graph = GraphBuilder::new()
            .add_node("a", NoopNode)
            .add_node("b", NoopNode)
            .set_entry("a")
            .add_finish_point("b")
            .with_ends("a", ends)
            .compile()
            .unwrap();

        assert_eq!(graph.resolve_symbol(&NodeId::from("a"), "toB"), Some(NodeId::from("b")));
        assert_eq!(graph.resolve_symbol(&NodeId::from("a"), "b"), Some(NodeId::from("b")));
        assert_eq!(graph.resolve_symbol(&NodeId::from("a"), "nowhere"), None);
    }
}
