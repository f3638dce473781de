//! Edge kinds a compiled [`super::Graph`] may carry: direct, conditional
//! (unifying the spec's "conditional"/"multi-conditional" into one shape
//! whose condition returns zero or more symbols), and join (spec §4.3).

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::state::State;
use crate::types::NodeId;

/// A pure function evaluated against a node's output state, resolving to
/// zero or more symbolic routing keys. A single-element result models the
/// spec's plain "conditional edge"; multiple elements model a
/// "multi-conditional edge" fanning out to several targets in one step.
pub type Condition = Arc<dyn Fn(&State) -> Vec<String> + Send + Sync>;

#[derive(Clone)]
pub struct ConditionalEdge {
    pub from: NodeId,
    pub condition: Condition,
    /// Explicit symbol→node mapping. Wins over the source node's `ends`
    /// map when both could resolve the same symbol (spec §4.4).
    pub path_map: FxHashMap<String, NodeId>,
}

impl ConditionalEdge {
    /// Every node this edge could possibly route to — used at compile
    /// time to pre-register branch channels and destination validation.
    pub fn possible_targets(&self) -> impl Iterator<Item = &NodeId> {
        self.path_map.values()
    }
}

/// A deterministic barrier join: `target` runs once every node in
/// `starts` has completed and written its sender mark to the join's
/// barrier channel (spec §4.3, §9 "Barrier channel naming").
#[derive(Clone, Debug)]
pub struct JoinEdge {
    pub target: NodeId,
    pub starts: Vec<NodeId>,
}
