//! Fluent builder for assembling a [`super::Graph`] before `compile()`.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use super::edges::{Condition, ConditionalEdge, JoinEdge};
use super::ChannelDefs;
use crate::channels::ChannelDef;
use crate::node::Node;
use crate::state::{State, StateSchema};
use crate::types::{ChannelName, NodeId};

use std::collections::BTreeSet;

#[derive(Clone)]
pub struct GraphBuilder {
    pub(super) schema: StateSchema,
    pub(super) nodes: FxHashMap<NodeId, Arc<dyn Node>>,
    pub(super) direct_edges: FxHashMap<NodeId, Vec<NodeId>>,
    pub(super) conditional_edges: FxHashMap<NodeId, ConditionalEdge>,
    pub(super) join_edges: Vec<JoinEdge>,
    pub(super) ends: FxHashMap<NodeId, FxHashMap<String, NodeId>>,
    pub(super) entry: Option<NodeId>,
    pub(super) finish_points: BTreeSet<NodeId>,
    pub(super) extra_channels: ChannelDefs,
    pub(super) interrupt_before: BTreeSet<NodeId>,
    pub(super) interrupt_after: BTreeSet<NodeId>,
    pub(super) node_timeouts: FxHashMap<NodeId, Duration>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            schema: StateSchema::new(),
            nodes: FxHashMap::default(),
            direct_edges: FxHashMap::default(),
            conditional_edges: FxHashMap::default(),
            join_edges: Vec::new(),
            ends: FxHashMap::default(),
            entry: None,
            finish_points: BTreeSet::new(),
            extra_channels: FxHashMap::default(),
            interrupt_before: BTreeSet::new(),
            interrupt_after: BTreeSet::new(),
            node_timeouts: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: StateSchema) -> Self {
        self.schema = schema;
        self
    }

    #[must_use]
    pub fn add_node(mut self, id: impl Into<NodeId>, node: impl Node + 'static) -> Self {
        self.nodes.insert(id.into(), Arc::new(node));
        self
    }

    #[must_use]
    pub fn add_node_arc(mut self, id: impl Into<NodeId>, node: Arc<dyn Node>) -> Self {
        self.nodes.insert(id.into(), node);
        self
    }

    #[must_use]
    pub fn set_entry(mut self, id: impl Into<NodeId>) -> Self {
        self.entry = Some(id.into());
        self
    }

    #[must_use]
    pub fn add_finish_point(mut self, id: impl Into<NodeId>) -> Self {
        self.finish_points.insert(id.into());
        self
    }

    #[must_use]
    pub fn add_edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.direct_edges.entry(from.into()).or_default().push(to.into());
        self
    }

    /// Registers a conditional edge. `condition` is evaluated against the
    /// source node's output state after it runs; each symbol it returns is
    /// resolved via `path_map` (falling back to the node's `ends` map) to
    /// a destination. A condition returning more than one symbol models
    /// the spec's "multi-conditional edge".
    #[must_use]
    pub fn add_conditional_edge(
        mut self,
        from: impl Into<NodeId>,
        condition: impl Fn(&State) -> Vec<String> + Send + Sync + 'static,
        path_map: FxHashMap<String, NodeId>,
    ) -> Self {
        let from = from.into();
        self.conditional_edges.insert(
            from.clone(),
            ConditionalEdge {
                from,
                condition: Arc::new(condition) as Condition,
                path_map,
            },
        );
        self
    }

    #[must_use]
    pub fn add_join_edge(mut self, target: impl Into<NodeId>, starts: Vec<NodeId>) -> Self {
        self.join_edges.push(JoinEdge {
            target: target.into(),
            starts,
        });
        self
    }

    #[must_use]
    pub fn with_ends(mut self, node: impl Into<NodeId>, ends: FxHashMap<String, NodeId>) -> Self {
        self.ends.insert(node.into(), ends);
        self
    }

    #[must_use]
    pub fn with_channel(mut self, name: impl Into<ChannelName>, def: ChannelDef) -> Self {
        self.extra_channels.insert(name.into(), def);
        self
    }

    /// Marks `id` to pause the run before it executes, honored exactly
    /// once per reached checkpoint (spec §4.4.b, §4.5).
    #[must_use]
    pub fn with_interrupt_before(mut self, id: impl Into<NodeId>) -> Self {
        self.interrupt_before.insert(id.into());
        self
    }

    /// Marks `id` to pause the run after it completes, before its
    /// successors are planned (spec §4.5 "Static after").
    #[must_use]
    pub fn with_interrupt_after(mut self, id: impl Into<NodeId>) -> Self {
        self.interrupt_after.insert(id.into());
        self
    }

    /// Bounds how long a dispatched invocation of `id` may run before the
    /// scheduler treats it as failed with `NodeError::ContextCancelled`
    /// (spec §4.4.c `nodeTimeout`).
    #[must_use]
    pub fn with_node_timeout(mut self, id: impl Into<NodeId>, timeout: Duration) -> Self {
        self.node_timeouts.insert(id.into(), timeout);
        self
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&NodeId, &NodeId)> {
        self.direct_edges.iter().flat_map(|(from, tos)| tos.iter().map(move |to| (from, to)))
    }

    /// Kahn's-algorithm topological order over the direct-edge subgraph
    /// only (conditional/join edges are data-dependent, not structural).
    /// Returns `None` if the direct-edge subgraph is cyclic.
    pub fn topological_sort(&self) -> Option<Vec<NodeId>> {
        let mut in_degree: FxHashMap<NodeId, usize> = self.nodes.keys().map(|n| (n.clone(), 0)).collect();
        for tos in self.direct_edges.values() {
            for to in tos {
                *in_degree.entry(to.clone()).or_insert(0) += 1;
            }
        }

        let mut ready: Vec<NodeId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort();

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = std::collections::VecDeque::from(ready);
        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            if let Some(tos) = self.direct_edges.get(&id) {
                let mut newly_ready = Vec::new();
                for to in tos {
                    if let Some(degree) = in_degree.get_mut(to) {
                        *degree -= 1;
                        if *degree == 0 {
                            newly_ready.push(to.clone());
                        }
                    }
                }
                newly_ready.sort();
                for id in newly_ready {
                    queue.push_back(id);
                }
            }
        }

        (order.len() == self.nodes.len()).then_some(order)
    }
}
