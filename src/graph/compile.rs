//! Compile-time validation turning a [`super::GraphBuilder`] into an
//! immutable [`super::Graph`] (spec §2, §4.3).

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::builder::GraphBuilder;
use super::edges::JoinEdge;
use super::{ChannelDefs, Graph, Triggers};
use crate::channels::ChannelDef;
use crate::types::{ChannelName, NodeId};

#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum GraphCompileError {
    #[error("graph has no entry point set")]
    #[diagnostic(
        code(latticeflow::graph::missing_entry),
        help("Call `GraphBuilder::set_entry` before compiling.")
    )]
    MissingEntry,

    #[error("entry point {0:?} is not a registered node")]
    #[diagnostic(code(latticeflow::graph::unknown_entry))]
    UnknownEntry(NodeId),

    #[error("finish point {0:?} is not a registered node")]
    #[diagnostic(code(latticeflow::graph::unknown_finish_point))]
    UnknownFinishPoint(NodeId),

    #[error("edge from {from:?} references unknown destination {to:?}")]
    #[diagnostic(code(latticeflow::graph::unknown_destination))]
    UnknownDestination { from: NodeId, to: NodeId },

    #[error("node {0:?} has no registered implementation but is referenced by an edge")]
    #[diagnostic(code(latticeflow::graph::unknown_source))]
    UnknownSource(NodeId),

    #[error("join targeting {target:?} references unknown start {start:?}")]
    #[diagnostic(code(latticeflow::graph::unknown_join_start))]
    UnknownJoinStart { target: NodeId, start: NodeId },

    #[error("`ends` map for node {node:?} references unknown destination {to:?} for symbol {symbol:?}")]
    #[diagnostic(code(latticeflow::graph::unknown_ends_target))]
    UnknownEndsTarget { node: NodeId, symbol: String, to: NodeId },

    #[error("node id must be non-empty")]
    #[diagnostic(code(latticeflow::graph::empty_node_id))]
    EmptyNodeId,
}

impl GraphBuilder {
    /// Validates every destination reference and produces an immutable
    /// [`Graph`], deriving the control-flow channel set (branch channels
    /// for direct/conditional edges, barrier channels for joins, the
    /// entry channel) and the reverse `channel -> triggered nodes` index.
    pub fn compile(self) -> Result<Graph, GraphCompileError> {
        for id in self.nodes.keys() {
            if id.as_str().is_empty() {
                return Err(GraphCompileError::EmptyNodeId);
            }
        }

        let entry = self.entry.clone().ok_or(GraphCompileError::MissingEntry)?;
        if !self.nodes.contains_key(&entry) {
            return Err(GraphCompileError::UnknownEntry(entry));
        }
        for fp in &self.finish_points {
            if !self.nodes.contains_key(fp) {
                return Err(GraphCompileError::UnknownFinishPoint(fp.clone()));
            }
        }

        for (from, tos) in &self.direct_edges {
            if !self.nodes.contains_key(from) {
                return Err(GraphCompileError::UnknownSource(from.clone()));
            }
            for to in tos {
                if !self.nodes.contains_key(to) {
                    return Err(GraphCompileError::UnknownDestination {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        for (from, cond) in &self.conditional_edges {
            if !self.nodes.contains_key(from) {
                return Err(GraphCompileError::UnknownSource(from.clone()));
            }
            for to in cond.possible_targets() {
                if !self.nodes.contains_key(to) {
                    return Err(GraphCompileError::UnknownDestination {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        for join in &self.join_edges {
            if !self.nodes.contains_key(&join.target) {
                return Err(GraphCompileError::UnknownDestination {
                    from: join.starts.first().cloned().unwrap_or_else(|| join.target.clone()),
                    to: join.target.clone(),
                });
            }
            for start in &join.starts {
                if !self.nodes.contains_key(start) {
                    return Err(GraphCompileError::UnknownJoinStart {
                        target: join.target.clone(),
                        start: start.clone(),
                    });
                }
            }
        }

        for (node, ends) in &self.ends {
            for (symbol, to) in ends {
                if !self.nodes.contains_key(to) {
                    return Err(GraphCompileError::UnknownEndsTarget {
                        node: node.clone(),
                        symbol: symbol.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        let mut channel_defs: ChannelDefs = self.extra_channels.clone();
        let mut triggers: Triggers = FxHashMap::default();
        let mut node_triggers: FxHashMap<NodeId, Vec<ChannelName>> = FxHashMap::default();

        let mut register = |channel: ChannelName, def: ChannelDef, target: NodeId| {
            channel_defs.entry(channel.clone()).or_insert(def);
            triggers.entry(channel.clone()).or_default().push(target.clone());
            node_triggers.entry(target).or_default().push(channel);
        };

        let entry_channel = Graph::entry_channel();
        register(entry_channel, ChannelDef::last_value(), entry.clone());

        for (from, tos) in &self.direct_edges {
            for to in tos {
                let channel = Graph::branch_channel(from, to);
                register(channel, ChannelDef::last_value(), to.clone());
            }
        }

        for (from, cond) in &self.conditional_edges {
            for to in cond.possible_targets() {
                let channel = Graph::branch_channel(from, to);
                register(channel, ChannelDef::last_value(), to.clone());
            }
        }

        for join in &self.join_edges {
            let channel = ChannelName::join_channel(&join.target, &join.starts);
            register(channel, ChannelDef::barrier(join.starts.clone()), join.target.clone());
        }

        let mut joins_by_start: FxHashMap<NodeId, Vec<JoinEdge>> = FxHashMap::default();
        for join in &self.join_edges {
            for start in &join.starts {
                joins_by_start.entry(start.clone()).or_default().push(join.clone());
            }
        }

        Ok(Graph {
            schema: self.schema,
            nodes: self.nodes,
            direct_edges: self.direct_edges,
            conditional_edges: self.conditional_edges,
            join_edges: self.join_edges,
            joins_by_start,
            ends: self.ends,
            entry,
            finish_points: self.finish_points,
            channel_defs,
            triggers,
            node_triggers,
            interrupt_before: self.interrupt_before,
            interrupt_after: self.interrupt_after,
            node_timeouts: self.node_timeouts,
        })
    }
}
