//! Optional `petgraph` interop for reachability diagnostics and `.dot`
//! export, gated behind the `petgraph-compat` feature (spec §9 grounding:
//! kept from the teacher's graph-diagnostics dependency, narrowed to a
//! single concern rather than replacing the core's own compile-time
//! validation).

use petgraph::graph::DiGraph;

use super::builder::GraphBuilder;
use crate::types::NodeId;

impl GraphBuilder {
    /// Converts the direct-edge subgraph into a `petgraph::DiGraph` for
    /// callers that want to run their own graph algorithms over it.
    pub fn to_petgraph(&self) -> DiGraph<NodeId, (), u32> {
        let mut graph: DiGraph<NodeId, (), u32> = DiGraph::default();
        let mut indices = rustc_hash::FxHashMap::default();
        for id in self.nodes() {
            indices.insert(id.clone(), graph.add_node(id.clone()));
        }
        for (from, to) in self.edges() {
            if let (Some(&a), Some(&b)) = (indices.get(from), indices.get(to)) {
                graph.add_edge(a, b, ());
            }
        }
        graph
    }

    /// Graphviz `.dot` rendering of the direct-edge subgraph.
    pub fn to_dot(&self) -> String {
        let graph = self.to_petgraph();
        format!("{}", petgraph::dot::Dot::with_config(&graph, &[]))
    }

    /// Whether the direct-edge subgraph contains a cycle, computed via
    /// `petgraph`'s Tarjan SCC rather than this crate's own topological
    /// sort (useful as a cross-check / for callers already depending on
    /// `petgraph` elsewhere).
    pub fn is_cyclic_petgraph(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.to_petgraph())
    }
}
