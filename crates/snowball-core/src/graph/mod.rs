//! Follower graph: assembly, k-core filtering and GEXF export.

pub mod assemble;
pub mod export;
pub mod kcore;

pub use assemble::GraphAssembler;
pub use export::{read_gexf, read_gexf_nodes, write_gexf, write_gexf_file};
pub use kcore::k_core;

use petgraph::stable_graph::{NodeIndex, StableUnGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde::Serialize;
use snowball_common::{Handle, Level};
use std::collections::{BTreeSet, HashMap};

/// Node payload: the account and the crawl level it was first seen at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeAttrs {
    pub handle: Handle,
    pub level: Option<Level>,
}

/// Undirected account graph keyed by handle. Node indices stay valid across
/// removals, so filters can delete nodes while walking the index.
#[derive(Debug, Clone, Default)]
pub struct SocialGraph {
    graph: StableUnGraph<NodeAttrs, ()>,
    index: HashMap<Handle, NodeIndex>,
}

impl SocialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handle` if missing and returns its index.
    pub fn add_node(&mut self, handle: &Handle) -> NodeIndex {
        if let Some(idx) = self.index.get(handle) {
            return *idx;
        }
        let idx = self.graph.add_node(NodeAttrs { handle: handle.clone(), level: None });
        self.index.insert(handle.clone(), idx);
        idx
    }

    /// Adds an undirected edge, creating both endpoints. Self-loops and
    /// repeated edges are ignored; returns whether a new edge was added.
    pub fn add_edge(&mut self, a: &Handle, b: &Handle) -> bool {
        if a == b {
            self.add_node(a);
            return false;
        }
        let ia = self.add_node(a);
        let ib = self.add_node(b);
        if self.graph.find_edge(ia, ib).is_some() {
            return false;
        }
        self.graph.add_edge(ia, ib, ());
        true
    }

    /// Sets the level unless one is already recorded. Absent nodes are skipped.
    pub fn set_level_if_unset(&mut self, handle: &Handle, level: Level) -> bool {
        let Some(idx) = self.index.get(handle) else {
            return false;
        };
        match self.graph.node_weight_mut(*idx) {
            Some(attrs) if attrs.level.is_none() => {
                attrs.level = Some(level);
                true
            }
            _ => false,
        }
    }

    pub fn level(&self, handle: &Handle) -> Option<Level> {
        self.attrs(handle).and_then(|attrs| attrs.level)
    }

    pub fn attrs(&self, handle: &Handle) -> Option<&NodeAttrs> {
        self.index.get(handle).and_then(|idx| self.graph.node_weight(*idx))
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.index.contains_key(handle)
    }

    pub fn has_edge(&self, a: &Handle, b: &Handle) -> bool {
        match (self.index.get(a), self.index.get(b)) {
            (Some(ia), Some(ib)) => self.graph.find_edge(*ia, *ib).is_some(),
            _ => false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn degree(&self, handle: &Handle) -> usize {
        self.index
            .get(handle)
            .map_or(0, |idx| self.graph.neighbors(*idx).count())
    }

    pub fn neighbors(&self, handle: &Handle) -> Vec<Handle> {
        let Some(idx) = self.index.get(handle) else {
            return Vec::new();
        };
        let mut out: Vec<Handle> = self.graph
            .neighbors(*idx)
            .filter_map(|n| self.graph.node_weight(n))
            .map(|attrs| attrs.handle.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Node payloads in handle order.
    pub fn nodes(&self) -> Vec<&NodeAttrs> {
        let mut nodes: Vec<&NodeAttrs> = self.graph.node_weights().collect();
        nodes.sort_by(|a, b| a.handle.cmp(&b.handle));
        nodes
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.nodes().into_iter().map(|attrs| attrs.handle.clone()).collect()
    }

    /// Edges as `(smaller, larger)` handle pairs, sorted.
    pub fn edges(&self) -> Vec<(Handle, Handle)> {
        let mut edges: Vec<(Handle, Handle)> = self.graph
            .edge_references()
            .filter_map(|edge| {
                let a = &self.graph.node_weight(edge.source())?.handle;
                let b = &self.graph.node_weight(edge.target())?.handle;
                Some(if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) })
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn self_loop_count(&self) -> usize {
        self.graph
            .edge_references()
            .filter(|edge| edge.source() == edge.target())
            .count()
    }

    pub fn remove_node(&mut self, handle: &Handle) -> Option<NodeAttrs> {
        let idx = self.index.remove(handle)?;
        self.graph.remove_node(idx)
    }

    /// Induced subgraph on `members`, keeping levels. Unknown handles are ignored.
    pub fn subgraph<'a, I>(&self, members: I) -> SocialGraph
    where
        I: IntoIterator<Item = &'a Handle>,
    {
        let keep: BTreeSet<&Handle> = members.into_iter().filter(|h| self.contains(h)).collect();
        let mut sub = SocialGraph::new();
        for handle in &keep {
            sub.add_node(handle);
            if let Some(level) = self.level(handle) {
                sub.set_level_if_unset(handle, level);
            }
        }
        for (a, b) in self.edges() {
            if keep.contains(&a) && keep.contains(&b) {
                sub.add_edge(&a, &b);
            }
        }
        sub
    }

    /// Count of nodes per level, with unlevelled nodes under `None`.
    pub fn level_histogram(&self) -> Vec<(Option<Level>, usize)> {
        let mut counts: HashMap<Option<Level>, usize> = HashMap::new();
        for attrs in self.graph.node_weights() {
            *counts.entry(attrs.level).or_default() += 1;
        }
        let mut histogram: Vec<_> = counts.into_iter().collect();
        histogram.sort();
        histogram
    }
}

impl PartialEq for SocialGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes() == other.nodes() && self.edges() == other.edges()
    }
}

impl Eq for SocialGraph {}
