// Community detection over the filtered follower graph.
//
// Strategies:
// - Louvain: local moves plus aggregation, seeded node order
// - Greedy modularity: Clauset-Newman-Moore agglomeration
//
// Both return every node in exactly one block; blocks come back largest
// first so community numbering is stable between runs.

mod greedy;
mod louvain;

pub use greedy::GreedyModularity;
pub use louvain::Louvain;

use serde::Serialize;
use snowball_common::config::{CommunityAlgorithm, GraphConfig};
use snowball_common::Handle;
use std::collections::{BTreeMap, HashMap};

use crate::graph::SocialGraph;

/// Pluggable partitioning algorithm.
pub trait CommunityStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn partition(&self, graph: &SocialGraph) -> Partition;
}

pub fn create_strategy(config: &GraphConfig) -> Box<dyn CommunityStrategy> {
    match config.algorithm {
        CommunityAlgorithm::Louvain => Box::new(
            Louvain::new()
                .with_seed(config.seed)
                .with_resolution(config.resolution),
        ),
        CommunityAlgorithm::GreedyModularity => Box::new(GreedyModularity::new().with_resolution(config.resolution)),
    }
}

/// Disjoint blocks covering a graph's nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Partition {
    blocks: Vec<Vec<Handle>>,
}

impl Partition {
    /// Normalizes blocks: members sorted, empty blocks dropped, blocks
    /// ordered by size descending then smallest member.
    pub fn new(blocks: Vec<Vec<Handle>>) -> Self {
        let mut blocks: Vec<Vec<Handle>> = blocks
            .into_iter()
            .filter(|block| !block.is_empty())
            .map(|mut block| {
                block.sort();
                block.dedup();
                block
            })
            .collect();
        blocks.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));
        Self { blocks }
    }

    /// Groups `handles[i]` by `labels[i]`.
    pub(crate) fn from_labels(handles: &[Handle], labels: &[usize]) -> Self {
        let mut groups: BTreeMap<usize, Vec<Handle>> = BTreeMap::new();
        for (handle, label) in handles.iter().zip(labels) {
            groups.entry(*label).or_default().push(handle.clone());
        }
        Self::new(groups.into_values().collect())
    }

    pub fn blocks(&self) -> &[Vec<Handle>] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.blocks.iter().map(Vec::len).collect()
    }

    pub fn node_count(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    /// Handle -> block position.
    pub fn membership(&self) -> HashMap<&Handle, usize> {
        self.blocks
            .iter()
            .enumerate()
            .flat_map(|(idx, block)| block.iter().map(move |handle| (handle, idx)))
            .collect()
    }
}

/// Newman modularity of `partition` on `graph`, with resolution `gamma`.
pub fn modularity(graph: &SocialGraph, partition: &Partition, gamma: f64) -> f64 {
    let m = graph.edge_count() as f64;
    if m == 0.0 {
        return 0.0;
    }
    let membership = partition.membership();

    let mut internal = vec![0.0f64; partition.len()];
    let mut degree_sum = vec![0.0f64; partition.len()];
    for (a, b) in graph.edges() {
        let (Some(ca), Some(cb)) = (membership.get(&a), membership.get(&b)) else {
            continue;
        };
        degree_sum[*ca] += 1.0;
        degree_sum[*cb] += 1.0;
        if ca == cb {
            internal[*ca] += 1.0;
        }
    }

    internal
        .iter()
        .zip(&degree_sum)
        .map(|(l_c, d_c)| l_c / m - gamma * (d_c / (2.0 * m)).powi(2))
        .sum()
}

/// Dense integer view of a graph: handles in sorted order and each edge
/// once as `(i, j)` with `i < j`.
pub(crate) struct IndexedGraph {
    pub handles: Vec<Handle>,
    pub edges: Vec<(usize, usize)>,
}

impl IndexedGraph {
    pub fn new(graph: &SocialGraph) -> Self {
        let handles = graph.handles();
        let position: HashMap<&Handle, usize> = handles.iter().enumerate().map(|(i, h)| (h, i)).collect();
        let edges = graph
            .edges()
            .iter()
            .filter_map(|(a, b)| {
                let (i, j) = (*position.get(a)?, *position.get(b)?);
                Some((i.min(j), i.max(j)))
            })
            .collect();
        Self { handles, edges }
    }

    pub fn node_count(&self) -> usize {
        self.handles.len()
    }

    pub fn degrees(&self) -> Vec<f64> {
        let mut degrees = vec![0.0; self.handles.len()];
        for &(i, j) in &self.edges {
            degrees[i] += 1.0;
            degrees[j] += 1.0;
        }
        degrees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn graph_of(edges: &[(&str, &str)]) -> SocialGraph {
        let mut graph = SocialGraph::new();
        for (a, b) in edges {
            graph.add_edge(&Handle::new(a), &Handle::new(b));
        }
        graph
    }

    /// Two 4-cliques joined by a single bridge d-e.
    pub(crate) fn two_cliques() -> SocialGraph {
        graph_of(&[
            ("a", "b"), ("a", "c"), ("a", "d"), ("b", "c"), ("b", "d"), ("c", "d"),
            ("e", "f"), ("e", "g"), ("e", "h"), ("f", "g"), ("f", "h"), ("g", "h"),
            ("d", "e"),
        ])
    }

    fn names(block: &[Handle]) -> Vec<&str> {
        block.iter().map(Handle::as_str).collect()
    }

    pub(crate) fn assert_covers(graph: &SocialGraph, partition: &Partition) {
        let mut seen: Vec<Handle> = partition.blocks().iter().flatten().cloned().collect();
        seen.sort();
        let before = seen.len();
        seen.dedup();
        assert_eq!(before, seen.len(), "blocks overlap");
        assert_eq!(seen, graph.handles(), "partition does not cover the graph");
    }

    #[test]
    fn test_partition_ordering() {
        let partition = Partition::new(vec![
            vec![Handle::new("z")],
            vec![Handle::new("c"), Handle::new("b")],
            vec![],
            vec![Handle::new("a")],
        ]);
        assert_eq!(partition.sizes(), vec![2, 1, 1]);
        assert_eq!(names(&partition.blocks()[0]), vec!["b", "c"]);
        assert_eq!(names(&partition.blocks()[1]), vec!["a"]);
    }

    #[test]
    fn test_modularity_of_natural_split() {
        let graph = two_cliques();
        let split = Partition::new(vec![
            ["a", "b", "c", "d"].iter().map(Handle::new).collect(),
            ["e", "f", "g", "h"].iter().map(Handle::new).collect(),
        ]);
        let whole = Partition::new(vec![graph.handles()]);

        let q_split = modularity(&graph, &split, 1.0);
        assert!((q_split - (12.0 / 13.0 - 0.5)).abs() < 1e-9);
        assert!(modularity(&graph, &whole, 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_strategies_on_two_cliques() {
        let graph = two_cliques();
        for algorithm in [CommunityAlgorithm::Louvain, CommunityAlgorithm::GreedyModularity] {
            let config = GraphConfig { algorithm, ..GraphConfig::default() };
            let strategy = create_strategy(&config);
            let partition = strategy.partition(&graph);

            assert_covers(&graph, &partition);
            assert_eq!(partition.len(), 2, "{}", strategy.name());
            assert_eq!(names(&partition.blocks()[0]), vec!["a", "b", "c", "d"], "{}", strategy.name());
            assert_eq!(names(&partition.blocks()[1]), vec!["e", "f", "g", "h"], "{}", strategy.name());
        }
    }

    #[test]
    fn test_degenerate_graphs() {
        let mut edgeless = SocialGraph::new();
        for name in ["a", "b", "c"] {
            edgeless.add_node(&Handle::new(name));
        }

        for algorithm in [CommunityAlgorithm::Louvain, CommunityAlgorithm::GreedyModularity] {
            let strategy = create_strategy(&GraphConfig { algorithm, ..GraphConfig::default() });

            assert!(strategy.partition(&SocialGraph::new()).is_empty());

            let singletons = strategy.partition(&edgeless);
            assert_eq!(singletons.sizes(), vec![1, 1, 1]);
            assert_covers(&edgeless, &singletons);
        }
    }
}
