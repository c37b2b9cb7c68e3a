//! Louvain modularity optimization (Blondel et al. 2008).
//!
//! Phase 1 moves single nodes to the neighboring community with the best
//! modularity gain; phase 2 collapses communities into weighted super-nodes
//! with self-loops for internal weight. The two phases repeat until a level
//! produces no move. Node visiting order is shuffled with a seeded RNG and
//! candidate communities are scanned in index order, so a given seed always
//! yields the same partition.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use snowball_common::config::{DEFAULT_PARTITION_SEED, DEFAULT_RESOLUTION};
use std::collections::{BTreeMap, HashMap};

use super::{CommunityStrategy, IndexedGraph, Partition};
use crate::graph::SocialGraph;

#[derive(Debug, Clone)]
pub struct Louvain {
    seed: u64,
    /// Resolution parameter (gamma). Higher values produce smaller communities.
    resolution: f64,
    max_iter: usize,
    max_levels: usize,
    min_modularity_gain: f64,
}

impl Default for Louvain {
    fn default() -> Self {
        Self::new()
    }
}

/// Weighted graph at one aggregation level.
struct Level {
    n: usize,
    edges: Vec<(usize, usize, f64)>,
    self_loops: Vec<f64>,
}

impl Level {
    fn total_weight(&self) -> f64 {
        self.edges.iter().map(|(_, _, w)| w).sum::<f64>() + self.self_loops.iter().sum::<f64>()
    }

    fn degrees(&self) -> Vec<f64> {
        let mut degrees = vec![0.0; self.n];
        for &(i, j, w) in &self.edges {
            degrees[i] += w;
            degrees[j] += w;
        }
        for (i, &sl) in self.self_loops.iter().enumerate() {
            degrees[i] += 2.0 * sl;
        }
        degrees
    }
}

impl Louvain {
    pub fn new() -> Self {
        Self {
            seed: DEFAULT_PARTITION_SEED,
            resolution: DEFAULT_RESOLUTION,
            max_iter: 100,
            max_levels: 10,
            min_modularity_gain: 1e-7,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    fn modularity(&self, level: &Level, communities: &[usize]) -> f64 {
        let m = level.total_weight();
        if m == 0.0 {
            return 0.0;
        }
        let degrees = level.degrees();

        let mut internal: HashMap<usize, f64> = HashMap::new();
        let mut totals: HashMap<usize, f64> = HashMap::new();
        for &(i, j, w) in &level.edges {
            if communities[i] == communities[j] {
                *internal.entry(communities[i]).or_default() += w;
            }
        }
        for (i, &sl) in level.self_loops.iter().enumerate() {
            *internal.entry(communities[i]).or_default() += sl;
        }
        for (i, d) in degrees.iter().enumerate() {
            *totals.entry(communities[i]).or_default() += d;
        }

        totals
            .iter()
            .map(|(c, tot)| {
                let inside = internal.get(c).copied().unwrap_or(0.0);
                inside / m - self.resolution * (tot / (2.0 * m)).powi(2)
            })
            .sum()
    }

    /// Phase 1. Returns the community of every node and whether any moved.
    fn local_moving(&self, level: &Level, rng: &mut StdRng) -> (Vec<usize>, bool) {
        let n = level.n;
        let mut adj: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
        for &(i, j, w) in &level.edges {
            *adj[i].entry(j).or_insert(0.0) += w;
            *adj[j].entry(i).or_insert(0.0) += w;
        }

        let m = level.total_weight();
        if m == 0.0 {
            return ((0..n).collect(), false);
        }
        let degrees = level.degrees();

        let mut communities: Vec<usize> = (0..n).collect();
        let mut community_degrees = degrees.clone();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);
        let mut any_moved = false;

        for _ in 0..self.max_iter {
            let mut moved = false;

            for &node in &order {
                let current = communities[node];
                let ki = degrees[node];
                community_degrees[current] -= ki;

                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for (&neighbor, &w) in &adj[node] {
                    *links.entry(communities[neighbor]).or_insert(0.0) += w;
                }

                let gain = |comm: usize, ki_in: f64| {
                    ki_in / m - self.resolution * community_degrees[comm] * ki / (2.0 * m * m)
                };

                let mut best = current;
                let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
                for (&comm, &ki_in) in &links {
                    let candidate = gain(comm, ki_in);
                    if candidate > best_gain {
                        best_gain = candidate;
                        best = comm;
                    }
                }

                community_degrees[best] += ki;
                if best != current {
                    communities[node] = best;
                    moved = true;
                    any_moved = true;
                }
            }

            if !moved {
                break;
            }
        }

        (communities, any_moved)
    }

    /// Phase 2. Returns the collapsed level and each old node's new index.
    fn aggregate(level: &Level, communities: &[usize]) -> (Level, Vec<usize>) {
        let mut unique: Vec<usize> = communities.to_vec();
        unique.sort_unstable();
        unique.dedup();
        let renumber: HashMap<usize, usize> = unique.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        let mapping: Vec<usize> = communities.iter().map(|c| renumber[c]).collect();

        let n = unique.len();
        let mut weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let mut self_loops = vec![0.0; n];

        for (i, &sl) in level.self_loops.iter().enumerate() {
            self_loops[mapping[i]] += sl;
        }
        for &(i, j, w) in &level.edges {
            let (ci, cj) = (mapping[i], mapping[j]);
            if ci == cj {
                self_loops[ci] += w;
            } else {
                *weights.entry((ci.min(cj), ci.max(cj))).or_insert(0.0) += w;
            }
        }

        let edges = weights.into_iter().map(|((i, j), w)| (i, j, w)).collect();
        (Level { n, edges, self_loops }, mapping)
    }
}

impl CommunityStrategy for Louvain {
    fn name(&self) -> &'static str {
        "louvain"
    }

    fn partition(&self, graph: &SocialGraph) -> Partition {
        let indexed = IndexedGraph::new(graph);
        let n = indexed.node_count();
        if n == 0 {
            return Partition::default();
        }

        let mut level = Level {
            n,
            edges: indexed.edges.iter().map(|&(i, j)| (i, j, 1.0)).collect(),
            self_loops: vec![0.0; n],
        };
        // original node -> node of the current level
        let mut membership: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut prev_modularity = f64::NEG_INFINITY;

        for depth in 0..self.max_levels {
            let (communities, moved) = self.local_moving(&level, &mut rng);
            if !moved {
                break;
            }

            let q = self.modularity(&level, &communities);
            if q - prev_modularity < self.min_modularity_gain {
                break;
            }
            prev_modularity = q;

            let (next, mapping) = Self::aggregate(&level, &communities);
            for node in membership.iter_mut() {
                *node = mapping[*node];
            }
            tracing::debug!(depth, communities = next.n, modularity = q, "Louvain level done");

            if next.n == level.n {
                break;
            }
            level = next;
        }

        Partition::from_labels(&indexed.handles, &membership)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::modularity;
    use crate::community::tests::{assert_covers, graph_of, two_cliques};

    #[test]
    fn test_same_seed_same_partition() {
        let graph = graph_of(&[
            ("a", "b"), ("b", "c"), ("c", "a"), ("c", "d"), ("d", "e"), ("e", "f"),
            ("f", "d"), ("f", "g"), ("g", "h"), ("h", "i"), ("i", "g"), ("i", "a"),
        ]);
        let first = Louvain::new().with_seed(7).partition(&graph);
        let second = Louvain::new().with_seed(7).partition(&graph);

        assert_eq!(first, second);
        assert_covers(&graph, &first);
    }

    #[test]
    fn test_finds_triangles_in_ring() {
        // three triangles joined in a ring
        let graph = graph_of(&[
            ("a", "b"), ("b", "c"), ("c", "a"),
            ("d", "e"), ("e", "f"), ("f", "d"),
            ("g", "h"), ("h", "i"), ("i", "g"),
            ("c", "d"), ("f", "g"), ("i", "a"),
        ]);
        let partition = Louvain::new().partition(&graph);

        assert_eq!(partition.sizes(), vec![3, 3, 3]);
        assert!(modularity(&graph, &partition, 1.0) > 0.3);
    }

    #[test]
    fn test_improves_on_singletons() {
        let graph = two_cliques();
        let partition = Louvain::new().partition(&graph);
        let singletons = Partition::new(graph.handles().into_iter().map(|h| vec![h]).collect());

        assert!(modularity(&graph, &partition, 1.0) > modularity(&graph, &singletons, 1.0));
    }

    #[test]
    fn test_isolated_node_stays_alone() {
        let mut graph = two_cliques();
        graph.add_node(&snowball_common::Handle::new("zed"));
        let partition = Louvain::new().partition(&graph);

        assert_covers(&graph, &partition);
        assert_eq!(partition.blocks().last().map(Vec::len), Some(1));
    }
}
