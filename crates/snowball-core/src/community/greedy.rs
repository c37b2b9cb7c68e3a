//! Greedy modularity maximization (Clauset, Newman & Moore 2004).
//!
//! Every node starts alone; the pair of communities whose merge raises
//! modularity the most is joined until no merge helps. Candidate gains sit in
//! a max-heap and are checked against the live gain table on pop, so stale
//! entries are skipped instead of being removed eagerly.

use snowball_common::config::DEFAULT_RESOLUTION;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use super::{CommunityStrategy, IndexedGraph, Partition};
use crate::graph::SocialGraph;

#[derive(Debug, Clone)]
pub struct GreedyModularity {
    resolution: f64,
}

impl Default for GreedyModularity {
    fn default() -> Self {
        Self::new()
    }
}

impl GreedyModularity {
    pub fn new() -> Self {
        Self { resolution: DEFAULT_RESOLUTION }
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }
}

/// Heap entry: gain of merging `i` into `j`. Ties go to the smaller pair.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    gain: f64,
    i: usize,
    j: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.gain
            .total_cmp(&other.gain)
            .then_with(|| other.i.cmp(&self.i))
            .then_with(|| other.j.cmp(&self.j))
    }
}

impl CommunityStrategy for GreedyModularity {
    fn name(&self) -> &'static str {
        "greedy_modularity"
    }

    fn partition(&self, graph: &SocialGraph) -> Partition {
        let indexed = IndexedGraph::new(graph);
        let n = indexed.node_count();
        if n == 0 {
            return Partition::default();
        }
        let m = indexed.edges.len() as f64;
        if m == 0.0 {
            let labels: Vec<usize> = (0..n).collect();
            return Partition::from_labels(&indexed.handles, &labels);
        }

        let gamma = self.resolution;
        let mut a: Vec<f64> = indexed.degrees().iter().map(|k| k / (2.0 * m)).collect();
        let mut dq: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
        let mut heap = BinaryHeap::new();

        for &(i, j) in &indexed.edges {
            let gain = 2.0 * (1.0 / (2.0 * m) - gamma * a[i] * a[j]);
            dq[i].insert(j, gain);
            dq[j].insert(i, gain);
            heap.push(Candidate { gain, i, j });
            heap.push(Candidate { gain, i: j, j: i });
        }

        let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        let mut merges = 0usize;

        while let Some(Candidate { gain, i, j }) = heap.pop() {
            if dq[i].get(&j) != Some(&gain) {
                continue;
            }
            if gain <= 0.0 {
                break;
            }

            // merge i into j
            let row_i = std::mem::take(&mut dq[i]);
            let row_j = std::mem::take(&mut dq[j]);
            let mut merged: BTreeMap<usize, f64> = BTreeMap::new();

            for (&k, &gain_ik) in &row_i {
                if k == j {
                    continue;
                }
                let gain_jk = match row_j.get(&k) {
                    Some(&gain_jk) => gain_ik + gain_jk,
                    None => gain_ik - 2.0 * gamma * a[j] * a[k],
                };
                merged.insert(k, gain_jk);
            }
            for (&k, &gain_jk) in &row_j {
                if k == i || row_i.contains_key(&k) {
                    continue;
                }
                merged.insert(k, gain_jk - 2.0 * gamma * a[i] * a[k]);
            }

            for (&k, &gain_jk) in &merged {
                dq[k].remove(&i);
                dq[k].insert(j, gain_jk);
                heap.push(Candidate { gain: gain_jk, i: j, j: k });
                heap.push(Candidate { gain: gain_jk, i: k, j });
            }
            dq[j] = merged;

            a[j] += a[i];
            a[i] = 0.0;
            let moved = std::mem::take(&mut members[i]);
            members[j].extend(moved);
            merges += 1;
        }

        tracing::debug!(nodes = n, merges, "Greedy modularity finished");

        let mut labels = vec![0usize; n];
        for (community, nodes) in members.iter().enumerate() {
            for &node in nodes {
                labels[node] = community;
            }
        }
        Partition::from_labels(&indexed.handles, &labels)
    }
}
