use snowball_common::Handle;
use std::collections::{HashMap, VecDeque};

use super::SocialGraph;

/// Maximal subgraph in which every node has degree >= `k`.
///
/// Peels low-degree nodes with a work queue seeded in handle order, so the
/// result does not depend on insertion order. Idempotent.
pub fn k_core(graph: &SocialGraph, k: usize) -> SocialGraph {
    let mut degrees: HashMap<Handle, usize> = graph
        .handles()
        .into_iter()
        .map(|handle| {
            let degree = graph.degree(&handle);
            (handle, degree)
        })
        .collect();

    let mut queue: VecDeque<Handle> = graph
        .handles()
        .into_iter()
        .filter(|handle| degrees[handle] < k)
        .collect();

    let mut removed = 0usize;
    while let Some(handle) = queue.pop_front() {
        if degrees.remove(&handle).is_none() {
            continue;
        }
        removed += 1;
        for neighbor in graph.neighbors(&handle) {
            if let Some(degree) = degrees.get_mut(&neighbor) {
                *degree = degree.saturating_sub(1);
                if *degree + 1 == k {
                    queue.push_back(neighbor);
                }
            }
        }
    }

    let core = graph.subgraph(degrees.keys());
    tracing::debug!(k, before = graph.node_count(), removed, after = core.node_count(), "k-core applied");
    core
}
