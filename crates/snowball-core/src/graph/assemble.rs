use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use snowball_common::{Handle, Level, RelationMap};
use std::collections::HashMap;

use super::SocialGraph;

/// Builds the follower graph level by level.
///
/// Edges point from follower to followed account while building. Levels are
/// applied after each level's edges, first assignment wins, and `finish`
/// collapses direction and drops self-follows.
#[derive(Debug, Default)]
pub struct GraphAssembler {
    graph: DiGraph<Handle, ()>,
    index: HashMap<Handle, NodeIndex>,
    levels: HashMap<Handle, Level>,
}

impl GraphAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, handle: &Handle) -> NodeIndex {
        if let Some(idx) = self.index.get(handle) {
            return *idx;
        }
        let idx = self.graph.add_node(handle.clone());
        self.index.insert(handle.clone(), idx);
        idx
    }

    fn assign_level(&mut self, handle: &Handle, level: Level) {
        if self.index.contains_key(handle) && !self.levels.contains_key(handle) {
            self.levels.insert(handle.clone(), level);
        }
    }

    /// Seeds enter at level 0 before any edge exists.
    pub fn add_seeds<'a, I>(&mut self, seeds: I)
    where
        I: IntoIterator<Item = &'a Handle>,
    {
        for seed in seeds {
            self.node(seed);
            self.assign_level(seed, 0);
        }
    }

    /// Merges one level's mapping (followed account -> followers).
    pub fn add_level(&mut self, level: Level, relations: &RelationMap<Handle>) {
        let mut accounts: Vec<&Handle> = relations.keys().collect();
        accounts.sort();

        for account in &accounts {
            let followed = self.node(account);
            for follower in &relations[*account] {
                let from = self.node(follower);
                if self.graph.find_edge(from, followed).is_none() {
                    self.graph.add_edge(from, followed, ());
                }
            }
        }

        for account in &accounts {
            for follower in &relations[*account] {
                self.assign_level(follower, level);
            }
        }

        tracing::debug!(level, accounts = accounts.len(), nodes = self.graph.node_count(), edges = self.graph.edge_count(), "Level merged");
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Directed edge count, self-follows included.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Undirected graph: an edge exists if either direction did, minus
    /// self-loops.
    pub fn finish(self) -> SocialGraph {
        let mut out = SocialGraph::new();

        let mut handles: Vec<&Handle> = self.graph.node_weights().collect();
        handles.sort();
        for handle in handles {
            out.add_node(handle);
            if let Some(level) = self.levels.get(handle) {
                out.set_level_if_unset(handle, *level);
            }
        }

        let mut dropped_loops = 0usize;
        for edge in self.graph.edge_references() {
            let (from, to) = (&self.graph[edge.source()], &self.graph[edge.target()]);
            if from == to {
                dropped_loops += 1;
                continue;
            }
            out.add_edge(from, to);
        }

        if dropped_loops > 0 {
            tracing::debug!(dropped_loops, "Removed self-follow edges");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(name: &str) -> Handle {
        Handle::new(name)
    }

    fn relations(entries: &[(&str, &[&str])]) -> RelationMap<Handle> {
        entries
            .iter()
            .map(|(account, followers)| (h(account), followers.iter().map(|f| h(f)).collect()))
            .collect()
    }

    #[test]
    fn test_two_level_scenario() {
        let mut assembler = GraphAssembler::new();
        assembler.add_seeds([&h("alice")]);
        assembler.add_level(1, &relations(&[("alice", &["bob", "carol"])]));
        assembler.add_level(2, &relations(&[
            ("bob", &["carol", "dave"]),
            ("carol", &["alice", "dave"]),
        ]));

        let graph = assembler.finish();

        assert_eq!(graph.handles(), vec![h("alice"), h("bob"), h("carol"), h("dave")]);
        assert_eq!(graph.level(&h("alice")), Some(0));
        assert_eq!(graph.level(&h("bob")), Some(1));
        assert_eq!(graph.level(&h("carol")), Some(1));
        assert_eq!(graph.level(&h("dave")), Some(2));
        assert_eq!(graph.edges(), vec![
            (h("alice"), h("bob")),
            (h("alice"), h("carol")),
            (h("bob"), h("carol")),
            (h("bob"), h("dave")),
            (h("carol"), h("dave")),
        ]);
    }

    #[test]
    fn test_self_follow_is_dropped() {
        let mut assembler = GraphAssembler::new();
        assembler.add_seeds([&h("alice")]);
        assembler.add_level(1, &relations(&[("alice", &["alice", "bob"])]));

        let graph = assembler.finish();

        assert_eq!(graph.self_loop_count(), 0);
        assert_eq!(graph.edge_count(), 1);
        // seed stays at level 0 even though it follows itself
        assert_eq!(graph.level(&h("alice")), Some(0));
    }

    #[test]
    fn test_mutual_follow_is_one_edge() {
        let mut assembler = GraphAssembler::new();
        assembler.add_level(1, &relations(&[("a", &["b"]), ("b", &["a"])]));
        assert_eq!(assembler.edge_count(), 2);

        let graph = assembler.finish();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_followed_account_without_level_stays_unset() {
        let mut assembler = GraphAssembler::new();
        assembler.add_level(2, &relations(&[("orphan", &["x"])]));

        let graph = assembler.finish();
        assert_eq!(graph.level(&h("x")), Some(2));
        assert_eq!(graph.level(&h("orphan")), None);
        assert!(graph.contains(&h("orphan")));
    }
}
