use anyhow::{Context, Result};
use snowball_common::Handle;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::graph::{write_gexf_file, SocialGraph};
use crate::pipeline::CrawlReport;

pub const GRAPH_DIR: &str = "graph";
pub const RUN_DIR_PREFIX: &str = "core_user_";
pub const GEXF_DIR: &str = "GEXF";
pub const REGISTRY_FILE: &str = "core_users_list.txt";
pub const REGISTRY_HEADER: &str = "handle,followers,folder";
pub const SUMMARY_FILE: &str = "summary.json";

pub fn whole_graph_file_name(label: &str, nodes: usize) -> String {
    format!("{}_-_nodes_{}(whole_community).gexf", label, nodes)
}

/// `index` is 1-based.
pub fn community_file_name(index: usize, nodes: usize) -> String {
    format!("community_{}_-_nodes_{}.gexf", index, nodes)
}

/// Destination for everything a pipeline run produces.
pub trait ArtifactSink {
    /// Label naming this run, e.g. `core_user_3`.
    fn label(&self) -> &str;

    fn record_seed(&mut self, seed: &Handle, followers: usize) -> Result<()>;

    fn write_whole(&mut self, graph: &SocialGraph) -> Result<()>;

    fn write_community(&mut self, index: usize, graph: &SocialGraph) -> Result<()>;

    fn write_summary(&mut self, report: &CrawlReport) -> Result<()>;
}

/// One run's folder under `<root>/graph/`, plus the seed registry at `<root>`.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    root: PathBuf,
    dir: PathBuf,
    label: String,
    written: Vec<PathBuf>,
}

impl RunDirectory {
    /// Claims the first free `core_user_{n}` folder (n from 1) and creates
    /// its GEXF subfolder.
    pub fn allocate(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let graph_root = root.join(GRAPH_DIR);
        fs::create_dir_all(&graph_root)
            .with_context(|| format!("Failed to create {}", graph_root.display()))?;

        let mut idx = 1usize;
        let (dir, label) = loop {
            let label = format!("{}{}", RUN_DIR_PREFIX, idx);
            let candidate = graph_root.join(&label);
            match fs::create_dir(&candidate) {
                Ok(()) => break (candidate, label),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => idx += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", candidate.display()));
                }
            }
        };

        let gexf = dir.join(GEXF_DIR);
        fs::create_dir_all(&gexf).with_context(|| format!("Failed to create {}", gexf.display()))?;
        tracing::info!(dir = %dir.display(), "Allocated run directory");

        Ok(Self { root, dir, label, written: Vec::new() })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn gexf_dir(&self) -> PathBuf {
        self.dir.join(GEXF_DIR)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    /// Files written so far, in order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn write_graph(&mut self, name: String, graph: &SocialGraph) -> Result<()> {
        let path = self.gexf_dir().join(name);
        write_gexf_file(graph, &path)?;
        tracing::debug!(path = %path.display(), nodes = graph.node_count(), edges = graph.edge_count(), "Wrote graph");
        self.written.push(path);
        Ok(())
    }
}

impl ArtifactSink for RunDirectory {
    fn label(&self) -> &str {
        &self.label
    }

    fn record_seed(&mut self, seed: &Handle, followers: usize) -> Result<()> {
        append_registry(&self.registry_path(), seed, followers, &self.label)
    }

    fn write_whole(&mut self, graph: &SocialGraph) -> Result<()> {
        let name = whole_graph_file_name(&self.label, graph.node_count());
        self.write_graph(name, graph)
    }

    fn write_community(&mut self, index: usize, graph: &SocialGraph) -> Result<()> {
        self.write_graph(community_file_name(index, graph.node_count()), graph)
    }

    fn write_summary(&mut self, report: &CrawlReport) -> Result<()> {
        let path = self.dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        self.written.push(path);
        Ok(())
    }
}

/// Appends `handle,followers,folder`, writing the header on first use.
pub fn append_registry(path: &Path, seed: &Handle, followers: usize, label: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let is_new = !path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    if is_new {
        writeln!(file, "{}", REGISTRY_HEADER)?;
    }
    writeln!(file, "{},{},{}", seed, followers, label)?;
    Ok(())
}

/// Keeps artifacts in memory; for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub label: String,
    pub seeds: Vec<(Handle, usize)>,
    pub whole: Option<SocialGraph>,
    pub communities: Vec<(usize, SocialGraph)>,
    pub summary: Option<CrawlReport>,
}

impl MemorySink {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), ..Self::default() }
    }
}

impl ArtifactSink for MemorySink {
    fn label(&self) -> &str {
        &self.label
    }

    fn record_seed(&mut self, seed: &Handle, followers: usize) -> Result<()> {
        self.seeds.push((seed.clone(), followers));
        Ok(())
    }

    fn write_whole(&mut self, graph: &SocialGraph) -> Result<()> {
        self.whole = Some(graph.clone());
        Ok(())
    }

    fn write_community(&mut self, index: usize, graph: &SocialGraph) -> Result<()> {
        self.communities.push((index, graph.clone()));
        Ok(())
    }

    fn write_summary(&mut self, report: &CrawlReport) -> Result<()> {
        self.summary = Some(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::read_gexf_nodes;

    fn triangle() -> SocialGraph {
        let mut graph = SocialGraph::new();
        let (a, b, c) = (Handle::new("a"), Handle::new("b"), Handle::new("c"));
        graph.add_edge(&a, &b);
        graph.add_edge(&b, &c);
        graph.add_edge(&c, &a);
        graph
    }

    #[test]
    fn test_file_names() {
        assert_eq!(whole_graph_file_name("core_user_2", 40), "core_user_2_-_nodes_40(whole_community).gexf");
        assert_eq!(community_file_name(3, 7), "community_3_-_nodes_7.gexf");
    }

    #[test]
    fn test_allocates_next_free_folder() {
        let root = tempfile::tempdir().unwrap();

        let first = RunDirectory::allocate(root.path()).unwrap();
        let second = RunDirectory::allocate(root.path()).unwrap();

        assert_eq!(first.label(), "core_user_1");
        assert_eq!(second.label(), "core_user_2");
        assert!(second.gexf_dir().is_dir());
        assert!(root.path().join("graph").join("core_user_1").join("GEXF").is_dir());
    }

    #[test]
    fn test_skips_folder_claimed_elsewhere() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("graph").join("core_user_1")).unwrap();

        let run = RunDirectory::allocate(root.path()).unwrap();

        assert_eq!(run.label(), "core_user_2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_get_distinct_folders() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().to_path_buf();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                tokio::task::spawn_blocking(move || RunDirectory::allocate(&path).map(|run| run.label().to_string()))
            })
            .collect();

        let mut labels = Vec::new();
        for task in tasks {
            labels.push(task.await.unwrap().unwrap());
        }
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), 8);
    }

    #[test]
    fn test_registry_header_written_once() {
        let root = tempfile::tempdir().unwrap();
        let mut run = RunDirectory::allocate(root.path()).unwrap();

        run.record_seed(&Handle::new("alice.bsky.social"), 12).unwrap();
        run.record_seed(&Handle::new("bob.bsky.social"), 3).unwrap();

        let content = fs::read_to_string(run.registry_path()).unwrap();
        assert_eq!(
            content,
            "handle,followers,folder\nalice.bsky.social,12,core_user_1\nbob.bsky.social,3,core_user_1\n"
        );
    }

    #[test]
    fn test_graphs_land_in_gexf_folder() {
        let root = tempfile::tempdir().unwrap();
        let mut run = RunDirectory::allocate(root.path()).unwrap();

        run.write_whole(&triangle()).unwrap();
        run.write_community(1, &triangle()).unwrap();

        let whole = run.gexf_dir().join("core_user_1_-_nodes_3(whole_community).gexf");
        let community = run.gexf_dir().join("community_1_-_nodes_3.gexf");
        assert_eq!(run.written(), &[whole.clone(), community]);
        assert_eq!(read_gexf_nodes(&whole).unwrap().len(), 3);
    }
}
