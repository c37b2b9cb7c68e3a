use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use snowball_common::config::AppConfig;
use snowball_common::{FailureStats, Handle, Level, Post, RelationMap};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::client::RelationSource;
use crate::collector::{Collection, RelationCollector};
use crate::community::{create_strategy, modularity, CommunityStrategy, Partition};
use crate::graph::{k_core, GraphAssembler, SocialGraph};
use crate::output::ArtifactSink;

/// Conditions that end a run early.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("No seed accounts given")]
    NoSeeds,
    #[error("No followers collected for seeds: {0}")]
    EmptyCrawl(String),
    #[error("Graph is empty after {k}-core filtering")]
    EmptyGraph { k: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelReport {
    pub level: Level,
    pub accounts: usize,
    pub collected: usize,
    pub relations: usize,
    pub failures: FailureStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    pub checked: usize,
    pub active: usize,
    pub min_posts: usize,
    pub failures: FailureStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunityReport {
    /// 1-based, counting suppressed communities too.
    pub index: usize,
    pub size: usize,
    pub core_size: usize,
    pub written: bool,
}

/// Everything a run measured; written as `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub run_id: Uuid,
    pub label: String,
    pub seeds: Vec<Handle>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub levels: Vec<LevelReport>,
    pub activity: Option<ActivityReport>,
    pub assembled_nodes: usize,
    pub assembled_edges: usize,
    pub core_nodes: usize,
    pub core_edges: usize,
    pub algorithm: String,
    pub modularity: f64,
    pub communities: Vec<CommunityReport>,
}

impl CrawlReport {
    pub fn failures(&self) -> FailureStats {
        let mut total = FailureStats::default();
        for level in &self.levels {
            total.merge(&level.failures);
        }
        if let Some(activity) = &self.activity {
            total.merge(&activity.failures);
        }
        total
    }
}

/// Follower mappings per crawl level, level 1 first.
#[derive(Debug, Clone, Default)]
pub struct Crawl {
    pub seeds: Vec<Handle>,
    pub levels: Vec<RelationMap<Handle>>,
    pub reports: Vec<LevelReport>,
}

impl Crawl {
    /// Distinct direct followers of `seed`.
    pub fn follower_count(&self, seed: &Handle) -> usize {
        self.levels
            .first()
            .and_then(|level| level.get(seed))
            .map_or(0, |followers| followers.iter().collect::<HashSet<_>>().len())
    }

    /// Every account seen, seeds included.
    pub fn accounts(&self) -> BTreeSet<Handle> {
        let mut all: BTreeSet<Handle> = self.seeds.iter().cloned().collect();
        for level in &self.levels {
            for (account, followers) in level {
                all.insert(account.clone());
                all.extend(followers.iter().cloned());
            }
        }
        all
    }
}

/// Seeds -> follower levels -> graph -> k-core -> communities -> artifacts.
pub struct CrawlPipeline {
    collector: RelationCollector,
    config: AppConfig,
    strategy: Box<dyn CommunityStrategy>,
}

impl CrawlPipeline {
    pub fn new(source: Arc<dyn RelationSource>, config: AppConfig) -> Self {
        Self {
            collector: RelationCollector::new(source, &config.crawl),
            strategy: create_strategy(&config.graph),
            config,
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn CommunityStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Breadth-first follower crawl. Each level fetches the followers of the
    /// previous level's new accounts; accounts already crawled are skipped.
    pub async fn crawl(&self, seeds: &[Handle]) -> Result<Crawl, PipelineError> {
        let seeds = normalize_seeds(seeds);
        if seeds.is_empty() {
            return Err(PipelineError::NoSeeds);
        }

        let depth = self.config.crawl.depth.max(1);
        let mut crawled: HashSet<Handle> = seeds.iter().cloned().collect();
        let mut frontier = seeds.clone();
        let mut crawl = Crawl { seeds: seeds.clone(), ..Crawl::default() };

        for level in 1..=depth {
            if frontier.is_empty() {
                break;
            }
            tracing::info!(level, accounts = frontier.len(), "Collecting followers");

            let collection = self.collector.collect_followers(&frontier).await;
            let next: Vec<Handle> = collection
                .flatten_unique()
                .into_iter()
                .filter(|handle| crawled.insert((*handle).clone()))
                .cloned()
                .collect();

            let report = level_report(level, &collection);
            tracing::info!(
                level,
                collected = report.collected,
                relations = report.relations,
                failed = report.failures.total_failures(),
                new_accounts = next.len(),
                "Level collected"
            );
            for (category, count) in report.failures.ranked() {
                tracing::info!(level, %category, count, "Failures by category");
            }

            if level == 1 && report.relations == 0 {
                let names: Vec<&str> = seeds.iter().map(Handle::as_str).collect();
                return Err(PipelineError::EmptyCrawl(names.join(", ")));
            }

            crawl.levels.push(collection.relations);
            crawl.reports.push(report);
            frontier = next;
            frontier.sort();
        }

        Ok(crawl)
    }

    /// Drops accounts with fewer than `min_posts` posts from every level,
    /// both as followers and as followed accounts. Seeds are never dropped.
    pub async fn filter_inactive(&self, crawl: &mut Crawl) -> ActivityReport {
        let min_posts = self.config.crawl.min_posts;
        let seeds: HashSet<&Handle> = crawl.seeds.iter().collect();
        let candidates: Vec<Handle> = crawl
            .accounts()
            .into_iter()
            .filter(|handle| !seeds.contains(handle))
            .collect();

        let check = self.collector.filter_active(&candidates, min_posts).await;
        let active: HashSet<&Handle> = check.active.iter().chain(crawl.seeds.iter()).collect();

        for level in crawl.levels.iter_mut() {
            level.retain(|account, _| active.contains(account));
            for followers in level.values_mut() {
                followers.retain(|follower| active.contains(follower));
            }
        }

        ActivityReport {
            checked: candidates.len(),
            active: check.active.len(),
            min_posts,
            failures: check.failures,
        }
    }

    /// Level-tagged undirected graph of the crawl, before filtering.
    pub fn build_graph(&self, crawl: &Crawl) -> SocialGraph {
        let mut assembler = GraphAssembler::new();
        assembler.add_seeds(&crawl.seeds);
        for (idx, relations) in crawl.levels.iter().enumerate() {
            assembler.add_level(idx as Level + 1, relations);
        }
        let graph = assembler.finish();
        tracing::info!(nodes = graph.node_count(), edges = graph.edge_count(), "Graph assembled");
        for (level, nodes) in graph.level_histogram() {
            tracing::debug!(?level, nodes, "Nodes per level");
        }
        graph
    }

    pub fn partition(&self, graph: &SocialGraph) -> Partition {
        let partition = self.strategy.partition(graph);
        tracing::info!(
            algorithm = self.strategy.name(),
            communities = partition.len(),
            "Communities detected"
        );
        partition
    }

    /// Posts of `accounts`, e.g. the members of a community graph.
    pub async fn collect_posts(&self, accounts: &[Handle]) -> Collection<Post> {
        let collection = self.collector.collect_posts(accounts).await;
        let posts: usize = collection.relations.values().map(Vec::len).sum();
        tracing::info!(
            accounts = accounts.len(),
            with_posts = collection.relations.len(),
            posts,
            "Posts collected"
        );
        for (category, count) in collection.failures.ranked() {
            tracing::info!(%category, count, "Failures by category");
        }
        collection
    }

    pub async fn run(&self, seeds: &[Handle], sink: &mut dyn ArtifactSink) -> Result<CrawlReport> {
        let started_at = Utc::now();
        let k = self.config.graph.k_core;

        let mut crawl = self.crawl(seeds).await?;
        let activity = if self.config.crawl.filter_inactive {
            Some(self.filter_inactive(&mut crawl).await)
        } else {
            None
        };

        for seed in &crawl.seeds {
            sink.record_seed(seed, crawl.follower_count(seed))?;
        }

        let assembled = self.build_graph(&crawl);
        let core = k_core(&assembled, k);
        if core.is_empty() {
            return Err(PipelineError::EmptyGraph { k }.into());
        }
        tracing::info!(k, nodes = core.node_count(), edges = core.edge_count(), "Core extracted");
        sink.write_whole(&core)?;

        let partition = self.partition(&core);
        let score = modularity(&core, &partition, self.config.graph.resolution);

        let mut communities = Vec::with_capacity(partition.len());
        for (idx, block) in partition.blocks().iter().enumerate() {
            let index = idx + 1;
            let sub = k_core(&core.subgraph(block), k);
            let written = !sub.is_empty();
            if written {
                sink.write_community(index, &sub)?;
            }
            communities.push(CommunityReport {
                index,
                size: block.len(),
                core_size: sub.node_count(),
                written,
            });
        }
        tracing::info!(
            written = communities.iter().filter(|c| c.written).count(),
            suppressed = communities.iter().filter(|c| !c.written).count(),
            modularity = score,
            "Communities saved"
        );

        let report = CrawlReport {
            run_id: Uuid::new_v4(),
            label: sink.label().to_string(),
            seeds: crawl.seeds.clone(),
            started_at,
            finished_at: Utc::now(),
            levels: crawl.reports,
            activity,
            assembled_nodes: assembled.node_count(),
            assembled_edges: assembled.edge_count(),
            core_nodes: core.node_count(),
            core_edges: core.edge_count(),
            algorithm: self.strategy.name().to_string(),
            modularity: score,
            communities,
        };
        sink.write_summary(&report)?;
        Ok(report)
    }
}

fn normalize_seeds(seeds: &[Handle]) -> Vec<Handle> {
    let mut seen = HashSet::new();
    seeds
        .iter()
        .filter(|seed| seed.is_valid() && seen.insert((*seed).clone()))
        .cloned()
        .collect()
}

fn level_report(level: Level, collection: &Collection<Handle>) -> LevelReport {
    LevelReport {
        level,
        accounts: collection.attempted,
        collected: collection.relations.len(),
        relations: collection.relations.values().map(Vec::len).sum(),
        failures: collection.failures.clone(),
    }
}
