//! Snowball CLI
//!
//! Crawls the follower network around one or more Bluesky accounts, keeps
//! its 2-core, splits it into communities and writes GEXF files; or collects
//! the posts of the accounts in a previously written community file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use snowball_common::config::{AppConfig, CommunityAlgorithm};
use snowball_core::graph::read_gexf_nodes;
use snowball_core::{create_source, CrawlPipeline, Handle, RunDirectory};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "snowball")]
#[command(about = "Snowball follower-graph crawler for Bluesky")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./snowball.toml if present)
    #[arg(long, global = true, env = "SNOWBALL_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for run folders and the seed registry
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Louvain,
    Greedy,
}

impl From<AlgorithmArg> for CommunityAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Louvain => CommunityAlgorithm::Louvain,
            AlgorithmArg::Greedy => CommunityAlgorithm::GreedyModularity,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl followers of the seed accounts and write community graphs
    Crawl {
        /// Seed account handles
        #[arg(required = true)]
        seeds: Vec<String>,

        /// Follower levels to collect below the seeds
        #[arg(long)]
        depth: Option<u32>,

        /// Community detection algorithm
        #[arg(long, value_enum)]
        algorithm: Option<AlgorithmArg>,

        /// Drop followers with fewer posts than crawl.min_posts
        #[arg(long)]
        filter_inactive: bool,
    },
    /// Collect posts of every account in a GEXF file
    Posts {
        /// GEXF file written by a previous crawl
        gexf: PathBuf,

        /// Write collected posts as JSON to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Print built-in defaults instead of the loaded configuration
        #[arg(long)]
        defaults: bool,
    },
}

impl Cli {
    fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load_from(self.config.as_deref()).context("Failed to load configuration")?;
        if let Some(output) = &self.output {
            config.output.root_dir = output.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.api.base_url = base_url.clone();
        }
        if let Commands::Crawl { depth, algorithm, filter_inactive, .. } = &self.command {
            if let Some(depth) = depth {
                config.crawl.depth = *depth;
            }
            if let Some(algorithm) = algorithm {
                config.graph.algorithm = (*algorithm).into();
            }
            if *filter_inactive {
                config.crawl.filter_inactive = true;
            }
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded .env from: {:?}", path),
        Err(e) => tracing::debug!("No .env loaded: {}", e),
    }

    let cli = Cli::parse();
    let config = cli.load_config()?;

    match &cli.command {
        Commands::Crawl { seeds, .. } => crawl(config, seeds).await,
        Commands::Posts { gexf, save } => posts(config, gexf, save.as_deref()).await,
        Commands::Config { defaults } => {
            let rendered = if *defaults {
                AppConfig::example_toml()?
            } else {
                config.to_toml()?
            };
            println!("{}", rendered);
            Ok(())
        }
    }
}

async fn crawl(config: AppConfig, seeds: &[String]) -> Result<()> {
    let seeds: Vec<Handle> = seeds.iter().map(Handle::new).collect();
    tracing::info!("Using API: {}", config.api.base_url);
    tracing::info!("Community algorithm: {:?}", config.graph.algorithm);

    let source = create_source(&config)?;
    let mut run = RunDirectory::allocate(&config.output.root_dir)?;
    let pipeline = CrawlPipeline::new(source, config);

    let report = pipeline.run(&seeds, &mut run).await?;

    let failures = report.failures();
    tracing::info!(
        run = %report.label,
        run_id = %report.run_id,
        nodes = report.core_nodes,
        edges = report.core_edges,
        communities = report.communities.iter().filter(|c| c.written).count(),
        failed_accounts = failures.total_failures(),
        retries = failures.retries,
        "Crawl finished"
    );
    println!("{}", run.path().display());
    Ok(())
}

async fn posts(config: AppConfig, gexf: &Path, save: Option<&Path>) -> Result<()> {
    let accounts = read_gexf_nodes(gexf)?;
    tracing::info!(accounts = accounts.len(), file = %gexf.display(), "Loaded accounts");

    let source = create_source(&config)?;
    let pipeline = CrawlPipeline::new(source, config);
    let collection = pipeline.collect_posts(&accounts).await;

    if let Some(path) = save {
        let json = serde_json::to_string_pretty(&collection.relations)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "Posts saved");
    }

    let total: usize = collection.relations.values().map(Vec::len).sum();
    println!("{} posts from {} accounts", total, collection.relations.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_crawl_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("snowball.toml");
        std::fs::write(&file, "[crawl]\ndepth = 3\n").unwrap();

        let cli = Cli::try_parse_from([
            "snowball",
            "--config",
            file.to_str().unwrap(),
            "--output",
            "/tmp/out",
            "crawl",
            "alice.bsky.social",
            "--algorithm",
            "greedy",
            "--filter-inactive",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();

        assert_eq!(config.crawl.depth, 3);
        assert_eq!(config.graph.algorithm, CommunityAlgorithm::GreedyModularity);
        assert!(config.crawl.filter_inactive);
        assert_eq!(config.output.root_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_crawl_requires_seed() {
        assert!(Cli::try_parse_from(["snowball", "crawl"]).is_err());
    }
}
