// Offline crawl demo
//
// Runs the whole pipeline against an in-memory follower network made of
// three friend groups joined by a few cross-follows, then prints the
// communities it found. Nothing touches the network.

use anyhow::Result;
use snowball_common::config::{AppConfig, CommunityAlgorithm};
use snowball_core::{CrawlPipeline, Handle, MemorySink, MemorySource};
use std::sync::Arc;

fn build_network() -> MemorySource {
    let groups: [&[&str]; 3] = [
        &["ana", "bruno", "carla", "davi", "eva"],
        &["fabio", "gabi", "hugo", "iris", "joao"],
        &["karen", "leo", "maya", "nico", "olga"],
    ];

    let mut source = MemorySource::new().with_page_size(3);

    // the seed is followed by one member of each group
    source = source.with_followers("seed.example", ["ana", "fabio", "karen"]);

    for group in groups {
        for member in group {
            let followers: Vec<&str> = group.iter().copied().filter(|other| other != member).collect();
            source = source.with_followers(member, followers);
        }
    }

    // a few cross-group follows
    source
        .with_followers("ana", ["bruno", "carla", "davi", "eva", "fabio"])
        .with_followers("karen", ["leo", "maya", "nico", "olga", "eva"])
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("\nSnowball offline crawl demo");
    println!("===========================\n");

    for algorithm in [CommunityAlgorithm::Louvain, CommunityAlgorithm::GreedyModularity] {
        let mut config = AppConfig::default();
        config.crawl.batch_pause_ms = 0;
        config.graph.algorithm = algorithm;

        let pipeline = CrawlPipeline::new(Arc::new(build_network()), config);
        let mut sink = MemorySink::new("demo");
        let report = pipeline.run(&[Handle::new("seed.example")], &mut sink).await?;

        println!("Algorithm: {}", report.algorithm);
        println!("  assembled: {} nodes / {} edges", report.assembled_nodes, report.assembled_edges);
        println!("  2-core:    {} nodes / {} edges", report.core_nodes, report.core_edges);
        println!("  modularity {:.3}", report.modularity);
        for (index, graph) in &sink.communities {
            let members: Vec<String> = graph.handles().iter().map(|h| h.to_string()).collect();
            println!("  community {}: {}", index, members.join(", "));
        }
        println!();
    }

    Ok(())
}
