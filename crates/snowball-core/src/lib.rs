pub mod client;
pub mod collector;
pub mod community;
pub mod fetch;
pub mod graph;
pub mod output;
pub mod pipeline;

pub use client::{create_source, BlueskyClient, MemorySource, Page, RelationSource};
pub use collector::{ActivityCheck, CollectMode, Collection, RelationCollector};
pub use community::{create_strategy, modularity, CommunityStrategy, Partition};
pub use fetch::{FetchOutcome, Governor, Paginator, RetryPolicy, RetryState};
pub use graph::{k_core, GraphAssembler, SocialGraph};
pub use output::{ArtifactSink, MemorySink, RunDirectory};
pub use pipeline::{CrawlPipeline, CrawlReport, PipelineError};

// Re-export common types for convenience
pub use snowball_common::{FailureCategory, FailureStats, FetchError, FetchFailure, Handle, Post};
