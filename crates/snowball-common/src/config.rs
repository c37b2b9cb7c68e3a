use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// --- Constants for Default Configuration ---
pub const DEFAULT_API_BASE_URL: &str = "https://public.api.bsky.app";
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_CRAWL_DEPTH: u32 = 2;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_BATCH_PAUSE_MS: u64 = 300;
pub const DEFAULT_BACKOFF_UNIT_MS: u64 = 1000;
pub const DEFAULT_BACKOFF_CAP_UNITS: u64 = 60;
pub const DEFAULT_MIN_POSTS: usize = 2;

pub const DEFAULT_FOLLOWER_GLOBAL_CONCURRENCY: usize = 200;
pub const DEFAULT_FOLLOWER_PER_HOST_CONCURRENCY: usize = 50;
pub const DEFAULT_FOLLOWER_MAX_TRIES: u32 = 5;
pub const DEFAULT_FOLLOWER_CAP: usize = 1000;

pub const DEFAULT_CONTENT_GLOBAL_CONCURRENCY: usize = 50;
pub const DEFAULT_CONTENT_PER_HOST_CONCURRENCY: usize = 20;
pub const DEFAULT_CONTENT_TASK_CONCURRENCY: usize = 30;
pub const DEFAULT_CONTENT_MAX_TRIES: u32 = 10;
pub const DEFAULT_POST_CAP: usize = 5000;
pub const DEFAULT_PAGE_PAUSE_MS: u64 = 100;

pub const DEFAULT_K_CORE: usize = 2;
pub const DEFAULT_PARTITION_SEED: u64 = 42;
pub const DEFAULT_RESOLUTION: f64 = 1.0;

pub const DEFAULT_OUTPUT_ROOT: &str = "./data";
pub const DEFAULT_CONFIG_FILE: &str = "snowball";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub page_size: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.into(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Limits for one collection mode (followers or content).
///
/// The two modes default differently, so a partial `[crawl.followers]` or
/// `[crawl.content]` table is read as [`ModeOverrides`] and laid over the
/// mode's own defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModeLimits {
    pub global_concurrency: usize,
    pub per_host_concurrency: usize,
    /// Extra ceiling on concurrently running accounts, narrower than the
    /// global one. `None` means one task per account in the batch.
    #[serde(default)]
    pub task_concurrency: Option<usize>,
    pub max_tries: u32,
    pub item_cap: usize,
    #[serde(default)]
    pub page_pause_ms: u64,
}

/// Any subset of [`ModeLimits`] fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModeOverrides {
    pub global_concurrency: Option<usize>,
    pub per_host_concurrency: Option<usize>,
    pub task_concurrency: Option<usize>,
    pub max_tries: Option<u32>,
    pub item_cap: Option<usize>,
    pub page_pause_ms: Option<u64>,
}

impl ModeOverrides {
    pub fn apply(self, mut limits: ModeLimits) -> ModeLimits {
        if let Some(v) = self.global_concurrency {
            limits.global_concurrency = v;
        }
        if let Some(v) = self.per_host_concurrency {
            limits.per_host_concurrency = v;
        }
        if self.task_concurrency.is_some() {
            limits.task_concurrency = self.task_concurrency;
        }
        if let Some(v) = self.max_tries {
            limits.max_tries = v;
        }
        if let Some(v) = self.item_cap {
            limits.item_cap = v;
        }
        if let Some(v) = self.page_pause_ms {
            limits.page_pause_ms = v;
        }
        limits
    }
}

fn follower_limits<'de, D>(deserializer: D) -> Result<ModeLimits, D::Error>
where
    D: Deserializer<'de>,
{
    ModeOverrides::deserialize(deserializer).map(|o| o.apply(ModeLimits::followers()))
}

fn content_limits<'de, D>(deserializer: D) -> Result<ModeLimits, D::Error>
where
    D: Deserializer<'de>,
{
    ModeOverrides::deserialize(deserializer).map(|o| o.apply(ModeLimits::content()))
}

impl ModeLimits {
    pub fn followers() -> Self {
        Self {
            global_concurrency: DEFAULT_FOLLOWER_GLOBAL_CONCURRENCY,
            per_host_concurrency: DEFAULT_FOLLOWER_PER_HOST_CONCURRENCY,
            task_concurrency: None,
            max_tries: DEFAULT_FOLLOWER_MAX_TRIES,
            item_cap: DEFAULT_FOLLOWER_CAP,
            page_pause_ms: 0,
        }
    }

    pub fn content() -> Self {
        Self {
            global_concurrency: DEFAULT_CONTENT_GLOBAL_CONCURRENCY,
            per_host_concurrency: DEFAULT_CONTENT_PER_HOST_CONCURRENCY,
            task_concurrency: Some(DEFAULT_CONTENT_TASK_CONCURRENCY),
            max_tries: DEFAULT_CONTENT_MAX_TRIES,
            item_cap: DEFAULT_POST_CAP,
            page_pause_ms: DEFAULT_PAGE_PAUSE_MS,
        }
    }

    pub fn page_pause(&self) -> Duration {
        Duration::from_millis(self.page_pause_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Number of follower levels to collect below the seeds.
    pub depth: u32,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub backoff_unit_ms: u64,
    pub backoff_cap_units: u64,
    pub min_posts: usize,
    /// Drop followers with fewer than `min_posts` posts before graph assembly.
    pub filter_inactive: bool,
    #[serde(deserialize_with = "follower_limits")]
    pub followers: ModeLimits,
    #[serde(deserialize_with = "content_limits")]
    pub content: ModeLimits,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_CRAWL_DEPTH,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause_ms: DEFAULT_BATCH_PAUSE_MS,
            backoff_unit_ms: DEFAULT_BACKOFF_UNIT_MS,
            backoff_cap_units: DEFAULT_BACKOFF_CAP_UNITS,
            min_posts: DEFAULT_MIN_POSTS,
            filter_inactive: false,
            followers: ModeLimits::followers(),
            content: ModeLimits::content(),
        }
    }
}

impl CrawlConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommunityAlgorithm {
    Louvain,
    GreedyModularity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub k_core: usize,
    pub algorithm: CommunityAlgorithm,
    pub seed: u64,
    pub resolution: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            k_core: DEFAULT_K_CORE,
            algorithm: CommunityAlgorithm::Louvain,
            seed: DEFAULT_PARTITION_SEED,
            resolution: DEFAULT_RESOLUTION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub root_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { root_dir: PathBuf::from(DEFAULT_OUTPUT_ROOT) }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub crawl: CrawlConfig,
    pub graph: GraphConfig,
    pub output: OutputConfig,
}

impl AppConfig {
    /// Loads `snowball.toml` from the working directory (if any) and
    /// `SNOWBALL_*` environment overrides on top of the built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let s = Config::builder()
            // Default settings
            .set_default("api.base_url", DEFAULT_API_BASE_URL)?
            .set_default("api.page_size", DEFAULT_PAGE_SIZE as i64)?
            .set_default("crawl.depth", DEFAULT_CRAWL_DEPTH as i64)?
            .set_default("crawl.batch_size", DEFAULT_BATCH_SIZE as i64)?
            .set_default("crawl.batch_pause_ms", DEFAULT_BATCH_PAUSE_MS)?
            .set_default("crawl.min_posts", DEFAULT_MIN_POSTS as i64)?
            .set_default("graph.k_core", DEFAULT_K_CORE as i64)?
            .set_default("graph.algorithm", "louvain")?
            .set_default("graph.seed", DEFAULT_PARTITION_SEED)?
            .set_default("output.root_dir", DEFAULT_OUTPUT_ROOT)?

            // File: snowball.toml
            .add_source(file)

            // Environment: SNOWBALL__CRAWL__BATCH_SIZE=50 -> crawl.batch_size=50
            .add_source(Environment::with_prefix("SNOWBALL").separator("__"))

            .build()?;

        s.try_deserialize()
    }

    /// Renders the default configuration as a TOML template.
    pub fn example_toml() -> Result<String, toml::ser::Error> {
        AppConfig::default().to_toml()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.api.connect_timeout_secs)
    }
}
