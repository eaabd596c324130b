use serde::{Deserialize, Serialize};
use url::Url;

/// How the identifier/query space is partitioned into work units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStrategy {
    /// Filtered search predicates, split until under the per-query result
    /// cap. The default; matches catalogs that cap search results.
    #[default]
    Queries,

    /// Contiguous numeric identifier ranges (`crawl.id_range` required).
    IdRanges,
}

/// Crawl pipeline configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlConfig {
    /// Remote catalog search endpoint.
    /// TOML: `crawl.api_url`.
    #[serde(default = "default_api_url")]
    pub api_url: Url,

    /// Optional outbound proxy for all remote calls.
    /// TOML: `crawl.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Number of independent storage shards. Changing this after data has
    /// been written re-routes identities; treat as immutable per data_dir.
    /// TOML: `crawl.shard_count`. Default: `8`.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Concurrent crawler workers.
    /// TOML: `crawl.workers`. Default: `4`.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub strategy: CrawlStrategy,

    /// Identifier space bounds for the `id_ranges` strategy, inclusive.
    /// TOML: `crawl.id_range = [lo, hi]`.
    #[serde(default)]
    pub id_range: Option<[u64; 2]>,

    /// Identifiers per work unit for the `id_ranges` strategy.
    /// TOML: `crawl.unit_size`. Default: `1000`.
    #[serde(default = "default_unit_size")]
    pub unit_size: u64,

    /// Languages used to narrow low-star search predicates.
    /// TOML: `crawl.languages`.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Hard cap the remote API places on results per filtered query. The
    /// partitioner splits any predicate estimated above this.
    /// TOML: `crawl.search_result_cap`. Default: `1000`.
    #[serde(default = "default_search_result_cap")]
    pub search_result_cap: u64,

    /// Records requested per page.
    /// TOML: `crawl.page_size`. Default: `100`.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Seconds a leased unit stays exclusive before the reaper reclaims it.
    /// TOML: `crawl.lease_secs`. Default: `300`.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Delivery attempts before a unit is dead-lettered.
    /// TOML: `crawl.max_attempts`. Default: `5`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Outbound request pacing across all workers, requests per second.
    /// TOML: `crawl.request_tps`. Default: `8`.
    #[serde(default = "default_request_tps")]
    pub request_tps: u64,

    /// Bounded retries per remote call before the unit itself is failed.
    /// TOML: `crawl.retry_max_times`. Default: `3`.
    #[serde(default = "default_retry_max_times")]
    pub retry_max_times: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            proxy: None,
            shard_count: default_shard_count(),
            workers: default_workers(),
            strategy: CrawlStrategy::default(),
            id_range: None,
            unit_size: default_unit_size(),
            languages: default_languages(),
            search_result_cap: default_search_result_cap(),
            page_size: default_page_size(),
            lease_secs: default_lease_secs(),
            max_attempts: default_max_attempts(),
            request_tps: default_request_tps(),
            retry_max_times: default_retry_max_times(),
        }
    }
}

fn default_api_url() -> Url {
    Url::parse("https://api.github.com/graphql").expect("default api_url is valid")
}

fn default_shard_count() -> usize {
    8
}

fn default_workers() -> usize {
    4
}

fn default_unit_size() -> u64 {
    1000
}

fn default_languages() -> Vec<String> {
    [
        "javascript",
        "python",
        "java",
        "typescript",
        "go",
        "rust",
        "c++",
        "php",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_search_result_cap() -> u64 {
    1000
}

fn default_page_size() -> u32 {
    100
}

fn default_lease_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    5
}

fn default_request_tps() -> u64 {
    8
}

fn default_retry_max_times() -> usize {
    3
}
