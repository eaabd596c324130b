use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use magpie_schema::{RateLimitInfo, SearchEnvelope, SearchPage, SearchRequest, SearchVariables};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::CrawlConfig;
use crate::error::MagpieError;
use crate::remote::retry::post_json_with_retry;

const SEARCH_QUERY: &str = r#"
query CatalogSearch($searchQuery: String!, $cursor: String, $pageSize: Int!) {
  search(query: $searchQuery, after: $cursor, first: $pageSize) {
    nodes { ...RecordFields }
    pageInfo { hasNextPage endCursor }
    resultCount
  }
  rateLimit { cost remaining resetAt }
}
"#;

const COUNT_QUERY: &str = r#"
query CatalogCount($searchQuery: String!, $cursor: String, $pageSize: Int!) {
  search(query: $searchQuery, after: $cursor, first: $pageSize) {
    pageInfo { hasNextPage endCursor }
    resultCount
  }
  rateLimit { cost remaining resetAt }
}
"#;

/// Shared HTTP client for the catalog search endpoint.
///
/// One process-wide limiter paces all outgoing requests regardless of which
/// worker or credential issues them; credential quota is accounted
/// separately by the pool from the `rateLimit` envelope on each response.
pub struct CatalogClient {
    http: reqwest::Client,
    api_url: Url,
    limiter: Arc<DefaultDirectRateLimiter>,
    page_size: u32,
}

impl CatalogClient {
    pub fn new(cfg: &CrawlConfig) -> Result<Self, MagpieError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("magpie/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30));

        if let Some(proxy_url) = cfg.proxy.clone() {
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .map_err(|e| MagpieError::UnexpectedError(format!("invalid proxy url: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let http = builder.build()?;
        let api_url = cfg.api_url.clone();

        let tps = NonZeroU32::new(u32::try_from(cfg.request_tps).unwrap_or(u32::MAX).max(1))
            .expect("tps is at least 1");
        let burst = NonZeroU32::new(tps.get().saturating_mul(2)).expect("burst is at least 1");
        let limiter = Arc::new(RateLimiter::direct(
            Quota::per_second(tps).allow_burst(burst),
        ));

        Ok(Self {
            http,
            api_url,
            limiter,
            page_size: cfg.page_size,
        })
    }

    /// Fetch one page of search results. Returns the page plus the
    /// authoritative quota envelope for the credential that paid for it.
    pub async fn search_page(
        &self,
        bearer: &str,
        search_query: &str,
        cursor: Option<String>,
    ) -> Result<(SearchPage, RateLimitInfo), MagpieError> {
        let body = SearchRequest {
            query: SEARCH_QUERY.to_string(),
            variables: SearchVariables {
                search_query: search_query.to_string(),
                cursor,
                page_size: self.page_size,
            },
        };
        self.execute(bearer, &body).await
    }

    /// Result-count probe used by the query planner: a minimal page that
    /// only reads `resultCount`.
    pub async fn result_count(
        &self,
        bearer: &str,
        search_query: &str,
    ) -> Result<(u64, RateLimitInfo), MagpieError> {
        let body = SearchRequest {
            query: COUNT_QUERY.to_string(),
            variables: SearchVariables {
                search_query: search_query.to_string(),
                cursor: None,
                page_size: 1,
            },
        };
        let (page, rate_limit) = self.execute(bearer, &body).await?;
        Ok((page.result_count, rate_limit))
    }

    async fn execute(
        &self,
        bearer: &str,
        body: &SearchRequest,
    ) -> Result<(SearchPage, RateLimitInfo), MagpieError> {
        self.limiter.until_ready().await;

        let resp = post_json_with_retry(&self.http, &self.api_url, bearer, body).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MagpieError::UpstreamStatus(status));
        }

        let envelope: SearchEnvelope = resp.json().await?;
        if !envelope.errors.is_empty() {
            let messages: Vec<&str> = envelope
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect();
            return Err(MagpieError::UpstreamErrors(messages.join("; ")));
        }

        let data = envelope
            .data
            .ok_or_else(|| MagpieError::UpstreamErrors("response without data".to_string()))?;

        debug!(
            query = %body.variables.search_query,
            nodes = data.search.nodes.len(),
            cost = data.rate_limit.cost,
            remaining = data.rate_limit.remaining,
            "Search page fetched"
        );
        Ok((data.search, data.rate_limit))
    }
}
