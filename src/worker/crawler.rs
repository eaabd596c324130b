use magpie_schema::{RawRecord, SearchPage};
use moka::sync::Cache;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialPoolHandle, QuotaSnapshot};
use crate::domain::{Comment, Entity, ParentRef};
use crate::error::{IsRetryable, MagpieError};
use crate::partition::UnitSpec;
use crate::queue::{QueueHandle, UnitLease};
use crate::remote::CatalogClient;
use crate::store::{CounterAggregator, CounterField, ShardRouter};

/// Per-unit ingestion tally, logged on ack.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitStats {
    pub pages: u64,
    pub records: u64,
    pub malformed: u64,
    pub repositories: u64,
    pub issues: u64,
    pub pull_requests: u64,
    pub new_comments: i64,
    pub new_reviews: i64,
    pub new_checks: i64,
}

/// One crawler worker: lease a unit, page through its results, route every
/// record to its shard, ack.
///
/// The whole path is idempotent (upserts, `INSERT OR IGNORE` children,
/// set-difference counter deltas), so a unit redelivered after a crash or
/// lease expiry is safe to process again from the start.
pub struct CrawlWorker {
    worker_id: usize,
    queue: QueueHandle,
    credentials: CredentialPoolHandle,
    client: Arc<CatalogClient>,
    router: Arc<ShardRouter>,
    aggregator: CounterAggregator,
    /// Repositories already upserted this run; shared across workers to
    /// skip rewriting hot parents that appear in many units.
    seen_repos: Cache<String, ()>,
    retry_max_times: usize,
}

impl CrawlWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: usize,
        queue: QueueHandle,
        credentials: CredentialPoolHandle,
        client: Arc<CatalogClient>,
        router: Arc<ShardRouter>,
        aggregator: CounterAggregator,
        seen_repos: Cache<String, ()>,
        retry_max_times: usize,
    ) -> Self {
        Self {
            worker_id,
            queue,
            credentials,
            client,
            router,
            aggregator,
            seen_repos,
            retry_max_times,
        }
    }

    /// Runs until the queue is drained: no unit leasable and none
    /// outstanding with other workers.
    pub async fn run(self) -> Result<(), MagpieError> {
        info!(worker_id = self.worker_id, "Crawl worker started");
        loop {
            match self.queue.lease().await? {
                Some(lease) => self.process(lease).await?,
                None => {
                    let depth = self.queue.depth().await?;
                    if depth.outstanding() == 0 {
                        info!(worker_id = self.worker_id, "Queue drained, worker exiting");
                        return Ok(());
                    }
                    // Other workers still hold leases; their failures may
                    // put units back.
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn process(&self, lease: UnitLease) -> Result<(), MagpieError> {
        debug!(
            worker_id = self.worker_id,
            unit_id = lease.unit_id,
            unit = %lease.spec,
            "Processing work unit"
        );

        match self.crawl_unit(&lease.spec).await {
            Ok(stats) => {
                info!(
                    worker_id = self.worker_id,
                    unit_id = lease.unit_id,
                    unit = %lease.spec,
                    pages = stats.pages,
                    records = stats.records,
                    malformed = stats.malformed,
                    new_comments = stats.new_comments,
                    "Work unit complete"
                );
                self.queue.ack(lease.token).await
            }
            Err(e) => {
                let retry = e.is_retryable();
                warn!(
                    worker_id = self.worker_id,
                    unit_id = lease.unit_id,
                    unit = %lease.spec,
                    retry,
                    error = %e,
                    "Work unit failed"
                );
                self.queue.fail(lease.token, retry).await
            }
        }
    }

    async fn crawl_unit(&self, spec: &UnitSpec) -> Result<UnitStats, MagpieError> {
        let query = spec.to_query();
        let mut stats = UnitStats::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.fetch_page(&query, cursor.clone()).await?;
            stats.pages += 1;

            self.ingest(page.nodes, &mut stats).await?;

            if !page.page_info.has_next_page {
                return Ok(stats);
            }
            match page.page_info.end_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    warn!(unit = %query, "Page claims a next page but carries no cursor");
                    return Ok(stats);
                }
            }
        }
    }

    /// One paced, credential-funded page fetch with bounded retries on
    /// transient failures. A 429 cools the credential down and switches to
    /// another one without burning an attempt.
    async fn fetch_page(
        &self,
        query: &str,
        cursor: Option<String>,
    ) -> Result<SearchPage, MagpieError> {
        let mut attempts = 0usize;
        loop {
            let lease = self.credentials.acquire_waiting().await?;

            match self.client.search_page(&lease.token, query, cursor.clone()).await {
                Ok((page, rate_limit)) => {
                    self.credentials
                        .report(
                            lease.id,
                            rate_limit.cost,
                            Some(QuotaSnapshot {
                                remaining: rate_limit.remaining,
                                reset_at: rate_limit.reset_at,
                            }),
                        )
                        .await;
                    self.credentials.release(lease.id).await;
                    return Ok(page);
                }

                Err(MagpieError::UpstreamStatus(status))
                    if status == StatusCode::TOO_MANY_REQUESTS =>
                {
                    // Local accounting lagged the remote. Park this
                    // credential for a conservative cooldown and move on.
                    let reset_at = chrono::Utc::now() + chrono::Duration::seconds(60);
                    self.credentials
                        .report(lease.id, 0, Some(QuotaSnapshot { remaining: 0, reset_at }))
                        .await;
                    self.credentials.release(lease.id).await;
                    warn!(
                        credential = lease.id,
                        "Credential throttled upstream, switching"
                    );
                }

                Err(e) => {
                    self.credentials.release(lease.id).await;
                    attempts += 1;
                    if !e.is_retryable() || attempts > self.retry_max_times {
                        return Err(e);
                    }
                    let backoff = std::time::Duration::from_millis(200 * attempts as u64);
                    warn!(
                        attempts,
                        error = %e,
                        "Transient fetch failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Routes one page of records into the shards. Malformed records are
    /// counted and skipped; they never fail the unit.
    async fn ingest(&self, nodes: Vec<RawRecord>, stats: &mut UnitStats) -> Result<(), MagpieError> {
        let mut comments: Vec<Comment> = Vec::new();

        for raw in nodes {
            stats.records += 1;
            let entity = match Entity::try_from(raw) {
                Ok(entity) => entity,
                Err(MagpieError::MalformedRecord(reason)) => {
                    stats.malformed += 1;
                    warn!(reason, "Skipping malformed record");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match entity {
                Entity::Repository(repo) => {
                    if self.seen_repos.get(&repo.external_id).is_none() {
                        self.router
                            .shard_for(&repo.external_id)
                            .upsert_repository(&repo)
                            .await?;
                        self.seen_repos.insert(repo.external_id.clone(), ());
                    }
                    stats.repositories += 1;
                }

                Entity::Issue(issue) => {
                    self.router
                        .shard_for(&issue.external_id)
                        .upsert_issue(&issue)
                        .await?;
                    stats.issues += 1;
                }

                Entity::PullRequest(pr) => {
                    self.router
                        .shard_for(&pr.external_id)
                        .upsert_pull_request(&pr)
                        .await?;
                    stats.pull_requests += 1;
                }

                Entity::Comment(comment) => comments.push(comment),

                Entity::Review(review) => {
                    let newly = self
                        .router
                        .shard_for(&review.pull_request_id)
                        .insert_review(&review)
                        .await?;
                    if newly {
                        self.aggregator
                            .increment(
                                &ParentRef::PullRequest(review.pull_request_id.clone()),
                                CounterField::ReviewCount,
                                1,
                            )
                            .await?;
                        stats.new_reviews += 1;
                    }
                }

                Entity::CiCheck(check) => {
                    let newly = self
                        .router
                        .shard_for(&check.pull_request_id)
                        .insert_check(&check)
                        .await?;
                    if newly {
                        self.aggregator
                            .increment(
                                &ParentRef::PullRequest(check.pull_request_id.clone()),
                                CounterField::CheckCount,
                                1,
                            )
                            .await?;
                        stats.new_checks += 1;
                    }
                }
            }
        }

        // Comments batch per shard so each shard sees one pass, then the
        // per-parent deltas (newly inserted rows only) hit the counters.
        let mut per_shard: HashMap<usize, Vec<Comment>> = HashMap::new();
        for comment in comments {
            let shard_id = self.router.shard_for_parent(&comment.parent).shard_id();
            per_shard.entry(shard_id).or_default().push(comment);
        }

        for (shard_id, batch) in per_shard {
            let new_per_parent = self.router.shard(shard_id)?.insert_comments(&batch).await?;
            for (parent, delta) in new_per_parent {
                self.aggregator
                    .increment(&parent, CounterField::CommentCount, delta)
                    .await?;
                stats.new_comments += delta;
            }
        }
        Ok(())
    }
}
