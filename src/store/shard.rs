use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

use crate::domain::{CiCheck, Comment, Issue, ParentRef, PullRequest, Repository, Review};
use crate::error::MagpieError;
use crate::store::models::{CiCheckRow, CommentRow, IssueRow, PullRequestRow, RepositoryRow};
use crate::store::schema::SHARD_INIT;

/// Summary counters a parent row carries. Issues only track comments; pull
/// requests track all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    CommentCount,
    ReviewCount,
    CheckCount,
}

impl CounterField {
    pub fn column(self) -> &'static str {
        match self {
            CounterField::CommentCount => "comment_count",
            CounterField::ReviewCount => "review_count",
            CounterField::CheckCount => "check_count",
        }
    }

    pub fn valid_for(self, parent: &ParentRef) -> bool {
        match parent {
            ParentRef::Issue(_) => self == CounterField::CommentCount,
            ParentRef::PullRequest(_) => true,
        }
    }
}

/// One storage shard. All shards are interchangeable instances of this type;
/// nothing in here knows which slice of the identity space it owns.
#[derive(Clone)]
pub struct ShardStore {
    shard_id: usize,
    pool: SqlitePool,
}

impl ShardStore {
    pub async fn open(shard_id: usize, database_url: &str) -> Result<Self, MagpieError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new().connect_with(connect_opts).await?;

        for stmt in SHARD_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&pool).await?;
        }

        debug!(shard_id, "Shard store opened");
        Ok(Self { shard_id, pool })
    }

    pub fn shard_id(&self) -> usize {
        self.shard_id
    }

    /// Insert-or-replace keyed on external identity. Redelivering the same
    /// record converges on a single row carrying the latest field values.
    pub async fn upsert_repository(&self, repo: &Repository) -> Result<(), MagpieError> {
        sqlx::query(
            r#"
        INSERT INTO repositories (external_id, name_with_owner, star_count, updated_at, crawled_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            name_with_owner = excluded.name_with_owner,
            star_count = excluded.star_count,
            updated_at = excluded.updated_at,
            crawled_at = excluded.crawled_at
        "#,
        )
        .bind(&repo.external_id)
        .bind(&repo.name_with_owner)
        .bind(repo.star_count)
        .bind(repo.updated_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upsert that never touches `comment_count`; the counter is owned by
    /// the aggregator and must survive redelivery of the parent.
    pub async fn upsert_issue(&self, issue: &Issue) -> Result<(), MagpieError> {
        sqlx::query(
            r#"
        INSERT INTO issues (external_id, repository_external_id, title, state, crawled_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            repository_external_id = excluded.repository_external_id,
            title = excluded.title,
            state = excluded.state,
            crawled_at = excluded.crawled_at
        "#,
        )
        .bind(&issue.external_id)
        .bind(&issue.repository_id)
        .bind(&issue.title)
        .bind(&issue.state)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_pull_request(&self, pr: &PullRequest) -> Result<(), MagpieError> {
        sqlx::query(
            r#"
        INSERT INTO pull_requests (external_id, repository_external_id, title, state, crawled_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            repository_external_id = excluded.repository_external_id,
            title = excluded.title,
            state = excluded.state,
            crawled_at = excluded.crawled_at
        "#,
        )
        .bind(&pr.external_id)
        .bind(&pr.repository_id)
        .bind(&pr.title)
        .bind(&pr.state)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts a batch of comments and returns, per parent, how many were
    /// genuinely new. `INSERT OR IGNORE` gives set-difference semantics: a
    /// redelivered comment inserts zero rows and therefore contributes zero
    /// to the delta, so counters stay exact under at-least-once delivery.
    pub async fn insert_comments(
        &self,
        comments: &[Comment],
    ) -> Result<HashMap<ParentRef, i64>, MagpieError> {
        let mut new_per_parent: HashMap<ParentRef, i64> = HashMap::new();
        let now = Utc::now();

        for comment in comments {
            let result = sqlx::query(
                r#"
            INSERT OR IGNORE INTO comments
                (external_id, parent_kind, parent_external_id, author, crawled_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
            )
            .bind(&comment.external_id)
            .bind(comment.parent.kind_str())
            .bind(comment.parent.external_id())
            .bind(&comment.author)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                *new_per_parent.entry(comment.parent.clone()).or_insert(0) += 1;
            }
        }
        Ok(new_per_parent)
    }

    /// Returns whether the review was newly inserted.
    pub async fn insert_review(&self, review: &Review) -> Result<bool, MagpieError> {
        let result = sqlx::query(
            r#"
        INSERT OR IGNORE INTO reviews
            (external_id, pull_request_external_id, author, state, crawled_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
        )
        .bind(&review.external_id)
        .bind(&review.pull_request_id)
        .bind(&review.author)
        .bind(&review.state)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stores the payload verbatim as JSON text; producers version the blob
    /// and nothing here interprets it. Returns whether it was newly inserted.
    pub async fn insert_check(&self, check: &CiCheck) -> Result<bool, MagpieError> {
        let payload = serde_json::to_string(&check.payload)?;
        let result = sqlx::query(
            r#"
        INSERT OR IGNORE INTO ci_checks
            (external_id, pull_request_external_id, payload_version, origin, payload, crawled_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&check.external_id)
        .bind(&check.pull_request_id)
        .bind(i64::from(check.payload.version))
        .bind(&check.payload.origin)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Single-statement atomic increment. Concurrent increments on the same
    /// parent serialize inside SQLite, so no increment is ever lost.
    ///
    /// A child can arrive before its parent (the parent's unit may not have
    /// been crawled yet), so the increment upserts: a missing parent gets a
    /// stub row holding only the identity and the counter, and the real
    /// upsert later fills the fields without touching counters. A plain
    /// `UPDATE` would match zero rows and drop the delta for good, since
    /// redelivery yields delta 0 against the already-stored children.
    pub async fn increment_counter(
        &self,
        parent: &ParentRef,
        field: CounterField,
        delta: i64,
    ) -> Result<(), MagpieError> {
        if !field.valid_for(parent) {
            return Err(MagpieError::UnexpectedError(format!(
                "counter {} not tracked on {}",
                field.column(),
                parent.table()
            )));
        }

        // Table and column names come from fixed enums, never from input.
        let sql = format!(
            "INSERT INTO {table} (external_id, repository_external_id, title, state, {col}, crawled_at)
             VALUES (?, '', '', '', ?, ?)
             ON CONFLICT(external_id) DO UPDATE SET {col} = {col} + excluded.{col}",
            table = parent.table(),
            col = field.column(),
        );
        sqlx::query(&sql)
            .bind(parent.external_id())
            .bind(delta)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Recovery path: recompute a parent's comment counter from the child
    /// rows and overwrite the cached value. Returns the recounted total.
    pub async fn recount_comments(&self, parent: &ParentRef) -> Result<i64, MagpieError> {
        let count: i64 = sqlx::query_scalar(
            r#"
        SELECT COUNT(*) FROM comments WHERE parent_kind = ? AND parent_external_id = ?
        "#,
        )
        .bind(parent.kind_str())
        .bind(parent.external_id())
        .fetch_one(&self.pool)
        .await?;

        // Same stub-upsert shape as the increment so a recount against a
        // not-yet-crawled parent is not a silent no-op.
        let sql = format!(
            "INSERT INTO {table} (external_id, repository_external_id, title, state, comment_count, crawled_at)
             VALUES (?, '', '', '', ?, ?)
             ON CONFLICT(external_id) DO UPDATE SET comment_count = excluded.comment_count",
            table = parent.table(),
        );
        sqlx::query(&sql)
            .bind(parent.external_id())
            .bind(count)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn get_repository(
        &self,
        external_id: &str,
    ) -> Result<Option<RepositoryRow>, MagpieError> {
        let row = sqlx::query_as::<_, RepositoryRow>(
            "SELECT * FROM repositories WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_issue(&self, external_id: &str) -> Result<Option<IssueRow>, MagpieError> {
        let row = sqlx::query_as::<_, IssueRow>("SELECT * FROM issues WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_pull_request(
        &self,
        external_id: &str,
    ) -> Result<Option<PullRequestRow>, MagpieError> {
        let row = sqlx::query_as::<_, PullRequestRow>(
            "SELECT * FROM pull_requests WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_comment(&self, external_id: &str) -> Result<Option<CommentRow>, MagpieError> {
        let row = sqlx::query_as::<_, CommentRow>("SELECT * FROM comments WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_check(&self, external_id: &str) -> Result<Option<CiCheckRow>, MagpieError> {
        let row = sqlx::query_as::<_, CiCheckRow>("SELECT * FROM ci_checks WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}
