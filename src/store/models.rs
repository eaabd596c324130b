use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct RepositoryRow {
    pub id: i64,
    pub external_id: String,
    pub name_with_owner: String,
    pub star_count: i64,
    pub updated_at: Option<DateTime<Utc>>,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct IssueRow {
    pub id: i64,
    pub external_id: String,
    pub repository_external_id: String,
    pub title: String,
    pub state: String,
    pub comment_count: i64,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct PullRequestRow {
    pub id: i64,
    pub external_id: String,
    pub repository_external_id: String,
    pub title: String,
    pub state: String,
    pub comment_count: i64,
    pub review_count: i64,
    pub check_count: i64,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct CommentRow {
    pub id: i64,
    pub external_id: String,
    pub parent_kind: String,
    pub parent_external_id: String,
    pub author: Option<String>,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct CiCheckRow {
    pub id: i64,
    pub external_id: String,
    pub pull_request_external_id: String,
    pub payload_version: i64,
    pub origin: String,
    /// JSON text, stored exactly as received.
    pub payload: String,
    pub crawled_at: DateTime<Utc>,
}
