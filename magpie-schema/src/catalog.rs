//! Wire types for the remote catalog read API.
//!
//! The API is a GraphQL-style paginated search endpoint: every response
//! carries the result nodes, a pagination cursor and an authoritative
//! rate-limit envelope (actual query cost, remaining quota, reset time).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request body posted to the search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub variables: SearchVariables,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchVariables {
    pub search_query: String,
    pub cursor: Option<String>,
    pub page_size: u32,
}

/// Top-level response envelope. GraphQL reports partial failures through
/// `errors` while still returning a 200, so both halves are optional.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchEnvelope {
    pub data: Option<SearchData>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchData {
    pub search: SearchPage,
    pub rate_limit: RateLimitInfo,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    pub nodes: Vec<RawRecord>,
    pub page_info: PageInfo,
    /// Total matches for the search predicate, independent of pagination.
    #[serde(default)]
    pub result_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// Authoritative quota accounting attached to every response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    /// Quota units this request actually consumed (not assumed to be 1).
    pub cost: i64,
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphqlError {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Repository,
    Issue,
    PullRequest,
    Comment,
    Review,
    CiCheck,
}

/// One node as it arrives off the wire. Every field beyond `id` and `kind`
/// is optional: which ones are present depends on the node kind, and the
/// parser decides per kind what is malformed.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub kind: Option<RecordKind>,

    // Repository fields.
    #[serde(default)]
    pub name_with_owner: Option<String>,
    #[serde(default)]
    pub star_count: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    // Issue / pull request fields.
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub state: Option<String>,

    // Comment parent references. Exactly one must be set for a comment.
    #[serde(default)]
    pub issue_id: Option<String>,
    #[serde(default)]
    pub pull_request_id: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    // CI check payload, carried opaque.
    #[serde(default)]
    pub check: Option<crate::check::CheckPayload>,
}
