//! SQL DDL for one storage shard. Every shard runs the same schema; the
//! shard id lives in the file name, not the tables.
//!
//! Summary counters (`comment_count`, `review_count`, `check_count`) are
//! cached aggregates maintained by atomic increments at child insertion
//! time. Upserts of the parent never touch them, and child rows are never
//! rewritten when a counter changes. A counter increment for a parent that
//! has not been crawled yet creates a stub row (empty fields, real
//! counter); the parent's eventual upsert fills the fields in place.

pub const SHARD_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY NOT NULL,
    external_id TEXT NOT NULL UNIQUE,
    name_with_owner TEXT NOT NULL,
    star_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NULL, -- RFC3339
    crawled_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_repositories_stars ON repositories(star_count DESC);

CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY NOT NULL,
    external_id TEXT NOT NULL UNIQUE,
    repository_external_id TEXT NOT NULL,
    title TEXT NOT NULL,
    state TEXT NOT NULL,
    comment_count INTEGER NOT NULL DEFAULT 0,
    crawled_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_issues_repository ON issues(repository_external_id);

CREATE TABLE IF NOT EXISTS pull_requests (
    id INTEGER PRIMARY KEY NOT NULL,
    external_id TEXT NOT NULL UNIQUE,
    repository_external_id TEXT NOT NULL,
    title TEXT NOT NULL,
    state TEXT NOT NULL,
    comment_count INTEGER NOT NULL DEFAULT 0,
    review_count INTEGER NOT NULL DEFAULT 0,
    check_count INTEGER NOT NULL DEFAULT 0,
    crawled_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_pull_requests_repository ON pull_requests(repository_external_id);

CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY NOT NULL,
    external_id TEXT NOT NULL UNIQUE,
    parent_kind TEXT NOT NULL CHECK (parent_kind IN ('issue', 'pull_request')),
    parent_external_id TEXT NOT NULL,
    author TEXT NULL,
    crawled_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_comments_parent ON comments(parent_kind, parent_external_id);

CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY NOT NULL,
    external_id TEXT NOT NULL UNIQUE,
    pull_request_external_id TEXT NOT NULL,
    author TEXT NULL,
    state TEXT NULL,
    crawled_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_reviews_pull_request ON reviews(pull_request_external_id);

CREATE TABLE IF NOT EXISTS ci_checks (
    id INTEGER PRIMARY KEY NOT NULL,
    external_id TEXT NOT NULL UNIQUE,
    pull_request_external_id TEXT NOT NULL,
    payload_version INTEGER NOT NULL,
    origin TEXT NOT NULL,
    payload TEXT NOT NULL, -- JSON, carried uninterpreted
    crawled_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_ci_checks_pull_request ON ci_checks(pull_request_external_id);
"#;
