//! SQL DDL for the durable work queue.

/// `spec` is the JSON-encoded unit descriptor and is unique, so re-planning
/// after a crash enqueues idempotently (the planner is deterministic).
pub const QUEUE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS work_units (
    id INTEGER PRIMARY KEY NOT NULL,
    spec TEXT NOT NULL UNIQUE,
    state TEXT NOT NULL DEFAULT 'pending',
    lease_expiry TEXT NULL, -- RFC3339
    attempt_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_work_units_state ON work_units(state);
"#;
