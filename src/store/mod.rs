//! Sharded entity storage.
//!
//! N homogeneous SQLite stores share one schema and one code path,
//! parameterized by shard id. The router maps an external identity to its
//! owning shard purely by hash; no operation ever spans two shards.

pub mod aggregate;
pub mod models;
pub mod router;
pub mod schema;
pub mod shard;

pub use aggregate::CounterAggregator;
pub use router::{ShardRouter, stable_shard_id};
pub use schema::SHARD_INIT;
pub use shard::{CounterField, ShardStore};
