use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::ParentRef;
use crate::error::MagpieError;
use crate::store::router::ShardRouter;
use crate::store::shard::CounterField;

/// Maintains the cached summary counters on parent rows.
///
/// Deltas are commutative increments, so workers may apply them in any
/// order and any interleaving converges to the same totals. Idempotency is
/// the caller's side of the contract: deltas must come from the number of
/// child rows NEWLY inserted (set-difference), never from the number of
/// records received.
#[derive(Clone)]
pub struct CounterAggregator {
    router: Arc<ShardRouter>,
}

impl CounterAggregator {
    pub fn new(router: Arc<ShardRouter>) -> Self {
        Self { router }
    }

    pub async fn increment(
        &self,
        parent: &ParentRef,
        field: CounterField,
        delta: i64,
    ) -> Result<(), MagpieError> {
        if delta == 0 {
            return Ok(());
        }
        debug!(
            parent = parent.external_id(),
            field = field.column(),
            delta,
            "Applying counter delta"
        );
        self.router
            .shard_for_parent(parent)
            .increment_counter(parent, field, delta)
            .await
    }

    /// Slow-path reconciliation: recompute a parent's comment counter from
    /// its child rows. Child rows are ground truth; the counter is a cache.
    pub async fn reconcile_comments(&self, parent: &ParentRef) -> Result<i64, MagpieError> {
        let count = self
            .router
            .shard_for_parent(parent)
            .recount_comments(parent)
            .await?;
        info!(
            parent = parent.external_id(),
            count, "Recounted comments from child rows"
        );
        Ok(count)
    }
}
