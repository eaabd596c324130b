use async_trait::async_trait;
use std::sync::Arc;

use crate::credentials::pool::QuotaSnapshot;
use crate::credentials::CredentialPoolHandle;
use crate::error::MagpieError;
use crate::partition::{QueryPredicate, ResultEstimator};
use crate::remote::CatalogClient;

/// Result estimator backed by live count probes.
///
/// Every probe pays real quota, so it goes through the credential pool like
/// any other request and reports the actual cost back.
pub struct LiveEstimator {
    client: Arc<CatalogClient>,
    credentials: CredentialPoolHandle,
}

impl LiveEstimator {
    pub fn new(client: Arc<CatalogClient>, credentials: CredentialPoolHandle) -> Self {
        Self {
            client,
            credentials,
        }
    }
}

#[async_trait]
impl ResultEstimator for LiveEstimator {
    async fn estimate(&self, predicate: &QueryPredicate) -> Result<u64, MagpieError> {
        let lease = self.credentials.acquire_waiting().await?;

        let result = self
            .client
            .result_count(&lease.token, &predicate.to_string())
            .await;

        match result {
            Ok((count, rate_limit)) => {
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
                Ok(count)
            }
            Err(e) => {
                self.credentials.release(lease.id).await;
                Err(e)
            }
        }
    }
}
