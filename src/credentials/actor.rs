use crate::config::CredentialsConfig;
use crate::credentials::pool::{
    AcquireOutcome, CredentialId, CredentialLease, CredentialPool, QuotaSnapshot,
};
use crate::error::MagpieError;
use chrono::{Duration, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tracing::{debug, info, warn};

/// Public messages handled by the credential pool actor.
///
/// The actor serializes every quota mutation, so no worker can observe a
/// credential as available that another worker has just exhausted.
#[derive(Debug)]
pub enum CredentialActorMessage {
    /// Request one usable credential.
    Acquire(RpcReplyPort<AcquireOutcome>),

    /// Report the actual cost consumed plus the authoritative remote quota.
    Report {
        id: CredentialId,
        cost: i64,
        quota: Option<QuotaSnapshot>,
    },

    /// Return a credential to the pool.
    Release { id: CredentialId },

    Stats(RpcReplyPort<PoolStats>),
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
}

/// Handle for interacting with the credential pool actor.
#[derive(Clone)]
pub struct CredentialPoolHandle {
    actor: ActorRef<CredentialActorMessage>,
}

impl CredentialPoolHandle {
    pub async fn acquire(&self) -> Result<AcquireOutcome, MagpieError> {
        ractor::call!(self.actor, CredentialActorMessage::Acquire)
            .map_err(|e| MagpieError::RactorError(format!("Acquire RPC failed: {e}")))
    }

    /// Acquire, sleeping through quota exhaustion. Exhaustion is not an
    /// error: the caller waits until the pool's suggested retry time.
    pub async fn acquire_waiting(&self) -> Result<CredentialLease, MagpieError> {
        loop {
            match self.acquire().await? {
                AcquireOutcome::Acquired(lease) => return Ok(lease),
                AcquireOutcome::Exhausted { retry_at } => {
                    let wait = (retry_at - Utc::now())
                        .to_std()
                        .unwrap_or_else(|_| std::time::Duration::from_secs(1))
                        .max(std::time::Duration::from_secs(1));
                    debug!(
                        retry_at = %retry_at,
                        wait_secs = wait.as_secs(),
                        "Credential pool exhausted, waiting for quota window"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    pub async fn report(&self, id: CredentialId, cost: i64, quota: Option<QuotaSnapshot>) {
        let _ = ractor::cast!(
            self.actor,
            CredentialActorMessage::Report { id, cost, quota }
        );
    }

    pub async fn release(&self, id: CredentialId) {
        let _ = ractor::cast!(self.actor, CredentialActorMessage::Release { id });
    }

    pub async fn stats(&self) -> Result<PoolStats, MagpieError> {
        ractor::call!(self.actor, CredentialActorMessage::Stats)
            .map_err(|e| MagpieError::RactorError(format!("Stats RPC failed: {e}")))
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }
}

struct CredentialActor;

#[ractor::async_trait]
impl Actor for CredentialActor {
    type Msg = CredentialActorMessage;
    type State = CredentialPool;
    type Arguments = CredentialsConfig;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        cfg: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let window = Duration::seconds(i64::try_from(cfg.quota_window_secs).unwrap_or(3600));
        let mut pool = CredentialPool::new(window);

        let now = Utc::now();
        for (index, seed) in cfg.tokens.iter().enumerate() {
            let id = index as u64 + 1;
            let quota_max = seed.quota_max.unwrap_or(cfg.quota_max);
            pool.add_credential(id, seed.token.clone(), quota_max, now);
        }

        info!(
            credentials = pool.total(),
            quota_max = cfg.quota_max,
            quota_window_secs = cfg.quota_window_secs,
            "CredentialPool actor started"
        );
        Ok(pool)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        pool: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CredentialActorMessage::Acquire(reply) => {
                let outcome = pool.acquire(Utc::now());
                match &outcome {
                    AcquireOutcome::Acquired(lease) => {
                        debug!(id = lease.id, "Credential acquired");
                    }
                    AcquireOutcome::Exhausted { retry_at } => {
                        warn!(
                            retry_at = %retry_at,
                            total = pool.total(),
                            "No credential available"
                        );
                    }
                }
                let _ = reply.send(outcome);
            }

            CredentialActorMessage::Report { id, cost, quota } => {
                pool.report(id, cost, quota);
            }

            CredentialActorMessage::Release { id } => {
                pool.release(id);
            }

            CredentialActorMessage::Stats(reply) => {
                let now = Utc::now();
                let _ = reply.send(PoolStats {
                    total: pool.total(),
                    available: pool.available(now),
                });
            }
        }
        Ok(())
    }
}

/// Spawn the credential pool actor and return a cloneable handle.
pub async fn spawn(cfg: CredentialsConfig) -> CredentialPoolHandle {
    let (actor, _jh) = Actor::spawn(Some("CredentialPool".to_string()), CredentialActor, cfg)
        .await
        .expect("failed to spawn CredentialPool actor");

    CredentialPoolHandle { actor }
}
