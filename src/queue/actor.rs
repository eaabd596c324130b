use crate::error::MagpieError;
use crate::partition::UnitSpec;
use crate::queue::schema::QUEUE_INIT;
use crate::queue::state::{QueueDepth, QueueState, UnitLease, UnitState, WorkUnit};
use chrono::{DateTime, Duration, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub lease_secs: u64,
    pub max_attempts: u32,
    pub reap_interval_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lease_secs: 300,
            max_attempts: 5,
            reap_interval_secs: 30,
        }
    }
}

/// Public messages handled by the work queue actor.
#[derive(Debug)]
pub enum QueueActorMessage {
    /// Enqueue unit descriptors; already-known specs are skipped, so
    /// re-planning after a crash is idempotent. Replies with the number of
    /// newly registered units.
    Enqueue(Vec<UnitSpec>, RpcReplyPort<Result<usize, MagpieError>>),

    /// Lease one pending unit, or `None` when nothing is deliverable.
    Lease(RpcReplyPort<Result<Option<UnitLease>, MagpieError>>),

    /// Retire a unit permanently.
    Ack(Uuid, RpcReplyPort<Result<(), MagpieError>>),

    /// Count an attempt; re-queue or dead-letter.
    Fail(Uuid, bool, RpcReplyPort<Result<(), MagpieError>>),

    Depth(RpcReplyPort<QueueDepth>),

    /// Dead-lettered units held for inspection.
    DeadLetters(RpcReplyPort<Vec<WorkUnit>>),

    // Internal: periodic expired-lease reclaim.
    Reap,
}

/// Handle for interacting with the work queue actor.
#[derive(Clone)]
pub struct QueueHandle {
    actor: ActorRef<QueueActorMessage>,
}

impl QueueHandle {
    pub async fn enqueue(&self, specs: Vec<UnitSpec>) -> Result<usize, MagpieError> {
        ractor::call!(self.actor, QueueActorMessage::Enqueue, specs)
            .map_err(|e| MagpieError::RactorError(format!("Enqueue RPC failed: {e}")))?
    }

    pub async fn lease(&self) -> Result<Option<UnitLease>, MagpieError> {
        ractor::call!(self.actor, QueueActorMessage::Lease)
            .map_err(|e| MagpieError::RactorError(format!("Lease RPC failed: {e}")))?
    }

    pub async fn ack(&self, token: Uuid) -> Result<(), MagpieError> {
        ractor::call!(self.actor, QueueActorMessage::Ack, token)
            .map_err(|e| MagpieError::RactorError(format!("Ack RPC failed: {e}")))?
    }

    pub async fn fail(&self, token: Uuid, retry: bool) -> Result<(), MagpieError> {
        ractor::call!(self.actor, QueueActorMessage::Fail, token, retry)
            .map_err(|e| MagpieError::RactorError(format!("Fail RPC failed: {e}")))?
    }

    pub async fn depth(&self) -> Result<QueueDepth, MagpieError> {
        ractor::call!(self.actor, QueueActorMessage::Depth)
            .map_err(|e| MagpieError::RactorError(format!("Depth RPC failed: {e}")))
    }

    pub async fn dead_letters(&self) -> Result<Vec<WorkUnit>, MagpieError> {
        ractor::call!(self.actor, QueueActorMessage::DeadLetters)
            .map_err(|e| MagpieError::RactorError(format!("DeadLetters RPC failed: {e}")))
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }
}

#[derive(Debug, FromRow)]
struct DbWorkUnit {
    id: i64,
    spec: String,
    state: String,
    lease_expiry: Option<DateTime<Utc>>,
    attempt_count: i64,
}

impl TryFrom<DbWorkUnit> for WorkUnit {
    type Error = MagpieError;

    fn try_from(row: DbWorkUnit) -> Result<Self, Self::Error> {
        Ok(WorkUnit {
            id: row.id,
            spec: serde_json::from_str(&row.spec)?,
            state: UnitState::parse(&row.state)?,
            lease_expiry: row.lease_expiry,
            attempt_count: u32::try_from(row.attempt_count).unwrap_or(u32::MAX),
        })
    }
}

struct QueueActorState {
    pool: SqlitePool,
    queue: QueueState,
    lease_timeout: Duration,
}

struct QueueActor;

#[ractor::async_trait]
impl Actor for QueueActor {
    type Msg = QueueActorMessage;
    type State = QueueActorState;
    type Arguments = (String, QueueSettings);

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        (database_url, settings): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let connect_opts = SqliteConnectOptions::from_str(database_url.as_str())
            .map_err(|e| ActorProcessingErr::from(format!("invalid queue database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .connect_with(connect_opts)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("queue db connect failed: {e}")))?;

        apply_schema(&pool)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("queue schema init failed: {e}")))?;

        // Crash recovery: replay every non-terminal unit. Units that were
        // leased stay leased until the reaper reclaims them; the old lease
        // tokens died with the previous process.
        let mut queue = QueueState::new(settings.max_attempts);
        let rows = sqlx::query_as::<_, DbWorkUnit>(
            r#"
        SELECT id, spec, state, lease_expiry, attempt_count
        FROM work_units
        WHERE state IN ('pending', 'leased')
        ORDER BY id
        "#,
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| ActorProcessingErr::from(format!("queue replay failed: {e}")))?;

        let replayed = rows.len();
        for row in rows {
            let unit = WorkUnit::try_from(row)
                .map_err(|e| ActorProcessingErr::from(format!("queue replay failed: {e}")))?;
            queue.insert(unit);
        }

        let _ = myself.send_interval(
            std::time::Duration::from_secs(settings.reap_interval_secs.max(1)),
            || QueueActorMessage::Reap,
        );

        info!(
            replayed,
            lease_secs = settings.lease_secs,
            max_attempts = settings.max_attempts,
            "WorkQueue actor started"
        );

        Ok(QueueActorState {
            pool,
            queue,
            lease_timeout: Duration::seconds(i64::try_from(settings.lease_secs).unwrap_or(300)),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueActorMessage::Enqueue(specs, reply) => {
                let res = enqueue(&state.pool, &mut state.queue, specs).await;
                let _ = reply.send(res);
            }

            QueueActorMessage::Lease(reply) => {
                let lease = state.queue.lease(state.lease_timeout, Utc::now());
                if let Some(lease) = &lease {
                    persist_transition(
                        &state.pool,
                        lease.unit_id,
                        UnitState::Leased,
                        Some(lease.expires_at),
                        None,
                    )
                    .await;
                }
                let _ = reply.send(Ok(lease));
            }

            QueueActorMessage::Ack(token, reply) => {
                let res = match state.queue.ack(token) {
                    Ok(id) => {
                        persist_transition(&state.pool, id, UnitState::Done, None, None).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(res);
            }

            QueueActorMessage::Fail(token, retry, reply) => {
                let res = match state.queue.fail(token, retry) {
                    Ok((id, new_state)) => {
                        let attempts = state.queue.get(id).map(|u| u.attempt_count);
                        persist_transition(&state.pool, id, new_state, None, attempts).await;
                        if new_state == UnitState::DeadLetter {
                            warn!(unit_id = id, "Work unit dead-lettered");
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(res);
            }

            QueueActorMessage::Depth(reply) => {
                let _ = reply.send(state.queue.depth());
            }

            QueueActorMessage::DeadLetters(reply) => {
                let _ = reply.send(state.queue.dead_letters());
            }

            QueueActorMessage::Reap => {
                let reclaimed = state.queue.reap(Utc::now());
                if reclaimed.is_empty() {
                    return Ok(());
                }
                info!(count = reclaimed.len(), "Reaper reclaimed expired leases");
                for (id, new_state) in reclaimed {
                    let attempts = state.queue.get(id).map(|u| u.attempt_count);
                    persist_transition(&state.pool, id, new_state, None, attempts).await;
                    if new_state == UnitState::DeadLetter {
                        warn!(unit_id = id, "Work unit dead-lettered after lease expiry");
                    }
                }
            }
        }
        Ok(())
    }
}

async fn enqueue(
    pool: &SqlitePool,
    queue: &mut QueueState,
    specs: Vec<UnitSpec>,
) -> Result<usize, MagpieError> {
    let now = Utc::now();
    let mut registered = 0usize;

    for spec in specs {
        let spec_json = serde_json::to_string(&spec)?;
        let id: Option<i64> = sqlx::query_scalar(
            r#"
        INSERT INTO work_units (spec, state, attempt_count, created_at, updated_at)
        VALUES (?, 'pending', 0, ?, ?)
        ON CONFLICT(spec) DO NOTHING
        RETURNING id
        "#,
        )
        .bind(&spec_json)
        .bind(now)
        .bind(now)
        .fetch_optional(pool)
        .await?;

        if let Some(id) = id {
            queue.insert(WorkUnit {
                id,
                spec,
                state: UnitState::Pending,
                lease_expiry: None,
                attempt_count: 0,
            });
            registered += 1;
        }
    }
    Ok(registered)
}

/// Writes a state transition through to the durability log. In-memory state
/// is authoritative during a run; a failed write costs at worst one
/// redelivery after a restart, which the upsert path absorbs.
async fn persist_transition(
    pool: &SqlitePool,
    id: i64,
    new_state: UnitState,
    lease_expiry: Option<DateTime<Utc>>,
    attempt_count: Option<u32>,
) {
    let result = sqlx::query(
        r#"
    UPDATE work_units
    SET state = ?,
        lease_expiry = ?,
        attempt_count = COALESCE(?, attempt_count),
        updated_at = ?
    WHERE id = ?
    "#,
    )
    .bind(new_state.as_str())
    .bind(lease_expiry)
    .bind(attempt_count)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await;

    if let Err(e) = result {
        warn!(unit_id = id, error = %e, "Failed to persist queue transition");
    }
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), MagpieError> {
    for stmt in QUEUE_INIT.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(pool).await?;
    }
    Ok(())
}

/// Spawn the work queue actor and return a cloneable handle.
pub async fn spawn(database_url: &str, settings: QueueSettings) -> QueueHandle {
    let (actor, _jh) = Actor::spawn(
        Some("WorkQueue".to_string()),
        QueueActor,
        (database_url.to_string(), settings),
    )
    .await
    .expect("failed to spawn WorkQueue actor");

    QueueHandle { actor }
}
