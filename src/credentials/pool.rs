use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

pub type CredentialId = u64;

/// One API credential with locally tracked quota accounting.
#[derive(Debug, Clone)]
pub struct PooledCredential {
    pub token: String,
    pub quota_max: i64,
    pub quota_remaining: i64,
    pub reset_at: DateTime<Utc>,
    pub in_use: bool,
}

/// A granted credential. The id must accompany `report`/`release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialLease {
    pub id: CredentialId,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(CredentialLease),
    /// No usable credential right now; retry no earlier than `retry_at`.
    Exhausted { retry_at: DateTime<Utc> },
}

/// Authoritative quota accounting reported by the remote service. Local
/// tracking yields to these values on every report, which absorbs clock
/// skew and any drift between local decrements and the remote counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

/// Core scheduling logic for credentials (no IO, no locks).
///
/// Every time-dependent operation takes `now` explicitly so tests can drive
/// a fake clock; the actor wrapping this pool passes `Utc::now()`.
pub struct CredentialPool {
    creds: HashMap<CredentialId, PooledCredential>,
    window: Duration,
}

impl CredentialPool {
    pub fn new(window: Duration) -> Self {
        Self {
            creds: HashMap::new(),
            window,
        }
    }

    pub fn add_credential(
        &mut self,
        id: CredentialId,
        token: String,
        quota_max: i64,
        now: DateTime<Utc>,
    ) {
        self.creds.insert(
            id,
            PooledCredential {
                token,
                quota_max,
                quota_remaining: quota_max,
                reset_at: now + self.window,
                in_use: false,
            },
        );
    }

    /// Selects the usable credential with the highest remaining quota,
    /// breaking ties by earliest `reset_at`. A credential whose window has
    /// passed is refreshed to `quota_max` first. Never returns a credential
    /// with `quota_remaining <= 0` before its reset.
    pub fn acquire(&mut self, now: DateTime<Utc>) -> AcquireOutcome {
        self.refresh_expired(now);

        let best = self
            .creds
            .iter()
            .filter(|(_, c)| !c.in_use && c.quota_remaining > 0)
            .max_by(|(a_id, a), (b_id, b)| {
                a.quota_remaining
                    .cmp(&b.quota_remaining)
                    .then_with(|| b.reset_at.cmp(&a.reset_at))
                    .then_with(|| b_id.cmp(a_id))
            })
            .map(|(id, _)| *id);

        if let Some(id) = best {
            let cred = self.creds.get_mut(&id).expect("candidate exists");
            cred.in_use = true;
            return AcquireOutcome::Acquired(CredentialLease {
                id,
                token: cred.token.clone(),
            });
        }

        // Credentials held by other workers come back via `release`, so a
        // short retry beats waiting for a window reset.
        let busy_with_quota = self
            .creds
            .values()
            .any(|c| c.in_use && c.quota_remaining > 0);
        let retry_at = if busy_with_quota {
            now + Duration::seconds(1)
        } else {
            self.min_reset_at().unwrap_or(now + self.window)
        };

        AcquireOutcome::Exhausted { retry_at }
    }

    /// Applies the actual cost consumed and absorbs the authoritative
    /// remote quota counters when present. `quota_remaining` saturates at
    /// zero, never negative.
    pub fn report(&mut self, id: CredentialId, cost: i64, quota: Option<QuotaSnapshot>) {
        let Some(cred) = self.creds.get_mut(&id) else {
            return;
        };

        cred.quota_remaining = cred.quota_remaining.saturating_sub(cost.max(0)).max(0);

        if let Some(snapshot) = quota {
            cred.quota_remaining = snapshot.remaining.max(0);
            cred.reset_at = snapshot.reset_at;
        }
    }

    pub fn release(&mut self, id: CredentialId) {
        if let Some(cred) = self.creds.get_mut(&id) {
            cred.in_use = false;
        }
    }

    pub fn min_reset_at(&self) -> Option<DateTime<Utc>> {
        self.creds.values().map(|c| c.reset_at).min()
    }

    pub fn total(&self) -> usize {
        self.creds.len()
    }

    pub fn available(&self, now: DateTime<Utc>) -> usize {
        self.creds
            .values()
            .filter(|c| !c.in_use && (c.quota_remaining > 0 || c.reset_at <= now))
            .count()
    }

    fn refresh_expired(&mut self, now: DateTime<Utc>) {
        for cred in self.creds.values_mut() {
            if cred.reset_at <= now {
                cred.quota_remaining = cred.quota_max;
                cred.reset_at = now + self.window;
            }
        }
    }

    #[cfg(test)]
    fn quota_remaining(&self, id: CredentialId) -> i64 {
        self.creds[&id].quota_remaining
    }
}
