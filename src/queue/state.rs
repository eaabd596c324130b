use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use crate::error::MagpieError;
use crate::partition::UnitSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Leased,
    Done,
    DeadLetter,
}

impl UnitState {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Pending => "pending",
            UnitState::Leased => "leased",
            UnitState::Done => "done",
            UnitState::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(s: &str) -> Result<Self, MagpieError> {
        match s {
            "pending" => Ok(UnitState::Pending),
            "leased" => Ok(UnitState::Leased),
            "done" => Ok(UnitState::Done),
            "dead_letter" => Ok(UnitState::DeadLetter),
            other => Err(MagpieError::UnexpectedError(format!(
                "unknown work unit state: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub id: i64,
    pub spec: UnitSpec,
    pub state: UnitState,
    pub lease_expiry: Option<DateTime<Utc>>,
    pub attempt_count: u32,
}

/// A granted lease. The opaque token must accompany `ack`/`fail`; it dies
/// with the lease, so a reclaimed unit cannot be acked by a late worker.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitLease {
    pub unit_id: i64,
    pub spec: UnitSpec,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub pending: usize,
    pub leased: usize,
    pub done: usize,
    pub dead_letter: usize,
}

impl QueueDepth {
    /// Units still owed to workers.
    pub fn outstanding(self) -> usize {
        self.pending + self.leased
    }
}

/// Core lease/ack/fail state machine for work units (no IO, no locks).
///
/// Invariant: at most one unexpired lease per unit. All time-dependent
/// operations take `now` explicitly; the queue actor passes `Utc::now()`.
pub struct QueueState {
    units: HashMap<i64, WorkUnit>,
    pending: VecDeque<i64>,
    leases: HashMap<Uuid, i64>,
    max_attempts: u32,
}

impl QueueState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            units: HashMap::new(),
            pending: VecDeque::new(),
            leases: HashMap::new(),
            max_attempts,
        }
    }

    /// Registers a unit (fresh enqueue or crash-recovery replay). Replayed
    /// leased units keep their expiry and fall to the reaper; their tokens
    /// died with the previous process.
    pub fn insert(&mut self, unit: WorkUnit) {
        let id = unit.id;
        let state = unit.state;
        self.units.insert(id, unit);
        if state == UnitState::Pending {
            self.pending.push_back(id);
        }
    }

    pub fn lease(&mut self, timeout: Duration, now: DateTime<Utc>) -> Option<UnitLease> {
        while let Some(id) = self.pending.pop_front() {
            let Some(unit) = self.units.get_mut(&id) else {
                continue;
            };
            if unit.state != UnitState::Pending {
                continue;
            }

            let expires_at = now + timeout;
            unit.state = UnitState::Leased;
            unit.lease_expiry = Some(expires_at);

            let token = Uuid::new_v4();
            self.leases.insert(token, id);
            return Some(UnitLease {
                unit_id: id,
                spec: unit.spec.clone(),
                token,
                expires_at,
            });
        }
        None
    }

    /// Permanently retires the unit; it is never redelivered.
    pub fn ack(&mut self, token: Uuid) -> Result<i64, MagpieError> {
        let id = self
            .leases
            .remove(&token)
            .ok_or(MagpieError::UnknownLease(token))?;
        let unit = self.units.get_mut(&id).expect("leased unit exists");
        unit.state = UnitState::Done;
        unit.lease_expiry = None;
        Ok(id)
    }

    /// Counts an attempt and either re-queues the unit or dead-letters it.
    /// Exceeding the attempt bound dead-letters regardless of `retry`.
    pub fn fail(&mut self, token: Uuid, retry: bool) -> Result<(i64, UnitState), MagpieError> {
        let id = self
            .leases
            .remove(&token)
            .ok_or(MagpieError::UnknownLease(token))?;
        let unit = self.units.get_mut(&id).expect("leased unit exists");

        unit.attempt_count += 1;
        unit.lease_expiry = None;

        if retry && unit.attempt_count <= self.max_attempts {
            unit.state = UnitState::Pending;
            self.pending.push_back(id);
        } else {
            unit.state = UnitState::DeadLetter;
        }
        Ok((id, unit.state))
    }

    /// Reclaims expired leases. A crashed worker's unit is never stuck: it
    /// returns to pending (counted as an attempt, so a unit that keeps
    /// killing workers eventually dead-letters instead of looping forever).
    pub fn reap(&mut self, now: DateTime<Utc>) -> Vec<(i64, UnitState)> {
        let expired: Vec<i64> = self
            .units
            .values()
            .filter(|u| {
                u.state == UnitState::Leased && u.lease_expiry.is_some_and(|exp| exp <= now)
            })
            .map(|u| u.id)
            .collect();

        if expired.is_empty() {
            return Vec::new();
        }

        self.leases.retain(|_, id| !expired.contains(id));

        let mut reclaimed = Vec::with_capacity(expired.len());
        for id in expired {
            let unit = self.units.get_mut(&id).expect("expired unit exists");
            unit.attempt_count += 1;
            unit.lease_expiry = None;
            if unit.attempt_count <= self.max_attempts {
                unit.state = UnitState::Pending;
                self.pending.push_back(id);
            } else {
                unit.state = UnitState::DeadLetter;
            }
            reclaimed.push((id, unit.state));
        }
        reclaimed
    }

    pub fn get(&self, id: i64) -> Option<&WorkUnit> {
        self.units.get(&id)
    }

    pub fn depth(&self) -> QueueDepth {
        let mut depth = QueueDepth::default();
        for unit in self.units.values() {
            match unit.state {
                UnitState::Pending => depth.pending += 1,
                UnitState::Leased => depth.leased += 1,
                UnitState::Done => depth.done += 1,
                UnitState::DeadLetter => depth.dead_letter += 1,
            }
        }
        depth
    }

    /// Dead-lettered units, surfaced for inspection rather than dropped.
    pub fn dead_letters(&self) -> Vec<WorkUnit> {
        let mut units: Vec<WorkUnit> = self
            .units
            .values()
            .filter(|u| u.state == UnitState::DeadLetter)
            .cloned()
            .collect();
        units.sort_by_key(|u| u.id);
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn unit(id: i64) -> WorkUnit {
        WorkUnit {
            id,
            spec: UnitSpec::IdRange {
                lo: id as u64 * 100,
                hi: id as u64 * 100 + 99,
            },
            state: UnitState::Pending,
            lease_expiry: None,
            attempt_count: 0,
        }
    }

    fn queue_with(n: i64, max_attempts: u32) -> QueueState {
        let mut queue = QueueState::new(max_attempts);
        for id in 1..=n {
            queue.insert(unit(id));
        }
        queue
    }

    #[test]
    fn at_most_one_live_lease_per_unit() {
        let mut queue = queue_with(1, 3);
        let timeout = Duration::minutes(5);

        let first = queue.lease(timeout, t0()).expect("one unit pending");
        assert_eq!(first.unit_id, 1);
        assert!(
            queue.lease(timeout, t0()).is_none(),
            "leased unit must not be leased again before expiry"
        );
    }

    #[test]
    fn expired_lease_is_reclaimed_and_releasable() {
        let mut queue = queue_with(1, 3);
        let timeout = Duration::minutes(5);

        let first = queue.lease(timeout, t0()).unwrap();
        let after_expiry = t0() + Duration::minutes(6);

        let reclaimed = queue.reap(after_expiry);
        assert_eq!(reclaimed, vec![(1, UnitState::Pending)]);

        let second = queue.lease(timeout, after_expiry).expect("re-leaseable");
        assert_eq!(second.unit_id, 1);
        assert_ne!(first.token, second.token);

        // The dead worker's token no longer acks anything.
        assert!(matches!(
            queue.ack(first.token),
            Err(MagpieError::UnknownLease(_))
        ));
    }

    #[test]
    fn ack_permanently_retires_the_unit() {
        let mut queue = queue_with(1, 3);
        let lease = queue.lease(Duration::minutes(5), t0()).unwrap();
        queue.ack(lease.token).unwrap();

        assert!(queue.lease(Duration::minutes(5), t0()).is_none());
        assert_eq!(queue.get(1).unwrap().state, UnitState::Done);
        assert_eq!(queue.depth().outstanding(), 0);
    }

    #[test]
    fn fourth_failure_dead_letters_under_max_three_attempts() {
        let mut queue = queue_with(1, 3);
        let timeout = Duration::minutes(5);

        for attempt in 1..=3 {
            let lease = queue.lease(timeout, t0()).unwrap();
            let (_, state) = queue.fail(lease.token, true).unwrap();
            assert_eq!(state, UnitState::Pending, "attempt {attempt} re-queues");
        }

        let lease = queue.lease(timeout, t0()).unwrap();
        let (_, state) = queue.fail(lease.token, true).unwrap();
        assert_eq!(state, UnitState::DeadLetter);
        assert_eq!(queue.dead_letters().len(), 1);
        assert!(queue.lease(timeout, t0()).is_none());
    }

    #[test]
    fn non_retryable_failure_dead_letters_immediately() {
        let mut queue = queue_with(1, 3);
        let lease = queue.lease(Duration::minutes(5), t0()).unwrap();
        let (_, state) = queue.fail(lease.token, false).unwrap();
        assert_eq!(state, UnitState::DeadLetter);
    }

    #[test]
    fn repeated_crashes_eventually_dead_letter() {
        let mut queue = queue_with(1, 2);
        let timeout = Duration::minutes(5);
        let mut now = t0();

        // Two crash-reclaim cycles stay under the bound...
        for _ in 0..2 {
            queue.lease(timeout, now).unwrap();
            now += Duration::minutes(6);
            assert_eq!(queue.reap(now), vec![(1, UnitState::Pending)]);
        }

        // ...the third exceeds it.
        queue.lease(timeout, now).unwrap();
        now += Duration::minutes(6);
        assert_eq!(queue.reap(now), vec![(1, UnitState::DeadLetter)]);
    }

    #[test]
    fn depth_tracks_all_states() {
        let mut queue = queue_with(3, 3);
        let timeout = Duration::minutes(5);

        let a = queue.lease(timeout, t0()).unwrap();
        queue.ack(a.token).unwrap();
        let b = queue.lease(timeout, t0()).unwrap();
        queue.fail(b.token, false).unwrap();
        queue.lease(timeout, t0()).unwrap();

        let depth = queue.depth();
        assert_eq!(depth.done, 1);
        assert_eq!(depth.dead_letter, 1);
        assert_eq!(depth.leased, 1);
        assert_eq!(depth.pending, 0);
        assert_eq!(depth.outstanding(), 1);
    }
}
