//! In-memory quota ledger.
//!
//! One mutex guards the usage records, both identity indexes and the
//! idempotency entries, so an admission decision is a single critical
//! section and two requests sharing a job id can never both consume.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::{NaiveDate, Utc};

use crate::quota::identity::ClientIdentity;
use crate::quota::{Admission, AdmitReason, LedgerStats, QuotaLedger, QuotaPolicy, Remaining};

/// Message returned to clients that used up their daily quota.
pub const LIMIT_REACHED_MESSAGE: &str =
    "Daily limit reached. Your credits reset at midnight UTC.";

#[derive(Debug, Clone, Copy)]
struct UsageRecord {
    count: u32,
    last_reset: NaiveDate,
}

impl UsageRecord {
    fn roll_over(&mut self, today: NaiveDate) {
        if self.last_reset != today {
            self.count = 0;
            self.last_reset = today;
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    records: HashMap<u64, UsageRecord>,
    by_fingerprint: HashMap<String, u64>,
    by_ip: HashMap<String, u64>,
    /// Consumed job ids and when they stop re-admitting.
    idempotency: HashMap<String, Instant>,
    next_id: u64,
}

impl LedgerState {
    /// Fingerprint match wins over IP match.
    fn find(&self, client: &ClientIdentity) -> Option<u64> {
        client
            .fingerprint
            .as_ref()
            .and_then(|fp| self.by_fingerprint.get(fp))
            .or_else(|| self.by_ip.get(&client.ip))
            .copied()
    }

    fn find_or_create(&mut self, client: &ClientIdentity, today: NaiveDate) -> u64 {
        let id = match self.find(client) {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.records.insert(
                    id,
                    UsageRecord {
                        count: 0,
                        last_reset: today,
                    },
                );
                id
            }
        };

        // Link signals not yet known so either one finds this record later.
        if let Some(fp) = &client.fingerprint {
            self.by_fingerprint.entry(fp.clone()).or_insert(id);
        }
        self.by_ip.entry(client.ip.clone()).or_insert(id);
        id
    }

    fn job_consumed(&self, job_id: &str, now: Instant) -> bool {
        self.idempotency
            .get(job_id)
            .is_some_and(|expires_at| *expires_at > now)
    }
}

/// Process-local ledger; lost on restart.
#[derive(Debug)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    policy: ArcSwap<QuotaPolicy>,
}

impl InMemoryLedger {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            policy: ArcSwap::from_pointee(policy),
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, LedgerState>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!("Quota ledger lock poisoned, failing open");
                None
            }
        }
    }

    pub(crate) fn check_and_consume_at(
        &self,
        client: &ClientIdentity,
        exempt: bool,
        job_id: Option<&str>,
        today: NaiveDate,
        now: Instant,
    ) -> Admission {
        if exempt {
            return Admission::Admit {
                reason: AdmitReason::Exempt,
                remaining: Remaining::Unlimited,
            };
        }

        let policy = self.policy.load();
        let Some(mut state) = self.lock() else {
            return Admission::Admit {
                reason: AdmitReason::FailOpen,
                remaining: Remaining::Unlimited,
            };
        };

        let job_id = job_id.filter(|j| !j.is_empty());
        if let Some(job) = job_id {
            if state.job_consumed(job, now) {
                let remaining = state
                    .find(client)
                    .and_then(|id| state.records.get(&id))
                    .map(|record| remaining_for(record, today, policy.daily_limit))
                    .unwrap_or(policy.daily_limit);
                return Admission::Admit {
                    reason: AdmitReason::Idempotent,
                    remaining: Remaining::Limited(remaining),
                };
            }
        }

        let id = state.find_or_create(client, today);
        let Some(record) = state.records.get_mut(&id) else {
            return Admission::Admit {
                reason: AdmitReason::FailOpen,
                remaining: Remaining::Unlimited,
            };
        };
        record.roll_over(today);

        if record.count >= policy.daily_limit {
            return Admission::Reject {
                message: LIMIT_REACHED_MESSAGE.to_string(),
                remaining: 0,
            };
        }

        record.count += 1;
        let remaining = policy.daily_limit - record.count;
        if let Some(job) = job_id {
            state
                .idempotency
                .insert(job.to_string(), now + policy.idempotency_ttl);
        }

        Admission::Admit {
            reason: AdmitReason::Consumed,
            remaining: Remaining::Limited(remaining),
        }
    }

    pub(crate) fn peek_remaining_at(
        &self,
        client: &ClientIdentity,
        exempt: bool,
        today: NaiveDate,
    ) -> Remaining {
        if exempt {
            return Remaining::Unlimited;
        }
        let limit = self.policy.load().daily_limit;
        let Some(mut state) = self.lock() else {
            return Remaining::Limited(limit);
        };

        let Some(id) = state.find(client) else {
            return Remaining::Limited(limit);
        };
        match state.records.get_mut(&id) {
            Some(record) => {
                record.roll_over(today);
                Remaining::Limited(limit.saturating_sub(record.count))
            }
            None => Remaining::Limited(limit),
        }
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let Some(mut state) = self.lock() else {
            return 0;
        };
        let before = state.idempotency.len();
        state.idempotency.retain(|_, expires_at| *expires_at > now);
        before - state.idempotency.len()
    }
}

fn remaining_for(record: &UsageRecord, today: NaiveDate, limit: u32) -> u32 {
    if record.last_reset == today {
        limit.saturating_sub(record.count)
    } else {
        limit
    }
}

fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

impl QuotaLedger for InMemoryLedger {
    fn check_and_consume(
        &self,
        client: &ClientIdentity,
        exempt: bool,
        job_id: Option<&str>,
    ) -> Admission {
        self.check_and_consume_at(client, exempt, job_id, today_utc(), Instant::now())
    }

    fn peek_remaining(&self, client: &ClientIdentity, exempt: bool) -> Remaining {
        self.peek_remaining_at(client, exempt, today_utc())
    }

    fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn policy(&self) -> QuotaPolicy {
        **self.policy.load()
    }

    fn update_policy(&self, policy: QuotaPolicy) {
        self.policy.store(Arc::new(policy));
    }

    fn stats(&self) -> LedgerStats {
        let daily_limit = self.policy.load().daily_limit;
        match self.lock() {
            Some(state) => LedgerStats {
                tracked_clients: state.records.len(),
                pending_job_ids: state.idempotency.len(),
                daily_limit,
            },
            None => LedgerStats {
                tracked_clients: 0,
                pending_job_ids: 0,
                daily_limit,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ledger(limit: u32) -> InMemoryLedger {
        InMemoryLedger::new(QuotaPolicy {
            daily_limit: limit,
            idempotency_ttl: Duration::from_secs(600),
        })
    }

    fn client(fp: &str, ip: &str) -> ClientIdentity {
        ClientIdentity::new(Some(fp.to_string()), ip)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn remaining(admission: &Admission) -> Option<u32> {
        match admission {
            Admission::Admit {
                remaining: Remaining::Limited(n),
                ..
            } => Some(*n),
            Admission::Reject { remaining, .. } => Some(*remaining),
            _ => None,
        }
    }

    #[test]
    fn test_exhaustion_then_reject() {
        let ledger = ledger(5);
        let c = client("fp-1", "1.1.1.1");
        let now = Instant::now();

        let seen: Vec<_> = (0..5)
            .map(|_| remaining(&ledger.check_and_consume_at(&c, false, None, day(1), now)))
            .collect();
        assert_eq!(seen, vec![Some(4), Some(3), Some(2), Some(1), Some(0)]);

        let rejected = ledger.check_and_consume_at(&c, false, None, day(1), now);
        assert!(!rejected.is_admitted());
        assert_eq!(remaining(&rejected), Some(0));
    }

    #[test]
    fn test_rollover_resets() {
        let ledger = ledger(5);
        let c = client("fp-1", "1.1.1.1");
        let now = Instant::now();
        for _ in 0..5 {
            ledger.check_and_consume_at(&c, false, None, day(1), now);
        }
        assert!(!ledger.check_and_consume_at(&c, false, None, day(1), now).is_admitted());

        let next_day = ledger.check_and_consume_at(&c, false, None, day(2), now);
        assert!(next_day.is_admitted());
        assert_eq!(remaining(&next_day), Some(4));
    }

    #[test]
    fn test_idempotent_job() {
        let ledger = ledger(5);
        let c = client("fp-1", "1.1.1.1");
        let now = Instant::now();

        let first = ledger.check_and_consume_at(&c, false, Some("job-1"), day(1), now);
        let again = ledger.check_and_consume_at(&c, false, Some("job-1"), day(1), now);
        assert_eq!(remaining(&first), Some(4));
        assert_eq!(remaining(&again), Some(4));
        assert!(matches!(
            again,
            Admission::Admit {
                reason: AdmitReason::Idempotent,
                ..
            }
        ));

        // After the idempotency window the job id charges again.
        let later = now + Duration::from_secs(601);
        let charged = ledger.check_and_consume_at(&c, false, Some("job-1"), day(1), later);
        assert_eq!(remaining(&charged), Some(3));
    }

    #[test]
    fn test_idempotent_job_concurrent() {
        let ledger = Arc::new(ledger(5));
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    let c = client("fp-1", "1.1.1.1");
                    ledger.check_and_consume_at(&c, false, Some("job-x"), day(1), now);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let c = client("fp-1", "1.1.1.1");
        assert_eq!(ledger.peek_remaining_at(&c, false, day(1)), Remaining::Limited(4));
    }

    #[test]
    fn test_exempt_never_mutates() {
        let ledger = ledger(1);
        let c = client("fp-1", "1.1.1.1");
        let now = Instant::now();
        for _ in 0..3 {
            let admission = ledger.check_and_consume_at(&c, true, Some("job"), day(1), now);
            assert!(matches!(
                admission,
                Admission::Admit {
                    reason: AdmitReason::Exempt,
                    remaining: Remaining::Unlimited
                }
            ));
        }
        assert_eq!(ledger.stats().tracked_clients, 0);
        assert_eq!(ledger.stats().pending_job_ids, 0);
    }

    #[test]
    fn test_fingerprint_or_ip_identifies() {
        let ledger = ledger(3);
        let now = Instant::now();
        ledger.check_and_consume_at(&client("fp-1", "1.1.1.1"), false, None, day(1), now);

        // New fingerprint, same IP.
        let r = ledger.check_and_consume_at(&client("fp-2", "1.1.1.1"), false, None, day(1), now);
        assert_eq!(remaining(&r), Some(1));

        // Known fingerprint, new IP.
        let r = ledger.check_and_consume_at(&client("fp-1", "9.9.9.9"), false, None, day(1), now);
        assert_eq!(remaining(&r), Some(0));

        assert_eq!(ledger.stats().tracked_clients, 1);
    }

    #[test]
    fn test_peek_is_read_only() {
        let ledger = ledger(5);
        let c = client("fp-1", "1.1.1.1");
        assert_eq!(ledger.peek_remaining_at(&c, false, day(1)), Remaining::Limited(5));
        assert_eq!(ledger.stats().tracked_clients, 0);

        ledger.check_and_consume_at(&c, false, None, day(1), Instant::now());
        assert_eq!(ledger.peek_remaining_at(&c, false, day(1)), Remaining::Limited(4));
        assert_eq!(ledger.peek_remaining_at(&c, false, day(1)), Remaining::Limited(4));
        assert_eq!(ledger.peek_remaining_at(&c, false, day(2)), Remaining::Limited(5));
        assert_eq!(ledger.peek_remaining_at(&c, true, day(2)), Remaining::Unlimited);
    }

    #[test]
    fn test_purge_expired() {
        let ledger = ledger(5);
        let c = client("fp-1", "1.1.1.1");
        let now = Instant::now();
        ledger.check_and_consume_at(&c, false, Some("a"), day(1), now);
        ledger.check_and_consume_at(&c, false, Some("b"), day(1), now + Duration::from_secs(300));

        assert_eq!(ledger.purge_expired_at(now + Duration::from_secs(700)), 1);
        assert_eq!(ledger.stats().pending_job_ids, 1);
    }

    #[test]
    fn test_policy_update() {
        let ledger = ledger(1);
        let c = client("fp-1", "1.1.1.1");
        let now = Instant::now();
        ledger.check_and_consume_at(&c, false, None, day(1), now);
        assert!(!ledger.check_and_consume_at(&c, false, None, day(1), now).is_admitted());

        ledger.update_policy(QuotaPolicy {
            daily_limit: 2,
            idempotency_ttl: Duration::from_secs(600),
        });
        assert!(ledger.check_and_consume_at(&c, false, None, day(1), now).is_admitted());
    }
}
