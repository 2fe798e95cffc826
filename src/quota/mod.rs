//! Quota subsystem.
//!
//! # Data Flow
//! ```text
//! Metered request (fingerprint, subscriptionStatus, jobId, peer address)
//!     → identity.rs (fingerprint + first forwarded-for IP)
//!     → ledger.rs (exempt? → job already consumed? → daily count vs limit)
//!     → Admit { remaining } | Reject { message, remaining: 0 }
//! ```
//!
//! # Design Decisions
//! - Charged once per job: a consumed job id re-admits for free until it expires
//! - Calendar days are UTC
//! - Storage sits behind `QuotaLedger` so a durable store can replace the map
//! - Internal faults admit (fail-open) rather than fail the request

pub mod identity;
pub mod ledger;

use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::config::QuotaConfig;

pub use identity::ClientIdentity;
pub use ledger::InMemoryLedger;

/// Reloadable ledger parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub daily_limit: u32,
    pub idempotency_ttl: Duration,
}

impl From<&QuotaConfig> for QuotaPolicy {
    fn from(config: &QuotaConfig) -> Self {
        Self {
            daily_limit: config.daily_limit,
            idempotency_ttl: Duration::from_secs(config.idempotency_ttl_secs),
        }
    }
}

/// Credits left today. Serializes as a number or `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Limited(u32),
    Unlimited,
}

impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Remaining::Limited(n) => serializer.serialize_u32(*n),
            Remaining::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitReason {
    /// One unit of quota consumed.
    Consumed,
    /// Job id already paid for.
    Idempotent,
    /// Paid tier.
    Exempt,
    /// Ledger unavailable.
    FailOpen,
}

impl AdmitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmitReason::Consumed => "admitted",
            AdmitReason::Idempotent => "idempotent",
            AdmitReason::Exempt => "exempt",
            AdmitReason::FailOpen => "fail_open",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admit {
        reason: AdmitReason,
        remaining: Remaining,
    },
    Reject {
        message: String,
        remaining: u32,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit { .. })
    }

    /// Label for the quota decision metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            Admission::Admit { reason, .. } => reason.as_str(),
            Admission::Reject { .. } => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub tracked_clients: usize,
    pub pending_job_ids: usize,
    pub daily_limit: u32,
}

/// Per-client daily admission control.
pub trait QuotaLedger: Send + Sync {
    /// Admit or reject one metered request, consuming quota on admission.
    fn check_and_consume(
        &self,
        client: &ClientIdentity,
        exempt: bool,
        job_id: Option<&str>,
    ) -> Admission;

    /// Remaining credits without consuming any.
    fn peek_remaining(&self, client: &ClientIdentity, exempt: bool) -> Remaining;

    /// Drop expired idempotency entries; returns how many were removed.
    fn purge_expired(&self) -> usize;

    fn policy(&self) -> QuotaPolicy;

    fn update_policy(&self, policy: QuotaPolicy);

    fn stats(&self) -> LedgerStats;
}
