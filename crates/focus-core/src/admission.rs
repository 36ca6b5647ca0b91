//! Admission guard

use chrono::{DateTime, Local};
use focus_api::{DenialReason, ScheduledSession, SessionSnapshot};
use focus_config::AdmissionPolicy;
use focus_store::{AuditEvent, AuditEventType, SessionStore, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::FocusResult;

/// Entitlement and usage figures consulted at admission time
pub trait QuotaProvider: Send + Sync {
    fn is_entitled(&self) -> bool;

    /// Sessions already created on the day containing `now`
    fn usage_count_today(&self, now: DateTime<Local>) -> StoreResult<u32>;
}

/// Quota backed by the store's daily usage counter and a configured
/// entitlement flag
pub struct StoreQuota {
    store: Arc<dyn SessionStore>,
    entitled: bool,
}

impl StoreQuota {
    pub fn new(store: Arc<dyn SessionStore>, entitled: bool) -> Self {
        Self { store, entitled }
    }
}

impl QuotaProvider for StoreQuota {
    fn is_entitled(&self) -> bool {
        self.entitled
    }

    fn usage_count_today(&self, now: DateTime<Local>) -> StoreResult<u32> {
        self.store.sessions_created_on(now.date_naive())
    }
}

/// Whether a candidate session may be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted,
    Denied { reasons: Vec<DenialReason> },
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted)
    }

    pub fn reasons(&self) -> &[DenialReason] {
        match self {
            AdmissionDecision::Admitted => &[],
            AdmissionDecision::Denied { reasons } => reasons.as_slice(),
        }
    }
}

/// Gates session creation against authoritative state and quota
pub struct AdmissionGuard {
    store: Arc<dyn SessionStore>,
    quota: Arc<dyn QuotaProvider>,
    policy: AdmissionPolicy,
}

impl AdmissionGuard {
    pub fn new(
        store: Arc<dyn SessionStore>,
        quota: Arc<dyn QuotaProvider>,
        policy: AdmissionPolicy,
    ) -> Self {
        Self {
            store,
            quota,
            policy,
        }
    }

    /// Guard with the default store-backed quota
    pub fn with_store_quota(store: Arc<dyn SessionStore>, policy: AdmissionPolicy) -> Self {
        let quota = Arc::new(StoreQuota::new(store.clone(), policy.entitled));
        Self::new(store, quota, policy)
    }

    /// Decide against the store as it is right now.
    ///
    /// Denials are audited.
    pub fn can_admit(
        &self,
        candidate: &ScheduledSession,
        now: DateTime<Local>,
    ) -> FocusResult<AdmissionDecision> {
        let snapshot = self.store.read_snapshot()?;
        let decision = self.evaluate(&snapshot, candidate, now)?;
        if let AdmissionDecision::Denied { reasons } = &decision {
            self.record_denial(reasons, now);
        }
        Ok(decision)
    }

    /// Decide against a snapshot the caller just read from the store
    pub fn evaluate(
        &self,
        snapshot: &SessionSnapshot,
        candidate: &ScheduledSession,
        now: DateTime<Local>,
    ) -> StoreResult<AdmissionDecision> {
        let mut reasons = Vec::new();

        if let Some(active) = &snapshot.active {
            reasons.push(DenialReason::SessionActive {
                session_id: active.id,
            });
        }

        if !self.quota.is_entitled() {
            reasons.push(DenialReason::NotEntitled);
        }

        if let Some(limit) = self.policy.max_sessions_per_day {
            let used = self.quota.usage_count_today(now)?;
            if used >= limit {
                reasons.push(DenialReason::QuotaExhausted { used, limit });
            }
        }

        if candidate.blocked_app_set.is_empty() {
            reasons.push(DenialReason::EmptyAppSet);
        }

        let too_long = self
            .policy
            .max_duration
            .is_some_and(|max| candidate.duration > max);
        if candidate.duration == Duration::ZERO || too_long {
            reasons.push(DenialReason::InvalidDuration {
                requested: candidate.duration,
                max: self.policy.max_duration,
            });
        }

        if snapshot.contains(&candidate.id) {
            reasons.push(DenialReason::DuplicateSession {
                session_id: candidate.id,
            });
        }

        if reasons.is_empty() {
            Ok(AdmissionDecision::Admitted)
        } else {
            Ok(AdmissionDecision::Denied { reasons })
        }
    }

    pub(crate) fn record_denial(&self, reasons: &[DenialReason], now: DateTime<Local>) {
        info!(reasons = ?reasons, "Session admission denied");
        let _ = self.store.append_audit(AuditEvent::at(
            AuditEventType::AdmissionDenied {
                reasons: reasons.to_vec(),
            },
            now,
        ));
    }
}
