//! Store trait definitions

use chrono::NaiveDate;
use focus_api::{ActiveSession, EnforcementLedger, ScheduledSession, SessionSnapshot};

use crate::{AuditEvent, StoreResult};

/// Durable state shared by the foreground controller and the background
/// monitor.
///
/// Every write replaces a whole document. A reader in either process sees
/// either the previous document or the new one, never a mix.
pub trait SessionStore: Send + Sync {
    // Session documents

    /// Scheduled sessions in creation order
    fn read_scheduled(&self) -> StoreResult<Vec<ScheduledSession>>;

    /// Occupant of the active slot
    fn read_active(&self) -> StoreResult<Option<ActiveSession>>;

    /// Replace the scheduled list
    fn write_scheduled(&self, sessions: &[ScheduledSession]) -> StoreResult<()>;

    /// Replace the active slot
    fn write_active(&self, session: Option<&ActiveSession>) -> StoreResult<()>;

    /// Read both session documents in one transaction
    fn read_snapshot(&self) -> StoreResult<SessionSnapshot>;

    /// Replace both session documents in one transaction
    fn commit(&self, snapshot: &SessionSnapshot) -> StoreResult<()>;

    /// Replace both session documents only if they still equal `expected`.
    ///
    /// Returns `false` without writing when the other context committed in
    /// between; the caller re-reads and re-evaluates.
    fn commit_if_current(
        &self,
        expected: &SessionSnapshot,
        next: &SessionSnapshot,
    ) -> StoreResult<bool>;

    // Enforcement bookkeeping

    fn read_enforcement(&self) -> StoreResult<EnforcementLedger>;

    fn write_enforcement(&self, ledger: &EnforcementLedger) -> StoreResult<()>;

    /// Replace the ledger only if it still equals `expected`.
    ///
    /// Returns `false` without writing when the other context recorded an
    /// enforcement change in between.
    fn write_enforcement_if_current(
        &self,
        expected: &EnforcementLedger,
        next: &EnforcementLedger,
    ) -> StoreResult<bool>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Usage accounting

    /// Number of sessions created on a specific day
    fn sessions_created_on(&self, day: NaiveDate) -> StoreResult<u32>;

    /// Count one more session created on a specific day
    fn record_session_created(&self, day: NaiveDate) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Check the cross-collection invariant: no id is both scheduled and active,
/// and scheduled ids are unique.
pub fn check_snapshot(snapshot: &SessionSnapshot) -> StoreResult<()> {
    let mut seen = std::collections::HashSet::new();
    for session in &snapshot.scheduled {
        if !seen.insert(session.id) {
            return Err(crate::StoreError::Invariant(format!(
                "session {} scheduled twice",
                session.id
            )));
        }
    }
    if let Some(active) = &snapshot.active
        && seen.contains(&active.id)
    {
        return Err(crate::StoreError::Invariant(format!(
            "session {} is both scheduled and active",
            active.id
        )));
    }
    Ok(())
}
