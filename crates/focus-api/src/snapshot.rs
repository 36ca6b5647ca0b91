//! Whole-store snapshots and the enforcement ledger

use chrono::{DateTime, Local};
use focus_util::SessionId;
use serde::{Deserialize, Serialize};

use crate::{ActiveSession, AppSet, ScheduledSession, SessionState};

/// Both session collections as read in one consistent pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Scheduled sessions in creation order
    pub scheduled: Vec<ScheduledSession>,
    /// Occupant of the single active slot
    pub active: Option<ActiveSession>,
}

impl SessionSnapshot {
    pub fn find_scheduled(&self, id: &SessionId) -> Option<&ScheduledSession> {
        self.scheduled.iter().find(|s| &s.id == id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.find_scheduled(id).is_some() || self.active.as_ref().is_some_and(|a| &a.id == id)
    }

    /// Lifecycle state of a stored session. Terminal sessions are not stored,
    /// so this never returns `Ended` or `Cancelled`.
    pub fn state_of(&self, id: &SessionId) -> Option<SessionState> {
        if self.active.as_ref().is_some_and(|a| &a.id == id) {
            Some(SessionState::Active)
        } else if self.find_scheduled(id).is_some() {
            Some(SessionState::Scheduled)
        } else {
            None
        }
    }
}

/// Enforcement state last acknowledged by the enforcer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementLedger {
    pub applied: Option<AppliedPolicy>,
}

/// A block list the enforcer has confirmed applying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPolicy {
    pub session_id: SessionId,
    pub blocked_app_set: AppSet,
}

impl AppliedPolicy {
    pub fn for_session(session: &ActiveSession) -> Self {
        Self {
            session_id: session.id,
            blocked_app_set: session.blocked_app_set.clone(),
        }
    }
}

/// Read-only view handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub scheduled: Vec<ScheduledSession>,
    pub active: Option<ActiveSession>,
    /// When this view was read from the store
    pub loaded_at: DateTime<Local>,
}

impl SessionView {
    pub fn from_snapshot(snapshot: SessionSnapshot, loaded_at: DateTime<Local>) -> Self {
        Self {
            scheduled: snapshot.scheduled,
            active: snapshot.active,
            loaded_at,
        }
    }

    pub fn has_active_session(&self) -> bool {
        self.active.is_some()
    }
}
