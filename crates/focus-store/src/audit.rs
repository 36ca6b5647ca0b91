//! Audit event types

use chrono::{DateTime, Local};
use focus_api::{AppSet, DenialReason, SessionEndReason};
use focus_util::SessionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Background monitor process started
    MonitorStarted,

    /// Background monitor process stopped
    MonitorStopped,

    /// Session admitted and scheduled
    SessionScheduled {
        session_id: SessionId,
        scheduled_start_time: DateTime<Local>,
        duration: Duration,
    },

    /// Scheduled session cancelled before promotion
    SessionCancelled { session_id: SessionId },

    /// Scheduled session moved into the active slot
    SessionPromoted {
        session_id: SessionId,
        ends_at: DateTime<Local>,
    },

    /// Active session ended
    SessionEnded {
        session_id: SessionId,
        reason: SessionEndReason,
    },

    /// Session creation rejected
    AdmissionDenied { reasons: Vec<DenialReason> },

    /// Enforcer confirmed a block list
    EnforcementApplied {
        session_id: SessionId,
        blocked_app_set: AppSet,
    },

    /// Enforcer confirmed release
    EnforcementReleased { session_id: SessionId },

    /// Enforcer call failed; will be retried
    EnforcementFailed { error: String },

    /// A document could not be parsed and was read as empty
    StoreRecovered { document: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: focus_util::now(),
            event,
        }
    }

    /// Build an event stamped with an explicit time
    pub fn at(event: AuditEventType, timestamp: DateTime<Local>) -> Self {
        Self {
            id: 0,
            timestamp,
            event,
        }
    }
}
