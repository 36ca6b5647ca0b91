//! Core events emitted by lifecycle transitions

use chrono::{DateTime, Local};
use focus_api::SessionEndReason;
use focus_store::AuditEventType;
use focus_util::SessionId;
use std::time::Duration;

/// Events emitted by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// Session admitted into the scheduled list
    SessionScheduled {
        session_id: SessionId,
        scheduled_start_time: DateTime<Local>,
        duration: Duration,
    },

    /// Session moved into the active slot
    SessionPromoted {
        session_id: SessionId,
        ends_at: DateTime<Local>,
    },

    /// Active session left the slot
    SessionEnded {
        session_id: SessionId,
        reason: SessionEndReason,
    },

    /// Scheduled session removed before promotion
    SessionCancelled { session_id: SessionId },
}

impl CoreEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            CoreEvent::SessionScheduled { session_id, .. }
            | CoreEvent::SessionPromoted { session_id, .. }
            | CoreEvent::SessionEnded { session_id, .. }
            | CoreEvent::SessionCancelled { session_id } => *session_id,
        }
    }

    /// Audit record for this event
    pub fn to_audit(&self) -> AuditEventType {
        match self {
            CoreEvent::SessionScheduled {
                session_id,
                scheduled_start_time,
                duration,
            } => AuditEventType::SessionScheduled {
                session_id: *session_id,
                scheduled_start_time: *scheduled_start_time,
                duration: *duration,
            },
            CoreEvent::SessionPromoted { session_id, ends_at } => {
                AuditEventType::SessionPromoted {
                    session_id: *session_id,
                    ends_at: *ends_at,
                }
            }
            CoreEvent::SessionEnded { session_id, reason } => AuditEventType::SessionEnded {
                session_id: *session_id,
                reason: *reason,
            },
            CoreEvent::SessionCancelled { session_id } => AuditEventType::SessionCancelled {
                session_id: *session_id,
            },
        }
    }
}
