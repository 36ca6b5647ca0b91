//! Session types

use chrono::{DateTime, Local};
use focus_util::{AppId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Set of applications blocked while a session is active
pub type AppSet = BTreeSet<AppId>;

/// Lifecycle state of a focus session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Scheduled,
    Active,
    Ended,
    Cancelled,
}

/// A session waiting for its start time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledSession {
    pub id: SessionId,
    pub scheduled_start_time: DateTime<Local>,
    #[serde(rename = "duration_seconds", with = "duration_secs")]
    pub duration: Duration,
    pub blocked_app_set: AppSet,
    pub created_at: DateTime<Local>,
}

impl ScheduledSession {
    pub fn new(
        scheduled_start_time: DateTime<Local>,
        duration: Duration,
        blocked_app_set: AppSet,
        created_at: DateTime<Local>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            scheduled_start_time,
            duration,
            blocked_app_set,
            created_at,
        }
    }

    /// Whether the start time has been reached
    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        now >= self.scheduled_start_time
    }

    /// Turn this session into the occupant of the active slot
    pub fn into_active(self, started_at: DateTime<Local>) -> ActiveSession {
        ActiveSession {
            id: self.id,
            started_at,
            duration: self.duration,
            blocked_app_set: self.blocked_app_set,
        }
    }
}

/// The session currently enforcing its block list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub id: SessionId,
    pub started_at: DateTime<Local>,
    #[serde(rename = "duration_seconds", with = "duration_secs")]
    pub duration: Duration,
    pub blocked_app_set: AppSet,
}

impl ActiveSession {
    pub fn ends_at(&self) -> DateTime<Local> {
        focus_util::add_duration(self.started_at, self.duration)
    }

    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        now >= self.ends_at()
    }

    pub fn time_remaining(&self, now: DateTime<Local>) -> Duration {
        (self.ends_at() - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Why an active session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// Duration elapsed
    Expired,
    /// User requested stop
    UserStop,
}

/// Structured reason codes for why a new session was not admitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DenialReason {
    /// Another session occupies the active slot
    SessionActive { session_id: SessionId },
    /// Daily session quota exhausted
    QuotaExhausted { used: u32, limit: u32 },
    /// Entitlement check failed
    NotEntitled,
    /// Nothing to block
    EmptyAppSet,
    /// Duration is zero or above the configured maximum
    InvalidDuration {
        requested: Duration,
        max: Option<Duration>,
    },
    /// A session with the same id is already stored
    DuplicateSession { session_id: SessionId },
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::SessionActive { session_id } => {
                write!(f, "session {} is already active", session_id)
            }
            DenialReason::QuotaExhausted { used, limit } => {
                write!(f, "daily quota exhausted ({}/{})", used, limit)
            }
            DenialReason::NotEntitled => write!(f, "not entitled"),
            DenialReason::EmptyAppSet => write!(f, "no applications to block"),
            DenialReason::InvalidDuration { requested, max } => match max {
                Some(max) => write!(
                    f,
                    "duration {}s outside 1..={}s",
                    requested.as_secs(),
                    max.as_secs()
                ),
                None => write!(f, "duration {}s must be positive", requested.as_secs()),
            },
            DenialReason::DuplicateSession { session_id } => {
                write!(f, "session {} already exists", session_id)
            }
        }
    }
}

/// Serialize `Duration` as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
