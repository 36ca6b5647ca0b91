//! Session state machine
//!
//! Pure transition logic over a [`SessionSnapshot`]. Nothing here touches the
//! store or the enforcer; callers read a snapshot, drive transitions, then
//! commit the result and act on the emitted events.

use chrono::{DateTime, Local};
use focus_api::{
    ActiveSession, ScheduledSession, SessionEndReason, SessionSnapshot, SessionState,
};
use focus_util::SessionId;
use thiserror::Error;
use tracing::{debug, info};

use crate::CoreEvent;

/// Rejected lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("session {active} occupies the active slot")]
    SessionActive { active: SessionId },

    #[error("session {0} already exists")]
    DuplicateId(SessionId),

    #[error("session {0} is not scheduled")]
    NotScheduled(SessionId),

    #[error("session {0} is not the active session")]
    NotActive(SessionId),

    #[error("no session is active")]
    NoActiveSession,

    #[error("session {id} is not due until {starts_at}")]
    NotYetDue {
        id: SessionId,
        starts_at: DateTime<Local>,
    },
}

/// Result of a promotion attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// The session now occupies the active slot
    Promoted(ActiveSession),
    /// Slot already taken; the session stays scheduled for the next evaluation
    SlotOccupied { active: SessionId },
    /// No scheduled session is due
    NoCandidate,
}

/// An active session that left the slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndedSession {
    pub session: ActiveSession,
    pub reason: SessionEndReason,
    pub ended_at: DateTime<Local>,
}

/// Transition logic over one snapshot of the store
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    snapshot: SessionSnapshot,
    events: Vec<CoreEvent>,
    changed: bool,
}

impl SessionStateMachine {
    pub fn new(snapshot: SessionSnapshot) -> Self {
        Self {
            snapshot,
            events: Vec::new(),
            changed: false,
        }
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> SessionSnapshot {
        self.snapshot
    }

    /// Whether any transition has been applied
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Events for the transitions applied so far
    pub fn events(&self) -> &[CoreEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    fn record(&mut self, event: CoreEvent) {
        self.changed = true;
        self.events.push(event);
    }

    pub fn state_of(&self, id: &SessionId) -> Option<SessionState> {
        self.snapshot.state_of(id)
    }

    /// Slot XOR scheduled membership and id uniqueness
    pub fn check_invariants(&self) -> Result<(), String> {
        focus_store::check_snapshot(&self.snapshot).map_err(|e| e.to_string())
    }

    /// none -> Scheduled
    pub fn create(&mut self, session: ScheduledSession) -> Result<(), TransitionError> {
        if let Some(active) = &self.snapshot.active {
            return Err(TransitionError::SessionActive { active: active.id });
        }
        if self.snapshot.contains(&session.id) {
            return Err(TransitionError::DuplicateId(session.id));
        }

        info!(
            session_id = %session.id,
            starts_at = %session.scheduled_start_time,
            duration_secs = session.duration.as_secs(),
            "Session scheduled"
        );

        self.record(CoreEvent::SessionScheduled {
            session_id: session.id,
            scheduled_start_time: session.scheduled_start_time,
            duration: session.duration,
        });
        self.snapshot.scheduled.push(session);
        Ok(())
    }

    /// Scheduled sessions that are due at `now`, best candidate first.
    ///
    /// Order: earliest start time, then earliest creation time, then position
    /// in the scheduled list (creation order).
    pub fn due_candidates(&self, now: DateTime<Local>) -> Vec<&ScheduledSession> {
        let mut due: Vec<(usize, &ScheduledSession)> = self
            .snapshot
            .scheduled
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_due(now))
            .collect();
        due.sort_by_key(|(pos, s)| (s.scheduled_start_time, s.created_at, *pos));
        due.into_iter().map(|(_, s)| s).collect()
    }

    /// The one session a wake at `now` should promote
    pub fn select_promotion_candidate(&self, now: DateTime<Local>) -> Option<&ScheduledSession> {
        self.due_candidates(now).into_iter().next()
    }

    /// Scheduled -> Active
    pub fn promote(
        &mut self,
        id: &SessionId,
        now: DateTime<Local>,
    ) -> Result<PromoteOutcome, TransitionError> {
        let pos = self
            .snapshot
            .scheduled
            .iter()
            .position(|s| &s.id == id)
            .ok_or(TransitionError::NotScheduled(*id))?;

        let candidate = &self.snapshot.scheduled[pos];
        if !candidate.is_due(now) {
            return Err(TransitionError::NotYetDue {
                id: *id,
                starts_at: candidate.scheduled_start_time,
            });
        }

        if let Some(active) = &self.snapshot.active {
            debug!(
                session_id = %id,
                active_id = %active.id,
                "Slot occupied, promotion deferred"
            );
            return Ok(PromoteOutcome::SlotOccupied { active: active.id });
        }

        let active = self.snapshot.scheduled.remove(pos).into_active(now);

        info!(
            session_id = %active.id,
            ends_at = %active.ends_at(),
            "Session promoted"
        );

        self.record(CoreEvent::SessionPromoted {
            session_id: active.id,
            ends_at: active.ends_at(),
        });
        self.snapshot.active = Some(active.clone());
        Ok(PromoteOutcome::Promoted(active))
    }

    /// Promote the best due candidate, if any
    pub fn promote_next(&mut self, now: DateTime<Local>) -> PromoteOutcome {
        let Some(id) = self.select_promotion_candidate(now).map(|s| s.id) else {
            return PromoteOutcome::NoCandidate;
        };
        // The candidate is scheduled and due, so only the slot can stop it
        self.promote(&id, now).unwrap_or(PromoteOutcome::NoCandidate)
    }

    /// Active -> Ended at the user's request
    pub fn stop(
        &mut self,
        id: &SessionId,
        now: DateTime<Local>,
    ) -> Result<EndedSession, TransitionError> {
        match self.snapshot.active.take() {
            Some(active) if &active.id == id => {
                Ok(self.end_active(active, SessionEndReason::UserStop, now))
            }
            None => Err(TransitionError::NoActiveSession),
            other => {
                self.snapshot.active = other;
                Err(TransitionError::NotActive(*id))
            }
        }
    }

    /// Active -> Ended once the duration has elapsed.
    ///
    /// Also covers a wake that arrives long after the end time.
    pub fn expire(&mut self, now: DateTime<Local>) -> Option<EndedSession> {
        if !self.snapshot.active.as_ref()?.is_expired(now) {
            return None;
        }
        let active = self.snapshot.active.take()?;
        Some(self.end_active(active, SessionEndReason::Expired, now))
    }

    /// Scheduled -> Cancelled
    pub fn cancel(&mut self, id: &SessionId) -> Result<ScheduledSession, TransitionError> {
        let pos = self
            .snapshot
            .scheduled
            .iter()
            .position(|s| &s.id == id)
            .ok_or(TransitionError::NotScheduled(*id))?;

        let session = self.snapshot.scheduled.remove(pos);
        info!(session_id = %session.id, "Session cancelled");

        self.record(CoreEvent::SessionCancelled { session_id: session.id });
        Ok(session)
    }

    fn end_active(
        &mut self,
        session: ActiveSession,
        reason: SessionEndReason,
        now: DateTime<Local>,
    ) -> EndedSession {
        info!(
            session_id = %session.id,
            reason = ?reason,
            overran_secs = (now - session.ends_at()).num_seconds().max(0),
            "Session ended"
        );

        self.record(CoreEvent::SessionEnded {
            session_id: session.id,
            reason,
        });
        EndedSession {
            session,
            reason,
            ended_at: now,
        }
    }
}
