//! Read-evaluate-commit cycle shared by the monitor and the controller

use chrono::{DateTime, Local};
use focus_store::{AuditEvent, SessionStore};
use tracing::{debug, warn};

use crate::{CoreEvent, FocusError, FocusResult, SessionStateMachine};

/// Attempts before a cycle gives up with `FocusError::Contention`
pub(crate) const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// What a committed cycle produced
#[derive(Debug)]
pub(crate) struct Committed<T> {
    pub value: T,
    pub events: Vec<CoreEvent>,
}

/// Read the authoritative snapshot, let `evaluate` drive transitions on it,
/// and commit the result only if nobody else committed in between.
///
/// `evaluate` may run more than once; it must not have side effects outside
/// the state machine it is given. Transitions are audited after a
/// successful commit.
pub(crate) fn update_sessions<T, F>(
    store: &dyn SessionStore,
    now: DateTime<Local>,
    mut evaluate: F,
) -> FocusResult<Committed<T>>
where
    F: FnMut(&mut SessionStateMachine) -> FocusResult<T>,
{
    for attempt in 1..=MAX_COMMIT_ATTEMPTS {
        let current = store.read_snapshot()?;
        let mut machine = SessionStateMachine::new(current.clone());
        let value = evaluate(&mut machine)?;

        if !machine.is_changed() {
            return Ok(Committed {
                value,
                events: Vec::new(),
            });
        }

        let events = machine.take_events();
        let next = machine.into_snapshot();

        if store.commit_if_current(&current, &next)? {
            for event in &events {
                let _ = store.append_audit(AuditEvent::at(event.to_audit(), now));
            }
            return Ok(Committed { value, events });
        }

        debug!(attempt, "Sessions changed since read, re-evaluating");
    }

    warn!(
        attempts = MAX_COMMIT_ATTEMPTS,
        "Giving up on session update under contention"
    );
    Err(FocusError::Contention(MAX_COMMIT_ATTEMPTS))
}
