//! Foreground controller
//!
//! Holds the interactive context's cached view of the store. The cache only
//! refreshes at explicit points (foreground, poll, reload); every mutation
//! goes to the store and drops the cache instead of patching it.

use chrono::{DateTime, Local};
use focus_api::{AppSet, ScheduledSession, SessionView};
use focus_config::ControllerConfig;
use focus_host_api::Enforcer;
use focus_store::SessionStore;
use focus_util::SessionId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::update::update_sessions;
use crate::{
    AdmissionDecision, AdmissionGuard, EndedSession, EnforcementOutcome, FocusError, FocusResult,
    reconcile_enforcement,
};

/// A user's request for a new session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub start: DateTime<Local>,
    pub duration: Duration,
    pub apps: AppSet,
}

/// Result of a user stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub ended: EndedSession,
    pub enforcement: EnforcementOutcome,
}

pub struct ForegroundController {
    store: Arc<dyn SessionStore>,
    guard: AdmissionGuard,
    enforcer: Arc<dyn Enforcer>,
    refresh_interval: Option<Duration>,
    view: Option<SessionView>,
    last_loaded_at: Option<DateTime<Local>>,
}

impl ForegroundController {
    pub fn new(
        store: Arc<dyn SessionStore>,
        guard: AdmissionGuard,
        enforcer: Arc<dyn Enforcer>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            store,
            guard,
            enforcer,
            refresh_interval: config.refresh_interval,
            view: None,
            last_loaded_at: None,
        }
    }

    /// The interactive context became active
    pub fn on_foreground(&mut self, now: DateTime<Local>) -> FocusResult<&SessionView> {
        debug!("Foreground, reloading view");
        self.reload(now)
    }

    /// Replace the cached view with the store's current contents
    pub fn reload(&mut self, now: DateTime<Local>) -> FocusResult<&SessionView> {
        let snapshot = self.store.read_snapshot()?;
        self.last_loaded_at = Some(now);
        Ok(self.view.insert(SessionView::from_snapshot(snapshot, now)))
    }

    /// Periodic timer tick. Reloads if the view is missing or older than the
    /// refresh interval; returns whether it did.
    pub fn poll(&mut self, now: DateTime<Local>) -> FocusResult<bool> {
        let Some(interval) = self.refresh_interval else {
            return Ok(false);
        };

        let due = match (&self.view, self.staleness(now)) {
            (None, _) | (_, None) => true,
            (Some(_), Some(age)) => age >= interval,
        };

        if due {
            self.reload(now)?;
        }
        Ok(due)
    }

    /// Cached view, `None` after a mutation until the next reload
    pub fn view(&self) -> Option<&SessionView> {
        self.view.as_ref()
    }

    pub fn needs_reload(&self) -> bool {
        self.view.is_none()
    }

    /// When the store was last read, even if the view has since been dropped
    pub fn last_loaded_at(&self) -> Option<DateTime<Local>> {
        self.last_loaded_at
    }

    /// Age of the last load
    pub fn staleness(&self, now: DateTime<Local>) -> Option<Duration> {
        self.last_loaded_at
            .map(|loaded| (now - loaded).to_std().unwrap_or(Duration::ZERO))
    }

    /// Admit and schedule a new session
    pub fn create_session(
        &mut self,
        request: SessionRequest,
        now: DateTime<Local>,
    ) -> FocusResult<ScheduledSession> {
        self.invalidate();

        let candidate = candidate_from(&request, now);
        let guard = &self.guard;
        let result = update_sessions(self.store.as_ref(), now, |machine| {
            match guard.evaluate(machine.snapshot(), &candidate, now)? {
                AdmissionDecision::Admitted => {
                    machine.create(candidate.clone())?;
                    Ok(())
                }
                AdmissionDecision::Denied { reasons } => Err(FocusError::AdmissionDenied(reasons)),
            }
        });

        match result {
            Ok(_) => {}
            Err(FocusError::AdmissionDenied(reasons)) => {
                self.guard.record_denial(&reasons, now);
                return Err(FocusError::AdmissionDenied(reasons));
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.store.record_session_created(now.date_naive()) {
            warn!(error = %e, session_id = %candidate.id, "Failed to count session toward quota");
        }

        info!(session_id = %candidate.id, "Session created");
        Ok(candidate)
    }

    /// Cancel a session that has not started
    pub fn cancel_session(
        &mut self,
        id: &SessionId,
        now: DateTime<Local>,
    ) -> FocusResult<ScheduledSession> {
        self.invalidate();

        let committed = update_sessions(self.store.as_ref(), now, |machine| {
            Ok(machine.cancel(id)?)
        })?;
        Ok(committed.value)
    }

    /// Stop the active session and release its block list.
    ///
    /// The stop is committed before the enforcer is called. A failed release
    /// leaves the ledger pointing at the stopped session, so the monitor
    /// retries it on its next wake.
    pub async fn stop_session(
        &mut self,
        id: &SessionId,
        now: DateTime<Local>,
    ) -> FocusResult<StopReport> {
        self.invalidate();

        let committed = update_sessions(self.store.as_ref(), now, |machine| {
            Ok(machine.stop(id, now)?)
        })?;

        let enforcement =
            match reconcile_enforcement(self.store.as_ref(), self.enforcer.as_ref(), now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Could not reconcile enforcement after stop");
                    EnforcementOutcome::Failed(e.to_string())
                }
            };

        Ok(StopReport {
            ended: committed.value,
            enforcement,
        })
    }

    fn invalidate(&mut self) {
        if self.view.take().is_some() {
            debug!("View invalidated");
        }
    }
}

fn candidate_from(request: &SessionRequest, now: DateTime<Local>) -> ScheduledSession {
    ScheduledSession::new(request.start, request.duration, request.apps.clone(), now)
}
