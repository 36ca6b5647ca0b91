//! Background monitor
//!
//! Runs whenever an external trigger fires. Each wake reads the store,
//! expires and promotes at most one session each, commits, and then brings
//! the enforcer in line with whatever ended up in the active slot.

use chrono::{DateTime, Local};
use focus_host_api::Enforcer;
use focus_store::{AuditEvent, AuditEventType, SessionStore};
use focus_util::SessionId;
use std::sync::Arc;
use tracing::{debug, info};

use crate::update::update_sessions;
use crate::{CoreEvent, EnforcementOutcome, FocusResult, PromoteOutcome, reconcile_enforcement};

/// What one wake did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeReport {
    pub expired: Option<SessionId>,
    pub promoted: Option<SessionId>,
    /// Due sessions still waiting for the slot
    pub deferred: Vec<SessionId>,
    pub enforcement: EnforcementOutcome,
    pub events: Vec<CoreEvent>,
}

impl WakeReport {
    /// Whether the wake changed anything in the store or on the host
    pub fn is_noop(&self) -> bool {
        self.events.is_empty() && self.enforcement == EnforcementOutcome::Unchanged
    }
}

pub struct BackgroundMonitor {
    store: Arc<dyn SessionStore>,
    enforcer: Arc<dyn Enforcer>,
}

impl BackgroundMonitor {
    pub fn new(store: Arc<dyn SessionStore>, enforcer: Arc<dyn Enforcer>) -> Self {
        Self { store, enforcer }
    }

    /// Record that a long-running trigger loop started
    pub fn announce_started(&self) {
        info!("Background monitor started");
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::MonitorStarted));
    }

    /// Record that a long-running trigger loop stopped
    pub fn announce_stopped(&self) {
        info!("Background monitor stopped");
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::MonitorStopped));
    }

    /// Evaluate the store at `now`.
    ///
    /// Safe to call any number of times, at any delay: a wake that finds
    /// nothing due changes nothing and calls nothing.
    pub async fn on_wake(&self, now: DateTime<Local>) -> FocusResult<WakeReport> {
        let committed = update_sessions(self.store.as_ref(), now, |machine| {
            // Expire first so a late wake can hand the slot straight over
            let expired = machine.expire(now).map(|ended| ended.session.id);

            let promoted = match machine.promote_next(now) {
                PromoteOutcome::Promoted(active) => Some(active.id),
                PromoteOutcome::SlotOccupied { .. } | PromoteOutcome::NoCandidate => None,
            };

            let deferred: Vec<SessionId> =
                machine.due_candidates(now).iter().map(|s| s.id).collect();

            Ok((expired, promoted, deferred))
        })?;

        let (expired, promoted, deferred) = committed.value;

        if !deferred.is_empty() {
            debug!(count = deferred.len(), "Due sessions waiting for the active slot");
        }

        let enforcement =
            reconcile_enforcement(self.store.as_ref(), self.enforcer.as_ref(), now).await?;

        Ok(WakeReport {
            expired,
            promoted,
            deferred,
            enforcement,
            events: committed.events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focus_api::{AppSet, ScheduledSession};
    use focus_host_api::{EnforcerCall, MockEnforcer};
    use focus_store::SqliteStore;
    use focus_util::{AppId, from_unix_seconds};
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Local> {
        from_unix_seconds(secs)
    }

    fn session(start: i64, duration: u64, created: i64) -> ScheduledSession {
        let apps: AppSet = [AppId::new("video")].into_iter().collect();
        ScheduledSession::new(at(start), Duration::from_secs(duration), apps, at(created))
    }

    fn setup(
        scheduled: &[ScheduledSession],
    ) -> (Arc<SqliteStore>, MockEnforcer, BackgroundMonitor) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.write_scheduled(scheduled).unwrap();
        let enforcer = MockEnforcer::new();
        let monitor = BackgroundMonitor::new(store.clone(), Arc::new(enforcer.clone()));
        (store, enforcer, monitor)
    }

    #[tokio::test]
    async fn wake_promotes_due_session() {
        let s1 = session(100, 50, 1);
        let (store, enforcer, monitor) = setup(&[s1.clone()]);

        let report = monitor.on_wake(at(100)).await.unwrap();

        assert_eq!(report.promoted, Some(s1.id));
        assert_eq!(report.enforcement, EnforcementOutcome::Applied(s1.id));
        assert!(store.read_scheduled().unwrap().is_empty());
        assert_eq!(store.read_active().unwrap().unwrap().id, s1.id);
        assert_eq!(enforcer.calls(), vec![EnforcerCall::Apply(s1.blocked_app_set)]);
    }

    #[tokio::test]
    async fn early_wake_is_noop() {
        let s1 = session(100, 50, 1);
        let (store, enforcer, monitor) = setup(&[s1.clone()]);

        let report = monitor.on_wake(at(99)).await.unwrap();

        assert!(report.is_noop());
        assert_eq!(store.read_scheduled().unwrap(), vec![s1]);
        assert!(enforcer.calls().is_empty());
    }

    #[tokio::test]
    async fn repeated_wake_is_idempotent() {
        let s1 = session(100, 50, 1);
        let (store, enforcer, monitor) = setup(&[s1]);

        monitor.on_wake(at(100)).await.unwrap();
        let after_first = store.read_snapshot().unwrap();

        let report = monitor.on_wake(at(100)).await.unwrap();

        assert!(report.is_noop());
        assert_eq!(store.read_snapshot().unwrap(), after_first);
        assert_eq!(enforcer.apply_count(), 1);
    }

    #[tokio::test]
    async fn tie_loser_is_deferred() {
        let s1 = session(100, 50, 1);
        let s2 = session(100, 50, 2);
        let (store, _enforcer, monitor) = setup(&[s1.clone(), s2.clone()]);

        let report = monitor.on_wake(at(100)).await.unwrap();

        assert_eq!(report.promoted, Some(s1.id));
        assert_eq!(report.deferred, vec![s2.id]);
        assert_eq!(store.read_scheduled().unwrap(), vec![s2]);
    }

    #[tokio::test]
    async fn expiry_releases_block_list() {
        let s1 = session(100, 50, 1);
        let (store, enforcer, monitor) = setup(&[s1.clone()]);
        monitor.on_wake(at(100)).await.unwrap();

        let report = monitor.on_wake(at(150)).await.unwrap();

        assert_eq!(report.expired, Some(s1.id));
        assert_eq!(report.enforcement, EnforcementOutcome::Released(s1.id));
        assert!(store.read_active().unwrap().is_none());
        assert_eq!(enforcer.release_count(), 1);
    }

    #[tokio::test]
    async fn late_wake_expires_and_promotes_together() {
        let s1 = session(100, 50, 1);
        let s2 = session(120, 50, 2);
        let (store, enforcer, monitor) = setup(&[s1.clone(), s2.clone()]);
        monitor.on_wake(at(100)).await.unwrap();

        // Wake delayed far past S1's end
        let report = monitor.on_wake(at(1_000)).await.unwrap();

        assert_eq!(report.expired, Some(s1.id));
        assert_eq!(report.promoted, Some(s2.id));
        assert_eq!(report.enforcement, EnforcementOutcome::Applied(s2.id));

        let active = store.read_active().unwrap().unwrap();
        assert_eq!(active.id, s2.id);
        assert_eq!(active.started_at, at(1_000));
        assert_eq!(enforcer.apply_count(), 2);
        assert_eq!(enforcer.release_count(), 0);
    }

    #[tokio::test]
    async fn failed_apply_retried_next_wake() {
        let s1 = session(100, 50, 1);
        let (store, enforcer, monitor) = setup(&[s1.clone()]);
        enforcer.set_fail_apply(true);

        let report = monitor.on_wake(at(100)).await.unwrap();
        assert!(report.enforcement.is_failed());
        // The transition still committed
        assert_eq!(store.read_active().unwrap().unwrap().id, s1.id);

        enforcer.set_fail_apply(false);
        let report = monitor.on_wake(at(105)).await.unwrap();
        assert_eq!(report.enforcement, EnforcementOutcome::Applied(s1.id));
        assert!(report.events.is_empty());
        assert_eq!(enforcer.apply_count(), 2);
    }

    #[tokio::test]
    async fn lifecycle_is_audited() {
        let s1 = session(100, 50, 1);
        let (store, _enforcer, monitor) = setup(&[s1]);
        monitor.announce_started();
        monitor.on_wake(at(100)).await.unwrap();

        let audits = store.recent_audits(10).unwrap();
        assert!(matches!(audits[0].event, AuditEventType::EnforcementApplied { .. }));
        assert!(matches!(audits[1].event, AuditEventType::SessionPromoted { .. }));
        assert!(matches!(audits[2].event, AuditEventType::MonitorStarted));
    }
}
