//! Integration tests for focusd
//!
//! The controller and the monitor each open their own handle on one database
//! file, the way the two processes do in production. They share nothing else
//! except the mock host behind the enforcer.

use chrono::{DateTime, Local};
use focus_api::{AppSet, SessionSnapshot};
use focus_config::{AdmissionPolicy, ControllerConfig};
use focus_core::{
    AdmissionGuard, BackgroundMonitor, EnforcementOutcome, FocusError, ForegroundController,
    SessionRequest,
};
use focus_host_api::{EnforcerCall, MockEnforcer, PolicyFileEnforcer};
use focus_store::{SessionStore, SqliteStore, check_snapshot};
use focus_util::{AppId, SessionId, from_unix_seconds};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn at(secs: i64) -> DateTime<Local> {
    from_unix_seconds(secs)
}

fn apps(names: &[&str]) -> AppSet {
    names.iter().map(|n| AppId::new(*n)).collect()
}

fn request(start: i64, duration: u64, blocked: &[&str]) -> SessionRequest {
    SessionRequest {
        start: at(start),
        duration: Duration::from_secs(duration),
        apps: apps(blocked),
    }
}

struct Host {
    controller: ForegroundController,
    monitor: BackgroundMonitor,
    controller_store: Arc<SqliteStore>,
    monitor_store: Arc<SqliteStore>,
    enforcer: MockEnforcer,
}

impl Host {
    fn new(db: &Path) -> Self {
        Self::with_policy(db, AdmissionPolicy::default())
    }

    fn with_policy(db: &Path, policy: AdmissionPolicy) -> Self {
        let enforcer = MockEnforcer::new();

        let controller_store = Arc::new(SqliteStore::open(db).unwrap());
        let guard = AdmissionGuard::with_store_quota(controller_store.clone(), policy);
        let controller = ForegroundController::new(
            controller_store.clone(),
            guard,
            Arc::new(enforcer.clone()),
            &ControllerConfig {
                refresh_interval: Some(Duration::from_secs(15)),
            },
        );

        let monitor_store = Arc::new(SqliteStore::open(db).unwrap());
        let monitor = BackgroundMonitor::new(monitor_store.clone(), Arc::new(enforcer.clone()));

        Self {
            controller,
            monitor,
            controller_store,
            monitor_store,
            enforcer,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let snapshot = self.monitor_store.read_snapshot().unwrap();
        check_snapshot(&snapshot).unwrap();
        snapshot
    }
}

#[tokio::test]
async fn test_due_session_promoted_and_applied_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = Host::new(&dir.path().join("sessions.db"));

    let s1 = host
        .controller
        .create_session(request(100, 50, &["video"]), at(1))
        .unwrap();

    let report = host.monitor.on_wake(at(100)).await.unwrap();

    assert_eq!(report.promoted, Some(s1.id));
    let snapshot = host.snapshot();
    assert!(snapshot.scheduled.is_empty());
    assert_eq!(snapshot.active.unwrap().id, s1.id);
    assert_eq!(host.enforcer.calls(), vec![EnforcerCall::Apply(apps(&["video"]))]);
}

#[tokio::test]
async fn test_controller_reload_observes_monitor_promotion() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = Host::new(&dir.path().join("sessions.db"));

    let s1 = host
        .controller
        .create_session(request(100, 50, &["video"]), at(1))
        .unwrap();
    host.controller.reload(at(2)).unwrap();

    host.monitor.on_wake(at(100)).await.unwrap();

    // Cached view is stale until the next explicit reload
    let stale = host.controller.view().unwrap();
    assert!(stale.active.is_none());
    assert_eq!(stale.scheduled.len(), 1);

    let view = host.controller.on_foreground(at(105)).unwrap();
    assert_eq!(view.active.as_ref().unwrap().id, s1.id);
    assert!(view.scheduled.is_empty());

    // Another wake finds nothing to do
    let report = host.monitor.on_wake(at(105)).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(host.enforcer.apply_count(), 1);
}

#[tokio::test]
async fn test_tied_sessions_promote_one_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = Host::new(&dir.path().join("sessions.db"));

    let s1 = host
        .controller
        .create_session(request(100, 50, &["video"]), at(1))
        .unwrap();
    let s2 = host
        .controller
        .create_session(request(100, 50, &["games"]), at(2))
        .unwrap();

    let report = host.monitor.on_wake(at(100)).await.unwrap();
    assert_eq!(report.promoted, Some(s1.id));
    assert_eq!(report.deferred, vec![s2.id]);

    // Still waiting while S1 holds the slot
    let report = host.monitor.on_wake(at(110)).await.unwrap();
    assert_eq!(report.promoted, None);
    assert_eq!(report.deferred, vec![s2.id]);

    // S1 expires and S2 takes over in the same wake
    let report = host.monitor.on_wake(at(150)).await.unwrap();
    assert_eq!(report.expired, Some(s1.id));
    assert_eq!(report.promoted, Some(s2.id));
    assert_eq!(report.enforcement, EnforcementOutcome::Applied(s2.id));
    assert_eq!(host.snapshot().active.unwrap().started_at, at(150));
}

#[tokio::test]
async fn test_stop_then_create_is_admitted() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = Host::new(&dir.path().join("sessions.db"));

    let s1 = host
        .controller
        .create_session(request(100, 50, &["video"]), at(1))
        .unwrap();
    host.monitor.on_wake(at(100)).await.unwrap();

    // Slot occupied: creation denied
    let err = host
        .controller
        .create_session(request(200, 50, &["games"]), at(110))
        .unwrap_err();
    assert!(err.is_admission_denied());

    let report = host.controller.stop_session(&s1.id, at(120)).await.unwrap();
    assert_eq!(report.enforcement, EnforcementOutcome::Released(s1.id));
    assert!(host.snapshot().active.is_none());
    assert_eq!(host.enforcer.calls().last(), Some(&EnforcerCall::Release));

    let s2 = host
        .controller
        .create_session(request(200, 50, &["games"]), at(121))
        .unwrap();
    assert_eq!(host.snapshot().scheduled, vec![s2]);

    // The monitor has nothing left to release
    let report = host.monitor.on_wake(at(125)).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(host.enforcer.release_count(), 1);
}

#[tokio::test]
async fn test_failed_release_on_stop_retried_by_monitor() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = Host::new(&dir.path().join("sessions.db"));

    let s1 = host
        .controller
        .create_session(request(100, 50, &["video"]), at(1))
        .unwrap();
    host.monitor.on_wake(at(100)).await.unwrap();

    host.enforcer.set_fail_release(true);
    let report = host.controller.stop_session(&s1.id, at(120)).await.unwrap();
    assert!(report.enforcement.is_failed());
    assert!(host.snapshot().active.is_none());

    host.enforcer.set_fail_release(false);
    let report = host.monitor.on_wake(at(130)).await.unwrap();
    assert_eq!(report.enforcement, EnforcementOutcome::Released(s1.id));
    assert!(host.enforcer.applied().is_none());
}

#[tokio::test]
async fn test_stale_stop_after_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = Host::new(&dir.path().join("sessions.db"));

    let s1 = host
        .controller
        .create_session(request(100, 50, &["video"]), at(1))
        .unwrap();
    host.monitor.on_wake(at(100)).await.unwrap();
    host.controller.reload(at(101)).unwrap();

    // Expired in the background while the view still shows it active
    host.monitor.on_wake(at(160)).await.unwrap();
    assert!(host.controller.view().unwrap().has_active_session());

    let err = host.controller.stop_session(&s1.id, at(161)).await.unwrap_err();
    assert!(matches!(err, FocusError::Transition(_)));
    assert_eq!(host.enforcer.release_count(), 1);
}

#[tokio::test]
async fn test_cancel_before_promotion() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = Host::new(&dir.path().join("sessions.db"));

    let s1 = host
        .controller
        .create_session(request(100, 50, &["video"]), at(1))
        .unwrap();
    host.controller.cancel_session(&s1.id, at(50)).unwrap();

    let report = host.monitor.on_wake(at(100)).await.unwrap();
    assert!(report.is_noop());
    assert!(host.enforcer.calls().is_empty());
}

#[tokio::test]
async fn test_daily_quota_shared_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = Host::with_policy(
        &dir.path().join("sessions.db"),
        AdmissionPolicy {
            entitled: true,
            max_sessions_per_day: Some(1),
            max_duration: None,
        },
    );

    let s1 = host
        .controller
        .create_session(request(100, 50, &["video"]), at(1))
        .unwrap();
    host.controller.cancel_session(&s1.id, at(2)).unwrap();

    // Cancelling does not give the session back
    let err = host
        .controller
        .create_session(request(200, 50, &["video"]), at(3))
        .unwrap_err();
    assert!(err.is_admission_denied());
    assert_eq!(
        host.monitor_store
            .sessions_created_on(at(3).date_naive())
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_audit_trail_spans_both_contexts() {
    use focus_store::AuditEventType;

    let dir = tempfile::tempdir().unwrap();
    let mut host = Host::new(&dir.path().join("sessions.db"));

    let s1 = host
        .controller
        .create_session(request(100, 50, &["video"]), at(1))
        .unwrap();
    host.monitor.on_wake(at(100)).await.unwrap();
    host.controller.stop_session(&s1.id, at(120)).await.unwrap();

    let mut events: Vec<_> = host
        .controller_store
        .recent_audits(10)
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    events.reverse();

    assert!(matches!(events[0], AuditEventType::SessionScheduled { .. }));
    assert!(matches!(events[1], AuditEventType::SessionPromoted { .. }));
    assert!(matches!(events[2], AuditEventType::EnforcementApplied { .. }));
    assert!(matches!(events[3], AuditEventType::SessionEnded { .. }));
    assert!(matches!(events[4], AuditEventType::EnforcementReleased { .. }));
}

#[tokio::test]
async fn test_policy_file_follows_session() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sessions.db");
    let policy_path = dir.path().join("blocklist.json");

    let store = Arc::new(SqliteStore::open(&db).unwrap());
    let enforcer = Arc::new(PolicyFileEnforcer::new(&policy_path));
    let guard = AdmissionGuard::with_store_quota(store.clone(), AdmissionPolicy::default());
    let mut controller = ForegroundController::new(
        store.clone(),
        guard,
        enforcer.clone(),
        &ControllerConfig::default(),
    );
    let monitor = BackgroundMonitor::new(
        Arc::new(SqliteStore::open(&db).unwrap()),
        Arc::new(PolicyFileEnforcer::new(&policy_path)),
    );

    let s1 = controller
        .create_session(request(100, 50, &["video", "games"]), at(1))
        .unwrap();
    monitor.on_wake(at(100)).await.unwrap();

    let published = enforcer.read().unwrap().unwrap();
    assert_eq!(published.blocked_app_set, apps(&["games", "video"]));

    controller.stop_session(&s1.id, at(110)).await.unwrap();
    assert!(enforcer.read().unwrap().is_none());
    assert!(!policy_path.exists());
}

#[test]
fn test_unknown_session_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = Host::new(&dir.path().join("sessions.db"));

    let err = host
        .controller
        .cancel_session(&SessionId::new(), at(1))
        .unwrap_err();
    assert!(matches!(err, FocusError::Transition(_)));
}
