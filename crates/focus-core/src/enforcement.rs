//! Enforcement reconciliation
//!
//! The desired policy is whatever occupies the active slot in the store. The
//! confirmed policy is the enforcement ledger. The enforcer is only called
//! when the two differ, and the ledger only changes after the enforcer
//! acknowledges. The ledger is written compare-and-swap, so the two contexts
//! never overwrite each other's record of what the host has applied.

use chrono::{DateTime, Local};
use focus_api::{AppliedPolicy, EnforcementLedger};
use focus_host_api::Enforcer;
use focus_store::{AuditEvent, AuditEventType, SessionStore, StoreResult};
use focus_util::SessionId;
use tracing::{debug, info, warn};

/// What a reconciliation pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementOutcome {
    /// Ledger already matched the active slot
    Unchanged,
    /// Block list for this session applied and recorded
    Applied(SessionId),
    /// Block list for this session released and recorded
    Released(SessionId),
    /// Enforcer call failed; the ledger is untouched so the next pass retries
    Failed(String),
}

impl EnforcementOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, EnforcementOutcome::Failed(_))
    }
}

/// Passes made before leaving the rest to the next wake when the other
/// context keeps changing the active slot or the ledger
const MAX_RECONCILE_PASSES: usize = 3;

/// Result of a single read-call-record pass
enum Pass {
    /// Ledger already matched the active slot
    Settled,
    /// Enforcer acted and the ledger recorded it
    Recorded(EnforcementOutcome),
    /// Enforcer acted but the other context changed the ledger meanwhile
    Raced(EnforcementOutcome),
    Failed(String),
}

/// Bring the enforcer in line with the active slot.
///
/// Reads the slot fresh from the store, so a session stopped or promoted by
/// the other context since the caller's own commit is honoured. After each
/// enforcer call the slot is read again, so a stop that lands while the call
/// is in flight is released in the same reconciliation.
pub async fn reconcile_enforcement(
    store: &dyn SessionStore,
    enforcer: &dyn Enforcer,
    now: DateTime<Local>,
) -> StoreResult<EnforcementOutcome> {
    let mut outcome = EnforcementOutcome::Unchanged;
    let mut reissue = false;

    for _ in 0..MAX_RECONCILE_PASSES {
        match reconcile_once(store, enforcer, now, reissue).await? {
            Pass::Settled => return Ok(outcome),
            Pass::Recorded(done) => {
                outcome = done;
                reissue = false;
            }
            Pass::Raced(done) => {
                outcome = done;
                reissue = true;
            }
            Pass::Failed(error) => return Ok(record_failure(store, error, now)),
        }
    }

    debug!(
        passes = MAX_RECONCILE_PASSES,
        "Enforcement still changing, next wake continues"
    );
    Ok(outcome)
}

/// One pass. With `reissue` the desired call is repeated even when the
/// ledger already agrees, since a lost ledger race leaves the host state
/// unknown.
async fn reconcile_once(
    store: &dyn SessionStore,
    enforcer: &dyn Enforcer,
    now: DateTime<Local>,
    reissue: bool,
) -> StoreResult<Pass> {
    let desired = store.read_active()?.as_ref().map(AppliedPolicy::for_session);
    let ledger = store.read_enforcement()?;

    if ledger.applied == desired {
        if reissue {
            let result = match &desired {
                Some(policy) => enforcer.apply(&policy.blocked_app_set).await,
                None => enforcer.release().await,
            };
            if let Err(e) = result {
                return Ok(Pass::Failed(e.to_string()));
            }
            debug!("Enforcement reissued after a ledger race");
        }
        return Ok(Pass::Settled);
    }

    let (outcome, event) = match (&desired, &ledger.applied) {
        (Some(policy), _) => {
            if let Err(e) = enforcer.apply(&policy.blocked_app_set).await {
                return Ok(Pass::Failed(e.to_string()));
            }

            info!(
                session_id = %policy.session_id,
                app_count = policy.blocked_app_set.len(),
                "Block list applied"
            );

            (
                EnforcementOutcome::Applied(policy.session_id),
                AuditEventType::EnforcementApplied {
                    session_id: policy.session_id,
                    blocked_app_set: policy.blocked_app_set.clone(),
                },
            )
        }
        (None, Some(previous)) => {
            if let Err(e) = enforcer.release().await {
                return Ok(Pass::Failed(e.to_string()));
            }

            info!(session_id = %previous.session_id, "Block list released");

            (
                EnforcementOutcome::Released(previous.session_id),
                AuditEventType::EnforcementReleased {
                    session_id: previous.session_id,
                },
            )
        }
        // Both empty is the equal case above
        (None, None) => return Ok(Pass::Settled),
    };

    let recorded = store.write_enforcement_if_current(
        &ledger,
        &EnforcementLedger {
            applied: desired.clone(),
        },
    )?;
    let _ = store.append_audit(AuditEvent::at(event, now));

    if recorded {
        Ok(Pass::Recorded(outcome))
    } else {
        warn!("Enforcement ledger changed during the enforcer call, reconciling again");
        Ok(Pass::Raced(outcome))
    }
}

fn record_failure(
    store: &dyn SessionStore,
    error: String,
    now: DateTime<Local>,
) -> EnforcementOutcome {
    warn!(error = %error, "Enforcer call failed, will retry on next wake");
    let _ = store.append_audit(AuditEvent::at(
        AuditEventType::EnforcementFailed {
            error: error.clone(),
        },
        now,
    ));
    EnforcementOutcome::Failed(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use focus_api::{AppSet, ScheduledSession};
    use focus_host_api::{EnforcementResult, EnforcerCall, MockEnforcer};
    use focus_store::SqliteStore;
    use focus_util::{AppId, from_unix_seconds};
    use std::sync::Arc;
    use std::time::Duration;

    fn activate(store: &SqliteStore, app: &str) -> SessionId {
        let apps: AppSet = [AppId::new(app)].into_iter().collect();
        let active = ScheduledSession::new(
            from_unix_seconds(100),
            Duration::from_secs(50),
            apps,
            from_unix_seconds(0),
        )
        .into_active(from_unix_seconds(100));
        store.write_active(Some(&active)).unwrap();
        active.id
    }

    #[tokio::test]
    async fn nothing_to_do_on_empty_store() {
        let store = SqliteStore::in_memory().unwrap();
        let enforcer = MockEnforcer::new();

        let outcome = reconcile_enforcement(&store, &enforcer, from_unix_seconds(0))
            .await
            .unwrap();

        assert_eq!(outcome, EnforcementOutcome::Unchanged);
        assert!(enforcer.calls().is_empty());
    }

    #[tokio::test]
    async fn apply_once_then_unchanged() {
        let store = SqliteStore::in_memory().unwrap();
        let enforcer = MockEnforcer::new();
        let id = activate(&store, "video");
        let now = from_unix_seconds(100);

        let first = reconcile_enforcement(&store, &enforcer, now).await.unwrap();
        let second = reconcile_enforcement(&store, &enforcer, now).await.unwrap();

        assert_eq!(first, EnforcementOutcome::Applied(id));
        assert_eq!(second, EnforcementOutcome::Unchanged);
        assert_eq!(enforcer.apply_count(), 1);
        assert_eq!(store.read_enforcement().unwrap().applied.unwrap().session_id, id);
    }

    #[tokio::test]
    async fn release_after_slot_cleared() {
        let store = SqliteStore::in_memory().unwrap();
        let enforcer = MockEnforcer::new();
        let id = activate(&store, "video");
        let now = from_unix_seconds(100);
        reconcile_enforcement(&store, &enforcer, now).await.unwrap();

        store.write_active(None).unwrap();
        let outcome = reconcile_enforcement(&store, &enforcer, now).await.unwrap();

        assert_eq!(outcome, EnforcementOutcome::Released(id));
        assert_eq!(enforcer.calls().last(), Some(&EnforcerCall::Release));
        assert!(store.read_enforcement().unwrap().applied.is_none());
    }

    #[tokio::test]
    async fn replacement_session_is_applied_directly() {
        let store = SqliteStore::in_memory().unwrap();
        let enforcer = MockEnforcer::new();
        activate(&store, "video");
        let now = from_unix_seconds(100);
        reconcile_enforcement(&store, &enforcer, now).await.unwrap();

        let next = activate(&store, "games");
        let outcome = reconcile_enforcement(&store, &enforcer, now).await.unwrap();

        assert_eq!(outcome, EnforcementOutcome::Applied(next));
        assert_eq!(enforcer.release_count(), 0);
        assert!(enforcer.applied().unwrap().contains(&AppId::new("games")));
    }

    #[tokio::test]
    async fn failure_leaves_ledger_for_retry() {
        let store = SqliteStore::in_memory().unwrap();
        let enforcer = MockEnforcer::new();
        let id = activate(&store, "video");
        let now = from_unix_seconds(100);

        enforcer.set_fail_apply(true);
        let outcome = reconcile_enforcement(&store, &enforcer, now).await.unwrap();
        assert!(outcome.is_failed());
        assert!(store.read_enforcement().unwrap().applied.is_none());

        let audits = store.recent_audits(10).unwrap();
        assert!(matches!(audits[0].event, AuditEventType::EnforcementFailed { .. }));

        enforcer.set_fail_apply(false);
        let outcome = reconcile_enforcement(&store, &enforcer, now).await.unwrap();
        assert_eq!(outcome, EnforcementOutcome::Applied(id));
        assert_eq!(enforcer.apply_count(), 2);
    }

    /// Enforcer whose apply lets the other context stop the session while
    /// the call is in flight
    struct StopDuringApply {
        store: Arc<SqliteStore>,
        inner: MockEnforcer,
    }

    #[async_trait]
    impl Enforcer for StopDuringApply {
        async fn apply(&self, apps: &AppSet) -> EnforcementResult<()> {
            self.inner.apply(apps).await?;
            self.store.write_active(None).unwrap();
            Ok(())
        }

        async fn release(&self) -> EnforcementResult<()> {
            self.inner.release().await
        }
    }

    #[tokio::test]
    async fn stop_during_apply_is_released_in_same_pass() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let id = activate(&store, "video");
        let enforcer = StopDuringApply {
            store: store.clone(),
            inner: MockEnforcer::new(),
        };

        let outcome = reconcile_enforcement(store.as_ref(), &enforcer, from_unix_seconds(100))
            .await
            .unwrap();

        assert_eq!(outcome, EnforcementOutcome::Released(id));
        assert_eq!(
            enforcer.inner.calls(),
            vec![
                EnforcerCall::Apply([AppId::new("video")].into_iter().collect()),
                EnforcerCall::Release,
            ]
        );
        assert!(enforcer.inner.applied().is_none());
        assert!(store.read_enforcement().unwrap().applied.is_none());
    }

    /// Enforcer whose release lets the other context record its own ledger
    /// while the call is in flight
    struct LedgerChangedDuringRelease {
        store: Arc<SqliteStore>,
        inner: MockEnforcer,
        recorded: EnforcementLedger,
    }

    #[async_trait]
    impl Enforcer for LedgerChangedDuringRelease {
        async fn apply(&self, apps: &AppSet) -> EnforcementResult<()> {
            self.inner.apply(apps).await
        }

        async fn release(&self) -> EnforcementResult<()> {
            self.inner.release().await?;
            if self.inner.release_count() == 1 {
                self.store.write_enforcement(&self.recorded).unwrap();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn lost_ledger_race_reissues_the_desired_call() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let id = activate(&store, "video");
        let now = from_unix_seconds(100);
        let mock = MockEnforcer::new();
        reconcile_enforcement(store.as_ref(), &mock, now).await.unwrap();
        store.write_active(None).unwrap();

        // The other context releases too and records it first
        let enforcer = LedgerChangedDuringRelease {
            store: store.clone(),
            inner: mock.clone(),
            recorded: EnforcementLedger::default(),
        };
        let outcome = reconcile_enforcement(store.as_ref(), &enforcer, now).await.unwrap();

        assert_eq!(outcome, EnforcementOutcome::Released(id));
        assert!(mock.applied().is_none());
        assert!(store.read_enforcement().unwrap().applied.is_none());
        // Released, lost the ledger race, released again
        assert_eq!(mock.release_count(), 2);
    }
}
