//! Mock enforcer for testing

use async_trait::async_trait;
use focus_api::AppSet;
use std::sync::{Arc, Mutex};

use crate::{EnforcementError, EnforcementResult, Enforcer};

/// A call received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcerCall {
    Apply(AppSet),
    Release,
}

/// Mock enforcer for unit/integration testing
///
/// Records every call, including failed ones, and can be told to fail.
#[derive(Clone, Default)]
pub struct MockEnforcer {
    calls: Arc<Mutex<Vec<EnforcerCall>>>,
    applied: Arc<Mutex<Option<AppSet>>>,

    /// Configure apply to fail
    pub fail_apply: Arc<Mutex<bool>>,

    /// Configure release to fail
    pub fail_release: Arc<Mutex<bool>>,
}

impl MockEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<EnforcerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn apply_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EnforcerCall::Apply(_)))
            .count()
    }

    pub fn release_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EnforcerCall::Release))
            .count()
    }

    /// Block list currently in effect on the "host"
    pub fn applied(&self) -> Option<AppSet> {
        self.applied.lock().unwrap().clone()
    }

    pub fn set_fail_apply(&self, fail: bool) {
        *self.fail_apply.lock().unwrap() = fail;
    }

    pub fn set_fail_release(&self, fail: bool) {
        *self.fail_release.lock().unwrap() = fail;
    }
}

#[async_trait]
impl Enforcer for MockEnforcer {
    async fn apply(&self, apps: &AppSet) -> EnforcementResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(EnforcerCall::Apply(apps.clone()));

        if *self.fail_apply.lock().unwrap() {
            return Err(EnforcementError::ApplyFailed("Mock apply failure".into()));
        }

        *self.applied.lock().unwrap() = Some(apps.clone());
        Ok(())
    }

    async fn release(&self) -> EnforcementResult<()> {
        self.calls.lock().unwrap().push(EnforcerCall::Release);

        if *self.fail_release.lock().unwrap() {
            return Err(EnforcementError::ReleaseFailed("Mock release failure".into()));
        }

        *self.applied.lock().unwrap() = None;
        Ok(())
    }
}
