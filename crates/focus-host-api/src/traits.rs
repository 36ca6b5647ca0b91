//! Enforcer traits

use async_trait::async_trait;
use focus_api::AppSet;
use thiserror::Error;

/// Errors from enforcement operations
#[derive(Debug, Error)]
pub enum EnforcementError {
    #[error("Apply failed: {0}")]
    ApplyFailed(String),

    #[error("Release failed: {0}")]
    ReleaseFailed(String),

    #[error("Enforcer unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EnforcementResult<T> = Result<T, EnforcementError>;

/// Applies or releases an application block list.
///
/// Both operations must be safe to repeat: the core retries a call whose
/// success it could not record.
#[async_trait]
pub trait Enforcer: Send + Sync {
    /// Block exactly `apps`, replacing any block list currently applied
    async fn apply(&self, apps: &AppSet) -> EnforcementResult<()>;

    /// Remove any block list
    async fn release(&self) -> EnforcementResult<()>;

    /// Optional: check if the enforcer is reachable
    fn is_healthy(&self) -> bool {
        true
    }
}
