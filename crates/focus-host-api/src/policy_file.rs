//! Block list published as a JSON file
//!
//! For hosts where a separate privileged blocker watches a well-known path.
//! The file is replaced atomically (temp file in the same directory, then
//! rename) so the blocker never reads a truncated list, and removed on
//! release.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use focus_api::AppSet;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{EnforcementError, EnforcementResult, Enforcer};

/// Contents of the published policy file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFile {
    pub blocked_app_set: AppSet,
    pub applied_at: DateTime<Local>,
}

/// Enforcer that writes the block list to a file
pub struct PolicyFileEnforcer {
    path: PathBuf,
}

impl PolicyFileEnforcer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the currently published policy, if any
    pub fn read(&self) -> EnforcementResult<Option<PolicyFile>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                EnforcementError::Unavailable(format!("unreadable policy file: {}", e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, policy: &PolicyFile) -> EnforcementResult<()> {
        let parent = self.path.parent().ok_or_else(|| {
            EnforcementError::ApplyFailed("policy file path has no parent directory".into())
        })?;
        std::fs::create_dir_all(parent)?;

        let content = serde_json::to_string_pretty(policy)
            .map_err(|e| EnforcementError::ApplyFailed(e.to_string()))?;

        let mut temp_file = NamedTempFile::new_in(parent)?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.flush()?;
        temp_file
            .persist(&self.path)
            .map_err(|e| EnforcementError::ApplyFailed(e.error.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl Enforcer for PolicyFileEnforcer {
    async fn apply(&self, apps: &AppSet) -> EnforcementResult<()> {
        self.write(&PolicyFile {
            blocked_app_set: apps.clone(),
            applied_at: focus_util::now(),
        })?;

        info!(path = %self.path.display(), app_count = apps.len(), "Block list published");
        Ok(())
    }

    async fn release(&self) -> EnforcementResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Block list removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No block list to remove");
                Ok(())
            }
            Err(e) => Err(EnforcementError::ReleaseFailed(e.to_string())),
        }
    }

    fn is_healthy(&self) -> bool {
        self.path.parent().is_some_and(|p| p.exists())
    }
}
