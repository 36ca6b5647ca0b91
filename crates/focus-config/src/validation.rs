//! Configuration validation

use crate::schema::RawConfig;
use std::path::Path;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    ZeroInterval { field: &'static str },

    #[error("{field} must be an absolute path, got '{value}'")]
    RelativePath { field: &'static str, value: String },
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.monitor.wake_interval_seconds == Some(0) {
        errors.push(ValidationError::ZeroInterval {
            field: "monitor.wake_interval_seconds",
        });
    }

    let paths = [
        ("service.data_dir", config.service.data_dir.as_deref()),
        ("service.log_dir", config.service.log_dir.as_deref()),
        ("enforcement.policy_file", config.enforcement.policy_file.as_deref()),
    ];
    for (field, path) in paths {
        if let Some(err) = path.and_then(|p| check_absolute(field, p)) {
            errors.push(err);
        }
    }

    errors
}

fn check_absolute(field: &'static str, path: &Path) -> Option<ValidationError> {
    if path.is_absolute() {
        None
    } else {
        Some(ValidationError::RelativePath {
            field,
            value: path.display().to_string(),
        })
    }
}
