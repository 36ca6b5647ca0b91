//! Validated configuration structures

use crate::schema::{RawAdmission, RawConfig, RawServiceConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Default period of the built-in monitor trigger
pub const DEFAULT_WAKE_INTERVAL: Duration = Duration::from_secs(30);

/// Default poll period of the foreground controller
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Validated configuration ready for use by both execution contexts
#[derive(Debug, Clone, Default)]
pub struct FocusConfig {
    pub service: ServiceConfig,
    pub admission: AdmissionPolicy,
    pub monitor: MonitorConfig,
    pub controller: ControllerConfig,
    pub enforcement: EnforcementConfig,
}

impl FocusConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            admission: AdmissionPolicy::from_raw(raw.admission),
            monitor: MonitorConfig {
                wake_interval: raw
                    .monitor
                    .wake_interval_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_WAKE_INTERVAL),
            },
            controller: ControllerConfig {
                refresh_interval: match raw.controller.refresh_interval_seconds {
                    Some(secs) => seconds_or_unlimited(secs),
                    None => Some(DEFAULT_REFRESH_INTERVAL),
                },
            },
            enforcement: EnforcementConfig {
                policy_file: raw.enforcement.policy_file,
            },
        }
    }
}

/// Paths shared by both execution contexts
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            data_dir: raw.data_dir.unwrap_or_else(focus_util::default_data_dir),
            log_dir: raw.log_dir.unwrap_or_else(focus_util::default_log_dir),
        }
    }

    /// Location of the shared session database
    pub fn store_path(&self) -> PathBuf {
        focus_util::store_path(&self.data_dir)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Limits consulted by the admission guard
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    pub entitled: bool,
    /// None means unlimited
    pub max_sessions_per_day: Option<u32>,
    /// None means unlimited
    pub max_duration: Option<Duration>,
}

impl AdmissionPolicy {
    fn from_raw(raw: RawAdmission) -> Self {
        Self {
            entitled: raw.entitled.unwrap_or(true),
            max_sessions_per_day: raw.max_sessions_per_day.filter(|n| *n > 0),
            max_duration: raw.max_duration_seconds.and_then(seconds_or_unlimited),
        }
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::from_raw(RawAdmission::default())
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub wake_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            wake_interval: DEFAULT_WAKE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// None disables the interactive poll timer
    pub refresh_interval: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Some(DEFAULT_REFRESH_INTERVAL),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnforcementConfig {
    pub policy_file: Option<PathBuf>,
}

/// Convert seconds to Duration, treating 0 as "unlimited" (None)
fn seconds_or_unlimited(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_mean_unlimited() {
        let policy = AdmissionPolicy::from_raw(RawAdmission {
            entitled: None,
            max_sessions_per_day: Some(0),
            max_duration_seconds: Some(0),
        });
        assert!(policy.entitled);
        assert_eq!(policy.max_sessions_per_day, None);
        assert_eq!(policy.max_duration, None);
    }

    #[test]
    fn default_config_matches_empty_file() {
        let config = FocusConfig::default();
        assert_eq!(config.monitor.wake_interval, DEFAULT_WAKE_INTERVAL);
        assert_eq!(config.controller.refresh_interval, Some(DEFAULT_REFRESH_INTERVAL));
        assert!(config.service.store_path().ends_with("sessions.db"));
    }
}
