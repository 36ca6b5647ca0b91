//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Paths shared by both execution contexts
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Limits applied when admitting new sessions
    #[serde(default)]
    pub admission: RawAdmission,

    /// Background monitor settings
    #[serde(default)]
    pub monitor: RawMonitor,

    /// Foreground controller settings
    #[serde(default)]
    pub controller: RawController,

    /// Enforcement adapter settings
    #[serde(default)]
    pub enforcement: RawEnforcement,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Directory holding the shared session database
    pub data_dir: Option<PathBuf>,

    /// Log directory
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAdmission {
    /// Entitlement flag; absent means entitled
    pub entitled: Option<bool>,

    /// Sessions that may be created per day; 0 means unlimited
    pub max_sessions_per_day: Option<u32>,

    /// Longest allowed session in seconds; 0 means unlimited
    pub max_duration_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawMonitor {
    /// Period of the built-in trigger source
    pub wake_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawController {
    /// Poll timer period while interactive; 0 disables polling
    pub refresh_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEnforcement {
    /// Where the policy file enforcer publishes the block list
    pub policy_file: Option<PathBuf>,
}
