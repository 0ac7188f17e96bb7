use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid yaml: {0}")]
    ParseInline(#[from] serde_yaml::Error),
    #[error("settings validation failed: {0}")]
    Settings(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub managed_containers: Vec<String>,
    #[serde(default)]
    pub excluded_containers: Vec<String>,
    #[serde(default = "default_state_update_interval_secs")]
    pub state_update_interval_secs: u64,
    #[serde(default = "default_operation_history_retention_secs")]
    pub operation_history_retention_secs: i64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,
    #[serde(default = "default_stale_scan_threshold")]
    pub stale_scan_threshold: u32,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub lock: LockSettings,
    #[serde(default)]
    pub emergency: EmergencySettings,
    #[serde(default)]
    pub backup: BackupSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LockSettings {
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_lock_owner")]
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmergencySettings {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_stuck_grace_secs")]
    pub stuck_grace_secs: u64,
    #[serde(default = "default_estimated_duration_secs")]
    pub default_estimated_duration_secs: u64,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackupSettings {
    #[serde(default = "default_backup_dir")]
    pub directory: String,
}

fn default_state_update_interval_secs() -> u64 {
    30
}

fn default_operation_history_retention_secs() -> i64 {
    86_400
}

fn default_cleanup_interval_secs() -> u64 {
    3_600
}

fn default_dispatch_interval_secs() -> u64 {
    1
}

fn default_stale_scan_threshold() -> u32 {
    3
}

fn default_store_url() -> String {
    "redis://127.0.0.1/".to_string()
}

fn default_key_prefix() -> String {
    "dockhand".to_string()
}

fn default_lock_ttl_secs() -> u64 {
    60
}

fn default_lock_owner() -> String {
    format!("coordinator-{}", std::process::id())
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_stuck_grace_secs() -> u64 {
    120
}

fn default_estimated_duration_secs() -> u64 {
    300
}

fn default_unhealthy_threshold() -> usize {
    3
}

fn default_backup_dir() -> String {
    "/var/lib/dockhand/backups".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            managed_containers: Vec::new(),
            excluded_containers: Vec::new(),
            state_update_interval_secs: default_state_update_interval_secs(),
            operation_history_retention_secs: default_operation_history_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            dispatch_interval_secs: default_dispatch_interval_secs(),
            stale_scan_threshold: default_stale_scan_threshold(),
            store: StoreSettings::default(),
            lock: LockSettings::default(),
            emergency: EmergencySettings::default(),
            backup: BackupSettings::default(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl_secs(),
            owner: default_lock_owner(),
        }
    }
}

impl Default for EmergencySettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            stuck_grace_secs: default_stuck_grace_secs(),
            default_estimated_duration_secs: default_estimated_duration_secs(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            directory: default_backup_dir(),
        }
    }
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let settings: Settings =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(settings)
    }

    pub fn from_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.managed_containers.is_empty() {
            return Err(ConfigError::Settings(
                "managed_containers must list at least one pattern".to_string(),
            ));
        }
        for pattern in self
            .managed_containers
            .iter()
            .chain(self.excluded_containers.iter())
        {
            glob::Pattern::new(pattern).map_err(|err| {
                ConfigError::Settings(format!("invalid container pattern `{pattern}`: {err}"))
            })?;
        }
        if self.state_update_interval_secs == 0 {
            return Err(ConfigError::Settings(
                "state_update_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.operation_history_retention_secs <= 0 {
            return Err(ConfigError::Settings(
                "operation_history_retention_secs must be greater than zero".to_string(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Settings(
                "cleanup_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.dispatch_interval_secs == 0 {
            return Err(ConfigError::Settings(
                "dispatch_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.stale_scan_threshold == 0 {
            return Err(ConfigError::Settings(
                "stale_scan_threshold must be greater than zero".to_string(),
            ));
        }
        if self.lock.ttl_secs == 0 {
            return Err(ConfigError::Settings(
                "lock.ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.lock.owner.trim().is_empty() {
            return Err(ConfigError::Settings(
                "lock.owner must be non-empty".to_string(),
            ));
        }
        if self.emergency.unhealthy_threshold == 0 {
            return Err(ConfigError::Settings(
                "emergency.unhealthy_threshold must be greater than zero".to_string(),
            ));
        }
        if self.store.key_prefix.trim().is_empty() {
            return Err(ConfigError::Settings(
                "store.key_prefix must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}
