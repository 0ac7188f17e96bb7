use crate::inspector::ContainerDetails;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Running,
    Exited,
    Restarting,
    Paused,
    Dead,
}

impl ContainerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Restarting => "restarting",
            Self::Paused => "paused",
            Self::Dead => "dead",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "exited" => Ok(Self::Exited),
            "restarting" => Ok(Self::Restarting),
            "paused" => Ok(Self::Paused),
            "dead" => Ok(Self::Dead),
            _ => Err("status must be one of: running, exited, restarting, paused, dead"
                .to_string()),
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Starting,
    None,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Starting => "starting",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountPoint {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    #[serde(default)]
    pub memory_limit_bytes: i64,
    #[serde(default)]
    pub cpu_quota: i64,
}

/// Snapshot of one container as of its last successful inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    pub container_id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub health_status: HealthStatus,
    pub image: String,
    pub created_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub ports: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub networks: BTreeSet<String>,
    #[serde(default)]
    pub mounts: Vec<MountPoint>,
    #[serde(default)]
    pub resource_usage: ResourceUsage,
    pub last_updated: i64,
}

impl ContainerState {
    pub fn from_details(details: ContainerDetails, last_updated: i64) -> Self {
        Self {
            container_id: details.id,
            name: details.name,
            status: details.status,
            health_status: details.health,
            image: details.image,
            created_at: details.created_at,
            started_at: details.started_at,
            ports: details.ports,
            labels: details.labels,
            networks: details.networks,
            mounts: details.mounts,
            resource_usage: details.resource_usage,
            last_updated,
        }
    }

    /// An entry not refreshed for `threshold` scan intervals must be treated
    /// as stale by readers rather than silently trusted.
    pub fn is_stale(&self, now: i64, scan_interval_secs: u64, threshold: u32) -> bool {
        let window = (scan_interval_secs as i64)
            .saturating_mul(i64::from(threshold))
            .saturating_mul(1_000);
        now.saturating_sub(self.last_updated) > window
    }
}
