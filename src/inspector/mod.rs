pub mod docker;

pub use docker::{DockerExecutor, DockerInspector};

use crate::state::container::{ContainerStatus, HealthStatus, MountPoint, ResourceUsage};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, thiserror::Error)]
pub enum InspectorError {
    #[error("failed to connect to container runtime: {0}")]
    Connect(String),
    #[error("container `{container}` not found")]
    NotFound { container: String },
    #[error("container runtime call failed for `{container}`: {message}")]
    Api { container: String, message: String },
    #[error("failed to list containers: {0}")]
    List(String),
}

/// Minimal listing result; full attributes come from `inspect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// One full inspection of a container, already normalized to domain types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub health: HealthStatus,
    pub image: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub ports: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub networks: BTreeSet<String>,
    pub mounts: Vec<MountPoint>,
    pub resource_usage: ResourceUsage,
}

/// The only contract the coordination engine consumes from the container
/// runtime: list everything, inspect one.
pub trait ContainerInspector: Send + Sync {
    fn list_containers(&self, all: bool) -> Result<Vec<ContainerHandle>, InspectorError>;
    fn inspect(&self, id: &str) -> Result<ContainerDetails, InspectorError>;
}
