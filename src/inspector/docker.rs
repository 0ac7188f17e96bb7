use super::{ContainerDetails, ContainerHandle, ContainerInspector, InspectorError};
use crate::coordination::{ExecutorError, OperationExecutor};
use crate::state::container::{ContainerStatus, HealthStatus, MountPoint, ResourceUsage};
use crate::state::operation::{ContainerOperation, OperationType};
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions, UpdateContainerOptions,
};
use bollard::models::{ContainerInspectResponse, ContainerStateStatusEnum, HealthStatusEnum};
use bollard::Docker;
use chrono::DateTime;
use futures_util::StreamExt;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::warn;

const STOP_TIMEOUT_SECS: i64 = 30;

/// Drives the async bollard client from the thread-based daemon through a
/// private current-thread runtime.
pub struct DockerInspector {
    docker: Docker,
    rt: Runtime,
}

impl DockerInspector {
    pub fn connect() -> Result<Self, InspectorError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|err| InspectorError::Connect(err.to_string()))?;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| InspectorError::Connect(err.to_string()))?;
        Ok(Self { docker, rt })
    }
}

impl ContainerInspector for DockerInspector {
    fn list_containers(&self, all: bool) -> Result<Vec<ContainerHandle>, InspectorError> {
        let options = Some(ListContainersOptions::<String> {
            all,
            ..Default::default()
        });
        let summaries = self
            .rt
            .block_on(self.docker.list_containers(options))
            .map_err(|err| InspectorError::List(err.to_string()))?;

        let mut handles = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else {
                continue;
            };
            let name = summary
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|name| name.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.clone());
            handles.push(ContainerHandle { id, name });
        }
        Ok(handles)
    }

    fn inspect(&self, id: &str) -> Result<ContainerDetails, InspectorError> {
        let response = self
            .rt
            .block_on(
                self.docker
                    .inspect_container(id, None::<InspectContainerOptions>),
            )
            .map_err(|err| match err {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => InspectorError::NotFound {
                    container: id.to_string(),
                },
                other => InspectorError::Api {
                    container: id.to_string(),
                    message: other.to_string(),
                },
            })?;
        Ok(details_from_inspect(id, response))
    }
}

fn details_from_inspect(id: &str, response: ContainerInspectResponse) -> ContainerDetails {
    let name = response
        .name
        .as_deref()
        .map(|name| name.trim_start_matches('/').to_string())
        .unwrap_or_else(|| id.to_string());

    let state = response.state.as_ref();
    let status = state
        .and_then(|s| s.status)
        .map(|status| map_status(id, status))
        .unwrap_or(ContainerStatus::Dead);
    let health = state
        .and_then(|s| s.health.as_ref())
        .and_then(|h| h.status)
        .map(map_health)
        .unwrap_or(HealthStatus::None);

    let image = response
        .config
        .as_ref()
        .and_then(|config| config.image.clone())
        .or(response.image)
        .unwrap_or_default();

    let created_at = response
        .created
        .as_deref()
        .and_then(parse_docker_timestamp)
        .unwrap_or(0);
    let started_at = state
        .and_then(|s| s.started_at.as_deref())
        .and_then(parse_docker_timestamp);

    let labels = response
        .config
        .as_ref()
        .and_then(|config| config.labels.clone())
        .map(|labels| labels.into_iter().collect::<BTreeMap<_, _>>())
        .unwrap_or_default();

    let mut ports = BTreeMap::new();
    if let Some(port_map) = response
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.clone())
    {
        for (container_port, bindings) in port_map {
            let host = bindings
                .unwrap_or_default()
                .first()
                .map(|binding| {
                    format!(
                        "{}:{}",
                        binding.host_ip.clone().unwrap_or_default(),
                        binding.host_port.clone().unwrap_or_default()
                    )
                })
                .unwrap_or_default();
            ports.insert(container_port, host);
        }
    }

    let networks = response
        .network_settings
        .as_ref()
        .and_then(|settings| settings.networks.as_ref())
        .map(|networks| networks.keys().cloned().collect::<BTreeSet<_>>())
        .unwrap_or_default();

    let mounts = response
        .mounts
        .unwrap_or_default()
        .into_iter()
        .map(|mount| MountPoint {
            source: mount.source.unwrap_or_default(),
            destination: mount.destination.unwrap_or_default(),
            read_only: !mount.rw.unwrap_or(true),
        })
        .collect();

    let resource_usage = response
        .host_config
        .as_ref()
        .map(|host| ResourceUsage {
            memory_limit_bytes: host.memory.unwrap_or(0),
            cpu_quota: host.cpu_quota.unwrap_or(0),
        })
        .unwrap_or_default();

    ContainerDetails {
        id: response.id.unwrap_or_else(|| id.to_string()),
        name,
        status,
        health,
        image,
        created_at,
        started_at,
        ports,
        labels,
        networks,
        mounts,
        resource_usage,
    }
}

fn map_status(id: &str, status: ContainerStateStatusEnum) -> ContainerStatus {
    match status {
        ContainerStateStatusEnum::RUNNING => ContainerStatus::Running,
        ContainerStateStatusEnum::EXITED | ContainerStateStatusEnum::CREATED => {
            ContainerStatus::Exited
        }
        ContainerStateStatusEnum::RESTARTING => ContainerStatus::Restarting,
        ContainerStateStatusEnum::PAUSED => ContainerStatus::Paused,
        ContainerStateStatusEnum::DEAD | ContainerStateStatusEnum::REMOVING => {
            ContainerStatus::Dead
        }
        other => {
            warn!(container = %id, status = %other, "unrecognized container status");
            ContainerStatus::Dead
        }
    }
}

fn map_health(status: HealthStatusEnum) -> HealthStatus {
    match status {
        HealthStatusEnum::HEALTHY => HealthStatus::Healthy,
        HealthStatusEnum::UNHEALTHY => HealthStatus::Unhealthy,
        HealthStatusEnum::STARTING => HealthStatus::Starting,
        HealthStatusEnum::NONE | HealthStatusEnum::EMPTY => HealthStatus::None,
    }
}

/// Docker reports `0001-01-01T00:00:00Z` for containers that never started.
fn parse_docker_timestamp(raw: &str) -> Option<i64> {
    let parsed = DateTime::parse_from_rfc3339(raw).ok()?;
    let millis = parsed.timestamp_millis();
    if millis <= 0 {
        return None;
    }
    Some(millis)
}

/// Executes coordinated operations against the Docker engine.
pub struct DockerExecutor {
    docker: Docker,
    rt: Runtime,
    backup_dir: PathBuf,
}

impl DockerExecutor {
    pub fn connect(backup_dir: impl Into<PathBuf>) -> Result<Self, InspectorError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|err| InspectorError::Connect(err.to_string()))?;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| InspectorError::Connect(err.to_string()))?;
        Ok(Self {
            docker,
            rt,
            backup_dir: backup_dir.into(),
        })
    }

    fn action_error(container: &str, err: bollard::errors::Error) -> ExecutorError {
        ExecutorError::Action {
            container: container.to_string(),
            message: err.to_string(),
        }
    }

    fn update_resources(&self, op: &ContainerOperation) -> Result<(), ExecutorError> {
        let memory = metadata_i64(op, "memory_limit_bytes");
        let cpu_quota = metadata_i64(op, "cpu_quota");
        if memory.is_none() && cpu_quota.is_none() {
            return Err(ExecutorError::Action {
                container: op.container_id.clone(),
                message: format!(
                    "{} requires memory_limit_bytes or cpu_quota metadata",
                    op.operation_type
                ),
            });
        }
        let options = UpdateContainerOptions::<String> {
            memory,
            cpu_quota,
            ..Default::default()
        };
        self.rt
            .block_on(self.docker.update_container(&op.container_id, options))
            .map_err(|err| Self::action_error(&op.container_id, err))
    }

    fn export_backup(&self, op: &ContainerOperation) -> Result<(), ExecutorError> {
        let target = backup_target(&self.backup_dir, op);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|err| ExecutorError::Backup {
                path: target.display().to_string(),
                message: err.to_string(),
            })?;
        }
        let mut file = std::fs::File::create(&target).map_err(|err| ExecutorError::Backup {
            path: target.display().to_string(),
            message: err.to_string(),
        })?;

        self.rt.block_on(async {
            let mut stream = self.docker.export_container(&op.container_id);
            while let Some(chunk) = stream.next().await {
                let bytes = chunk.map_err(|err| Self::action_error(&op.container_id, err))?;
                file.write_all(&bytes).map_err(|err| ExecutorError::Backup {
                    path: target.display().to_string(),
                    message: err.to_string(),
                })?;
            }
            Ok(())
        })
    }
}

fn metadata_i64(op: &ContainerOperation, key: &str) -> Option<i64> {
    op.metadata.get(key).and_then(|value| value.as_i64())
}

fn backup_target(dir: &Path, op: &ContainerOperation) -> PathBuf {
    dir.join(format!("{}-{}.tar", op.container_name, op.operation_id))
}

impl OperationExecutor for DockerExecutor {
    fn execute(&self, op: &ContainerOperation) -> Result<(), ExecutorError> {
        match op.operation_type {
            OperationType::Restart => self
                .rt
                .block_on(
                    self.docker
                        .restart_container(&op.container_id, None::<RestartContainerOptions>),
                )
                .map_err(|err| Self::action_error(&op.container_id, err)),
            OperationType::Stop => self
                .rt
                .block_on(self.docker.stop_container(
                    &op.container_id,
                    Some(StopContainerOptions {
                        t: STOP_TIMEOUT_SECS,
                    }),
                ))
                .map_err(|err| Self::action_error(&op.container_id, err)),
            OperationType::Start => self
                .rt
                .block_on(
                    self.docker
                        .start_container(&op.container_id, None::<StartContainerOptions<String>>),
                )
                .map_err(|err| Self::action_error(&op.container_id, err)),
            OperationType::Update | OperationType::Scale => self.update_resources(op),
            OperationType::Backup => self.export_backup(op),
        }
    }

    fn force_stop(&self, container_id: &str) -> Result<(), ExecutorError> {
        self.rt
            .block_on(
                self.docker
                    .stop_container(container_id, Some(StopContainerOptions { t: 0 })),
            )
            .map_err(|err| Self::action_error(container_id, err))
    }
}
