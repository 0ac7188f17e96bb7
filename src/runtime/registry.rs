use super::worker::WorkerEvent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Running,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHealth {
    pub state: WorkerState,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub last_heartbeat: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Default for WorkerHealth {
    fn default() -> Self {
        Self {
            state: WorkerState::Stopped,
            started_at: None,
            last_heartbeat: None,
            last_error: None,
        }
    }
}

/// Folds one worker event into the supervisor's health map and the set of
/// workers still expected to report.
pub(crate) fn apply_worker_event(
    workers: &mut BTreeMap<String, WorkerHealth>,
    active: &mut BTreeSet<String>,
    event: WorkerEvent,
) {
    match event {
        WorkerEvent::Started { worker_id, at } => {
            let health = workers.entry(worker_id.clone()).or_default();
            health.state = WorkerState::Running;
            health.started_at = Some(at);
            info!(worker = %worker_id, "worker started");
        }
        WorkerEvent::Heartbeat { worker_id, at } => {
            if let Some(health) = workers.get_mut(&worker_id) {
                health.last_heartbeat = Some(at);
            }
        }
        WorkerEvent::Error {
            worker_id,
            message,
            fatal,
            ..
        } => {
            if let Some(health) = workers.get_mut(&worker_id) {
                health.last_error = Some(message.clone());
                if fatal {
                    health.state = WorkerState::Error;
                }
            }
            warn!(worker = %worker_id, fatal, error = %message, "worker reported an error");
        }
        WorkerEvent::Stopped { worker_id, .. } => {
            if let Some(health) = workers.get_mut(&worker_id) {
                if health.state != WorkerState::Error {
                    health.state = WorkerState::Stopped;
                }
            }
            active.remove(&worker_id);
            info!(worker = %worker_id, "worker stopped");
        }
    }
}
