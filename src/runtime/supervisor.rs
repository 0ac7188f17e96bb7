use super::registry::{apply_worker_event, WorkerHealth, WorkerState};
use super::worker::{build_worker_specs, run_worker, WorkerContext, WorkerEvent};
use crate::config::Settings;
use crate::coordination::{EmergencyHandler, OperationCoordinator};
use crate::state::ContainerStateManager;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct SupervisorReport {
    pub workers: BTreeMap<String, WorkerHealth>,
    pub last_error: Option<String>,
}

/// Runs one thread per worker until the stop flag flips, then joins them
/// within a bounded wait and flushes the manager. Always returns a report;
/// worker failures never abort the supervisor.
pub fn run_supervisor(
    manager: Arc<ContainerStateManager>,
    coordinator: Arc<OperationCoordinator>,
    emergency: Arc<EmergencyHandler>,
    settings: &Settings,
    stop: Arc<AtomicBool>,
) -> SupervisorReport {
    let specs = build_worker_specs(settings);
    let mut workers: BTreeMap<String, WorkerHealth> = BTreeMap::new();
    let mut active = BTreeSet::new();
    for spec in &specs {
        workers.insert(spec.id.clone(), WorkerHealth::default());
        active.insert(spec.id.clone());
    }
    info!(workers = specs.len(), "supervisor started");

    let (events_tx, events_rx) = mpsc::channel::<WorkerEvent>();
    let mut handles = Vec::new();
    for spec in specs {
        let context = WorkerContext {
            manager: Arc::clone(&manager),
            coordinator: Arc::clone(&coordinator),
            emergency: Arc::clone(&emergency),
            stop: Arc::clone(&stop),
            events: events_tx.clone(),
        };
        handles.push(thread::spawn(move || run_worker(spec, context)));
    }
    drop(events_tx);

    let mut last_error = None;
    while !stop.load(Ordering::Relaxed) {
        match events_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => {
                if let WorkerEvent::Error { ref message, .. } = event {
                    last_error = Some(message.clone());
                }
                apply_worker_event(&mut workers, &mut active, event);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let deadline = std::time::Instant::now() + shutdown_wait_timeout();
    while !active.is_empty() && std::time::Instant::now() < deadline {
        match events_rx.recv_timeout(Duration::from_millis(25)) {
            Ok(event) => apply_worker_event(&mut workers, &mut active, event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if !active.is_empty() {
        let message = format!(
            "shutdown timeout waiting for workers: {}",
            active.iter().cloned().collect::<Vec<_>>().join(",")
        );
        warn!("{message}");
        for worker_id in &active {
            if let Some(worker) = workers.get_mut(worker_id) {
                worker.state = WorkerState::Error;
                worker.last_error = Some("shutdown timeout".to_string());
            }
        }
        last_error = Some(message);
    }

    for handle in handles {
        let _ = handle.join();
    }

    manager.shutdown();
    info!("supervisor stopped");
    SupervisorReport {
        workers,
        last_error,
    }
}

fn shutdown_wait_timeout() -> Duration {
    let seconds = std::env::var("DOCKHAND_SHUTDOWN_TIMEOUT_SECONDS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(5);
    Duration::from_secs(seconds)
}
