use crate::config::Settings;
use crate::coordination::{EmergencyHandler, OperationCoordinator};
use crate::shared::now_millis;
use crate::state::ContainerStateManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Started {
        worker_id: String,
        at: i64,
    },
    Heartbeat {
        worker_id: String,
        at: i64,
    },
    Error {
        worker_id: String,
        at: i64,
        message: String,
        fatal: bool,
    },
    Stopped {
        worker_id: String,
        at: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Scan,
    Cleanup,
    Dispatch,
    Emergency,
}

#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub id: String,
    pub kind: WorkerKind,
    pub interval: Duration,
}

#[derive(Clone)]
pub struct WorkerContext {
    pub manager: Arc<ContainerStateManager>,
    pub coordinator: Arc<OperationCoordinator>,
    pub emergency: Arc<EmergencyHandler>,
    pub stop: Arc<AtomicBool>,
    pub events: Sender<WorkerEvent>,
}

pub fn build_worker_specs(settings: &Settings) -> Vec<WorkerSpec> {
    vec![
        WorkerSpec {
            id: "state_scan".to_string(),
            kind: WorkerKind::Scan,
            interval: Duration::from_secs(settings.state_update_interval_secs),
        },
        WorkerSpec {
            id: "dispatcher".to_string(),
            kind: WorkerKind::Dispatch,
            interval: Duration::from_secs(settings.dispatch_interval_secs),
        },
        WorkerSpec {
            id: "history_cleanup".to_string(),
            kind: WorkerKind::Cleanup,
            interval: Duration::from_secs(settings.cleanup_interval_secs),
        },
        WorkerSpec {
            id: "emergency".to_string(),
            kind: WorkerKind::Emergency,
            interval: Duration::from_secs(settings.emergency.check_interval_secs),
        },
    ]
}

pub(crate) fn run_worker(spec: WorkerSpec, context: WorkerContext) {
    let WorkerContext {
        manager,
        coordinator,
        emergency,
        stop,
        events,
    } = context;

    let _ = events.send(WorkerEvent::Started {
        worker_id: spec.id.clone(),
        at: now_millis(),
    });

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let tick = match spec.kind {
            WorkerKind::Scan => manager.scan_once().map_err(|err| err.to_string()),
            WorkerKind::Cleanup => {
                manager.cleanup_once();
                Ok(())
            }
            WorkerKind::Dispatch => drain_dispatch(&coordinator, &stop),
            WorkerKind::Emergency => {
                emergency.check_once();
                Ok(())
            }
        };

        match tick {
            Ok(()) => {
                let _ = events.send(WorkerEvent::Heartbeat {
                    worker_id: spec.id.clone(),
                    at: now_millis(),
                });
            }
            Err(message) => {
                let _ = events.send(WorkerEvent::Error {
                    worker_id: spec.id.clone(),
                    at: now_millis(),
                    message,
                    fatal: false,
                });
            }
        }

        if !sleep_with_stop(&stop, spec.interval) {
            break;
        }
    }

    let _ = events.send(WorkerEvent::Stopped {
        worker_id: spec.id,
        at: now_millis(),
    });
}

/// Runs ready operations back to back so one slow tick interval does not
/// stretch a burst of queued work.
fn drain_dispatch(
    coordinator: &OperationCoordinator,
    stop: &AtomicBool,
) -> Result<(), String> {
    while !stop.load(Ordering::Relaxed) {
        match coordinator.dispatch_once() {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(err) => return Err(err.to_string()),
        }
    }
    Ok(())
}

pub(crate) fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::from_millis(0) {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(Duration::from_millis(25));
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_specs_follow_configured_intervals() {
        let settings: Settings = Settings::from_str(
            r#"
managed_containers:
  - "web-*"
state_update_interval_secs: 7
dispatch_interval_secs: 2
cleanup_interval_secs: 900
emergency:
  check_interval_secs: 11
"#,
        )
        .expect("settings");

        let specs = build_worker_specs(&settings);
        let ids = specs.iter().map(|spec| spec.id.as_str()).collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec!["state_scan", "dispatcher", "history_cleanup", "emergency"]
        );
        assert_eq!(specs[0].interval, Duration::from_secs(7));
        assert_eq!(specs[1].interval, Duration::from_secs(2));
        assert_eq!(specs[2].interval, Duration::from_secs(900));
        assert_eq!(specs[3].interval, Duration::from_secs(11));
    }

    #[test]
    fn sleep_with_stop_returns_false_once_stopped() {
        let stop = AtomicBool::new(true);
        assert!(!sleep_with_stop(&stop, Duration::from_secs(5)));

        let stop = AtomicBool::new(false);
        assert!(sleep_with_stop(&stop, Duration::from_millis(1)));
    }
}
