use dockhand::config::Settings;
use dockhand::coordination::{
    EmergencyHandler, OperationCoordinator, OperationExecutor, ResourceLocker,
};
use dockhand::inspector::{ContainerInspector, DockerExecutor, DockerInspector};
use dockhand::runtime::run_supervisor;
use dockhand::state::ContainerStateManager;
use dockhand::store::{RedisStore, StateStore, StoreKeys};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn settings_path() -> PathBuf {
    if let Some(arg) = std::env::args().nth(1) {
        return PathBuf::from(arg);
    }
    if let Some(path) = std::env::var_os("DOCKHAND_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("dockhand.yaml")
}

fn run() -> Result<(), String> {
    let path = settings_path();
    let settings = Settings::from_path(&path)
        .map_err(|err| format!("failed to load {}: {err}", path.display()))?;
    settings.validate().map_err(|err| err.to_string())?;

    let store: Arc<dyn StateStore> = Arc::new(
        RedisStore::connect(&settings.store.url).map_err(|err| err.to_string())?,
    );
    let inspector: Arc<dyn ContainerInspector> =
        Arc::new(DockerInspector::connect().map_err(|err| err.to_string())?);
    let executor = Arc::new(
        DockerExecutor::connect(&settings.backup.directory).map_err(|err| err.to_string())?,
    );

    let manager = Arc::new(
        ContainerStateManager::new(inspector, Arc::clone(&store), &settings)
            .map_err(|err| err.to_string())?,
    );
    manager
        .initialize()
        .map_err(|err| format!("initialization failed: {err}"))?;

    let locker = ResourceLocker::new(
        store,
        StoreKeys::new(&settings.store.key_prefix),
        &settings.lock,
    );
    let coordinator = Arc::new(OperationCoordinator::new(
        Arc::clone(&manager),
        locker,
        Arc::clone(&executor) as Arc<dyn OperationExecutor>,
    ));
    let emergency = Arc::new(EmergencyHandler::new(
        Arc::clone(&manager),
        executor,
        &settings.emergency,
    ));

    let stop = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(Arc::clone(&stop))?;

    info!(config = %path.display(), "dockhand starting");
    let report = run_supervisor(manager, coordinator, emergency, &settings, stop);
    if let Some(last_error) = report.last_error {
        info!(%last_error, "stopped with a recorded error");
    }
    Ok(())
}

fn spawn_signal_listener(stop: Arc<AtomicBool>) -> Result<(), String> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("failed to start signal listener: {err}"))?;
    std::thread::spawn(move || {
        if rt.block_on(tokio::signal::ctrl_c()).is_ok() {
            info!("interrupt received, shutting down");
            stop.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
