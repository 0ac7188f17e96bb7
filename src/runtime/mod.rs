pub mod registry;
pub mod supervisor;
pub mod worker;

pub use registry::{WorkerHealth, WorkerState};
pub use supervisor::{run_supervisor, SupervisorReport};
pub use worker::{build_worker_specs, WorkerContext, WorkerEvent, WorkerKind, WorkerSpec};
