pub mod conflict;
pub mod coordinator;
pub mod emergency;
pub mod locks;

pub use conflict::{ConflictDecision, ConflictDetector};
pub use coordinator::{OperationCoordinator, OperationRequest};
pub use emergency::{EmergencyFinding, EmergencyHandler};
pub use locks::{ContainerLock, ResourceLocker};

use crate::state::ContainerOperation;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("operation failed on container {container}: {message}")]
    Action { container: String, message: String },
    #[error("backup write failed at {path}: {message}")]
    Backup { path: String, message: String },
}

/// Carries out one accepted operation against the container engine. The
/// coordinator owns status transitions; implementations only act.
pub trait OperationExecutor: Send + Sync {
    fn execute(&self, op: &ContainerOperation) -> Result<(), ExecutorError>;
    fn force_stop(&self, container_id: &str) -> Result<(), ExecutorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("no tracked container is named {0}")]
    UnknownContainer(String),
    #[error("operation conflicts with an active operation: {reason}")]
    Conflict { reason: String },
    #[error("state manager rejected the operation")]
    RegisterRejected,
    #[error(transparent)]
    Store(#[from] StoreError),
}
