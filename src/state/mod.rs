pub mod container;
pub mod manager;
pub mod operation;
pub mod patterns;

pub use container::{ContainerState, ContainerStatus, HealthStatus, MountPoint, ResourceUsage};
pub use manager::{ContainerStateManager, HealthSummary, OPERATION_HISTORY_LIMIT};
pub use operation::{ContainerOperation, OperationStatus, OperationType};
pub use patterns::ManagedPatterns;

use crate::inspector::InspectorError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid container pattern: {0}")]
    Patterns(#[from] glob::PatternError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Inspector(#[from] InspectorError),
}
