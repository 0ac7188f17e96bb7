use crate::state::{ContainerOperation, ContainerStateManager, OperationType};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictDecision {
    Allow,
    Deny { reason: String },
}

impl ConflictDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ConflictDecision::Allow)
    }
}

/// Lifecycle operations (restart, stop, start, update) conflict with
/// everything on the same container. A backup reads a consistent filesystem
/// alongside a scale, so that pairing is the one concurrent combination
/// allowed.
fn conflicts(proposed: OperationType, active: OperationType) -> bool {
    !matches!(
        (proposed, active),
        (OperationType::Scale, OperationType::Backup)
            | (OperationType::Backup, OperationType::Scale)
    )
}

pub struct ConflictDetector {
    manager: Arc<ContainerStateManager>,
}

impl ConflictDetector {
    pub fn new(manager: Arc<ContainerStateManager>) -> Self {
        Self { manager }
    }

    /// Checks the proposed operation against every live operation on the
    /// same container. The first conflicting record denies the proposal.
    pub fn evaluate(&self, proposed: &ContainerOperation) -> ConflictDecision {
        for active in self.manager.container_operations(&proposed.container_id) {
            if active.operation_id == proposed.operation_id {
                continue;
            }
            if conflicts(proposed.operation_type, active.operation_type) {
                debug!(
                    container = %proposed.container_id,
                    proposed = %proposed.operation_type,
                    conflicting = %active.operation_id,
                    "denying conflicting operation"
                );
                return ConflictDecision::Deny {
                    reason: format!(
                        "{} conflicts with {} operation {} ({})",
                        proposed.operation_type,
                        active.operation_type,
                        active.operation_id,
                        active.status
                    ),
                };
            }
        }
        ConflictDecision::Allow
    }
}
