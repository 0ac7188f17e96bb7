use crate::shared::new_operation_id;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Restart,
    Stop,
    Start,
    Update,
    Scale,
    Backup,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Stop => "stop",
            Self::Start => "start",
            Self::Update => "update",
            Self::Scale => "scale",
            Self::Backup => "backup",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (OperationStatus::Pending, OperationStatus::InProgress)
                | (OperationStatus::Pending, OperationStatus::Cancelled)
                | (OperationStatus::InProgress, OperationStatus::Completed)
                | (OperationStatus::InProgress, OperationStatus::Failed)
                | (OperationStatus::InProgress, OperationStatus::Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Pending => write!(f, "pending"),
            OperationStatus::InProgress => write!(f, "in_progress"),
            OperationStatus::Completed => write!(f, "completed"),
            OperationStatus::Failed => write!(f, "failed"),
            OperationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

pub const PRIORITY_HIGHEST: u8 = 1;
pub const PRIORITY_LOWEST: u8 = 5;

/// One unit of work requested against one container, tracked from `pending`
/// to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOperation {
    pub operation_id: String,
    pub container_id: String,
    pub container_name: String,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    pub priority: u8,
    pub requested_by: String,
    pub requested_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub estimated_duration_ms: Option<i64>,
    #[serde(default)]
    pub actual_duration_ms: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ContainerOperation {
    pub fn new(
        container_id: impl Into<String>,
        container_name: impl Into<String>,
        operation_type: OperationType,
        priority: u8,
        requested_by: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            operation_id: new_operation_id(),
            container_id: container_id.into(),
            container_name: container_name.into(),
            operation_type,
            status: OperationStatus::Pending,
            priority: priority.clamp(PRIORITY_HIGHEST, PRIORITY_LOWEST),
            requested_by: requested_by.into(),
            requested_at: now,
            started_at: None,
            completed_at: None,
            estimated_duration_ms: None,
            actual_duration_ms: None,
            error_message: None,
            dependencies: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_estimated_duration_ms(mut self, estimated: i64) -> Self {
        self.estimated_duration_ms = Some(estimated);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Stamps the first transition into `in_progress`.
    pub(crate) fn mark_started(&mut self, now: i64) {
        self.status = OperationStatus::InProgress;
        self.started_at = Some(now);
    }

    /// Stamps a terminal transition and derives the actual duration.
    pub(crate) fn mark_finished(
        &mut self,
        status: OperationStatus,
        error_message: Option<String>,
        now: i64,
    ) {
        self.status = status;
        self.completed_at = Some(now);
        self.actual_duration_ms = self.started_at.map(|started| now - started);
        if status == OperationStatus::Failed {
            self.error_message = error_message;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_strictly_forward() {
        use OperationStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!InProgress.can_transition_to(Pending));
        for terminal in [Completed, Failed, Cancelled] {
            for next in [Pending, InProgress, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn terminal_statuses_are_exactly_three() {
        use OperationStatus::*;
        assert!(!Pending.is_terminal());
        assert!(!InProgress.is_terminal());
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Cancelled.is_terminal());
    }

    #[test]
    fn priority_is_clamped_to_the_valid_range() {
        let low = ContainerOperation::new("c", "web", OperationType::Stop, 0, "tester", 1);
        assert_eq!(low.priority, PRIORITY_HIGHEST);
        let high = ContainerOperation::new("c", "web", OperationType::Stop, 9, "tester", 1);
        assert_eq!(high.priority, PRIORITY_LOWEST);
    }

    #[test]
    fn finish_computes_actual_duration_from_start_stamp() {
        let mut op = ContainerOperation::new("c", "web", OperationType::Restart, 1, "tester", 10);
        op.mark_started(1_500);
        op.mark_finished(OperationStatus::Completed, None, 4_250);
        assert_eq!(op.started_at, Some(1_500));
        assert_eq!(op.completed_at, Some(4_250));
        assert_eq!(op.actual_duration_ms, Some(2_750));
        assert!(op.error_message.is_none());
    }

    #[test]
    fn error_message_is_kept_only_for_failures() {
        let mut op = ContainerOperation::new("c", "web", OperationType::Backup, 2, "tester", 10);
        op.mark_started(100);
        op.mark_finished(
            OperationStatus::Cancelled,
            Some("ignored".to_string()),
            200,
        );
        assert!(op.error_message.is_none());

        let mut failed = ContainerOperation::new("c", "web", OperationType::Backup, 2, "t", 10);
        failed.mark_started(100);
        failed.mark_finished(
            OperationStatus::Failed,
            Some("export stream broke".to_string()),
            200,
        );
        assert_eq!(
            failed.error_message.as_deref(),
            Some("export stream broke")
        );
    }

    #[test]
    fn operation_roundtrips_through_camel_case_json() {
        let op = ContainerOperation::new("abc", "web-1", OperationType::Scale, 2, "api", 99)
            .with_dependencies(vec!["op-1".to_string()])
            .with_estimated_duration_ms(5_000);
        let encoded = serde_json::to_string(&op).expect("encode");
        assert!(encoded.contains("\"operationId\""));
        assert!(encoded.contains("\"operationType\":\"scale\""));
        let decoded: ContainerOperation = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, op);
    }
}
