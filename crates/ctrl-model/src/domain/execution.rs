use serde::{Deserialize, Serialize};

use crate::TestUnitId;

/// Terminal outcome of a test unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// The external job reported success.
    Success,
    /// Job creation or execution failed.
    Failure,
    /// The unit was pulled while the environment was paused; no job was created.
    Skipped,
    /// The unit was terminated before it completed naturally.
    Terminated,
}

impl ExecutionStatus {
    /// Short lowercase label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::Terminated => "terminated",
        }
    }
}

/// Result of one test unit. Created exactly once per unit and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub id: TestUnitId,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionResult {
    pub fn new(id: impl Into<TestUnitId>, status: ExecutionStatus) -> Self {
        Self {
            id: id.into(),
            status,
            message: None,
        }
    }

    pub fn success(id: impl Into<TestUnitId>) -> Self {
        Self::new(id, ExecutionStatus::Success)
    }

    pub fn skipped(id: impl Into<TestUnitId>) -> Self {
        Self::new(id, ExecutionStatus::Skipped)
    }

    pub fn terminated(id: impl Into<TestUnitId>) -> Self {
        Self::new(id, ExecutionStatus::Terminated)
    }

    pub fn failure(id: impl Into<TestUnitId>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ExecutionStatus::Failure,
            message: Some(message.into()),
        }
    }
}
