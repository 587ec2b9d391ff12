use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{JobLabels, ModelError};

/// Lifecycle notification kinds emitted by the job substrate watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobEventKind {
    /// Job object created.
    Add,
    /// Job status changed.
    Change,
    /// Execution error reported for this job.
    Error,
    /// Job object deleted.
    Delete,
}

/// Observed job status at the time of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Number of running pods.
    pub active: u32,
    pub succeeded: bool,
    pub failed: bool,
}

impl JobStatus {
    pub fn running() -> Self {
        Self {
            active: 1,
            ..Self::default()
        }
    }

    pub fn succeeded() -> Self {
        Self {
            succeeded: true,
            ..Self::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            failed: true,
            ..Self::default()
        }
    }

    /// Returns `true` once the job will not change any further.
    pub fn is_finished(&self) -> bool {
        self.succeeded || self.failed
    }
}

/// One entry of the substrate's watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub kind: JobEventKind,
    /// Job name.
    pub name: String,
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub status: JobStatus,
    /// Error description for [`JobEventKind::Error`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobEvent {
    pub fn new(
        kind: JobEventKind,
        name: impl Into<String>,
        labels: BTreeMap<String, String>,
        status: JobStatus,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            labels,
            status,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Extract the join key from the job labels.
    pub fn job_labels(&self) -> Result<JobLabels, ModelError> {
        JobLabels::from_labels(&self.labels)
    }
}
