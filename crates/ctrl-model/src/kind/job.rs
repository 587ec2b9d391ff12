use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{JobLabels, TestUnit};

/// Restart behaviour of the job's pod. Test units are single-shot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Never,
}

/// Where and with what image jobs are created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTemplate {
    pub namespace: String,
    pub image: String,
}

impl Default for JobTemplate {
    fn default() -> Self {
        Self {
            namespace: "ctrlplane".to_string(),
            image: "busybox:latest".to_string(),
        }
    }
}

/// Container job description handed to the substrate.
///
/// Mirrors the subset of a `batch/v1` Job the controller relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub api_version: String,
    pub kind: String,
    /// Job name; the activity id, unique across environments and runs.
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    /// Container image (e.g. `"busybox:latest"`).
    pub image: String,
    /// Container command, run as-is.
    pub command: Vec<String>,
    pub restart_policy: RestartPolicy,
    /// Retries the substrate may attempt on its own. Always zero for test units.
    pub backoff_limit: u32,
}

impl JobSpec {
    /// Build the single-shot stand-in job for a unit.
    ///
    /// The command sleeps for the unit's duration hint and exits zero. The unit id travels
    /// in the labels only.
    pub fn for_unit(unit: &TestUnit, labels: &JobLabels, template: &JobTemplate) -> Self {
        let script = format!(
            "sleep {} && echo \"Finished\" && exit 0",
            unit.duration_hint
        );
        Self {
            api_version: "batch/v1".to_string(),
            kind: "Job".to_string(),
            name: labels.activity_id.clone(),
            namespace: template.namespace.clone(),
            labels: labels.to_labels(),
            image: template.image.clone(),
            command: vec!["/bin/sh".to_string(), "-c".to_string(), script],
            restart_policy: RestartPolicy::Never,
            backoff_limit: 0,
        }
    }

    /// Parse the join key back out of the job metadata.
    pub fn job_labels(&self) -> Result<JobLabels, crate::ModelError> {
        JobLabels::from_labels(&self.labels)
    }
}
