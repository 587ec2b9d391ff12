use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    ActivityId, EnvironmentId, LABEL_ACTIVITY_ID, LABEL_ENVIRONMENT_ID, LABEL_RUN_ID,
    LABEL_TEST_UNIT_ID, ModelError, RunId, TestUnitId,
};

/// Join key between a dispatched unit and its external job.
///
/// Written into job metadata by the runner and read back by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLabels {
    pub activity_id: ActivityId,
    pub environment_id: EnvironmentId,
    pub test_unit_id: TestUnitId,
    pub run_id: RunId,
}

impl JobLabels {
    /// Render as job metadata labels.
    pub fn to_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_ACTIVITY_ID.to_string(), self.activity_id.clone()),
            (LABEL_ENVIRONMENT_ID.to_string(), self.environment_id.clone()),
            (LABEL_TEST_UNIT_ID.to_string(), self.test_unit_id.to_string()),
            (LABEL_RUN_ID.to_string(), self.run_id.clone()),
        ])
    }

    /// Parse job metadata labels.
    ///
    /// Every key must be present and non-empty; anything else is not a job we dispatched.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Result<Self, ModelError> {
        let get = |key: &'static str| -> Result<String, ModelError> {
            labels
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or(ModelError::MissingLabel(key))
        };

        Ok(Self {
            activity_id: get(LABEL_ACTIVITY_ID)?,
            environment_id: get(LABEL_ENVIRONMENT_ID)?,
            test_unit_id: TestUnitId::from(get(LABEL_TEST_UNIT_ID)?),
            run_id: get(LABEL_RUN_ID)?,
        })
    }

    /// Equality selector matching every job of an environment.
    pub fn environment_selector(environment_id: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(
            LABEL_ENVIRONMENT_ID.to_string(),
            environment_id.to_string(),
        )])
    }
}
