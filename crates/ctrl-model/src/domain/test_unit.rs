use serde::{Deserialize, Serialize};

use crate::{DurationSecs, EnvironmentId, TestUnitId};

/// One schedulable piece of work; corresponds to exactly one external job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestUnit {
    /// Unique within the owning environment.
    pub id: TestUnitId,
    /// Owning environment. Filled from the enclosing message when omitted.
    #[serde(default)]
    pub environment_id: EnvironmentId,
    /// How long the stand-in payload sleeps, in seconds.
    #[serde(alias = "sleepSeconds")]
    pub duration_hint: DurationSecs,
}

impl TestUnit {
    pub fn new(
        id: impl Into<TestUnitId>,
        environment_id: impl Into<EnvironmentId>,
        duration_hint: DurationSecs,
    ) -> Self {
        Self {
            id: id.into(),
            environment_id: environment_id.into(),
            duration_hint,
        }
    }
}
