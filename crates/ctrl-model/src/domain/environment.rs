use serde::{Deserialize, Serialize};

use crate::{EnvironmentId, ModelError, TestUnit};

/// One reconfiguration message for an environment.
///
/// This is not a persistent object: the controller folds every message into its own state.
/// `continue == false` is a pause request; `max_parallelism == 0` admits no new dispatches
/// until a later message resizes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: EnvironmentId,
    #[serde(alias = "maxParallism")]
    pub max_parallelism: u32,
    #[serde(rename = "continue", default = "default_continue")]
    pub r#continue: bool,
    #[serde(default)]
    pub tests: Vec<TestUnit>,
}

fn default_continue() -> bool {
    true
}

impl Environment {
    pub fn new(id: impl Into<EnvironmentId>, max_parallelism: u32) -> Self {
        Self {
            id: id.into(),
            max_parallelism,
            r#continue: true,
            tests: Vec::new(),
        }
    }

    pub fn paused(mut self) -> Self {
        self.r#continue = false;
        self
    }

    /// Append a unit owned by this environment.
    pub fn with_test(mut self, id: &str, duration_hint: u64) -> Self {
        self.tests
            .push(TestUnit::new(id, self.id.clone(), duration_hint));
        self
    }

    /// Returns `true` if this message asks the controller to pause.
    #[inline]
    pub fn is_pause(&self) -> bool {
        !self.r#continue
    }

    /// Reject messages that cannot be routed to a controller.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.id.trim().is_empty() {
            return Err(ModelError::InvalidEnvironment("id is empty".into()));
        }
        if let Some(unit) = self.tests.iter().find(|u| u.id.is_empty()) {
            return Err(ModelError::InvalidEnvironment(format!(
                "test unit with empty id (duration {})",
                unit.duration_hint
            )));
        }
        if let Some(unit) = self
            .tests
            .iter()
            .find(|u| !u.environment_id.is_empty() && u.environment_id != self.id)
        {
            return Err(ModelError::InvalidEnvironment(format!(
                "test unit '{}' belongs to environment '{}'",
                unit.id, unit.environment_id
            )));
        }
        Ok(())
    }

    /// Fill defaults the wire format allows to be omitted.
    ///
    /// Units inherit the environment id and a zero duration becomes one second.
    pub fn normalized(mut self) -> Self {
        for unit in &mut self.tests {
            if unit.environment_id.is_empty() {
                unit.environment_id = self.id.clone();
            }
            unit.duration_hint = unit.duration_hint.max(1);
        }
        self
    }
}
