use std::time::Duration;

use crate::errors::RelayError;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Namespace whose jobs are observed.
    pub namespace: String,
    /// Pause before re-establishing a failed or ended watch.
    pub restart_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            namespace: "ctrlplane".to_string(),
            restart_delay: Duration::from_secs(5),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.namespace.trim().is_empty() {
            return Err(RelayError::InvalidConfig("namespace is empty".into()));
        }
        Ok(())
    }
}
