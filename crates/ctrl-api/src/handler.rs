use async_trait::async_trait;
use ctrl_model::Environment;

use crate::{
    dto::{EnvironmentView, UpdateEnvironmentResponse},
    error::ApiError,
};

/// Environment ingress handler.
///
/// Abstracts the backend so transports can be tested against a stub and
/// wrapped with extra policy.
#[async_trait]
pub trait ApiHandler: Send + Sync + 'static {
    /// Start-or-update an environment run.
    async fn update_environment(
        &self,
        env: Environment,
    ) -> Result<UpdateEnvironmentResponse, ApiError>;

    /// Current view of an environment, `None` if it was never seen.
    async fn environment_status(&self, id: &str) -> Result<Option<EnvironmentView>, ApiError>;
}
