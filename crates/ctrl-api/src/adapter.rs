use async_trait::async_trait;
use ctrl_core::EnvironmentControllers;
use ctrl_model::Environment;
use tracing::{debug, instrument};

use crate::{
    dto::{EnvironmentView, UpdateEnvironmentResponse},
    error::ApiError,
    handler::ApiHandler,
};

/// [`ApiHandler`] delegating to [`EnvironmentControllers`].
#[derive(Clone)]
pub struct ControllersAdapter {
    controllers: EnvironmentControllers,
}

impl ControllersAdapter {
    pub fn new(controllers: EnvironmentControllers) -> Self {
        Self { controllers }
    }
}

#[async_trait]
impl ApiHandler for ControllersAdapter {
    #[instrument(level = "debug", skip_all, fields(env = %env.id, tests = env.tests.len()))]
    async fn update_environment(
        &self,
        env: Environment,
    ) -> Result<UpdateEnvironmentResponse, ApiError> {
        let id = env.id.clone();
        let delivery = self.controllers.start_or_update(env).await?;
        debug!(run = %delivery.run_id(), started = delivery.is_started(), "delivered");
        Ok(UpdateEnvironmentResponse::new(id, &delivery))
    }

    async fn environment_status(&self, id: &str) -> Result<Option<EnvironmentView>, ApiError> {
        Ok(self.controllers.status(id).await.map(EnvironmentView::from))
    }
}
