use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use ctrl_model::Environment;
use tracing::{debug, instrument};

use crate::{error::ApiError, handler::ApiHandler};

/// HTTP transport over an [`ApiHandler`].
pub struct HttpApi<H: ApiHandler> {
    handler: Arc<H>,
}

impl<H: ApiHandler> HttpApi<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Routes:
    /// - `POST /api/v1/environments` start-or-update, `202 Accepted`
    /// - `GET /api/v1/environments/{id}` live or last finished run
    pub fn router(self) -> Router {
        Router::new()
            .route("/api/v1/environments", post(update::<H>))
            .route("/api/v1/environments/{id}", get(status::<H>))
            .with_state(self.handler)
    }
}

#[instrument(level = "debug", skip_all)]
async fn update<H: ApiHandler>(
    State(handler): State<Arc<H>>,
    Json(env): Json<Environment>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = handler.update_environment(env).await?;
    debug!(env = %resp.environment_id, run = %resp.run_id, started = resp.started, "environment accepted");
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

#[instrument(level = "debug", skip_all, fields(env = %id))]
async fn status<H: ApiHandler>(
    State(handler): State<Arc<H>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match handler.environment_status(&id).await? {
        Some(view) => Ok(Json(view)),
        None => Err(ApiError::NotFound(id)),
    }
}
