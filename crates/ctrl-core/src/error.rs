use ctrl_model::{ActivityId, EnvironmentId, ModelError, RunId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("completion channel: {0}")]
    Completion(#[from] CompletionError),
    #[error("job substrate: {0}")]
    Substrate(#[from] SubstrateError),
    #[error("controller for environment '{0}' is no longer accepting messages")]
    ChannelClosed(EnvironmentId),
    #[error("scheduler invariant violated: {0}")]
    Invariant(String),
    #[error("environment '{0}' already has a running controller")]
    AlreadyRunning(EnvironmentId),
}

impl From<ModelError> for CoreError {
    fn from(e: ModelError) -> Self {
        CoreError::InvalidArgument(e.to_string())
    }
}

/// Errors of the heartbeat/complete protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// The addressed activity already completed, timed out, was cancelled or never existed.
    #[error("activity '{activity_id}' of run '{run_id}' not found")]
    NotFound {
        run_id: RunId,
        activity_id: ActivityId,
    },
    #[error("completion channel unavailable: {0}")]
    Unavailable(String),
}

impl CompletionError {
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CompletionError::NotFound { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubstrateError {
    #[error("create job '{name}': {reason}")]
    Create { name: String, reason: String },
    #[error("delete jobs: {0}")]
    Delete(String),
    #[error("watch: {0}")]
    Watch(String),
    #[error("substrate unavailable: {0}")]
    Unavailable(String),
}
