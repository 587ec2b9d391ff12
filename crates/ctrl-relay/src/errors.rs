use ctrl_core::{CompletionError, SubstrateError};
use ctrl_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("job is not ours: {0}")]
    Labels(#[from] ModelError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] CompletionError),

    #[error("watch failed: {0}")]
    Watch(#[from] SubstrateError),

    #[error("invalid relay config: {0}")]
    InvalidConfig(String),
}
