use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("job metadata is missing label: {0}")]
    MissingLabel(&'static str),
    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),
}
