use ctrl_core::SubstrateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("job has no command")]
    MissingProgram,
    #[error("job '{0}' already exists")]
    AlreadyExists(String),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("label selector is empty")]
    EmptySelector,
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl ExecError {
    /// Attach the job name for reporting a failed submission.
    pub fn into_create(self, name: &str) -> SubstrateError {
        SubstrateError::Create {
            name: name.to_string(),
            reason: self.to_string(),
        }
    }
}

impl From<ExecError> for SubstrateError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::EmptySelector => SubstrateError::Delete(e.to_string()),
            other => SubstrateError::Unavailable(other.to_string()),
        }
    }
}
