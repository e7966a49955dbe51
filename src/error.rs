use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Plugin '{0}' is already registered")]
    Duplicate(String),

    #[error("Invalid plugin identifier '{0}'")]
    InvalidIdentifier(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Request '{0}' not found")]
    NotFound(Uuid),

    #[error("Worker pool is not accepting requests")]
    Closed,
}

/// Failure classes that are folded into a `PluginResponse` instead of being
/// surfaced to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IdentityMismatch,
    ResponseLost,
    ExecutionFailure,
    NotFound,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::IdentityMismatch => "identity_mismatch",
            ErrorKind::ResponseLost => "response_lost",
            ErrorKind::ExecutionFailure => "execution_failure",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&QueueError> for ErrorKind {
    fn from(err: &QueueError) -> Self {
        match err {
            QueueError::NotFound(_) => ErrorKind::NotFound,
            QueueError::Closed => ErrorKind::ExecutionFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
