//! Error types for sync operations

use thiserror::Error;

use bigsync_rest::{RestError, RestFailure};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Request failed: {0}")]
    Rest(#[from] RestFailure),

    #[error("Model error: {0}")]
    Model(#[from] bigsync_model::ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Connection already exists: {0}")]
    ConnectionExists(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("{0} has no remote counterpart")]
    NotRemote(String),

    #[error("{0} is read-only")]
    ReadOnly(String),

    #[error("Connection {0} is offline")]
    Offline(String),

    #[error("Load already in progress for {0}")]
    AlreadyLoading(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Job failed: {0}")]
    Job(String),
}

impl SyncError {
    /// Taxonomy entry of a failed request, if this is one
    pub fn rest_error(&self) -> Option<&RestError> {
        match self {
            SyncError::Rest(failure) => Some(&failure.error),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.rest_error(), Some(RestError::Cancelled))
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(e: toml::de::Error) -> Self {
        SyncError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(e: toml::ser::Error) -> Self {
        SyncError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
