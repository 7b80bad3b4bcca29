use thiserror::Error;

use crate::method::Method;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RestError {
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error (HTTP {status}): {message}")]
    Protocol { status: u16, message: String },

    #[error("Authentication failure")]
    AuthenticationFailure,

    #[error("Unsupported BigIP version {version} (supported {minimum} to {maximum})")]
    VersionUnsupported {
        version: String,
        minimum: String,
        maximum: String,
    },

    #[error("Timeout")]
    Timeout,

    #[error("Cancelled")]
    Cancelled,

    #[error("Resource conflict: {0}")]
    ResourceConflict(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RestError {
    /// Conflicts are the only failures worth retrying automatically
    pub fn is_conflict(&self) -> bool {
        matches!(self, RestError::ResourceConflict(_))
    }

    /// Failures meaning the device could not be talked to at all
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            RestError::Unreachable(_) | RestError::Transport(_) | RestError::Timeout
        )
    }
}

impl From<std::io::Error> for RestError {
    fn from(e: std::io::Error) -> Self {
        RestError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for RestError {
    fn from(e: serde_json::Error) -> Self {
        RestError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for RestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RestError::Timeout
        } else {
            RestError::Transport(e.to_string())
        }
    }
}

impl From<bigsync_model::ModelError> for RestError {
    fn from(e: bigsync_model::ModelError) -> Self {
        RestError::Io(e.to_string())
    }
}

/// A failed request together with what was asked and what came back
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{method} {uri} failed: {error}")]
pub struct RestFailure {
    #[source]
    pub error: RestError,
    pub method: Method,
    pub uri: String,
    pub raw_body: Option<String>,
}

impl RestFailure {
    pub fn new(error: RestError, method: Method, uri: impl Into<String>) -> Self {
        Self {
            error,
            method,
            uri: uri.into(),
            raw_body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.raw_body = Some(body.into());
        self
    }
}

pub type Result<T> = std::result::Result<T, RestError>;
