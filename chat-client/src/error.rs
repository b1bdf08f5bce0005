//! Client errors.
//!
//! Connection trouble never shows up here: the supervisor retries it and
//! reports it on the event bus. These errors concern the handle itself.

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The supervisor task has shut down.
    #[error("client is shut down")]
    Shutdown,

    /// Configuration rejected.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Session rejected.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// No REST collaborator configured for an operation that needs one.
    #[error("no chat API configured")]
    NoApi,

    /// REST collaborator failure.
    #[error("api error: {0}")]
    Api(#[from] ApiError),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ClientError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::Shutdown
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ClientError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::Shutdown
    }
}
