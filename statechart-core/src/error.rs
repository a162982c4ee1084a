//! Core error types.

use thiserror::Error;

/// Errors from the statechart runtime.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid model: {reason}")]
    InvalidModel { reason: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("invalid state machine context: {reason}")]
    InvalidContext { reason: String },

    #[error("state machine is not running")]
    NotRunning,

    #[error("{operation} called from inside event dispatch")]
    Reentrant { operation: &'static str },

    #[error("task executor error: {reason}")]
    Executor { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns whether this error was raised while building a model.
    pub fn is_model_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidModel { .. } | CoreError::InvalidGuard { .. }
        )
    }

    /// Returns a stable error code for logs and tooling.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidModel { .. } => "INVALID_MODEL",
            CoreError::InvalidGuard { .. } => "INVALID_GUARD",
            CoreError::InvalidContext { .. } => "INVALID_CONTEXT",
            CoreError::NotRunning => "NOT_RUNNING",
            CoreError::Reentrant { .. } => "REENTRANT",
            CoreError::Executor { .. } => "EXECUTOR",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }

    pub(crate) fn model(reason: impl Into<String>) -> Self {
        CoreError::InvalidModel {
            reason: reason.into(),
        }
    }

    pub(crate) fn context(reason: impl Into<String>) -> Self {
        CoreError::InvalidContext {
            reason: reason.into(),
        }
    }
}

/// Failure of a user-supplied action, guard or do-activity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("action failed: {message}")]
    Failed { message: String },

    #[error("action panicked: {message}")]
    Panicked { message: String },
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ActionError::Failed {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ActionError::Failed { message } | ActionError::Panicked { message } => message,
        }
    }
}
