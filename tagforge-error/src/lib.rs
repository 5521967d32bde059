pub mod channel;

use config::ConfigError;
use std::io::Error as IoError;
use thiserror::Error;

pub type TFResult<T, E = TFError> = anyhow::Result<T, E>;

/// Workspace-wide error type.
///
/// Input validation (`Format`, `Argument`, `Validation`) and generation
/// exhaustion (`Exhaustion`, `AssignmentExhausted`) propagate to the caller.
/// Channel and verification failures are folded into outcome values by the
/// coordinator (see [`channel::ChannelError`]) and never surface here.
#[derive(Error, Debug, Default)]
pub enum TFError {
    #[error("service unavailable")]
    #[default]
    ServiceUnavailable,
    #[error("Format error: {0}")]
    Format(String),
    #[error("Argument error: {0}")]
    Argument(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid state error: {0}")]
    InvalidState(String),
    #[error("Exhausted: {0}")]
    Exhaustion(String),
    #[error("No unused EPC could be assigned to TID {tid}")]
    AssignmentExhausted { tid: String },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("{0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    IoError(#[from] IoError),
    #[error("{0}")]
    Msg(String),
}

impl TFError {
    /// True for errors that reject caller input and must never be retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TFError::Format(_) | TFError::Argument(_) | TFError::Validation(_)
        )
    }
}

impl From<String> for TFError {
    #[inline]
    fn from(e: String) -> Self {
        TFError::Msg(e)
    }
}

impl From<&str> for TFError {
    #[inline]
    fn from(e: &str) -> Self {
        TFError::Msg(e.to_string())
    }
}
