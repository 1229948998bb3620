use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Transport,
    Status,
    GraphQl,
    Decode,
    Unavailable,
}

/// Why a fetch was rejected. The state machine treats every code the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct FetchError {
    pub code: ErrorCode,
    pub message: String,
}

impl FetchError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Transport, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Decode, message)
    }

    pub fn status(status: u16) -> Self {
        Self::new(ErrorCode::Status, format!("backend responded with HTTP {status}"))
    }

    pub fn graphql(messages: &[String]) -> Self {
        Self::new(ErrorCode::GraphQl, messages.join("; "))
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }
}
