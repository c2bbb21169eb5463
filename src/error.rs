use std::time::Duration;

use crate::call::CallState;
use crate::storage::StorageError;

/// Why a call attempt failed. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("credential entry was cancelled")]
    UserCancelled,
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("microphone access denied: {0}")]
    MicrophoneDenied(String),
    #[error("failed to create session: {status} {body}")]
    NegotiationFailed { status: u16, body: String },
    #[error("failed to connect: {status} {body}")]
    SignalingFailed { status: u16, body: String },
    #[error("data channel failed to open within {0:?}")]
    ChannelTimeout(Duration),
    #[error("data channel error: {0}")]
    ChannelError(String),
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("call was ended while starting")]
    Aborted,
    #[error("operation not valid in state {found:?}, expected {expected}")]
    InvalidState { expected: &'static str, found: CallState },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CallError {
    /// Short text suitable for the call button's status line.
    pub fn user_message(&self) -> String {
        match self {
            CallError::UserCancelled => "API key input cancelled".to_string(),
            CallError::MicrophoneDenied(_) => "Microphone access denied".to_string(),
            CallError::InvalidCredential(reason) => reason.clone(),
            other => format!("Failed to start call: {other}"),
        }
    }
}

pub type Result<T, E = CallError> = std::result::Result<T, E>;
