//! Errors surfaced to callers sending requests

use thiserror::Error;

use crate::correlation::RequestFailure;
use crate::messages::{CallError, EncodeError};
use crate::transport::TransportError;
use crate::types::Role;
use crate::validator::ValidationError;

/// Immediate failure of `send_request`; nothing is pending afterwards
#[derive(Debug, Error)]
pub enum SendError {
    #[error("unknown endpoint {0}")]
    UnknownEndpoint(String),

    #[error("unknown action {0}")]
    UnknownAction(String),

    #[error("unsupported action {action} on {role}, cannot send request")]
    UnsupportedAction { action: String, role: Role },

    #[error("invalid {action} request: {source}")]
    Validation {
        action: String,
        #[source]
        source: ValidationError,
    },

    #[error("request {pending_id} ({pending_action}) already in progress on {endpoint}")]
    RequestInProgress {
        endpoint: String,
        pending_id: String,
        pending_action: String,
    },

    #[error("endpoint {0} is closed")]
    EndpointClosed(String),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Failure of a typed request round trip
#[derive(Debug, Error)]
pub enum CallFailure {
    #[error(transparent)]
    Send(#[from] SendError),

    #[error("request rejected by peer: {0}")]
    Protocol(CallError),

    #[error(transparent)]
    Failed(#[from] RequestFailure),

    #[error("payload conversion failed: {0}")]
    Payload(#[from] serde_json::Error),
}
