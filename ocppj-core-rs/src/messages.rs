//! OCPP-J message framing
//!
//! Every frame is a JSON array sent as one transport message:
//! - CALL: [2, uniqueId, action, payload]
//! - CALLRESULT: [3, uniqueId, payload]
//! - CALLERROR: [4, uniqueId, errorCode, errorDescription, errorDetails]

use std::fmt;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::types::ErrorCode;

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(MessageType::Call),
            3 => Some(MessageType::CallResult),
            4 => Some(MessageType::CallError),
            _ => None,
        }
    }

    /// Number of array elements a frame of this type carries
    pub fn arity(self) -> usize {
        match self {
            MessageType::Call => 4,
            MessageType::CallResult => 3,
            MessageType::CallError => 5,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Call => write!(f, "CALL"),
            MessageType::CallResult => write!(f, "CALLRESULT"),
            MessageType::CallError => write!(f, "CALLERROR"),
        }
    }
}

/// Errors decoding an inbound frame
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON array")]
    NotAnArray,

    #[error("invalid message type: {0}")]
    InvalidMessageType(Value),

    #[error("malformed {kind} frame: expected {expected} elements, found {found}")]
    MalformedFrame {
        kind: MessageType,
        expected: usize,
        found: usize,
    },

    #[error("formation violation: {0}")]
    FormationViolation(&'static str),
}

/// Errors encoding an outbound frame
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("JSON serialize error: {0}")]
    Json(#[from] serde_json::Error),
}

/// OCPP CALL message (request)
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub unique_id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    pub fn new(unique_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Serialize to OCPP wire format: [2, uniqueId, action, payload]
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let array = serde_json::json!([
            MessageType::Call as i32,
            &self.unique_id,
            &self.action,
            &self.payload
        ]);
        Ok(serde_json::to_vec(&array)?)
    }
}

/// OCPP CALLRESULT message (success response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub unique_id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(unique_id: impl Into<String>, payload: Value) -> Self {
        Self {
            unique_id: unique_id.into(),
            payload,
        }
    }

    /// Serialize to OCPP wire format: [3, uniqueId, payload]
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let array = serde_json::json!([
            MessageType::CallResult as i32,
            &self.unique_id,
            &self.payload
        ]);
        Ok(serde_json::to_vec(&array)?)
    }
}

/// OCPP CALLERROR message (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub unique_id: String,
    pub error_code: ErrorCode,
    pub description: String,
    pub details: Option<Value>,
}

impl CallError {
    pub fn new(
        unique_id: impl Into<String>,
        error_code: ErrorCode,
        description: impl Into<String>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            error_code,
            description: description.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to OCPP wire format: [4, uniqueId, errorCode, errorDescription, errorDetails]
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let array = serde_json::json!([
            MessageType::CallError as i32,
            &self.unique_id,
            self.error_code.as_str(),
            &self.description,
            self.details.as_ref().unwrap_or(&Value::Null)
        ]);
        Ok(serde_json::to_vec(&array)?)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.error_code, self.description)
    }
}

/// Parsed OCPP message (any type)
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl Message {
    /// Parse an OCPP message from JSON bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let frame: Value = serde_json::from_slice(bytes)?;
        let array = match frame {
            Value::Array(array) => array,
            _ => return Err(DecodeError::NotAnArray),
        };

        let type_code = array.first().cloned().unwrap_or(Value::Null);
        let kind = type_code
            .as_i64()
            .and_then(MessageType::from_code)
            .ok_or(DecodeError::InvalidMessageType(type_code))?;

        if array.len() != kind.arity() {
            return Err(DecodeError::MalformedFrame {
                kind,
                expected: kind.arity(),
                found: array.len(),
            });
        }

        let mut fields = array.into_iter().skip(1);
        let unique_id = match fields.next() {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::String(_)) => {
                return Err(DecodeError::FormationViolation("uniqueId must not be empty"))
            }
            _ => return Err(DecodeError::FormationViolation("uniqueId must be a string")),
        };

        match kind {
            MessageType::Call => {
                let action = expect_string(fields.next(), "action must be a string")?;
                let payload = fields.next().unwrap_or(Value::Null);
                Ok(Message::Call(Call {
                    unique_id,
                    action,
                    payload,
                }))
            }
            MessageType::CallResult => {
                let payload = fields.next().unwrap_or(Value::Null);
                Ok(Message::CallResult(CallResult { unique_id, payload }))
            }
            MessageType::CallError => {
                let raw_code = expect_string(fields.next(), "errorCode must be a string")?;
                let error_code = raw_code.parse().unwrap_or_else(|_| {
                    debug!("Unknown error code {:?}, treating as GenericError", raw_code);
                    ErrorCode::GenericError
                });
                let description =
                    expect_string(fields.next(), "errorDescription must be a string")?;
                let details = match fields.next() {
                    None | Some(Value::Null) => None,
                    Some(details) => Some(details),
                };
                Ok(Message::CallError(CallError {
                    unique_id,
                    error_code,
                    description,
                    details,
                }))
            }
        }
    }

    /// Serialize to bytes
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            Message::Call(c) => c.encode(),
            Message::CallResult(r) => r.encode(),
            Message::CallError(e) => e.encode(),
        }
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Message::Call(c) => &c.unique_id,
            Message::CallResult(r) => &r.unique_id,
            Message::CallError(e) => &e.unique_id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Call(_) => MessageType::Call,
            Message::CallResult(_) => MessageType::CallResult,
            Message::CallError(_) => MessageType::CallError,
        }
    }
}

impl From<Call> for Message {
    fn from(call: Call) -> Self {
        Message::Call(call)
    }
}

impl From<CallResult> for Message {
    fn from(result: CallResult) -> Self {
        Message::CallResult(result)
    }
}

impl From<CallError> for Message {
    fn from(error: CallError) -> Self {
        Message::CallError(error)
    }
}

fn expect_string(value: Option<Value>, violation: &'static str) -> Result<String, DecodeError> {
    match value {
        Some(Value::String(s)) => Ok(s),
        _ => Err(DecodeError::FormationViolation(violation)),
    }
}

/// Recover the uniqueId of an undecodable frame so the sender can be told.
///
/// Returns `None` for frames typed as CALLRESULT or CALLERROR: replies are
/// never answered.
pub fn salvage_unique_id(bytes: &[u8]) -> Option<String> {
    let frame: Value = serde_json::from_slice(bytes).ok()?;
    let array = frame.as_array()?;
    let is_reply = matches!(
        array.first().and_then(Value::as_i64).and_then(MessageType::from_code),
        Some(MessageType::CallResult) | Some(MessageType::CallError)
    );
    if is_reply {
        return None;
    }
    match array.get(1) {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        _ => None,
    }
}
