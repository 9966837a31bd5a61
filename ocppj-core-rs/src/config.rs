//! Configuration for the dispatcher and the WebSocket transport
//!
//! Both structs carry protocol defaults and are adjusted with `with_*`
//! builders.

use std::time::Duration;

use crate::transport::DEFAULT_QUEUE_CAPACITY;

/// OCPP-J subprotocol negotiated on the WebSocket handshake
pub const OCPP16_SUBPROTOCOL: &str = "ocpp1.6";

/// Dispatcher behavior
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Deadline for a peer reply to an outbound request
    pub request_timeout: Duration,

    /// Validate outbound request payloads and handler confirmations
    pub validate_outbound: bool,

    /// Validate inbound request payloads and peer confirmations
    pub validate_inbound: bool,

    /// Answer undecodable frames with FormationViolation when the uniqueId
    /// can still be read
    pub reply_to_malformed: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            validate_outbound: true,
            validate_inbound: true,
            reply_to_malformed: true,
        }
    }
}

impl DispatcherConfig {
    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enable or disable outbound validation
    pub fn with_outbound_validation(mut self, enabled: bool) -> Self {
        self.validate_outbound = enabled;
        self
    }

    /// Enable or disable inbound validation
    pub fn with_inbound_validation(mut self, enabled: bool) -> Self {
        self.validate_inbound = enabled;
        self
    }

    /// Enable or disable FormationViolation replies to malformed frames
    pub fn with_malformed_replies(mut self, enabled: bool) -> Self {
        self.reply_to_malformed = enabled;
        self
    }
}

/// WebSocket transport settings
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Subprotocol requested by clients and required by servers
    pub subprotocol: String,

    /// Largest accepted message
    pub max_message_size: usize,

    /// Largest accepted frame
    pub max_frame_size: usize,

    /// Outbound frames buffered per connection before sends fail
    pub outbound_queue: usize,

    /// Initial reconnect delay
    pub reconnect_delay: Duration,

    /// Maximum reconnect delay (exponential backoff cap)
    pub max_reconnect_delay: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            subprotocol: OCPP16_SUBPROTOCOL.to_string(),
            max_message_size: 64 * 1024,
            max_frame_size: 16 * 1024,
            outbound_queue: DEFAULT_QUEUE_CAPACITY,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(300),
        }
    }
}

impl WsConfig {
    /// Set the subprotocol
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }

    /// Set message and frame size limits
    pub fn with_limits(mut self, max_message_size: usize, max_frame_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self.max_frame_size = max_frame_size;
        self
    }

    /// Set the outbound queue depth
    pub fn with_outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity.max(1);
        self
    }

    /// Set reconnect backoff bounds
    pub fn with_reconnect(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max.max(initial);
        self
    }

    /// Next reconnect delay after `current`, doubled and capped
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_reconnect_delay)
    }
}
