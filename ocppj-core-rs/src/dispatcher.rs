//! Bidirectional OCPP-J dispatcher
//!
//! One `Dispatcher` serves one role. It owns the endpoints (connections),
//! validates and correlates outbound requests, and routes inbound frames:
//!
//! ```text
//! transport ──frame──► decode ──┬─ CALLRESULT / CALLERROR ──► RequestSlot
//!                               └─ CALL ──► allowed? ──► validate ──► handler
//!                                              │            │            │
//!                                         NotSupported   mapped code   CALLRESULT /
//!                                                                       CALLERROR
//! ```
//!
//! Handlers run on their own tasks so a slow handler never blocks frame
//! decoding for its connection or any other.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::correlation::{Outcome, PendingInfo, PendingResponse, RequestSlot, RequestFailure, Resolution};
use crate::error::{CallFailure, SendError};
use crate::messages::{salvage_unique_id, Call, CallError, CallResult, Message};
use crate::registry::Registry;
use crate::transport::Channel;
use crate::types::{EndpointId, ErrorCode, Role};
use crate::validator::{validate, ValidationError};

// ============================================================================
// Handlers
// ============================================================================

/// Result of a business handler: a confirmation payload or an error
pub type HandlerResult = Result<Value, HandlerError>;

/// Failure raised by a business handler
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Sent to the peer as-is
    #[error("{code}: {description}")]
    Protocol {
        code: ErrorCode,
        description: String,
        details: Option<Value>,
    },

    /// Logged locally; the peer only sees a sanitized InternalError
    #[error("internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn protocol(code: ErrorCode, description: impl Into<String>) -> Self {
        HandlerError::Protocol {
            code,
            description: description.into(),
            details: None,
        }
    }

    pub fn internal(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        HandlerError::Internal(error.into())
    }
}

/// Business logic answering one inbound action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, endpoint_id: EndpointId, payload: Value) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> ActionHandler for F
where
    F: Fn(EndpointId, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, endpoint_id: EndpointId, payload: Value) -> HandlerResult {
        (self)(endpoint_id, payload).await
    }
}

/// Typed request bound to its action name and confirmation type
pub trait OcppRequest: Serialize + DeserializeOwned + Send + Sync + 'static {
    const ACTION: &'static str;
    type Confirmation: Serialize + DeserializeOwned + Send + Sync + 'static;
}

/// Adapts a typed closure to `ActionHandler`
struct TypedHandler<R, F> {
    handler: F,
    _request: PhantomData<fn(R)>,
}

#[async_trait]
impl<R, F, Fut> ActionHandler for TypedHandler<R, F>
where
    R: OcppRequest,
    F: Fn(EndpointId, R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Confirmation, HandlerError>> + Send + 'static,
{
    async fn handle(&self, endpoint_id: EndpointId, payload: Value) -> HandlerResult {
        let request: R = serde_json::from_value(payload).map_err(|e| {
            HandlerError::protocol(
                ErrorCode::TypeConstraintViolation,
                format!("invalid {} payload: {}", R::ACTION, e),
            )
        })?;
        let confirmation = (self.handler)(endpoint_id, request).await?;
        serde_json::to_value(confirmation).map_err(HandlerError::internal)
    }
}

/// Handler table keyed by action name
#[derive(Clone, Default)]
pub struct Handlers {
    by_action: HashMap<String, Arc<dyn ActionHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler working on raw JSON payloads
    pub fn on(mut self, action: impl Into<String>, handler: impl ActionHandler + 'static) -> Self {
        self.by_action.insert(action.into(), Arc::new(handler));
        self
    }

    /// Register a handler working on a typed request
    pub fn on_request<R, F, Fut>(self, handler: F) -> Self
    where
        R: OcppRequest,
        F: Fn(EndpointId, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Confirmation, HandlerError>> + Send + 'static,
    {
        self.on(
            R::ACTION,
            TypedHandler {
                handler,
                _request: PhantomData,
            },
        )
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.by_action.get(action).cloned()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.by_action.contains_key(action)
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// One logical connection and its pending-request slot
struct Endpoint {
    id: EndpointId,
    channel: Arc<dyn Channel>,
    slot: Arc<RequestSlot>,
}

impl Endpoint {
    fn new(id: EndpointId, channel: Arc<dyn Channel>) -> Self {
        Self {
            slot: RequestSlot::new(id.clone()),
            id,
            channel,
        }
    }

    fn is_open(&self) -> bool {
        !self.slot.is_closed()
    }

    fn send(&self, message: &Message) {
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to serialize reply to {}: {}", self.id, e);
                return;
            }
        };
        debug!("Sending to {}: {}", self.id, String::from_utf8_lossy(&bytes));
        if let Err(e) = self.channel.send(bytes) {
            warn!("Failed to send {} to {}: {}", message.unique_id(), self.id, e);
        }
    }

    /// Close the slot and the channel; returns true if a request was failed
    fn shutdown(&self) -> bool {
        let failed = self.slot.close();
        self.channel.close();
        failed
    }
}

/// Transport-side handle of one connection.
///
/// The transport feeds inbound frames through `deliver`, in arrival order,
/// and calls `closed` once when the underlying connection ends.
#[derive(Clone)]
pub struct Connection {
    dispatcher: Arc<Dispatcher>,
    endpoint: Arc<Endpoint>,
}

impl Connection {
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint.id
    }

    pub fn deliver(&self, frame: &[u8]) {
        self.dispatcher.process(&self.endpoint, frame);
    }

    pub fn closed(&self) {
        self.dispatcher.release(&self.endpoint);
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Builds a `Dispatcher` for one role
pub struct DispatcherBuilder {
    role: Role,
    registry: Arc<Registry>,
    config: DispatcherConfig,
    handlers: Handlers,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn on(mut self, action: impl Into<String>, handler: impl ActionHandler + 'static) -> Self {
        self.handlers = self.handlers.on(action, handler);
        self
    }

    pub fn on_request<R, F, Fut>(mut self, handler: F) -> Self
    where
        R: OcppRequest,
        F: Fn(EndpointId, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Confirmation, HandlerError>> + Send + 'static,
    {
        self.handlers = self.handlers.on_request(handler);
        self
    }

    pub fn build(self) -> Arc<Dispatcher> {
        for action in self.handlers.by_action.keys() {
            if !self
                .registry
                .lookup(action)
                .map_or(false, |def| def.allowed_on(self.role))
            {
                warn!("Handler for {} will never run on {}", action, self.role);
            }
        }
        Arc::new(Dispatcher {
            role: self.role,
            registry: self.registry,
            config: self.config,
            handlers: self.handlers,
            endpoints: RwLock::new(HashMap::new()),
        })
    }
}

/// Role facade tying codec, registry, validator and correlation together
pub struct Dispatcher {
    role: Role,
    registry: Arc<Registry>,
    config: DispatcherConfig,
    handlers: Handlers,
    endpoints: RwLock<HashMap<EndpointId, Arc<Endpoint>>>,
}

impl Dispatcher {
    pub fn builder(role: Role, registry: Arc<Registry>) -> DispatcherBuilder {
        DispatcherBuilder {
            role,
            registry,
            config: DispatcherConfig::default(),
            handlers: Handlers::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------------

    /// Register a new connection.
    ///
    /// An open endpoint with the same id is closed and replaced. Closed
    /// endpoints are kept so late sends report `EndpointClosed`, until the
    /// next `connect` sweeps them out.
    pub fn connect(
        self: &Arc<Self>,
        endpoint_id: impl Into<EndpointId>,
        channel: Arc<dyn Channel>,
    ) -> Connection {
        let endpoint_id = endpoint_id.into();
        let endpoint = Arc::new(Endpoint::new(endpoint_id.clone(), channel));
        let previous = {
            let mut endpoints = self.endpoints.write();
            let before = endpoints.len();
            endpoints.retain(|id, e| id == &endpoint_id || e.is_open());
            let swept = before - endpoints.len();
            if swept > 0 {
                debug!("Dropped {} closed endpoints from {}", swept, self.role);
            }
            endpoints.insert(endpoint_id.clone(), endpoint.clone())
        };

        if let Some(previous) = previous {
            if previous.is_open() {
                warn!("Endpoint {} reconnected, closing previous connection", endpoint_id);
                previous.shutdown();
            }
        }
        info!("Endpoint {} connected to {}", endpoint_id, self.role);

        Connection {
            dispatcher: self.clone(),
            endpoint,
        }
    }

    /// Transport reported the connection for `endpoint_id` as gone
    pub fn disconnect(&self, endpoint_id: &str) -> bool {
        match self.endpoint(endpoint_id) {
            Some(endpoint) => {
                self.release(&endpoint);
                true
            }
            None => false,
        }
    }

    /// Close the connection for `endpoint_id` locally
    pub fn close(&self, endpoint_id: &str) -> bool {
        self.disconnect(endpoint_id)
    }

    fn release(&self, endpoint: &Endpoint) {
        if !endpoint.is_open() {
            return;
        }
        let failed = endpoint.shutdown();
        info!(
            "Endpoint {} disconnected from {}{}",
            endpoint.id,
            self.role,
            if failed { " (pending request failed)" } else { "" }
        );
    }

    pub fn is_connected(&self, endpoint_id: &str) -> bool {
        self.endpoint(endpoint_id).map_or(false, |e| e.is_open())
    }

    /// Ids of all open endpoints
    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.endpoints
            .read()
            .values()
            .filter(|e| e.is_open())
            .map(|e| e.id.clone())
            .collect()
    }

    /// Request currently awaiting a reply on `endpoint_id`
    pub fn pending_request(&self, endpoint_id: &str) -> Option<PendingInfo> {
        self.endpoint(endpoint_id).and_then(|e| e.slot.pending())
    }

    fn endpoint(&self, endpoint_id: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.read().get(endpoint_id).cloned()
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Send a request; the returned future resolves to its `Outcome`.
    ///
    /// Every check runs before anything touches the correlation slot or the
    /// transport. Must be called from within a Tokio runtime.
    pub fn send_request(
        &self,
        endpoint_id: &str,
        action: &str,
        payload: Value,
    ) -> Result<PendingResponse, SendError> {
        let endpoint = self
            .endpoint(endpoint_id)
            .ok_or_else(|| SendError::UnknownEndpoint(endpoint_id.to_string()))?;
        let definition = self
            .registry
            .lookup(action)
            .ok_or_else(|| SendError::UnknownAction(action.to_string()))?;
        if !self.registry.is_allowed(action, self.role) {
            return Err(SendError::UnsupportedAction {
                action: action.to_string(),
                role: self.role,
            });
        }
        if self.config.validate_outbound {
            validate(&payload, &definition.request).map_err(|source| SendError::Validation {
                action: action.to_string(),
                source,
            })?;
        }

        let channel = endpoint.channel.clone();
        endpoint
            .slot
            .try_send(action, self.config.request_timeout, |unique_id| {
                let bytes = Call::new(unique_id, action, payload).encode()?;
                debug!("Sending to {}: {}", endpoint_id, String::from_utf8_lossy(&bytes));
                channel.send(bytes)?;
                Ok(())
            })
    }

    /// Callback form of `send_request`; `on_complete` runs exactly once
    pub fn send_request_async<F>(
        &self,
        endpoint_id: &str,
        action: &str,
        payload: Value,
        on_complete: F,
    ) -> Result<(), SendError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let response = self.send_request(endpoint_id, action, payload)?;
        tokio::spawn(async move {
            on_complete(response.await);
        });
        Ok(())
    }

    /// Typed request round trip
    pub async fn call<R: OcppRequest>(
        &self,
        endpoint_id: &str,
        request: &R,
    ) -> Result<R::Confirmation, CallFailure> {
        let payload = serde_json::to_value(request)?;
        match self.send_request(endpoint_id, R::ACTION, payload)?.await {
            Outcome::Confirmation(value) => Ok(serde_json::from_value(value)?),
            Outcome::ProtocolError(error) => Err(CallFailure::Protocol(error)),
            Outcome::Failed(failure) => Err(CallFailure::Failed(failure)),
        }
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Process one inbound frame from `endpoint_id`
    pub fn handle_inbound(&self, endpoint_id: &str, frame: &[u8]) {
        match self.endpoint(endpoint_id) {
            Some(endpoint) => self.process(&endpoint, frame),
            None => debug!("Dropping frame for unknown endpoint {}", endpoint_id),
        }
    }

    fn process(&self, endpoint: &Arc<Endpoint>, frame: &[u8]) {
        if !endpoint.is_open() {
            debug!("Dropping frame for closed endpoint {}", endpoint.id);
            return;
        }
        debug!("Received from {}: {}", endpoint.id, String::from_utf8_lossy(frame));

        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to parse OCPP message from {}: {}", endpoint.id, e);
                if self.config.reply_to_malformed {
                    if let Some(unique_id) = salvage_unique_id(frame) {
                        let reply = CallError::new(unique_id, ErrorCode::FormationViolation, e.to_string());
                        endpoint.send(&reply.into());
                    }
                }
                return;
            }
        };

        match message {
            Message::Call(call) => self.handle_call(endpoint, call),
            Message::CallResult(result) => self.handle_result(endpoint, result),
            Message::CallError(error) => self.handle_error(endpoint, error),
        }
    }

    fn handle_result(&self, endpoint: &Endpoint, result: CallResult) {
        let unique_id = result.unique_id.clone();
        let registry = &self.registry;
        let validate_inbound = self.config.validate_inbound;

        let resolution = endpoint.slot.resolve(&unique_id, |action| {
            if validate_inbound {
                if let Some(definition) = registry.lookup(action) {
                    if let Err(e) = validate(&result.payload, &definition.confirmation) {
                        warn!("Invalid {} confirmation from {}: {}", action, endpoint.id, e);
                        return Outcome::Failed(RequestFailure::InvalidConfirmation(e));
                    }
                }
            }
            Outcome::Confirmation(result.payload)
        });
        self.log_unmatched(endpoint, "CALLRESULT", &unique_id, resolution);
    }

    fn handle_error(&self, endpoint: &Endpoint, error: CallError) {
        let unique_id = error.unique_id.clone();
        let resolution = endpoint.slot.resolve(&unique_id, |action| {
            debug!("{} rejected by {}: {}", action, endpoint.id, error);
            Outcome::ProtocolError(error)
        });
        self.log_unmatched(endpoint, "CALLERROR", &unique_id, resolution);
    }

    fn log_unmatched(&self, endpoint: &Endpoint, kind: &str, unique_id: &str, resolution: Resolution) {
        match resolution {
            Resolution::Resolved => {}
            Resolution::Unmatched { pending } => warn!(
                "Discarding {} {} from {}: pending request is {:?}",
                kind, unique_id, endpoint.id, pending
            ),
            Resolution::Closed => debug!("Discarding {} {} for closed endpoint {}", kind, unique_id, endpoint.id),
        }
    }

    fn handle_call(&self, endpoint: &Arc<Endpoint>, call: Call) {
        let Some(definition) = self.registry.lookup(&call.action) else {
            let reply = CallError::new(
                call.unique_id,
                ErrorCode::NotImplemented,
                format!("unknown action {}", call.action),
            );
            endpoint.send(&reply.into());
            return;
        };

        if !self.registry.is_allowed(&call.action, self.role.peer()) {
            let reply = CallError::new(
                call.unique_id,
                ErrorCode::NotSupported,
                format!("unsupported action {} on {}", call.action, self.role),
            );
            endpoint.send(&reply.into());
            return;
        }

        if self.config.validate_inbound {
            if let Err(e) = validate(&call.payload, &definition.request) {
                warn!("Rejecting {} {} from {}: {}", call.action, call.unique_id, endpoint.id, e);
                endpoint.send(&validation_error(call.unique_id, &e).into());
                return;
            }
        }

        let Some(handler) = self.handlers.get(&call.action) else {
            let reply = CallError::new(
                call.unique_id,
                ErrorCode::NotImplemented,
                format!("no handler for {} on {}", call.action, self.role),
            );
            endpoint.send(&reply.into());
            return;
        };

        let endpoint = endpoint.clone();
        let registry = self.registry.clone();
        let validate_outbound = self.config.validate_outbound;
        tokio::spawn(async move {
            let Call {
                unique_id,
                action,
                payload,
            } = call;
            let reply: Message = match handler.handle(endpoint.id.clone(), payload).await {
                Ok(confirmation) => {
                    let invalid = registry
                        .lookup(&action)
                        .filter(|_| validate_outbound)
                        .and_then(|def| validate(&confirmation, &def.confirmation).err());
                    match invalid {
                        None => CallResult::new(unique_id, confirmation).into(),
                        Some(e) => {
                            error!("Handler produced invalid {} confirmation for {}: {}", action, endpoint.id, e);
                            internal_error(unique_id, &action).into()
                        }
                    }
                }
                Err(HandlerError::Protocol {
                    code,
                    description,
                    details,
                }) => CallError {
                    unique_id,
                    error_code: code,
                    description,
                    details,
                }
                .into(),
                Err(HandlerError::Internal(e)) => {
                    error!("Handler for {} from {} failed: {}", action, endpoint.id, e);
                    internal_error(unique_id, &action).into()
                }
            };

            if endpoint.is_open() {
                endpoint.send(&reply);
            } else {
                debug!("Dropping {} reply for closed endpoint {}", action, endpoint.id);
            }
        });
    }
}

/// CallError answering an inbound payload that failed validation
pub fn validation_error(unique_id: String, error: &ValidationError) -> CallError {
    CallError::new(unique_id, error.error_code(), error.to_string()).with_details(json!({
        "field": error.field,
        "rule": error.rule.name(),
    }))
}

fn internal_error(unique_id: String, action: &str) -> CallError {
    CallError::new(
        unique_id,
        ErrorCode::InternalError,
        format!("internal error while handling {}", action),
    )
}
