//! Charge point facade
//!
//! Holds a single connection to the central system, identified by the charge
//! point's own id. Handles:
//! - WebSocket connection with the OCPP 1.6 subprotocol
//! - Automatic reconnection with exponential backoff
//! - Typed BootNotification and Heartbeat helpers

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{DispatcherConfig, WsConfig};
use crate::correlation::{Outcome, PendingResponse};
use crate::dispatcher::{ActionHandler, Dispatcher, DispatcherBuilder, HandlerError, OcppRequest};
use crate::error::{CallFailure, SendError};
use crate::ocpp16::{
    AuthorizeConfirmation, AuthorizeRequest, BootNotificationConfirmation, BootNotificationRequest,
    HeartbeatConfirmation, HeartbeatRequest, StatusNotificationRequest,
};
use crate::registry::Registry;
use crate::transport::TransportError;
use crate::types::{EndpointId, Role};
use crate::ws;

/// Builds a `ChargePoint`
pub struct ChargePointBuilder {
    id: EndpointId,
    dispatcher: DispatcherBuilder,
    ws: WsConfig,
}

impl ChargePointBuilder {
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher = self.dispatcher.config(config);
        self
    }

    pub fn ws_config(mut self, config: WsConfig) -> Self {
        self.ws = config;
        self
    }

    pub fn on(mut self, action: impl Into<String>, handler: impl ActionHandler + 'static) -> Self {
        self.dispatcher = self.dispatcher.on(action, handler);
        self
    }

    pub fn on_request<R, F, Fut>(mut self, handler: F) -> Self
    where
        R: OcppRequest,
        F: Fn(EndpointId, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Confirmation, HandlerError>> + Send + 'static,
    {
        self.dispatcher = self.dispatcher.on_request(handler);
        self
    }

    pub fn build(self) -> ChargePoint {
        ChargePoint {
            id: self.id,
            dispatcher: self.dispatcher.build(),
            ws: self.ws,
        }
    }
}

/// Charge-point side of OCPP-J
#[derive(Clone)]
pub struct ChargePoint {
    id: EndpointId,
    dispatcher: Arc<Dispatcher>,
    ws: WsConfig,
}

impl ChargePoint {
    pub fn builder(id: impl Into<EndpointId>, registry: Arc<Registry>) -> ChargePointBuilder {
        ChargePointBuilder {
            id: id.into(),
            dispatcher: Dispatcher::builder(Role::ChargePoint, registry),
            ws: WsConfig::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_connected(&self.id)
    }

    /// Connect once to `<url>/<id>`; the returned task ends with the connection
    pub async fn start(&self, url: &str) -> Result<JoinHandle<()>, TransportError> {
        ws::connect(url, &self.id, &self.dispatcher, &self.ws).await
    }

    /// Close the connection to the central system
    pub fn stop(&self) -> bool {
        self.dispatcher.close(&self.id)
    }

    /// Stay connected to `url`, reconnecting with exponential backoff
    pub async fn run(&self, url: &str) {
        self.run_with_session(url, |_| async {}).await
    }

    /// Like `run`, spawning `session` after every successful connect.
    ///
    /// The session task is aborted when its connection ends.
    pub async fn run_with_session<F, Fut>(&self, url: &str, session: F)
    where
        F: Fn(ChargePoint) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut reconnect_delay = self.ws.reconnect_delay;

        loop {
            info!("Connecting to central system: {}", url);

            match self.start(url).await {
                Ok(connection) => {
                    reconnect_delay = self.ws.reconnect_delay;
                    let session = tokio::spawn(session(self.clone()));
                    if let Err(e) = connection.await {
                        error!("Connection task failed: {}", e);
                    }
                    session.abort();
                    info!("Connection to central system closed");
                }
                Err(e) => error!("Connection error: {}", e),
            }

            info!("Reconnecting in {:?}", reconnect_delay);
            tokio::time::sleep(reconnect_delay).await;
            reconnect_delay = self.ws.next_delay(reconnect_delay);
        }
    }

    pub fn send_request(&self, action: &str, payload: Value) -> Result<PendingResponse, SendError> {
        self.dispatcher.send_request(&self.id, action, payload)
    }

    pub fn send_request_async<F>(&self, action: &str, payload: Value, on_complete: F) -> Result<(), SendError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.dispatcher
            .send_request_async(&self.id, action, payload, on_complete)
    }

    pub async fn call<R: OcppRequest>(&self, request: &R) -> Result<R::Confirmation, CallFailure> {
        self.dispatcher.call(&self.id, request).await
    }

    /// Send BootNotification
    pub async fn boot_notification(
        &self,
        model: &str,
        vendor: &str,
    ) -> Result<BootNotificationConfirmation, CallFailure> {
        self.call(&BootNotificationRequest::new(model, vendor)).await
    }

    /// Send Heartbeat
    pub async fn heartbeat(&self) -> Result<HeartbeatConfirmation, CallFailure> {
        self.call(&HeartbeatRequest {}).await
    }

    pub async fn authorize(&self, id_tag: &str) -> Result<AuthorizeConfirmation, CallFailure> {
        self.call(&AuthorizeRequest {
            id_tag: id_tag.to_string(),
        })
        .await
    }

    pub async fn status_notification(&self, request: &StatusNotificationRequest) -> Result<(), CallFailure> {
        self.call(request).await.map(|_| ())
    }
}
