//! Central system facade
//!
//! Serves many charge points, each identified by the id in its connection
//! path. Wraps a `Dispatcher` in the central-system role.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{DispatcherConfig, WsConfig};
use crate::correlation::{Outcome, PendingResponse};
use crate::dispatcher::{ActionHandler, Dispatcher, DispatcherBuilder, HandlerError, OcppRequest};
use crate::error::{CallFailure, SendError};
use crate::registry::Registry;
use crate::transport::TransportError;
use crate::types::{EndpointId, Role};
use crate::ws;

/// Builds a `CentralSystem`
pub struct CentralSystemBuilder {
    dispatcher: DispatcherBuilder,
    ws: WsConfig,
}

impl CentralSystemBuilder {
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
        Fut: std::future::Future<Output = Result<R::Confirmation, HandlerError>> + Send + 'static,
    {
        self.dispatcher = self.dispatcher.on_request(handler);
        self
    }

    pub fn build(self) -> CentralSystem {
        CentralSystem {
            dispatcher: self.dispatcher.build(),
            ws: self.ws,
        }
    }
}

/// Central-system side of OCPP-J
#[derive(Clone)]
pub struct CentralSystem {
    dispatcher: Arc<Dispatcher>,
    ws: WsConfig,
}

impl CentralSystem {
    pub fn builder(registry: Arc<Registry>) -> CentralSystemBuilder {
        CentralSystemBuilder {
            dispatcher: Dispatcher::builder(Role::CentralSystem, registry),
            ws: WsConfig::default(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Accept charge points on `ws://<addr>/<path>/<id>`
    pub async fn listen(&self, addr: SocketAddr, path: &str) -> Result<(), TransportError> {
        ws::listen(addr, path, self.dispatcher.clone(), self.ws.clone()).await
    }

    /// Ids of the connected charge points
    pub fn charge_points(&self) -> Vec<EndpointId> {
        self.dispatcher.endpoints()
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.dispatcher.is_connected(charge_point_id)
    }

    /// Drop the connection to a charge point
    pub fn close(&self, charge_point_id: &str) -> bool {
        self.dispatcher.close(charge_point_id)
    }

    pub fn send_request(
        &self,
        charge_point_id: &str,
        action: &str,
        payload: Value,
    ) -> Result<PendingResponse, SendError> {
        self.dispatcher.send_request(charge_point_id, action, payload)
    }

    pub fn send_request_async<F>(
        &self,
        charge_point_id: &str,
        action: &str,
        payload: Value,
        on_complete: F,
    ) -> Result<(), SendError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.dispatcher
            .send_request_async(charge_point_id, action, payload, on_complete)
    }

    pub async fn call<R: OcppRequest>(
        &self,
        charge_point_id: &str,
        request: &R,
    ) -> Result<R::Confirmation, CallFailure> {
        self.dispatcher.call(charge_point_id, request).await
    }
}
