//! # OCPP-J Core
//!
//! Message correlation and validation engine for OCPP over JSON/WebSocket.
//!
//! Both roles of the protocol are served by the same `Dispatcher`: the
//! central system (many charge points) and the charge point (one central
//! system). Each connection allows at most one outstanding request; every
//! request completes exactly once with a confirmation, a peer CallError, or a
//! local failure (timeout, disconnect, invalid confirmation).
//!
//! ## Architecture
//!
//! ```text
//!  Business handlers              Application
//!        ▲ │                         │ send_request / call
//!        │ ▼                         ▼
//! ┌──────────────────────────────────────────────┐
//! │  Dispatcher (role: CentralSystem|ChargePoint) │
//! │  ┌──────────┐ ┌───────────┐ ┌──────────────┐  │
//! │  │ Registry │ │ Validator │ │ RequestSlot  │  │
//! │  │ schemas  │ │ fail-fast │ │ per endpoint │  │
//! │  └──────────┘ └───────────┘ └──────────────┘  │
//! │             messages (wire codec)             │
//! └──────────────────────┬───────────────────────┘
//!                        │ Channel
//!                        ▼
//!          ws (tungstenite) │ loopback │ memory
//! ```
//!
//! ## Wire frames
//!
//! | Type | Frame |
//! |------|-------|
//! | CALL | `[2, "<id>", "<Action>", {..}]` |
//! | CALLRESULT | `[3, "<id>", {..}]` |
//! | CALLERROR | `[4, "<id>", "<ErrorCode>", "<Description>", {..}]` |
//!
//! ## Usage
//!
//! ```no_run
//! use ocppj_core::ocpp16::{self, BootNotificationConfirmation, BootNotificationRequest, RegistrationStatus};
//! use ocppj_core::{CentralSystem, EndpointId, HandlerError, Timestamp};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let central_system = CentralSystem::builder(ocpp16::registry()?)
//!         .on_request(|_id: EndpointId, _boot: BootNotificationRequest| async move {
//!             Ok::<_, HandlerError>(BootNotificationConfirmation {
//!                 current_time: Timestamp::now(),
//!                 interval: 300,
//!                 status: RegistrationStatus::Accepted,
//!             })
//!         })
//!         .build();
//!
//!     central_system.listen("0.0.0.0:9000".parse()?, "ocpp").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod messages;
pub mod schema;
pub mod registry;
pub mod validator;
pub mod correlation;
pub mod transport;
pub mod error;
pub mod config;
pub mod dispatcher;
pub mod central_system;
pub mod charge_point;
pub mod ws;
pub mod ocpp16;

pub use types::{EndpointId, ErrorCode, Role, Timestamp};
pub use messages::{Call, CallError, CallResult, DecodeError, Message, MessageType};
pub use schema::{ActionDefinition, FieldKind, PayloadSchema, Profile};
pub use registry::{Registry, RegistryBuilder, RegistryError};
pub use validator::{validate, ValidationError, ValidationRule};
pub use correlation::{Outcome, PendingInfo, PendingResponse, RequestFailure};
pub use transport::{loopback, Channel, MemoryChannel, QueueChannel, TransportError};
pub use error::{CallFailure, SendError};
pub use config::{DispatcherConfig, WsConfig};
pub use dispatcher::{
    ActionHandler, Connection, Dispatcher, HandlerError, HandlerResult, Handlers, OcppRequest,
};
pub use central_system::CentralSystem;
pub use charge_point::ChargePoint;
