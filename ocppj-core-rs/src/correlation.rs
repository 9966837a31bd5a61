//! Pending-request correlation
//!
//! OCPP-J forbids pipelining: an endpoint may have at most one CALL awaiting
//! a reply. Each endpoint owns one `RequestSlot`:
//!
//! ```text
//!   Idle ──try_send──► Pending ──reply / timeout──► Idle
//!     │                   │
//!     └──────close────────┴──────────────────────► Closed
//! ```
//!
//! Every transition happens under the slot's own mutex, so each pending
//! request is resolved exactly once. The outcome is delivered after the lock
//! is released.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SendError;
use crate::messages::CallError;
use crate::types::EndpointId;
use crate::validator::ValidationError;

/// Final result of a sent request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The peer answered with a CALLRESULT
    Confirmation(Value),
    /// The peer answered with a CALLERROR
    ProtocolError(CallError),
    /// No usable answer arrived
    Failed(RequestFailure),
}

/// Local reasons a request produced no usable answer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestFailure {
    #[error("timeout waiting for response")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("invalid confirmation: {0}")]
    InvalidConfirmation(ValidationError),
}

/// Snapshot of the request currently occupying a slot
#[derive(Debug, Clone)]
pub struct PendingInfo {
    pub unique_id: String,
    pub action: String,
    pub sent_at: Instant,
}

struct PendingRequest {
    info: PendingInfo,
    completion: oneshot::Sender<Outcome>,
    timer: Option<JoinHandle<()>>,
}

impl PendingRequest {
    fn complete(mut self, outcome: Outcome) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        debug!(
            "Request {} ({}) completed after {:?}",
            self.info.unique_id,
            self.info.action,
            self.info.sent_at.elapsed()
        );
        // the caller may have dropped its PendingResponse
        let _ = self.completion.send(outcome);
    }
}

enum SlotState {
    Idle,
    Pending(PendingRequest),
    Closed,
}

/// What happened to an inbound reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Matched the pending request, which is now complete
    Resolved,
    /// Did not match; carries the id actually pending, if any
    Unmatched { pending: Option<String> },
    /// The endpoint is closed
    Closed,
}

/// Single pending-request slot of one endpoint
pub struct RequestSlot {
    endpoint_id: EndpointId,
    state: Mutex<SlotState>,
}

impl RequestSlot {
    pub fn new(endpoint_id: impl Into<EndpointId>) -> Arc<Self> {
        Arc::new(Self {
            endpoint_id: endpoint_id.into(),
            state: Mutex::new(SlotState::Idle),
        })
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Occupy the slot with a new request.
    ///
    /// `send` receives the freshly generated uniqueId and must hand the frame
    /// to the transport. The slot is populated before `send` runs and the lock
    /// is released around it, so a transport that delivers the reply on the
    /// same thread finds the request already pending. If `send` fails the
    /// slot is rolled back to Idle.
    /// Must be called from within a Tokio runtime (the deadline timer is a task).
    pub fn try_send<F>(
        self: &Arc<Self>,
        action: &str,
        timeout: Duration,
        send: F,
    ) -> Result<PendingResponse, SendError>
    where
        F: FnOnce(&str) -> Result<(), SendError>,
    {
        let unique_id = Uuid::new_v4().to_string();
        let (completion, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            match &*state {
                SlotState::Closed => return Err(SendError::EndpointClosed(self.endpoint_id.clone())),
                SlotState::Pending(pending) => {
                    return Err(SendError::RequestInProgress {
                        endpoint: self.endpoint_id.clone(),
                        pending_id: pending.info.unique_id.clone(),
                        pending_action: pending.info.action.clone(),
                    })
                }
                SlotState::Idle => {}
            }

            let timer = self.spawn_timer(unique_id.clone(), timeout);
            *state = SlotState::Pending(PendingRequest {
                info: PendingInfo {
                    unique_id: unique_id.clone(),
                    action: action.to_string(),
                    sent_at: Instant::now(),
                },
                completion,
                timer: Some(timer),
            });
        }

        if let Err(e) = send(&unique_id) {
            // a close racing the send may already have completed the request
            if let Ok(mut request) = self.take_matching(&unique_id) {
                if let Some(timer) = request.timer.take() {
                    timer.abort();
                }
            }
            return Err(e);
        }

        Ok(PendingResponse {
            unique_id,
            action: action.to_string(),
            rx,
        })
    }

    fn spawn_timer(self: &Arc<Self>, unique_id: String, timeout: Duration) -> JoinHandle<()> {
        let slot: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(slot) = slot.upgrade() {
                slot.expire(&unique_id, timeout);
            }
        })
    }

    /// Currently pending request, if any
    pub fn pending(&self) -> Option<PendingInfo> {
        match &*self.state.lock() {
            SlotState::Pending(pending) => Some(pending.info.clone()),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(&*self.state.lock(), SlotState::Closed)
    }

    /// Complete the pending request if `unique_id` matches it.
    ///
    /// `outcome` is called with the pending action name, outside the lock.
    pub fn resolve<F>(&self, unique_id: &str, outcome: F) -> Resolution
    where
        F: FnOnce(&str) -> Outcome,
    {
        let request = match self.take_matching(unique_id) {
            Ok(request) => request,
            Err(resolution) => return resolution,
        };
        let result = outcome(&request.info.action);
        request.complete(result);
        Resolution::Resolved
    }

    /// Fail the pending request with a timeout if it is still `unique_id`
    fn expire(&self, unique_id: &str, timeout: Duration) {
        if let Ok(mut request) = self.take_matching(unique_id) {
            warn!(
                "Request {} ({}) to {} timed out after {:?}",
                unique_id, request.info.action, self.endpoint_id, timeout
            );
            // this is the timer task itself
            request.timer = None;
            request.complete(Outcome::Failed(RequestFailure::Timeout));
        }
    }

    /// Close the slot; returns true if a pending request was failed
    pub fn close(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock(), SlotState::Closed);
        match previous {
            SlotState::Pending(request) => {
                debug!(
                    "Failing pending request {} on closed endpoint {}",
                    request.info.unique_id, self.endpoint_id
                );
                request.complete(Outcome::Failed(RequestFailure::ConnectionClosed));
                true
            }
            _ => false,
        }
    }

    fn take_matching(&self, unique_id: &str) -> Result<PendingRequest, Resolution> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Idle) {
            SlotState::Pending(request) if request.info.unique_id == unique_id => Ok(request),
            other => {
                let resolution = match &other {
                    SlotState::Pending(request) => Resolution::Unmatched {
                        pending: Some(request.info.unique_id.clone()),
                    },
                    SlotState::Idle => Resolution::Unmatched { pending: None },
                    SlotState::Closed => Resolution::Closed,
                };
                *state = other;
                Err(resolution)
            }
        }
    }
}

/// Future resolving to the `Outcome` of a sent request
#[derive(Debug)]
pub struct PendingResponse {
    unique_id: String,
    action: String,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingResponse {
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

impl Future for PendingResponse {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Outcome::Failed(RequestFailure::ConnectionClosed)))
    }
}
