//! Dispatcher behavior over in-memory channels

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{Barrier, Notify};

use ocppj_core::ocpp16::{
    self, BootNotificationConfirmation, BootNotificationRequest, GenericStatus, RegistrationStatus,
    ResetConfirmation, ResetRequest, ResetType,
};
use ocppj_core::{
    loopback, CallError, CallFailure, Channel, Connection, Dispatcher, DispatcherConfig,
    EndpointId, ErrorCode, HandlerError, MemoryChannel, Message, Outcome, RequestFailure, Role,
    SendError, Timestamp, TransportError, ValidationRule,
};

// ============================================================================
// Helpers
// ============================================================================

const CP_ID: &str = "test_id";

fn dispatcher(role: Role) -> Arc<Dispatcher> {
    Dispatcher::builder(role, ocpp16::registry().unwrap()).build()
}

fn connected(dispatcher: &Arc<Dispatcher>) -> Arc<MemoryChannel> {
    let channel = MemoryChannel::new();
    dispatcher.connect(CP_ID, channel.clone());
    channel
}

/// Poll `condition` for up to two seconds
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Condition not reached");
}

/// Wait until a spawned handler has answered on `channel`
async fn wait_for_frames(channel: &MemoryChannel, count: usize) {
    wait_until(|| channel.sent().len() >= count).await;
}

/// Channel handing each frame to the peer on the sending thread
#[derive(Default)]
struct DirectChannel {
    peer: OnceLock<Connection>,
}

impl Channel for DirectChannel {
    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let peer = self.peer.get().ok_or(TransportError::Closed)?;
        peer.deliver(&frame);
        Ok(())
    }

    fn close(&self) {}
}

fn direct(central_system: &Arc<Dispatcher>, charge_point: &Arc<Dispatcher>) {
    let cs_channel = Arc::new(DirectChannel::default());
    let cp_channel = Arc::new(DirectChannel::default());
    let cs_conn = central_system.connect(CP_ID, cs_channel.clone());
    let cp_conn = charge_point.connect(CP_ID, cp_channel.clone());
    let _ = cs_channel.peer.set(cp_conn);
    let _ = cp_channel.peer.set(cs_conn);
}

fn boot_confirmation() -> Value {
    json!({"currentTime": "2024-01-01T00:00:00.000Z", "interval": 60, "status": "Accepted"})
}

fn sent_call(channel: &MemoryChannel) -> ocppj_core::Call {
    match channel.last_message() {
        Some(Message::Call(call)) => call,
        other => panic!("Expected Call, got {:?}", other),
    }
}

fn sent_error(channel: &MemoryChannel) -> CallError {
    match channel.last_message() {
        Some(Message::CallError(error)) => error,
        other => panic!("Expected CallError, got {:?}", other),
    }
}

fn central_system_with_boot(calls: Arc<AtomicUsize>) -> Arc<Dispatcher> {
    Dispatcher::builder(Role::CentralSystem, ocpp16::registry().unwrap())
        .on_request(move |_id: EndpointId, _boot: BootNotificationRequest| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, HandlerError>(BootNotificationConfirmation {
                    current_time: Timestamp::parse("2024-01-01T00:00:00.000Z").unwrap(),
                    interval: 60,
                    status: RegistrationStatus::Accepted,
                })
            }
        })
        .build()
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_boot_notification_answered_by_central_system() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cs = central_system_with_boot(calls.clone());
    let channel = connected(&cs);

    cs.handle_inbound(
        CP_ID,
        br#"[2,"1234","BootNotification",{"chargePointModel":"model1","chargePointVendor":"ABL"}]"#,
    );
    wait_for_frames(&channel, 1).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        channel.sent_text(),
        vec![r#"[3,"1234",{"currentTime":"2024-01-01T00:00:00.000Z","interval":60,"status":"Accepted"}]"#.to_string()]
    );
}

#[tokio::test]
async fn test_boot_notification_sent_by_charge_point() {
    let cp = dispatcher(Role::ChargePoint);
    let channel = connected(&cp);

    let request = json!({"chargePointModel": "model1", "chargePointVendor": "ABL"});
    let response = cp.send_request(CP_ID, "BootNotification", request.clone()).unwrap();

    let call = sent_call(&channel);
    assert_eq!(call.action, "BootNotification");
    assert_eq!(call.payload, request);
    assert_eq!(call.unique_id, response.unique_id());
    assert_eq!(cp.pending_request(CP_ID).unwrap().unique_id, call.unique_id);

    let reply = format!(r#"[3,"{}",{}]"#, call.unique_id, boot_confirmation());
    cp.handle_inbound(CP_ID, reply.as_bytes());

    assert_eq!(response.await, Outcome::Confirmation(boot_confirmation()));
    assert!(cp.pending_request(CP_ID).is_none());
}

#[tokio::test]
async fn test_loopback_round_trip_both_directions() {
    let cs = Dispatcher::builder(Role::CentralSystem, ocpp16::registry().unwrap())
        .on_request(|_id: EndpointId, _boot: BootNotificationRequest| async move {
            Ok::<_, HandlerError>(BootNotificationConfirmation {
                current_time: Timestamp::now(),
                interval: 300,
                status: RegistrationStatus::Pending,
            })
        })
        .build();
    let cp = Dispatcher::builder(Role::ChargePoint, ocpp16::registry().unwrap())
        .on_request(|_id: EndpointId, reset: ResetRequest| async move {
            let status = match reset.kind {
                ResetType::Soft => GenericStatus::Accepted,
                ResetType::Hard => GenericStatus::Rejected,
            };
            Ok::<_, HandlerError>(ResetConfirmation { status })
        })
        .build();
    let (cs_conn, _cp_conn) = loopback(&cs, &cp, CP_ID);

    let boot = cp
        .call(CP_ID, &BootNotificationRequest::new("model1", "ABL"))
        .await
        .unwrap();
    assert_eq!(boot.status, RegistrationStatus::Pending);
    assert_eq!(boot.interval, 300);

    let reset = cs
        .call(CP_ID, &ResetRequest { kind: ResetType::Hard })
        .await
        .unwrap();
    assert_eq!(reset.status, GenericStatus::Rejected);

    cs_conn.closed();
    assert!(!cs.is_connected(CP_ID));
    wait_until(|| !cp.is_connected(CP_ID)).await;
}

#[tokio::test]
async fn test_send_request_async_invokes_callback_once() {
    let cp = dispatcher(Role::ChargePoint);
    let channel = connected(&cp);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    cp.send_request_async(CP_ID, "Heartbeat", json!({}), move |outcome| {
        let _ = tx.send(outcome);
    })
    .unwrap();

    let call = sent_call(&channel);
    let reply = format!(r#"[3,"{}",{{"currentTime":"2024-01-01T00:00:00Z"}}]"#, call.unique_id);
    cp.handle_inbound(CP_ID, reply.as_bytes());

    let outcome = rx.recv().await.unwrap();
    assert!(matches!(outcome, Outcome::Confirmation(_)));
    assert!(rx.recv().await.is_none());
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_oversized_outbound_field_not_sent() {
    let cp = dispatcher(Role::ChargePoint);
    let channel = connected(&cp);

    let payload = json!({
        "chargePointModel": "model1",
        "chargePointVendor": "ABL",
        "chargePointSerialNumber": "x".repeat(26)
    });
    match cp.send_request(CP_ID, "BootNotification", payload) {
        Err(SendError::Validation { action, source }) => {
            assert_eq!(action, "BootNotification");
            assert_eq!(source.field, "chargePointSerialNumber");
            assert_eq!(source.rule, ValidationRule::MaxLength { max: 25 });
            assert_eq!(source.error_code(), ErrorCode::PropertyConstraintViolation);
        }
        other => panic!("Expected Validation error, got {:?}", other.map(|r| r.unique_id().to_string())),
    }
    assert!(channel.sent().is_empty());
    assert!(cp.pending_request(CP_ID).is_none());
}

#[tokio::test]
async fn test_oversized_inbound_field_rejected_before_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cs = central_system_with_boot(calls.clone());
    let channel = connected(&cs);

    let frame = format!(
        r#"[2,"1234","BootNotification",{{"chargePointModel":"model1","chargePointVendor":"ABL","chargeBoxSerialNumber":"{}"}}]"#,
        "x".repeat(26)
    );
    cs.handle_inbound(CP_ID, frame.as_bytes());

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let error = sent_error(&channel);
    assert_eq!(error.unique_id, "1234");
    assert_eq!(error.error_code, ErrorCode::PropertyConstraintViolation);
    assert!(error.description.contains("chargeBoxSerialNumber"));
    assert_eq!(
        error.details,
        Some(json!({"field": "chargeBoxSerialNumber", "rule": "max_length"}))
    );
}

#[tokio::test]
async fn test_missing_required_inbound_field() {
    let cs = central_system_with_boot(Arc::new(AtomicUsize::new(0)));
    let channel = connected(&cs);

    cs.handle_inbound(CP_ID, br#"[2,"9","BootNotification",{"chargePointVendor":"ABL"}]"#);
    let error = sent_error(&channel);
    assert_eq!(error.error_code, ErrorCode::OccurrenceConstraintViolation);
}

#[tokio::test]
async fn test_invalid_peer_confirmation_fails_request() {
    let cp = dispatcher(Role::ChargePoint);
    let channel = connected(&cp);

    let response = cp
        .send_request(CP_ID, "BootNotification", json!({"chargePointModel": "m", "chargePointVendor": "v"}))
        .unwrap();
    let call = sent_call(&channel);
    let reply = format!(
        r#"[3,"{}",{{"currentTime":"2024-01-01T00:00:00Z","interval":-1,"status":"Accepted"}}]"#,
        call.unique_id
    );
    cp.handle_inbound(CP_ID, reply.as_bytes());

    match response.await {
        Outcome::Failed(RequestFailure::InvalidConfirmation(error)) => {
            assert_eq!(error.field, "interval");
        }
        other => panic!("Expected InvalidConfirmation, got {:?}", other),
    }
    assert!(cp.pending_request(CP_ID).is_none());
}

// ============================================================================
// Role permissions
// ============================================================================

#[tokio::test]
async fn test_disallowed_origin_for_every_action() {
    for role in [Role::CentralSystem, Role::ChargePoint] {
        let dispatcher = dispatcher(role);
        let channel = connected(&dispatcher);
        let actions: Vec<String> = dispatcher
            .registry()
            .actions()
            .filter(|def| !def.allowed_on(role.peer()))
            .map(|def| def.name.clone())
            .collect();
        assert!(!actions.is_empty());

        for action in actions {
            match dispatcher.send_request(CP_ID, &action, json!({})) {
                Err(error @ SendError::UnsupportedAction { .. }) => assert_eq!(
                    error.to_string(),
                    format!("unsupported action {} on {}, cannot send request", action, role)
                ),
                other => panic!(
                    "Expected UnsupportedAction for {} on {}, got {:?}",
                    action,
                    role,
                    other.map(|r| r.unique_id().to_string())
                ),
            }
        }
        assert!(channel.sent().is_empty());
        assert!(dispatcher.pending_request(CP_ID).is_none());
    }
}

#[tokio::test]
async fn test_central_system_cannot_send_boot_notification() {
    let cs = dispatcher(Role::CentralSystem);
    let channel = connected(&cs);

    let error = cs
        .send_request(CP_ID, "BootNotification", json!({"chargePointModel": "model1", "chargePointVendor": "ABL"}))
        .err()
        .unwrap();
    assert_eq!(
        error.to_string(),
        "unsupported action BootNotification on central system, cannot send request"
    );
    assert!(channel.sent().is_empty());
}

#[tokio::test]
async fn test_charge_point_rejects_inbound_boot_notification() {
    let cp = dispatcher(Role::ChargePoint);
    let channel = connected(&cp);

    cp.handle_inbound(
        CP_ID,
        br#"[2,"1234","BootNotification",{"chargePointModel":"model1","chargePointVendor":"ABL"}]"#,
    );
    assert_eq!(
        channel.sent_text(),
        vec![r#"[4,"1234","NotSupported","unsupported action BootNotification on charge point",null]"#.to_string()]
    );
}

#[tokio::test]
async fn test_unknown_action_not_implemented() {
    let cs = dispatcher(Role::CentralSystem);
    let channel = connected(&cs);

    cs.handle_inbound(CP_ID, br#"[2,"5","FlyToTheMoon",{}]"#);
    assert_eq!(sent_error(&channel).error_code, ErrorCode::NotImplemented);

    let error = cs.send_request(CP_ID, "FlyToTheMoon", json!({})).err().unwrap();
    assert!(matches!(error, SendError::UnknownAction(action) if action == "FlyToTheMoon"));
}

#[tokio::test]
async fn test_allowed_action_without_handler_not_implemented() {
    let cs = dispatcher(Role::CentralSystem);
    let channel = connected(&cs);

    cs.handle_inbound(CP_ID, br#"[2,"6","Heartbeat",{}]"#);
    let error = sent_error(&channel);
    assert_eq!(error.unique_id, "6");
    assert_eq!(error.error_code, ErrorCode::NotImplemented);
}

// ============================================================================
// Handler failures
// ============================================================================

#[tokio::test]
async fn test_internal_handler_error_is_sanitized() {
    let cs = Dispatcher::builder(Role::CentralSystem, ocpp16::registry().unwrap())
        .on("Authorize", |_id: EndpointId, _payload: Value| async move {
            Err::<Value, _>(HandlerError::internal("database password rejected for user root"))
        })
        .build();
    let channel = connected(&cs);

    cs.handle_inbound(CP_ID, br#"[2,"77","Authorize",{"idTag":"TAG1"}]"#);
    wait_for_frames(&channel, 1).await;

    let error = sent_error(&channel);
    assert_eq!(error.unique_id, "77");
    assert_eq!(error.error_code, ErrorCode::InternalError);
    assert_eq!(error.description, "internal error while handling Authorize");
    assert!(!channel.sent_text()[0].contains("password"));
}

#[tokio::test]
async fn test_protocol_handler_error_forwarded() {
    let cs = Dispatcher::builder(Role::CentralSystem, ocpp16::registry().unwrap())
        .on("DataTransfer", |_id: EndpointId, _payload: Value| async move {
            Err::<Value, _>(HandlerError::protocol(ErrorCode::NotSupported, "no vendor extensions"))
        })
        .build();
    let channel = connected(&cs);

    cs.handle_inbound(CP_ID, br#"[2,"8","DataTransfer",{"vendorId":"acme"}]"#);
    wait_for_frames(&channel, 1).await;

    let error = sent_error(&channel);
    assert_eq!(error.error_code, ErrorCode::NotSupported);
    assert_eq!(error.description, "no vendor extensions");
}

#[tokio::test]
async fn test_invalid_handler_confirmation_becomes_internal_error() {
    let cs = Dispatcher::builder(Role::CentralSystem, ocpp16::registry().unwrap())
        .on("Heartbeat", |_id: EndpointId, _payload: Value| async move {
            Ok::<_, HandlerError>(json!({"currentTime": "yesterday"}))
        })
        .build();
    let channel = connected(&cs);

    cs.handle_inbound(CP_ID, br#"[2,"3","Heartbeat",{}]"#);
    wait_for_frames(&channel, 1).await;

    let error = sent_error(&channel);
    assert_eq!(error.error_code, ErrorCode::InternalError);
    assert_eq!(error.description, "internal error while handling Heartbeat");
}

// ============================================================================
// Malformed frames
// ============================================================================

#[tokio::test]
async fn test_malformed_call_with_salvageable_id() {
    let cs = dispatcher(Role::CentralSystem);
    let channel = connected(&cs);

    cs.handle_inbound(CP_ID, br#"[2,"42","Heartbeat"]"#);
    let error = sent_error(&channel);
    assert_eq!(error.unique_id, "42");
    assert_eq!(error.error_code, ErrorCode::FormationViolation);
}

#[tokio::test]
async fn test_unsalvageable_frames_dropped_silently() {
    let cs = dispatcher(Role::CentralSystem);
    let channel = connected(&cs);

    cs.handle_inbound(CP_ID, b"not json");
    cs.handle_inbound(CP_ID, br#"{"id":"1"}"#);
    cs.handle_inbound(CP_ID, br#"[3,"42"]"#);
    cs.handle_inbound(CP_ID, br#"[4,"42","GenericError"]"#);
    assert!(channel.sent().is_empty());
}

#[tokio::test]
async fn test_malformed_replies_can_be_disabled() {
    let cs = Dispatcher::builder(Role::CentralSystem, ocpp16::registry().unwrap())
        .config(DispatcherConfig::default().with_malformed_replies(false))
        .build();
    let channel = connected(&cs);

    cs.handle_inbound(CP_ID, br#"[2,"42","Heartbeat"]"#);
    assert!(channel.sent().is_empty());
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn test_second_request_rejected_while_pending() {
    let cp = dispatcher(Role::ChargePoint);
    let channel = connected(&cp);

    let first = cp.send_request(CP_ID, "Heartbeat", json!({})).unwrap();
    match cp.send_request(CP_ID, "Heartbeat", json!({})) {
        Err(SendError::RequestInProgress { pending_id, pending_action, .. }) => {
            assert_eq!(pending_id, first.unique_id());
            assert_eq!(pending_action, "Heartbeat");
        }
        other => panic!("Expected RequestInProgress, got {:?}", other.map(|r| r.unique_id().to_string())),
    }
    assert_eq!(channel.sent().len(), 1);
    assert_eq!(cp.pending_request(CP_ID).unwrap().unique_id, first.unique_id());
}

#[tokio::test]
async fn test_unmatched_reply_discarded() {
    let cp = dispatcher(Role::ChargePoint);
    let channel = connected(&cp);

    let response = cp.send_request(CP_ID, "Heartbeat", json!({})).unwrap();
    let unique_id = sent_call(&channel).unique_id;

    cp.handle_inbound(CP_ID, br#"[3,"someone-else",{"currentTime":"2024-01-01T00:00:00Z"}]"#);
    cp.handle_inbound(CP_ID, br#"[4,"someone-else","GenericError","late",null]"#);
    assert_eq!(cp.pending_request(CP_ID).unwrap().unique_id, unique_id);

    let reply = format!(r#"[4,"{}","SecurityError","not allowed",{{"hint":1}}]"#, unique_id);
    cp.handle_inbound(CP_ID, reply.as_bytes());
    match response.await {
        Outcome::ProtocolError(error) => {
            assert_eq!(error.error_code, ErrorCode::SecurityError);
            assert_eq!(error.details, Some(json!({"hint": 1})));
        }
        other => panic!("Expected ProtocolError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reply_with_nothing_pending_is_noop() {
    let cp = dispatcher(Role::ChargePoint);
    let channel = connected(&cp);

    cp.handle_inbound(CP_ID, br#"[3,"1",{}]"#);
    assert!(channel.sent().is_empty());
    assert!(cp.pending_request(CP_ID).is_none());
}

#[tokio::test]
async fn test_timeout_frees_slot() {
    let cp = Dispatcher::builder(Role::ChargePoint, ocpp16::registry().unwrap())
        .config(DispatcherConfig::default().with_request_timeout(Duration::from_millis(30)))
        .build();
    let channel = connected(&cp);

    let response = cp.send_request(CP_ID, "Heartbeat", json!({})).unwrap();
    let unique_id = sent_call(&channel).unique_id;
    assert_eq!(response.await, Outcome::Failed(RequestFailure::Timeout));
    assert!(cp.pending_request(CP_ID).is_none());

    // a late reply is discarded and the slot accepts a new request
    let late = format!(r#"[3,"{}",{{"currentTime":"2024-01-01T00:00:00Z"}}]"#, unique_id);
    cp.handle_inbound(CP_ID, late.as_bytes());
    assert!(cp.send_request(CP_ID, "Heartbeat", json!({})).is_ok());
}

#[tokio::test]
async fn test_transport_failure_leaves_slot_idle() {
    let cp = dispatcher(Role::ChargePoint);
    let channel = connected(&cp);
    channel.set_failing(true);

    let error = cp.send_request(CP_ID, "Heartbeat", json!({})).err().unwrap();
    assert!(matches!(error, SendError::Transport(_)));
    assert!(cp.pending_request(CP_ID).is_none());

    channel.set_failing(false);
    assert!(cp.send_request(CP_ID, "Heartbeat", json!({})).is_ok());
}

#[tokio::test]
async fn test_reply_delivered_on_sending_thread() {
    let cs = dispatcher(Role::CentralSystem);
    let cp = dispatcher(Role::ChargePoint);
    direct(&cs, &cp);

    // the charge point has no ClearCache handler and answers inside send
    let response = cs.send_request(CP_ID, "ClearCache", json!({})).unwrap();
    assert!(cs.pending_request(CP_ID).is_none());
    match response.await {
        Outcome::ProtocolError(error) => assert_eq!(error.error_code, ErrorCode::NotImplemented),
        other => panic!("Expected ProtocolError, got {:?}", other),
    }

    // the peer rejects an oversized field the same way
    let cp_unchecked = Dispatcher::builder(Role::ChargePoint, ocpp16::registry().unwrap())
        .config(DispatcherConfig::default().with_outbound_validation(false))
        .build();
    let cs = central_system_with_boot(Arc::new(AtomicUsize::new(0)));
    direct(&cs, &cp_unchecked);
    let payload = json!({"chargePointModel": "m".repeat(21), "chargePointVendor": "ABL"});
    match cp_unchecked.send_request(CP_ID, "BootNotification", payload).unwrap().await {
        Outcome::ProtocolError(error) => {
            assert_eq!(error.error_code, ErrorCode::PropertyConstraintViolation)
        }
        other => panic!("Expected ProtocolError, got {:?}", other),
    }
    assert!(cs.send_request(CP_ID, "ClearCache", json!({})).is_ok());
}

#[tokio::test]
async fn test_direct_channel_round_trip() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cs = central_system_with_boot(calls.clone());
    let cp = dispatcher(Role::ChargePoint);
    direct(&cs, &cp);

    let boot = cp
        .call(CP_ID, &BootNotificationRequest::new("model1", "ABL"))
        .await
        .unwrap();
    assert_eq!(boot.status, RegistrationStatus::Accepted);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cp.pending_request(CP_ID).is_none());
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_slow_handler_does_not_block_other_endpoints() {
    let gate = Arc::new(Notify::new());
    let handler_gate = gate.clone();
    let cs = Dispatcher::builder(Role::CentralSystem, ocpp16::registry().unwrap())
        .on("Heartbeat", move |id: EndpointId, _payload: Value| {
            let gate = handler_gate.clone();
            async move {
                if id == "slow" {
                    gate.notified().await;
                }
                Ok::<_, HandlerError>(json!({"currentTime": "2024-01-01T00:00:00.000Z"}))
            }
        })
        .build();
    let slow = MemoryChannel::new();
    let fast = MemoryChannel::new();
    cs.connect("slow", slow.clone());
    cs.connect("fast", fast.clone());

    cs.handle_inbound("slow", br#"[2,"s1","Heartbeat",{}]"#);
    cs.handle_inbound("fast", br#"[2,"f1","Heartbeat",{}]"#);
    wait_for_frames(&fast, 1).await;
    assert!(slow.sent().is_empty());

    // frames keep being processed for the parked endpoint too
    cs.handle_inbound("slow", br#"[2,"s2","Authorize",{"idTag":"TAG1"}]"#);
    assert_eq!(sent_error(&slow).error_code, ErrorCode::NotImplemented);

    gate.notify_one();
    wait_for_frames(&slow, 2).await;
    match slow.last_message() {
        Some(Message::CallResult(result)) => assert_eq!(result.unique_id, "s1"),
        other => panic!("Expected CallResult, got {:?}", other),
    }
}

#[tokio::test]
async fn test_answers_inbound_call_while_request_pending() {
    let gate = Arc::new(Notify::new());
    let handler_gate = gate.clone();
    let cp = Dispatcher::builder(Role::ChargePoint, ocpp16::registry().unwrap())
        .on_request(move |_id: EndpointId, _reset: ResetRequest| {
            let gate = handler_gate.clone();
            async move {
                gate.notified().await;
                Ok::<_, HandlerError>(ResetConfirmation {
                    status: GenericStatus::Accepted,
                })
            }
        })
        .build();
    let channel = connected(&cp);

    let response = cp.send_request(CP_ID, "Heartbeat", json!({})).unwrap();
    let heartbeat_id = sent_call(&channel).unique_id;

    cp.handle_inbound(CP_ID, br#"[2,"r1","Reset",{"type":"Soft"}]"#);
    gate.notify_one();
    wait_for_frames(&channel, 2).await;
    match channel.last_message() {
        Some(Message::CallResult(result)) => {
            assert_eq!(result.unique_id, "r1");
            assert_eq!(result.payload, json!({"status": "Accepted"}));
        }
        other => panic!("Expected CallResult, got {:?}", other),
    }
    assert_eq!(cp.pending_request(CP_ID).unwrap().unique_id, heartbeat_id);

    let reply = format!(r#"[3,"{}",{{"currentTime":"2024-01-01T00:00:00.000Z"}}]"#, heartbeat_id);
    cp.handle_inbound(CP_ID, reply.as_bytes());
    assert!(matches!(response.await, Outcome::Confirmation(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_admit_exactly_one() {
    for _ in 0..20 {
        let cp = dispatcher(Role::ChargePoint);
        let channel = connected(&cp);
        let barrier = Arc::new(Barrier::new(2));

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let cp = cp.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    cp.send_request(CP_ID, "Heartbeat", json!({}))
                        .map(|response| response.unique_id().to_string())
                })
            })
            .collect();

        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(unique_id) => admitted.push(unique_id),
                Err(SendError::RequestInProgress { pending_id, .. }) => rejected.push(pending_id),
                Err(other) => panic!("Unexpected send error: {}", other),
            }
        }
        assert_eq!(admitted.len(), 1);
        assert_eq!(rejected, admitted);
        assert_eq!(channel.sent().len(), 1);
        assert_eq!(cp.pending_request(CP_ID).unwrap().unique_id, admitted[0]);
    }
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_disconnect_while_pending_resolves_once() {
    let cp = dispatcher(Role::ChargePoint);
    let channel = connected(&cp);

    let response = cp.send_request(CP_ID, "Heartbeat", json!({})).unwrap();
    let unique_id = sent_call(&channel).unique_id;

    assert!(cp.disconnect(CP_ID));
    assert_eq!(response.await, Outcome::Failed(RequestFailure::ConnectionClosed));
    assert!(channel.is_closed());
    assert!(!cp.is_connected(CP_ID));

    // later frames and sends are no-ops
    let late = format!(r#"[3,"{}",{{"currentTime":"2024-01-01T00:00:00Z"}}]"#, unique_id);
    cp.handle_inbound(CP_ID, late.as_bytes());
    assert!(cp.disconnect(CP_ID));
    assert!(matches!(
        cp.send_request(CP_ID, "Heartbeat", json!({})),
        Err(SendError::EndpointClosed(_))
    ));
}

#[tokio::test]
async fn test_unknown_endpoint() {
    let cp = dispatcher(Role::ChargePoint);
    assert!(matches!(
        cp.send_request("nobody", "Heartbeat", json!({})),
        Err(SendError::UnknownEndpoint(id)) if id == "nobody"
    ));
    assert!(!cp.disconnect("nobody"));
}

#[tokio::test]
async fn test_reconnect_replaces_endpoint() {
    let cs = dispatcher(Role::CentralSystem);
    let first = connected(&cs);
    let response = cs.send_request(CP_ID, "ClearCache", json!({})).unwrap();

    let second = connected(&cs);
    assert!(first.is_closed());
    assert_eq!(response.await, Outcome::Failed(RequestFailure::ConnectionClosed));
    assert!(cs.is_connected(CP_ID));
    assert_eq!(cs.endpoints(), vec![CP_ID.to_string()]);

    assert!(cs.send_request(CP_ID, "ClearCache", json!({})).is_ok());
    assert_eq!(second.sent().len(), 1);
}

#[tokio::test]
async fn test_stale_connection_close_keeps_new_endpoint() {
    let cs = dispatcher(Role::CentralSystem);
    let stale = cs.connect(CP_ID, MemoryChannel::new());
    let _fresh = connected(&cs);

    stale.closed();
    assert!(cs.is_connected(CP_ID));
}

#[tokio::test]
async fn test_typed_call_reports_protocol_error() {
    let cs = dispatcher(Role::CentralSystem);
    let channel = connected(&cs);

    let caller = cs.clone();
    let call = tokio::spawn(async move { caller.call(CP_ID, &ResetRequest { kind: ResetType::Soft }).await });
    let unique_id = loop {
        if let Some(pending) = cs.pending_request(CP_ID) {
            break pending.unique_id;
        }
        tokio::task::yield_now().await;
    };
    assert_eq!(sent_call(&channel).action, "Reset");

    let reply = format!(r#"[4,"{}","NotImplemented","no reset",null]"#, unique_id);
    cs.handle_inbound(CP_ID, reply.as_bytes());

    match call.await.unwrap() {
        Err(CallFailure::Protocol(error)) => assert_eq!(error.error_code, ErrorCode::NotImplemented),
        other => panic!("Expected protocol failure, got {:?}", other),
    }
}
