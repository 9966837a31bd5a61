//! OCPP-J over WebSocket
//!
//! Client and server sides of the transport. Each connection gets:
//! - a `QueueChannel` registered with the dispatcher
//! - a writer task draining that queue into the socket
//! - a reader task delivering inbound frames in arrival order
//!
//! The reader task reports the disconnect when the socket ends.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    accept_hdr_async_with_config, connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{ErrorResponse, Request, Response},
        http::{header, HeaderValue, StatusCode},
        protocol::WebSocketConfig,
        Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::config::WsConfig;
use crate::dispatcher::Dispatcher;
use crate::transport::{QueueChannel, TransportError};
use crate::types::EndpointId;

/// Join a base URL and an endpoint id: `<base>/<id>`
pub fn build_url(base: &str, endpoint_id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), endpoint_id)
}

/// Extract the endpoint id from a request path of the form `/<prefix>/<id>`
pub fn endpoint_from_path(prefix: &str, path: &str) -> Option<EndpointId> {
    let prefix = prefix.trim_matches('/');
    let rest = path.strip_prefix('/')?;
    let id = if prefix.is_empty() {
        rest
    } else {
        rest.strip_prefix(prefix)?.strip_prefix('/')?
    };
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id.to_string())
}

fn ws_config(config: &WsConfig) -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        max_frame_size: Some(config.max_frame_size),
        ..Default::default()
    }
}

fn offers_subprotocol(request: &Request, subprotocol: &str) -> bool {
    request
        .headers()
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|offered| offered.trim() == subprotocol)
}

/// Connect to `<url>/<endpoint_id>` and attach the socket to `dispatcher`.
///
/// Returns the reader task; it finishes when the connection ends.
pub async fn connect(
    url: &str,
    endpoint_id: &str,
    dispatcher: &Arc<Dispatcher>,
    config: &WsConfig,
) -> Result<JoinHandle<()>, TransportError> {
    let url = build_url(url, endpoint_id);
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    let protocol = HeaderValue::from_str(&config.subprotocol)
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    request
        .headers_mut()
        .insert(header::SEC_WEBSOCKET_PROTOCOL, protocol);

    let (ws_stream, response) = connect_async_with_config(request, Some(ws_config(config)), false)
        .await
        .map_err(|e| {
            error!("WebSocket connection to {} failed: {}", url, e);
            TransportError::Connect(e.to_string())
        })?;

    let accepted_protocol = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok());
    if accepted_protocol != Some(config.subprotocol.as_str()) {
        warn!(
            "Server did not accept {} subprotocol, got: {:?}",
            config.subprotocol, accepted_protocol
        );
    }

    info!("WebSocket connected to {}", url);
    Ok(spawn_connection(ws_stream, endpoint_id, dispatcher, config))
}

/// Accept connections on `addr` under `/<path>/<id>` until the listener fails
pub async fn listen(
    addr: SocketAddr,
    path: &str,
    dispatcher: Arc<Dispatcher>,
    config: WsConfig,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on ws://{}/{}", listener.local_addr()?, path.trim_matches('/'));
    serve(listener, path, dispatcher, config).await
}

/// Accept loop over an already bound listener
pub async fn serve(
    listener: TcpListener,
    path: &str,
    dispatcher: Arc<Dispatcher>,
    config: WsConfig,
) -> Result<(), TransportError> {
    let path: Arc<str> = Arc::from(path);
    let config = Arc::new(config);
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("Incoming TCP connection from {}", peer);
        tokio::spawn(accept(
            stream,
            peer,
            path.clone(),
            dispatcher.clone(),
            config.clone(),
        ));
    }
}

async fn accept(
    stream: TcpStream,
    peer: SocketAddr,
    path: Arc<str>,
    dispatcher: Arc<Dispatcher>,
    config: Arc<WsConfig>,
) {
    let mut endpoint_id = None;
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let Some(id) = endpoint_from_path(&path, request.uri().path()) else {
            warn!("Rejecting {}: unknown path {}", peer, request.uri().path());
            let mut rejection = ErrorResponse::new(Some("unknown path".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            return Err(rejection);
        };

        if offers_subprotocol(request, &config.subprotocol) {
            if let Ok(protocol) = HeaderValue::from_str(&config.subprotocol) {
                response
                    .headers_mut()
                    .insert(header::SEC_WEBSOCKET_PROTOCOL, protocol);
            }
        } else {
            warn!("Client {} did not offer {} subprotocol", id, config.subprotocol);
        }
        endpoint_id = Some(id);
        Ok(response)
    };

    let ws_stream = match accept_hdr_async_with_config(stream, callback, Some(ws_config(&config))).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            debug!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    let Some(endpoint_id) = endpoint_id else {
        return;
    };

    info!("Accepted {} from {}", endpoint_id, peer);
    let reader = spawn_connection(ws_stream, &endpoint_id, &dispatcher, &config);
    if let Err(e) = reader.await {
        error!("Connection task for {} failed: {}", endpoint_id, e);
    }
}

/// Attach an established socket to `dispatcher` as `endpoint_id`
pub fn spawn_connection<S>(
    ws_stream: WebSocketStream<S>,
    endpoint_id: &str,
    dispatcher: &Arc<Dispatcher>,
    config: &WsConfig,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (channel, mut outgoing) = QueueChannel::new(config.outbound_queue);
    let connection = dispatcher.connect(endpoint_id, Arc::new(channel));
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            let text = String::from_utf8_lossy(&frame).into_owned();
            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    tokio::spawn(async move {
        while let Some(message) = ws_rx.next().await {
            match message {
                Ok(Message::Text(text)) => connection.deliver(text.as_bytes()),
                Ok(Message::Binary(data)) => connection.deliver(&data),
                Ok(Message::Close(frame)) => {
                    debug!("Close frame from {}: {:?}", connection.endpoint_id(), frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error on {}: {}", connection.endpoint_id(), e);
                    break;
                }
            }
        }
        connection.closed();
        // closing the channel ends the writer
        let _ = writer.await;
        info!("WebSocket for {} closed", connection.endpoint_id());
    })
}
