//! Transport seam between the engine and a duplex, message-oriented channel
//!
//! The engine only needs to push frames out and close the connection; inbound
//! frames and disconnects are reported through a `Connection` (see
//! `Dispatcher::connect`). Concrete transports:
//! - `QueueChannel`: bounded queue drained by a writer task (WebSocket, loopback)
//! - `MemoryChannel`: records frames, for tests without a network
//! - `loopback`: wires two dispatchers together in memory

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::dispatcher::{Connection, Dispatcher};
use crate::messages::Message;

/// Default outbound queue depth per connection
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Errors raised by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    QueueFull,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound half of one connection
pub trait Channel: Send + Sync {
    /// Queue one frame for delivery; must not block
    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Close the connection; idempotent
    fn close(&self);
}

/// Channel backed by a bounded mpsc queue
pub struct QueueChannel {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
}

impl QueueChannel {
    /// Create a channel and the receiver its writer task drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

impl Channel for QueueChannel {
    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    fn close(&self) {
        // dropping the sender ends the writer task
        self.tx.lock().take();
    }
}

/// Channel recording every frame, for tests
#[derive(Default)]
pub struct MemoryChannel {
    sent: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
    failing: AtomicBool,
}

impl MemoryChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent sends fail as if the socket broke
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Raw frames sent so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Sent frames as text
    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }

    /// Sent frames decoded; frames that fail to decode are skipped
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter_map(|frame| Message::decode(frame).ok())
            .collect()
    }

    pub fn last_message(&self) -> Option<Message> {
        self.sent_messages().pop()
    }
}

impl Channel for MemoryChannel {
    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated send failure",
            )));
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connect a central system and a charge point in memory.
///
/// Returns the central-system-side and charge-point-side connections. Frames
/// are delivered in order by one pump task per direction; closing either
/// side disconnects the other.
pub fn loopback(
    central_system: &Arc<Dispatcher>,
    charge_point: &Arc<Dispatcher>,
    endpoint_id: &str,
) -> (Connection, Connection) {
    let (cs_channel, cs_outgoing) = QueueChannel::new(DEFAULT_QUEUE_CAPACITY);
    let (cp_channel, cp_outgoing) = QueueChannel::new(DEFAULT_QUEUE_CAPACITY);

    let cs_conn = central_system.connect(endpoint_id, Arc::new(cs_channel));
    let cp_conn = charge_point.connect(endpoint_id, Arc::new(cp_channel));

    tokio::spawn(pump(cs_outgoing, cp_conn.clone()));
    tokio::spawn(pump(cp_outgoing, cs_conn.clone()));

    (cs_conn, cp_conn)
}

async fn pump(mut outgoing: mpsc::Receiver<Vec<u8>>, peer: Connection) {
    while let Some(frame) = outgoing.recv().await {
        peer.deliver(&frame);
    }
    debug!("Loopback for {} closed", peer.endpoint_id());
    peer.closed();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_channel_delivers_in_order() {
        let (channel, mut rx) = QueueChannel::new(4);
        channel.send(b"one".to_vec()).unwrap();
        channel.send(b"two".to_vec()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"one");
        assert_eq!(rx.recv().await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_queue_channel_close_ends_receiver() {
        let (channel, mut rx) = QueueChannel::new(4);
        channel.close();
        assert!(matches!(channel.send(b"x".to_vec()), Err(TransportError::Closed)));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_queue_channel_full() {
        let (channel, _rx) = QueueChannel::new(1);
        channel.send(b"a".to_vec()).unwrap();
        assert!(matches!(channel.send(b"b".to_vec()), Err(TransportError::QueueFull)));
    }

    #[test]
    fn test_memory_channel_records_and_fails() {
        let channel = MemoryChannel::new();
        channel.send(br#"[3,"1",{}]"#.to_vec()).unwrap();
        assert_eq!(channel.sent_text(), vec![r#"[3,"1",{}]"#.to_string()]);
        assert_eq!(channel.sent_messages().len(), 1);

        channel.set_failing(true);
        assert!(channel.send(b"x".to_vec()).is_err());
        channel.set_failing(false);

        channel.close();
        assert!(channel.is_closed());
        assert!(matches!(channel.send(b"x".to_vec()), Err(TransportError::Closed)));
        assert_eq!(channel.sent().len(), 1);
    }
}
