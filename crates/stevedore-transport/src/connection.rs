//! Per-client connection handles with bounded outbound buffering.

use std::sync::Arc;

use stevedore_relay::{DeliveryError, EventSink, OutboundEvent};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// Outbound queue capacity per connection.
pub const OUTBOUND_BUFFER: usize = 256;

/// Handle for one remote client connection.
///
/// Queuing is non-blocking: delivery happens on the event listener's task.
/// A client that cannot drain its queue is flagged for disconnect instead of
/// growing an unbounded backlog or stalling everyone else.
pub struct WsConnection {
    id: String,
    tx: mpsc::Sender<ServerMessage>,
    shutdown: Notify,
}

impl WsConnection {
    /// Create a connection handle and the receiver its socket task drains.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let conn = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            tx,
            shutdown: Notify::new(),
        });
        (conn, rx)
    }

    /// Opaque connection id, also used as the registry's connection key.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a message for the client.
    ///
    /// # Errors
    /// [`DeliveryError::Closed`] when the socket task is gone;
    /// [`DeliveryError::Backlogged`] when the queue is full, in which case
    /// the connection is also flagged for disconnect.
    pub fn send(&self, msg: ServerMessage) -> Result<(), DeliveryError> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shutdown.notify_one();
                Err(DeliveryError::Backlogged)
            }
        }
    }

    /// Completes once the connection has been flagged for disconnect.
    pub async fn disconnected(&self) {
        self.shutdown.notified().await;
    }

    /// Whether the socket task still drains the queue.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl EventSink for WsConnection {
    fn deliver(&self, event: &OutboundEvent) -> Result<(), DeliveryError> {
        self.send(ServerMessage::from(event))
    }

    fn is_connected(&self) -> bool {
        self.is_open()
    }
}

#[cfg(test)]
mod tests {
    use stevedore_relay::EventName;

    use super::*;

    #[tokio::test]
    async fn delivery_reaches_the_socket_task() {
        let (conn, mut rx) = WsConnection::new();
        let event = OutboundEvent::new(EventName::Started, "web", "aabbccdd00112233");
        conn.deliver(&event).unwrap();

        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::Event { event, .. } if event == "started"));
    }

    #[tokio::test]
    async fn closed_socket_reports_closed() {
        let (conn, rx) = WsConnection::new();
        drop(rx);
        assert!(!conn.is_connected());

        let event = OutboundEvent::new(EventName::Started, "web", "aabbccdd00112233");
        assert_eq!(conn.deliver(&event), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn backlog_flags_the_connection_for_disconnect() {
        let (conn, _rx) = WsConnection::new();
        let event = OutboundEvent::new(EventName::Started, "web", "aabbccdd00112233");

        for _ in 0..OUTBOUND_BUFFER {
            conn.deliver(&event).unwrap();
        }
        assert_eq!(conn.deliver(&event), Err(DeliveryError::Backlogged));

        // The disconnect flag is already set; this must not hang.
        tokio::time::timeout(std::time::Duration::from_secs(1), conn.disconnected())
            .await
            .expect("disconnect flag not raised");
    }
}
