//! WebSocket endpoint wiring the connection fabric to the relay and
//! session cores.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use stevedore_core::EngineClient;
use stevedore_relay::{EventSink, SubscriptionRegistry};
use stevedore_session::{ExecSessionManager, OutputSink, SessionError};

use crate::connection::WsConnection;
use crate::protocol::{ClientMessage, ServerMessage, decode_payload};

/// Shared state for the persistent channel.
pub struct ChannelState<E> {
    pub engine: Arc<E>,
    pub registry: Arc<SubscriptionRegistry>,
    pub sessions: Arc<ExecSessionManager>,
}

impl<E> Clone for ChannelState<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            registry: Arc::clone(&self.registry),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an axum route handler.
pub async fn ws_handler<E>(
    ws: WebSocketUpgrade,
    State(state): State<ChannelState<E>>,
) -> impl IntoResponse
where
    E: EngineClient + 'static,
{
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<E>(socket: WebSocket, state: ChannelState<E>)
where
    E: EngineClient + 'static,
{
    let (mut sender, mut receiver) = socket.split();
    let (conn, mut rx) = WsConnection::new();
    tracing::info!(connection_id = conn.id(), "client connected");

    // Forward queued messages to the WebSocket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let msg = tokio::select! {
            () = conn.disconnected() => {
                tracing::warn!(connection_id = conn.id(), "dropping slow client");
                break;
            }
            msg = receiver.next() => match msg {
                Some(m) => m,
                None => break,
            },
        };

        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = conn.send(ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                });
                continue;
            }
        };

        dispatch(&state, &conn, client_msg).await;
    }

    // Disconnect implies unsubscribe for every key this connection held.
    state.registry.unsubscribe_connection(conn.id());
    send_task.abort();
    tracing::info!(connection_id = conn.id(), "client disconnected");
}

async fn dispatch<E>(state: &ChannelState<E>, conn: &Arc<WsConnection>, msg: ClientMessage)
where
    E: EngineClient + 'static,
{
    match msg {
        ClientMessage::Subscribe { id } => {
            let sink: Arc<dyn EventSink> = Arc::clone(conn) as _;
            match state.registry.subscribe(&id, conn.id(), &sink) {
                Ok(room) => {
                    tracing::debug!(connection_id = conn.id(), id = %id, room = ?room, "subscribed");
                    let _ = conn.send(ServerMessage::Subbed {
                        id,
                        connection_id: conn.id().to_string(),
                    });
                }
                Err(e) => {
                    let _ = conn.send(ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
        ClientMessage::Status { id } => match state.engine.container_inspect(&id).await {
            Ok(container) => {
                let _ = conn.send(ServerMessage::Status {
                    id,
                    status: container.status,
                });
            }
            Err(e) => {
                let _ = conn.send(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        },
        ClientMessage::Exec { id, body } => {
            let sink: Arc<dyn OutputSink> = Arc::new(ConnectionSink {
                conn: Arc::clone(conn),
                target: id.clone(),
            });
            match state
                .sessions
                .exec(state.engine.as_ref(), &id, body.to_spec(), sink)
                .await
            {
                Ok(started) => {
                    let _ = conn.send(ServerMessage::ExecStarted {
                        id,
                        exec_id: started.exec_id,
                    });
                }
                Err(e) => {
                    let _ = conn.send(ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
        ClientMessage::Input { id, data } => {
            let Some(bytes) = decode_payload(&data) else {
                let _ = conn.send(ServerMessage::Error {
                    message: "invalid base64 input".to_string(),
                });
                return;
            };
            match state.sessions.send_input(&id, &bytes).await {
                Ok(()) => {}
                Err(SessionError::NotConnected(_)) => {
                    let _ = conn.send(ServerMessage::Error {
                        message: "container is not connected".to_string(),
                    });
                }
                Err(e) => {
                    let _ = conn.send(ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
        ClientMessage::Ping => {
            let _ = conn.send(ServerMessage::Pong);
        }
    }
}

/// Forwards pumped exec output to the initiating connection.
struct ConnectionSink {
    conn: Arc<WsConnection>,
    target: String,
}

impl OutputSink for ConnectionSink {
    fn stdout(&self, data: &[u8]) {
        let _ = self
            .conn
            .send(ServerMessage::output(&self.target, "stdout", data));
    }

    fn stderr(&self, data: &[u8]) {
        let _ = self
            .conn
            .send(ServerMessage::output(&self.target, "stderr", data));
    }

    fn closed(&self) {
        tracing::debug!(target_id = self.target, "exec output stream closed");
    }
}

/// Create the WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(channel_state));
/// ```
#[must_use]
pub fn create_ws_router<E>(state: ChannelState<E>) -> axum::Router
where
    E: EngineClient + 'static,
{
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<E>))
        .with_state(state)
}
