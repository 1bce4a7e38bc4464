//! Broker server core: shared state, WebSocket handler, and topic fan-out.
//!
//! Each connection gets a numeric id, a writer task, and a reader loop that
//! interprets [`BrokerFrame`]s. Published payloads are re-wrapped as
//! `Deliver` frames and fanned out to every subscriber of the topic. The
//! broker never decodes payload bytes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use pawchat_proto::broker::{self, BrokerFrame};
use tokio::sync::mpsc;

use crate::topics::TopicRegistry;

/// Default maximum allowed payload size in bytes (64 KB).
const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Shared broker state: the topic registry and connection id counter.
pub struct BrokerState {
    /// Topic subscription directory.
    pub registry: TopicRegistry,
    /// Source of per-connection ids.
    next_conn_id: AtomicU64,
    /// Maximum allowed payload size in bytes.
    max_payload_size: usize,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerState {
    /// Creates broker state with the default payload size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Creates broker state with a custom payload size limit.
    #[must_use]
    pub fn with_config(max_payload_size: usize) -> Self {
        Self {
            registry: TopicRegistry::new(),
            next_conn_id: AtomicU64::new(1),
            max_payload_size,
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// Lifecycle:
/// 1. Assign a connection id and spawn a writer task.
/// 2. Read frames: `Subscribe` / `Unsubscribe` update the registry,
///    `Publish` fans out a `Deliver` frame to subscribers.
/// 3. On disconnect, drop every subscription the connection held.
pub async fn handle_socket(socket: WebSocket, state: Arc<BrokerState>) {
    let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    tracing::info!(conn_id, "connection accepted");

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Writer task: forward frames from the channel to the WebSocket.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: process frames from this connection.
    let reader_state = Arc::clone(&state);
    let reader_tx = tx.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_frame(conn_id, &data, &reader_state, &reader_tx).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    let dropped = state.registry.drop_connection(conn_id).await;
    tracing::info!(conn_id, subscriptions = dropped, "connection closed");
}

/// Handles a single decoded binary frame from a connection.
async fn handle_frame(
    conn_id: u64,
    data: &[u8],
    state: &Arc<BrokerState>,
    reply: &mpsc::UnboundedSender<Message>,
) {
    let frame = match broker::decode(data) {
        Ok(f) => f,
        Err(e) => {
            // Malformed frame — log and skip, don't disconnect.
            tracing::warn!(conn_id, error = %e, "failed to decode frame, skipping");
            return;
        }
    };

    match frame {
        BrokerFrame::Subscribe { topic } => {
            if topic.is_empty() {
                send_error(reply, "cannot subscribe to an empty topic");
                return;
            }
            match state
                .registry
                .subscribe(conn_id, &topic, reply.clone())
                .await
            {
                Ok(()) => {
                    tracing::debug!(conn_id, topic = %topic, "subscribed");
                    send_frame(reply, &BrokerFrame::Subscribed { topic });
                }
                Err(e) => {
                    tracing::warn!(conn_id, topic = %topic, error = %e, "subscribe failed");
                    send_error(reply, &e.to_string());
                }
            }
        }
        BrokerFrame::Unsubscribe { topic } => {
            let existed = state.registry.unsubscribe(conn_id, &topic).await;
            tracing::debug!(conn_id, topic = %topic, existed, "unsubscribed");
        }
        BrokerFrame::Publish { topic, payload } => {
            if payload.len() > state.max_payload_size {
                tracing::warn!(
                    conn_id,
                    size = payload.len(),
                    max = state.max_payload_size,
                    "payload exceeds size limit"
                );
                send_error(
                    reply,
                    &format!(
                        "payload too large: {} bytes (max {})",
                        payload.len(),
                        state.max_payload_size
                    ),
                );
                return;
            }

            let deliver = BrokerFrame::Deliver {
                topic: topic.clone(),
                payload,
            };
            match broker::encode(&deliver) {
                Ok(bytes) => {
                    let delivered = state
                        .registry
                        .publish(&topic, &Message::Binary(bytes.into()))
                        .await;
                    tracing::debug!(conn_id, topic = %topic, delivered, "published");
                }
                Err(e) => {
                    tracing::error!(conn_id, error = %e, "failed to encode Deliver frame");
                }
            }
        }
        other => {
            tracing::warn!(conn_id, frame = ?other, "unexpected frame type from client");
        }
    }
}

/// Encodes and queues a frame on a connection's writer channel.
fn send_frame(reply: &mpsc::UnboundedSender<Message>, frame: &BrokerFrame) {
    if let Ok(bytes) = broker::encode(frame) {
        let _ = reply.send(Message::Binary(bytes.into()));
    }
}

/// Queues an `Error` frame on a connection's writer channel.
fn send_error(reply: &mpsc::UnboundedSender<Message>, reason: &str) {
    send_frame(
        reply,
        &BrokerFrame::Error {
            reason: reason.to_string(),
        },
    );
}

/// Starts the broker on the given address and returns the bound address and
/// a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(BrokerState::new())).await
}

/// Starts the broker with a pre-configured [`BrokerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<BrokerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "broker server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<BrokerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
