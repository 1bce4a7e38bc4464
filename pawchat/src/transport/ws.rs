//! WebSocket push channel for the `pawchat-broker`.
//!
//! Implements [`PushChannel`] over a WebSocket connection carrying
//! postcard-encoded [`BrokerFrame`]s. The broker never sees message
//! internals — only opaque payloads routed by topic string.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use pawchat_proto::broker::{self, BrokerFrame};
use pawchat_proto::topic::Topic;

use super::{PushChannel, PushConnector, TransportError};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for connecting to the broker.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector that dials a broker URL (ws:// or wss://).
///
/// Each [`connect`](PushConnector::connect) call produces a fresh
/// [`WsChannel`]; the transport session calls it again after every
/// disconnect.
#[derive(Debug, Clone)]
pub struct WsConnector {
    broker_url: String,
}

impl WsConnector {
    /// Creates a connector for the given broker URL.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the URL does not parse or
    /// uses a scheme other than `ws`/`wss`.
    pub fn new(broker_url: &str) -> Result<Self, TransportError> {
        let parsed = url::Url::parse(broker_url)
            .map_err(|e| TransportError::Connect(format!("invalid broker URL: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::Connect(format!(
                "unsupported broker URL scheme: {}",
                parsed.scheme()
            )));
        }
        Ok(Self {
            broker_url: broker_url.to_string(),
        })
    }

    /// Returns the broker URL this connector dials.
    #[must_use]
    pub fn broker_url(&self) -> &str {
        &self.broker_url
    }
}

impl PushConnector for WsConnector {
    type Channel = WsChannel;

    async fn connect(&self) -> Result<Self::Channel, TransportError> {
        WsChannel::connect(&self.broker_url).await
    }
}

/// WebSocket channel implementing [`PushChannel`].
///
/// Created via [`WsChannel::connect`], which establishes the WebSocket
/// connection and spawns a background reader task that decodes `Deliver`
/// frames into an internal queue.
pub struct WsChannel {
    /// Write half of the WebSocket connection (shared for concurrent sends).
    ws_sender: Arc<Mutex<WsSender>>,
    /// Deliveries decoded by the background reader task.
    incoming: Mutex<mpsc::Receiver<(Topic, Vec<u8>)>>,
    /// Whether the WebSocket connection is active.
    open: Arc<AtomicBool>,
    /// Handle to the background reader task (kept alive for the channel's lifetime).
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl WsChannel {
    /// Connect to a broker URL.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Connect`] if the connection times out or the
    ///   broker is unreachable.
    pub async fn connect(broker_url: &str) -> Result<Self, TransportError> {
        let (ws_stream, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, connect_async(broker_url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = broker_url, "broker WebSocket connect timed out");
                    TransportError::Connect("connect timed out".to_string())
                })?
                .map_err(|e| {
                    tracing::warn!(url = broker_url, err = %e, "broker WebSocket connect failed");
                    TransportError::Connect(e.to_string())
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::channel(256);
        let open = Arc::new(AtomicBool::new(true));
        let reader_open = Arc::clone(&open);

        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, reader_open));

        Ok(Self {
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            incoming: Mutex::new(rx),
            open,
            _reader_handle: reader_handle,
        })
    }

    /// Encode a frame and write it to the WebSocket.
    async fn send_frame(&self, frame: &BrokerFrame) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(TransportError::ChannelClosed);
        }
        let bytes = broker::encode(frame)?;

        let mut sender = self.ws_sender.lock().await;
        sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "broker send failed");
                self.open.store(false, Ordering::Relaxed);
                TransportError::ChannelClosed
            })
    }
}

impl PushChannel for WsChannel {
    async fn publish(&self, topic: &Topic, payload: &[u8]) -> Result<(), TransportError> {
        self.send_frame(&BrokerFrame::Publish {
            topic: topic.as_str().to_string(),
            payload: payload.to_vec(),
        })
        .await
    }

    async fn subscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        self.send_frame(&BrokerFrame::Subscribe {
            topic: topic.as_str().to_string(),
        })
        .await
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        self.send_frame(&BrokerFrame::Unsubscribe {
            topic: topic.as_str().to_string(),
        })
        .await
    }

    async fn recv(&self) -> Result<(Topic, Vec<u8>), TransportError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(TransportError::ChannelClosed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

/// Background task that reads WebSocket messages and dispatches them.
///
/// Decodes incoming binary frames as [`BrokerFrame`]s and pushes `Deliver`
/// payloads into the `tx` channel. Malformed frames are logged and skipped —
/// the task does not disconnect on bad data.
///
/// Sets `open` to `false` when the WebSocket closes or errors out.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<(Topic, Vec<u8>)>,
    open: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match broker::decode(&data) {
                Ok(BrokerFrame::Deliver { topic, payload }) => {
                    if tx.send((Topic::new(topic), payload)).await.is_err() {
                        // Receiver dropped — channel was dropped, exit.
                        break;
                    }
                }
                Ok(BrokerFrame::Subscribed { topic }) => {
                    tracing::debug!(topic = %topic, "subscription confirmed");
                }
                Ok(BrokerFrame::Error { reason }) => {
                    tracing::warn!(reason = %reason, "broker error");
                }
                Ok(other) => {
                    tracing::debug!(?other, "unexpected broker frame");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed broker frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("broker WebSocket closed by server");
                break;
            }
            Ok(_) => {
                // Ignore ping/pong/text frames.
            }
            Err(e) => {
                tracing::warn!(err = %e, "broker WebSocket read error");
                break;
            }
        }
    }
    open.store(false, Ordering::Relaxed);
    tracing::debug!("broker reader task exiting");
}
