//! Push-channel transport layer.
//!
//! Defines the [`PushChannel`] trait for a single live connection to the
//! topic broker, the [`PushConnector`] factory used to establish fresh
//! connections across reconnects, and the [`Publisher`] seam the engine
//! uses to hand outgoing messages to the transport. Concrete
//! implementations:
//! - [`loopback::LoopbackHub`] — in-process hub for testing
//! - [`ws::WsConnector`] — WebSocket connection to a `pawchat-broker`
//!
//! The long-lived [`session::TransportSession`] sits on top of a connector
//! and owns reconnection and subscription intents.

pub mod loopback;
pub mod session;
pub mod ws;

use pawchat_proto::codec::CodecError;
use pawchat_proto::payload::OutboundMessage;
use pawchat_proto::topic::Topic;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// There is currently no live connection to the push channel.
    #[error("not connected to the push channel")]
    NotConnected,

    /// The connection to the push channel has been closed.
    #[error("push channel closed")]
    ChannelClosed,

    /// Establishing a connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Encoding or decoding a frame failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single live connection to the push channel.
///
/// Payloads are opaque bytes; the channel never interprets them. Topic
/// routing is the only metadata the channel reads.
pub trait PushChannel: Send + Sync {
    /// Publish an opaque payload to a topic.
    ///
    /// Returns `Ok(())` when the payload has been handed to the channel.
    /// This does NOT guarantee delivery to any subscriber.
    fn publish(
        &self,
        topic: &Topic,
        payload: &[u8],
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Ask the channel to start delivering `topic`.
    fn subscribe(
        &self,
        topic: &Topic,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Ask the channel to stop delivering `topic`.
    fn unsubscribe(
        &self,
        topic: &Topic,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next delivered payload from any subscribed topic.
    ///
    /// Blocks asynchronously until a payload arrives. Returns
    /// [`TransportError::ChannelClosed`] once the connection is gone.
    fn recv(
        &self,
    ) -> impl std::future::Future<Output = Result<(Topic, Vec<u8>), TransportError>> + Send;

    /// Whether the connection is still believed to be open.
    fn is_open(&self) -> bool;
}

/// Factory producing fresh channels, one per (re)connect attempt.
pub trait PushConnector: Send + Sync + 'static {
    /// The channel type this connector produces.
    type Channel: PushChannel + Send + Sync + 'static;

    /// Establish a new connection to the push channel.
    fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Channel, TransportError>> + Send;
}

/// Seam between the engine's send path and the transport.
///
/// The engine validates and assembles an [`OutboundMessage`]; the publisher
/// is responsible for encoding it and putting it on the send topic.
pub trait Publisher: Send + Sync {
    /// Publish an outgoing message on the shared send topic.
    fn publish_outbound(
        &self,
        message: &OutboundMessage,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
}

impl<P: Publisher> Publisher for std::sync::Arc<P> {
    async fn publish_outbound(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        (**self).publish_outbound(message).await
    }
}
