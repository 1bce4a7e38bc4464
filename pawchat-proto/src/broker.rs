//! Broker wire protocol.
//!
//! Defines the [`BrokerFrame`] enum exchanged over WebSocket binary frames
//! between clients and the topic broker. The broker never inspects
//! payloads — it routes opaque bytes by topic string.

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};

/// Frames exchanged between clients and the topic broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerFrame {
    /// Client asks to receive everything published to `topic`.
    Subscribe {
        /// The topic to subscribe to.
        topic: String,
    },

    /// Broker confirms a subscription.
    Subscribed {
        /// The topic that was subscribed (echoed back).
        topic: String,
    },

    /// Client stops receiving `topic`.
    Unsubscribe {
        /// The topic to drop.
        topic: String,
    },

    /// Client publishes an opaque payload to a topic.
    Publish {
        /// Routing key.
        topic: String,
        /// Opaque payload bytes.
        payload: Vec<u8>,
    },

    /// Broker delivers a published payload to a subscriber.
    Deliver {
        /// Routing key the payload was published under.
        topic: String,
        /// Opaque payload bytes.
        payload: Vec<u8>,
    },

    /// Broker reports an error condition.
    Error {
        /// Human-readable error description.
        reason: String,
    },
}

/// Encodes a [`BrokerFrame`] into bytes.
///
/// # Errors
///
/// Returns [`CodecError`] if serialization fails.
pub fn encode(frame: &BrokerFrame) -> Result<Vec<u8>, CodecError> {
    codec::encode(frame)
}

/// Decodes a [`BrokerFrame`] from bytes.
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are not a valid frame.
pub fn decode(bytes: &[u8]) -> Result<BrokerFrame, CodecError> {
    codec::decode(bytes)
}
