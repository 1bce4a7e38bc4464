//! Push-channel payload types.
//!
//! An [`OutboundMessage`] travels from a client to the message service on
//! the shared send topic; the service assigns an id and timestamp, then
//! fans the resulting [`InboundMessage`] out to both participants' inbox
//! topics. [`ReceiptEvent`]s travel on the per-conversation read topic.

use serde::{Deserialize, Serialize};

use crate::message::{
    ChatMessage, ConversationId, MessageId, UserId, ValidationError, validate_body,
};

/// A message submitted for delivery, before the server has accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Conversation the message belongs to.
    pub conversation: ConversationId,
    /// Sending member.
    pub sender: UserId,
    /// Sender's display name (denormalized for rendering).
    pub sender_name: String,
    /// Receiving member.
    pub receiver: UserId,
    /// Message body text.
    pub body: String,
    /// Identifier of the message being replied to, if any.
    pub reply_to: Option<MessageId>,
}

impl OutboundMessage {
    /// Validates the body before publish.
    ///
    /// # Errors
    ///
    /// See [`validate_body`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_body(&self.body)
    }
}

/// A server-accepted message pushed to an inbox topic.
///
/// Carries the receiver explicitly so a client can tell an echo of its own
/// send apart from a partner message without consulting conversation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// The accepted message, with server-assigned id and timestamp.
    pub message: ChatMessage,
    /// The member this copy is addressed to.
    pub receiver: UserId,
}

/// A read receipt pushed to a conversation's read topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptEvent {
    /// Conversation that was read.
    pub conversation: ConversationId,
    /// The member who read it.
    pub reader: UserId,
}
