//! Topic naming for the push channel.
//!
//! The broker routes purely by topic string; these constructors are the
//! single place topic names are spelled out.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, UserId};

/// A routing key on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    /// Creates a topic from a raw string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Per-user inbox topic: every message addressed to `user` is delivered
    /// here, including echoes of the user's own sends.
    #[must_use]
    pub fn inbox(user: UserId) -> Self {
        Self(format!("user.{user}.inbox"))
    }

    /// Per-conversation read-receipt topic.
    #[must_use]
    pub fn read_receipts(conversation: ConversationId) -> Self {
        Self(format!("conversation.{conversation}.read"))
    }

    /// Shared send destination consumed by the message service.
    #[must_use]
    pub fn send() -> Self {
        Self("chat.send".to_string())
    }

    /// Returns the topic's string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
