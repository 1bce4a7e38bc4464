//! Core data model for `PawChat` conversations.
//!
//! These types travel on the push channel and come back from the history
//! service, so they live in the shared protocol crate. Messages are
//! append-only: after creation only the read flag and the moderation
//! status may change.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message body length in characters.
///
/// Matches the marketplace backend's message column width.
pub const MAX_BODY_CHARS: usize = 2000;

/// Maximum length of a denormalized reply preview in characters.
pub const MAX_PREVIEW_CHARS: usize = 120;

/// Unique identifier for a message, based on UUID v7 for time-ordering.
///
/// Within a conversation the id is unique and monotonic-ish: ids sort in
/// roughly the order messages were created, which the store relies on as a
/// tie-breaker for equal timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a conversation between two marketplace members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(Uuid);

impl ConversationId {
    /// Creates a new conversation identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `ConversationId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a marketplace member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    /// Creates a user identifier from a numeric member id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric member id.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Moderation status of a message.
///
/// A closed enum rather than a raw status code so that renderers and the
/// store can match exhaustively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModerationStatus {
    /// Not reported; rendered normally.
    #[default]
    Normal,
    /// A report has been filed and is awaiting review.
    ReportedPending,
    /// A moderator upheld a report; the body must not be rendered.
    Hidden,
    /// A report was reviewed and rejected; rendered normally.
    ReportRejected,
}

impl ModerationStatus {
    /// Whether the renderer must suppress the message body.
    #[must_use]
    pub const fn is_hidden(&self) -> bool {
        matches!(self, Self::Hidden)
    }
}

/// Denormalized preview of the message a reply points at.
///
/// Carried on the message itself so the renderer never has to look up the
/// reply target (which may be outside the loaded window).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    /// Identifier of the message being replied to.
    pub target: MessageId,
    /// Display name of the replied-to message's author.
    pub sender_name: String,
    /// Truncated body of the replied-to message.
    pub body: String,
}

impl ReplyPreview {
    /// Builds a preview, truncating the body to [`MAX_PREVIEW_CHARS`].
    #[must_use]
    pub fn new(target: MessageId, sender_name: impl Into<String>, body: &str) -> Self {
        let body = if body.chars().count() > MAX_PREVIEW_CHARS {
            body.chars().take(MAX_PREVIEW_CHARS).collect()
        } else {
            body.to_string()
        };
        Self {
            target,
            sender_name: sender_name.into(),
            body,
        }
    }
}

/// Error returned when a message body fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message body is empty (or whitespace only).
    #[error("message body is empty")]
    Empty,
    /// Message body exceeds the maximum allowed length.
    #[error("message too long ({chars} characters, max {max})")]
    TooLong {
        /// Actual length of the body in characters.
        chars: usize,
        /// Maximum allowed length in characters.
        max: usize,
    },
}

/// Validates a message body: non-empty after trimming, within length limit.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for whitespace-only bodies, or
/// [`ValidationError::TooLong`] past [`MAX_BODY_CHARS`].
pub fn validate_body(body: &str) -> Result<(), ValidationError> {
    if body.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let chars = body.chars().count();
    if chars > MAX_BODY_CHARS {
        return Err(ValidationError::TooLong {
            chars,
            max: MAX_BODY_CHARS,
        });
    }
    Ok(())
}

/// A single entry in a conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned unique identifier.
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation: ConversationId,
    /// Author's member id.
    pub sender: UserId,
    /// Author's display name at send time.
    pub sender_name: String,
    /// Message body text.
    pub body: String,
    /// Present when this message replies to another.
    pub reply: Option<ReplyPreview>,
    /// When the server accepted the message.
    pub sent_at: Timestamp,
    /// Whether the recipient has read this message.
    pub read: bool,
    /// Moderation status; the only field besides `read` that mutates.
    pub moderation: ModerationStatus,
}

impl ChatMessage {
    /// Validates the message body for sending.
    ///
    /// # Errors
    ///
    /// See [`validate_body`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_body(&self.body)
    }

    /// Display-order key: ascending `(sent_at, id)`.
    ///
    /// The store sorts solely by this key, never by arrival order.
    #[must_use]
    pub const fn sort_key(&self) -> (Timestamp, MessageId) {
        (self.sent_at, self.id)
    }
}
