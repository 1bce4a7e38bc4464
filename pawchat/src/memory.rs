//! In-memory backend implementing every external service seam.
//!
//! Plays the marketplace backend's role for tests and the demo binary:
//! conversation logs with server-assigned ids and timestamps, page windows
//! counted from the newest end, read state, keyword search, and report
//! bookkeeping. Cloning shares the underlying state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use pawchat_proto::message::{
    ChatMessage, ConversationId, MessageId, ModerationStatus, ReplyPreview, Timestamp, UserId,
    ValidationError,
};
use pawchat_proto::payload::OutboundMessage;

use crate::history::{HistoryError, HistoryService};
use crate::moderation::{ModerationError, ModerationService, ReportOutcome};
use crate::receipts::{ReadStateError, ReadStateService};
use crate::search::{SearchError, SearchIndex};

/// Errors from accepting an outbound message into the log.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The conversation does not exist.
    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),

    /// The sender is not a participant.
    #[error("user {0} is not a member of conversation {1}")]
    NotAMember(UserId, ConversationId),

    /// The body failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// One conversation's log and membership.
struct ConversationLog {
    members: (UserId, UserId),
    /// Ascending by `(sent_at, id)`.
    messages: Vec<ChatMessage>,
}

impl ConversationLog {
    fn is_member(&self, user: UserId) -> bool {
        self.members.0 == user || self.members.1 == user
    }

    fn insert_sorted(&mut self, message: ChatMessage) {
        let key = message.sort_key();
        let pos = self.messages.partition_point(|m| m.sort_key() <= key);
        self.messages.insert(pos, message);
    }
}

#[derive(Default)]
struct BackendInner {
    conversations: HashMap<ConversationId, ConversationLog>,
    reports: HashSet<(UserId, MessageId)>,
}

/// Shared in-memory backend; clones reference the same state.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<BackendInner>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a conversation between two members.
    #[must_use]
    pub fn create_conversation(&self, a: UserId, b: UserId) -> ConversationId {
        let id = ConversationId::new();
        self.inner.lock().conversations.insert(
            id,
            ConversationLog {
                members: (a, b),
                messages: Vec::new(),
            },
        );
        id
    }

    /// The two members of a conversation, if it exists.
    #[must_use]
    pub fn members(&self, conversation: ConversationId) -> Option<(UserId, UserId)> {
        self.inner
            .lock()
            .conversations
            .get(&conversation)
            .map(|log| log.members)
    }

    /// Accept an outbound message: validate, assign id and timestamp,
    /// resolve the reply preview, append to the log.
    ///
    /// Returns the accepted message for fan-out to both inbox topics.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] for unknown conversations, non-members, or
    /// invalid bodies.
    pub fn ingest(&self, outbound: &OutboundMessage) -> Result<ChatMessage, IngestError> {
        outbound.validate()?;

        let mut inner = self.inner.lock();
        let log = inner
            .conversations
            .get_mut(&outbound.conversation)
            .ok_or(IngestError::UnknownConversation(outbound.conversation))?;
        if !log.is_member(outbound.sender) {
            return Err(IngestError::NotAMember(
                outbound.sender,
                outbound.conversation,
            ));
        }

        let reply = outbound.reply_to.and_then(|target| {
            log.messages
                .iter()
                .find(|m| m.id == target)
                .map(|m| ReplyPreview::new(target, m.sender_name.clone(), &m.body))
        });

        let message = ChatMessage {
            id: MessageId::new(),
            conversation: outbound.conversation,
            sender: outbound.sender,
            sender_name: outbound.sender_name.clone(),
            body: outbound.body.clone(),
            reply,
            sent_at: Timestamp::now(),
            read: false,
            moderation: ModerationStatus::Normal,
        };
        log.insert_sorted(message.clone());
        Ok(message)
    }

    /// Seed a historical message directly (test/demo fixture path).
    ///
    /// Returns the assigned id, or `None` for an unknown conversation.
    pub fn seed_message(
        &self,
        conversation: ConversationId,
        sender: UserId,
        sender_name: &str,
        body: &str,
        sent_at: Timestamp,
        read: bool,
    ) -> Option<MessageId> {
        let mut inner = self.inner.lock();
        let log = inner.conversations.get_mut(&conversation)?;
        let message = ChatMessage {
            id: MessageId::new(),
            conversation,
            sender,
            sender_name: sender_name.to_string(),
            body: body.to_string(),
            reply: None,
            sent_at,
            read,
            moderation: ModerationStatus::Normal,
        };
        let id = message.id;
        log.insert_sorted(message);
        Some(id)
    }

    /// Snapshot a conversation's full log (test helper).
    #[must_use]
    pub fn log_snapshot(&self, conversation: ConversationId) -> Vec<ChatMessage> {
        self.inner
            .lock()
            .conversations
            .get(&conversation)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }
}

impl HistoryService for InMemoryBackend {
    async fn fetch_page(
        &self,
        conversation: ConversationId,
        viewer: UserId,
        page: u32,
        size: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        let inner = self.inner.lock();
        let log = inner
            .conversations
            .get(&conversation)
            .filter(|log| log.is_member(viewer))
            .ok_or(HistoryError::AccessDenied(conversation))?;

        let total = log.messages.len();
        let skip_from_new = usize::try_from(page).unwrap_or(usize::MAX).saturating_mul(size);
        if size == 0 || skip_from_new >= total {
            return Ok(Vec::new());
        }
        let end = total - skip_from_new;
        let start = end.saturating_sub(size);
        Ok(log.messages[start..end].to_vec())
    }

    async fn locate_page(
        &self,
        conversation: ConversationId,
        message: MessageId,
        size: usize,
    ) -> Result<u32, HistoryError> {
        let inner = self.inner.lock();
        let log = inner
            .conversations
            .get(&conversation)
            .ok_or(HistoryError::AccessDenied(conversation))?;

        let index = log
            .messages
            .iter()
            .position(|m| m.id == message)
            .ok_or(HistoryError::NotFound(message))?;
        if size == 0 {
            return Err(HistoryError::Backend("page size must be positive".into()));
        }
        let from_newest = log.messages.len() - 1 - index;
        u32::try_from(from_newest / size)
            .map_err(|_| HistoryError::Backend("page index overflow".into()))
    }
}

impl ReadStateService for InMemoryBackend {
    async fn mark_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<bool, ReadStateError> {
        let mut inner = self.inner.lock();
        let log = inner
            .conversations
            .get_mut(&conversation)
            .ok_or_else(|| ReadStateError::Backend("unknown conversation".into()))?;

        for message in &mut log.messages {
            if message.sender != reader {
                message.read = true;
            }
        }

        // Global indicator: anything unread for this reader anywhere else?
        let has_unread = inner.conversations.values().any(|log| {
            log.is_member(reader)
                && log
                    .messages
                    .iter()
                    .any(|m| m.sender != reader && !m.read)
        });
        Ok(has_unread)
    }
}

impl SearchIndex for InMemoryBackend {
    async fn search(
        &self,
        conversation: ConversationId,
        viewer: UserId,
        keyword: &str,
    ) -> Result<Vec<ChatMessage>, SearchError> {
        let inner = self.inner.lock();
        let log = inner
            .conversations
            .get(&conversation)
            .filter(|log| log.is_member(viewer))
            .ok_or(SearchError::AccessDenied(conversation))?;

        let needle = keyword.to_lowercase();
        Ok(log
            .messages
            .iter()
            .filter(|m| !m.moderation.is_hidden() && m.body.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}

impl ModerationService for InMemoryBackend {
    async fn submit_report(
        &self,
        reporter: UserId,
        message: MessageId,
        reason: &str,
    ) -> Result<ReportOutcome, ModerationError> {
        if reason.trim().is_empty() {
            return Err(ModerationError::Rejected("a reason is required".into()));
        }

        let mut inner = self.inner.lock();
        if !inner.reports.insert((reporter, message)) {
            return Ok(ReportOutcome::AlreadyReported);
        }

        for log in inner.conversations.values_mut() {
            if let Some(entry) = log.messages.iter_mut().find(|m| m.id == message) {
                entry.moderation = ModerationStatus::ReportedPending;
                return Ok(ReportOutcome::Accepted);
            }
        }
        Err(ModerationError::Rejected("unknown message".into()))
    }
}
