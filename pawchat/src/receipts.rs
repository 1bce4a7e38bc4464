//! Read-receipt protocol: the external read-state seam and the tracker
//! that folds receipt events into the store.
//!
//! The tracker is a satellite state machine — it annotates messages but
//! never gates their insertion. The read watermark is mutated only by
//! receipt events from the transport, never by local optimism.

use pawchat_proto::message::{ConversationId, UserId};
use pawchat_proto::payload::ReceiptEvent;

use crate::store::MessageStore;

/// Errors from the external read-state service.
#[derive(Debug, thiserror::Error)]
pub enum ReadStateError {
    /// Any backend failure (network, server error).
    #[error("read-state backend error: {0}")]
    Backend(String),
}

/// External read-state endpoint.
pub trait ReadStateService: Send + Sync {
    /// Mark a conversation read for `reader`. Idempotent.
    ///
    /// Returns whether any unread messages remain across *all* of the
    /// reader's conversations — this drives the global unread indicator.
    fn mark_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> impl std::future::Future<Output = Result<bool, ReadStateError>> + Send;
}

/// Folds per-conversation receipt events into store annotations.
#[derive(Debug)]
pub struct ReadReceiptTracker {
    /// The local viewer; receipts from this reader are ignored.
    self_id: UserId,
    /// Whether the partner has read through the latest sent message.
    watermark: bool,
}

impl ReadReceiptTracker {
    /// Creates a tracker for the given local user.
    #[must_use]
    pub const fn new(self_id: UserId) -> Self {
        Self {
            self_id,
            watermark: false,
        }
    }

    /// Current read watermark.
    #[must_use]
    pub const fn partner_has_read(&self) -> bool {
        self.watermark
    }

    /// Reset for a newly opened conversation.
    pub fn reset(&mut self) {
        self.watermark = false;
    }

    /// Seed the watermark from an initial history page: if any
    /// self-authored message already carries the read flag, the partner
    /// has seen the thread before.
    pub fn seed_from_history(&mut self, store: &MessageStore) -> bool {
        let seen = store
            .messages()
            .iter()
            .any(|m| m.sender == self.self_id && m.read);
        if seen {
            self.watermark = true;
        }
        seen
    }

    /// Apply one receipt event.
    ///
    /// Receipts from the local user are ignored (they echo back on the
    /// shared topic). A partner receipt marks every rendered self-authored
    /// message read and raises the watermark. Idempotent: a second
    /// identical receipt flips nothing and returns 0.
    ///
    /// Returns the number of messages whose read flag flipped.
    pub fn apply(&mut self, event: &ReceiptEvent, store: &mut MessageStore) -> usize {
        if event.reader == self.self_id {
            return 0;
        }
        self.watermark = true;
        let flipped = store.mark_sent_read(self.self_id);
        tracing::debug!(
            conversation = %event.conversation,
            reader = %event.reader,
            flipped,
            "applied read receipt"
        );
        flipped
    }
}
