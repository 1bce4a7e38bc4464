//! Keyword search over the open conversation.
//!
//! The external index returns all matches at once; the coordinator holds
//! them as a finite, non-restartable walk — "find next" steps forward
//! until exhausted, and a fresh query replaces the prior results
//! outright. Jump-to-message itself lives on the engine, since it re-uses
//! the generation-guarded initial load path.

use pawchat_proto::message::{ChatMessage, ConversationId, UserId};

/// Errors from the external search index.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The viewer is not a participant of the conversation.
    #[error("access to conversation {0} denied")]
    AccessDenied(ConversationId),

    /// Any other backend failure.
    #[error("search backend error: {0}")]
    Backend(String),
}

/// External keyword index, scoped to one conversation per query.
pub trait SearchIndex: Send + Sync {
    /// Return all messages in the conversation matching `keyword`.
    fn search(
        &self,
        conversation: ConversationId,
        viewer: UserId,
        keyword: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, SearchError>> + Send;
}

/// One query's results: a finite, forward-only walk.
#[derive(Debug)]
pub struct SearchResults {
    hits: Vec<ChatMessage>,
    next: usize,
}

impl SearchResults {
    /// Wraps a fresh result list.
    #[must_use]
    pub const fn new(hits: Vec<ChatMessage>) -> Self {
        Self { hits, next: 0 }
    }

    /// Total number of hits.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.hits.len()
    }

    /// Whether the query matched nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Hits not yet stepped over.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.hits.len().saturating_sub(self.next)
    }

    /// Step to the next hit, or `None` once exhausted.
    ///
    /// There is no way back — a new query is the only restart.
    pub fn advance(&mut self) -> Option<&ChatMessage> {
        let hit = self.hits.get(self.next)?;
        self.next += 1;
        Some(hit)
    }
}
