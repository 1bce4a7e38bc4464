//! History service seam and page-fetch mechanics.
//!
//! Defines the [`HistoryService`] trait the engine consumes for paginated
//! history and position resolution, plus the [`HistoryLoader`] that turns
//! a cursor and a direction into a classified fetch. The loader does page
//! math and shortness classification only; generation guarding and store
//! merging stay with the engine, which owns that state.

use pawchat_proto::message::{ChatMessage, ConversationId, MessageId, UserId};

use crate::session::PageCursor;

/// Default history page size.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Errors from the external history service.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The viewer is not a participant of the conversation.
    #[error("access to conversation {0} denied")]
    AccessDenied(ConversationId),

    /// The referenced message does not exist in the conversation.
    #[error("message {0} not found")]
    NotFound(MessageId),

    /// Any other backend failure (network, server error, decode).
    #[error("history backend error: {0}")]
    Backend(String),
}

/// External history endpoint.
///
/// Pages are windows over the conversation log counted from the newest
/// end: page 0 holds the most recent `size` messages, page 1 the `size`
/// before those, and so on. Within a page, messages are ordered ascending
/// (newest within the page last).
pub trait HistoryService: Send + Sync {
    /// Fetch one page of a conversation's history.
    fn fetch_page(
        &self,
        conversation: ConversationId,
        viewer: UserId,
        page: u32,
        size: usize,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, HistoryError>> + Send;

    /// Resolve the zero-based page index a message falls on for the given
    /// page size.
    fn locate_page(
        &self,
        conversation: ConversationId,
        message: MessageId,
        size: usize,
    ) -> impl std::future::Future<Output = Result<u32, HistoryError>> + Send;
}

/// Which way a history load extends the loaded window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDirection {
    /// Fresh page-0 view (open or re-open).
    Initial,
    /// One page older than the current edge.
    Older,
    /// One page newer than the current edge (floored at 0).
    Newer,
}

/// A fetched page plus the classification the caller commits with.
#[derive(Debug)]
pub struct FetchedPage {
    /// The page index that was fetched.
    pub page: u32,
    /// Whether the page came back shorter than the page size (the log's
    /// old edge has been reached).
    pub short: bool,
    /// The page's messages, ascending.
    pub messages: Vec<ChatMessage>,
}

/// Page-math wrapper over a [`HistoryService`].
#[derive(Debug, Clone)]
pub struct HistoryLoader<H> {
    service: H,
    page_size: usize,
}

impl<H> HistoryLoader<H> {
    /// Creates a loader over the given service.
    #[must_use]
    pub const fn new(service: H, page_size: usize) -> Self {
        Self { service, page_size }
    }

    /// The configured page size.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// The page index a load in `direction` targets, given the cursor.
    ///
    /// Returns `None` when there is nothing to fetch in that direction
    /// (no more older pages, or already at page 0 going newer).
    #[must_use]
    pub fn target_page(cursor: &PageCursor, direction: LoadDirection) -> Option<u32> {
        match direction {
            LoadDirection::Initial => Some(0),
            LoadDirection::Older => cursor
                .has_more_older
                .then(|| cursor.page.saturating_add(1)),
            LoadDirection::Newer => cursor.page.checked_sub(1),
        }
    }
}

impl<H: HistoryService> HistoryLoader<H> {
    /// Fetch a specific page (initial, jump, or a target computed via
    /// [`target_page`](Self::target_page)).
    ///
    /// # Errors
    ///
    /// Propagates [`HistoryError`] from the service.
    pub async fn fetch_at(
        &self,
        conversation: ConversationId,
        viewer: UserId,
        page: u32,
    ) -> Result<FetchedPage, HistoryError> {
        let messages = self
            .service
            .fetch_page(conversation, viewer, page, self.page_size)
            .await?;
        Ok(FetchedPage {
            page,
            short: messages.len() < self.page_size,
            messages,
        })
    }

    /// Resolve the page a message lives on.
    ///
    /// # Errors
    ///
    /// Propagates [`HistoryError`] from the service.
    pub async fn locate(
        &self,
        conversation: ConversationId,
        message: MessageId,
    ) -> Result<u32, HistoryError> {
        self.service
            .locate_page(conversation, message, self.page_size)
            .await
    }
}
