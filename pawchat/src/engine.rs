//! The conversation engine facade.
//!
//! [`ChatEngine`] owns the message store, the conversation session, the
//! reply context, the receipt tracker, and the search results, and
//! coordinates them against the four external service seams plus the
//! transport publisher. Every fetch runs the generation-guard protocol:
//! capture the session generation at issue time, re-acquire the session
//! on completion, and discard the result unapplied if the generation
//! moved (conversation switch or fresh load in the meantime).
//!
//! Lock order, everywhere: session -> store -> tracker -> reply ->
//! results. No lock is held across a service call.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};

use pawchat_proto::message::{
    ConversationId, MessageId, ModerationStatus, UserId, ValidationError, validate_body,
};
use pawchat_proto::payload::{InboundMessage, OutboundMessage, ReceiptEvent};

use crate::history::{
    DEFAULT_PAGE_SIZE, HistoryError, HistoryLoader, HistoryService, LoadDirection,
};
use crate::moderation::{ModerationError, ModerationService, ReportOutcome};
use crate::receipts::{ReadReceiptTracker, ReadStateService};
use crate::reply::{ReplyContext, ReplySelection, ToggleOutcome};
use crate::search::{SearchIndex, SearchResults};
use crate::session::{ConversationSession, Generation, Partner, ViewPosition};
use crate::store::{MergeDirection, MessageStore, StoreEvent, ViewItem};
use crate::transport::{Publisher, TransportError};

/// Why the view shows an empty state instead of messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The conversation has no messages yet.
    NoMessages,
    /// The viewer may not read this conversation.
    AccessDenied,
    /// The initial history fetch failed; retry by reopening.
    LoadFailed,
}

/// Engine-level notifications for the render coordinator, alongside the
/// store's own [`StoreEvent`] stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A conversation view was opened (history may still be loading).
    ConversationOpened {
        /// The opened conversation.
        conversation: ConversationId,
        /// The counterpart's identity.
        partner: Partner,
    },
    /// Show an empty state instead of a message list.
    EmptyState(EmptyReason),
    /// Scroll the view to this message (jump-to-message landing).
    ScrollTo(MessageId),
    /// The partner has read through the latest sent message.
    PartnerRead,
    /// Global unread indicator state (any conversation).
    UnreadIndicator {
        /// Whether unread messages remain anywhere.
        has_unread: bool,
    },
    /// A message arrived for a conversation that is not on screen.
    UnreadHint {
        /// The conversation with new activity.
        conversation: ConversationId,
    },
    /// The reply selection changed (preview bar contents).
    ReplyChanged(Option<ReplySelection>),
    /// A "return to present" walk finished at page 0.
    ReturnedToPresent {
        /// How many sequential newer loads the walk took.
        pages: u32,
    },
    /// A keyword query finished.
    SearchCompleted {
        /// Number of matches.
        hits: usize,
    },
}

/// Errors from the send path.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No conversation is open.
    #[error("no open conversation")]
    NoConversation,

    /// The message body failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The transport rejected the publish.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// The local viewer's identity.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// The viewer's member id.
    pub id: UserId,
    /// The viewer's display name, attached to outgoing messages.
    pub name: String,
}

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// History page size.
    pub page_size: usize,
    /// Buffer for the engine event channel.
    pub event_buffer: usize,
    /// Buffer for the store event channel.
    pub store_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            event_buffer: 256,
            store_buffer: 256,
        }
    }
}

/// Orchestrates one user's conversation view.
///
/// Generic over the transport publisher and the four external services so
/// tests can wire in in-memory fakes; see [`crate::memory::InMemoryBackend`].
pub struct ChatEngine<P, H, R, S, M> {
    identity: LocalIdentity,
    publisher: P,
    loader: HistoryLoader<H>,
    read_state: R,
    search_index: S,
    moderation: M,
    session: Mutex<Option<ConversationSession>>,
    store: Mutex<MessageStore>,
    tracker: Mutex<ReadReceiptTracker>,
    reply: Mutex<ReplyContext>,
    results: Mutex<Option<SearchResults>>,
    generations: AtomicU64,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl<P, H, R, S, M> ChatEngine<P, H, R, S, M>
where
    P: Publisher,
    H: HistoryService,
    R: ReadStateService,
    S: SearchIndex,
    M: ModerationService,
{
    /// Creates an engine plus the two event receivers the render
    /// coordinator consumes.
    #[must_use]
    pub fn new(
        identity: LocalIdentity,
        publisher: P,
        history: H,
        read_state: R,
        search_index: S,
        moderation: M,
        config: &EngineConfig,
    ) -> (
        Self,
        mpsc::Receiver<EngineEvent>,
        mpsc::Receiver<StoreEvent>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (store, store_rx) = MessageStore::new(config.store_buffer);
        let tracker = ReadReceiptTracker::new(identity.id);
        let engine = Self {
            identity,
            publisher,
            loader: HistoryLoader::new(history, config.page_size),
            read_state,
            search_index,
            moderation,
            session: Mutex::new(None),
            store: Mutex::new(store),
            tracker: Mutex::new(tracker),
            reply: Mutex::new(ReplyContext::new()),
            results: Mutex::new(None),
            generations: AtomicU64::new(0),
            event_tx,
        };
        (engine, event_rx, store_rx)
    }

    /// The local viewer's identity.
    #[must_use]
    pub const fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    fn next_generation(&self) -> Generation {
        Generation::new(self.generations.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.try_send(event);
    }

    // -----------------------------------------------------------------
    // Conversation lifecycle
    // -----------------------------------------------------------------

    /// Open a conversation: replace the session wholesale, clear the
    /// store, mark read, and run the initial history load.
    pub async fn open_conversation(&self, conversation: ConversationId, partner: Partner) {
        let generation = self.next_generation();
        {
            let mut session = self.session.lock().await;
            *session = Some(ConversationSession::new(
                conversation,
                partner.clone(),
                generation,
            ));
        }
        self.store.lock().await.clear();
        self.tracker.lock().await.reset();
        if self.reply.lock().await.cancel() {
            self.emit(EngineEvent::ReplyChanged(None));
        }
        *self.results.lock().await = None;
        self.emit(EngineEvent::ConversationOpened {
            conversation,
            partner,
        });

        // Mark read right away rather than after history lands; a failure
        // here only costs the indicator update.
        match self.read_state.mark_read(conversation, self.identity.id).await {
            Ok(has_unread) => self.emit(EngineEvent::UnreadIndicator { has_unread }),
            Err(e) => tracing::warn!(err = %e, "mark-as-read failed on open"),
        }

        let fetched = self
            .loader
            .fetch_at(conversation, self.identity.id, 0)
            .await;
        self.finish_initial(generation, conversation, fetched, None)
            .await;
    }

    /// Shared tail of the two initial-style load paths (open and jump).
    async fn finish_initial(
        &self,
        generation: Generation,
        conversation: ConversationId,
        fetched: Result<crate::history::FetchedPage, HistoryError>,
        scroll_to: Option<MessageId>,
    ) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return;
        };
        if !session.is_current(generation) || session.conversation != conversation {
            tracing::debug!("discarding stale initial load result");
            return;
        }

        match fetched {
            Err(HistoryError::AccessDenied(_)) => {
                self.emit(EngineEvent::EmptyState(EmptyReason::AccessDenied));
            }
            Err(e) => {
                tracing::warn!(err = %e, "initial history load failed");
                self.emit(EngineEvent::EmptyState(EmptyReason::LoadFailed));
            }
            Ok(page) => {
                if page.page == 0 {
                    session.cursor = crate::session::PageCursor::at_bottom(!page.short);
                    session.position = ViewPosition::AtBottom;
                } else {
                    session.commit_jump(page.page);
                    if page.short {
                        session.cursor.has_more_older = false;
                    }
                }

                if page.messages.is_empty() {
                    self.store.lock().await.clear();
                    self.emit(EngineEvent::EmptyState(EmptyReason::NoMessages));
                } else {
                    let mut store = self.store.lock().await;
                    store.merge(page.messages, MergeDirection::Initial);
                    let mut tracker = self.tracker.lock().await;
                    if tracker.seed_from_history(&store) {
                        session.partner_has_read = true;
                        self.emit(EngineEvent::PartnerRead);
                    }
                }

                if let Some(target) = scroll_to {
                    self.emit(EngineEvent::ScrollTo(target));
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Infinite scroll
    // -----------------------------------------------------------------

    /// The viewer hit the top of the list: fetch one older page.
    ///
    /// Guarded by the session's loading flag; a second call from the same
    /// scroll gesture is a no-op. Failures leave pagination untouched —
    /// scrolling again retries.
    pub async fn load_older(&self) {
        let Some((conversation, generation, target)) = ({
            let mut guard = self.session.lock().await;
            guard.as_mut().and_then(|session| {
                if session.loading {
                    return None;
                }
                let target =
                    HistoryLoader::<H>::target_page(&session.cursor, LoadDirection::Older)?;
                session.loading = true;
                Some((session.conversation, session.generation, target))
            })
        }) else {
            return;
        };

        let fetched = self
            .loader
            .fetch_at(conversation, self.identity.id, target)
            .await;

        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return;
        };
        if !session.is_current(generation) {
            tracing::debug!("discarding stale older-page result");
            return;
        }
        session.loading = false;

        match fetched {
            Err(e) => {
                tracing::warn!(err = %e, page = target, "older page load failed, retryable");
            }
            Ok(page) => {
                if page.messages.is_empty() {
                    session.exhaust_older();
                } else {
                    session.commit_older(page.page, page.short);
                    self.store
                        .lock()
                        .await
                        .merge(page.messages, MergeDirection::Prepend);
                }
            }
        }
    }

    /// The viewer hit the bottom while in history: fetch one newer page.
    pub async fn load_newer(&self) {
        let Some((conversation, generation, target)) = ({
            let mut guard = self.session.lock().await;
            guard.as_mut().and_then(|session| {
                if session.loading {
                    return None;
                }
                let target =
                    HistoryLoader::<H>::target_page(&session.cursor, LoadDirection::Newer)?;
                session.loading = true;
                Some((session.conversation, session.generation, target))
            })
        }) else {
            return;
        };

        let fetched = self
            .loader
            .fetch_at(conversation, self.identity.id, target)
            .await;

        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return;
        };
        if !session.is_current(generation) {
            tracing::debug!("discarding stale newer-page result");
            return;
        }
        session.loading = false;

        match fetched {
            Err(e) => {
                tracing::warn!(err = %e, page = target, "newer page load failed, retryable");
            }
            Ok(page) => {
                session.commit_newer(page.page);
                self.store
                    .lock()
                    .await
                    .merge(page.messages, MergeDirection::Append);
            }
        }
    }

    /// Walk back to the present: one `newer` load per page until page 0.
    ///
    /// Each intermediate page is fetched, validated, and rendered rather
    /// than assuming a single large skip is consistent. The walk stops
    /// silently if the generation moves (conversation switch or jump),
    /// and stops in place on a fetch failure.
    pub async fn return_to_present(&self) {
        let Some((conversation, generation, start_page)) = ({
            let mut guard = self.session.lock().await;
            guard.as_mut().and_then(|session| {
                if session.loading || !session.begin_return() {
                    return None;
                }
                session.loading = true;
                Some((session.conversation, session.generation, session.cursor.page))
            })
        }) else {
            return;
        };

        let mut page = start_page;
        let mut pages_walked = 0u32;
        while page > 0 {
            let target = page - 1;
            let fetched = self
                .loader
                .fetch_at(conversation, self.identity.id, target)
                .await;

            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_mut() else {
                return;
            };
            if !session.is_current(generation) {
                tracing::debug!("return-to-present abandoned after context switch");
                return;
            }

            match fetched {
                Err(e) => {
                    tracing::warn!(err = %e, page = target, "return-to-present stopped by fetch failure");
                    session.loading = false;
                    session.position = ViewPosition::InHistory { page };
                    return;
                }
                Ok(fetched_page) => {
                    session.commit_newer(target);
                    pages_walked += 1;
                    self.store
                        .lock()
                        .await
                        .merge(fetched_page.messages, MergeDirection::Append);
                    page = target;
                    if page == 0 {
                        session.loading = false;
                    }
                }
            }
        }

        self.emit(EngineEvent::ReturnedToPresent {
            pages: pages_walked,
        });
    }

    // -----------------------------------------------------------------
    // Search / jump
    // -----------------------------------------------------------------

    /// Run a keyword query scoped to the open conversation.
    ///
    /// A fresh query replaces the prior result walk. Returns the number
    /// of hits (0 when no conversation is open or the query failed).
    pub async fn search(&self, keyword: &str) -> usize {
        let Some(conversation) = self.open_conversation_id().await else {
            return 0;
        };
        match self
            .search_index
            .search(conversation, self.identity.id, keyword)
            .await
        {
            Ok(hits) => {
                let count = hits.len();
                *self.results.lock().await = Some(SearchResults::new(hits));
                self.emit(EngineEvent::SearchCompleted { hits: count });
                count
            }
            Err(e) => {
                tracing::warn!(err = %e, "search query failed");
                *self.results.lock().await = None;
                0
            }
        }
    }

    /// Step to the next search hit and jump the view to it.
    ///
    /// Returns the hit's id, or `None` once the walk is exhausted.
    pub async fn jump_to_next_hit(&self) -> Option<MessageId> {
        let target = {
            let mut results = self.results.lock().await;
            results.as_mut().and_then(|r| r.advance().map(|m| m.id))
        };
        if let Some(id) = target {
            self.jump_to(id).await;
        }
        target
    }

    /// Jump the view to an arbitrary message.
    ///
    /// Resolves the message's page, then runs an initial-style reset of
    /// the store targeting that page — through the same generation guard
    /// as the organic load path, so an in-flight scroll load cannot
    /// clobber the landing.
    pub async fn jump_to(&self, target: MessageId) {
        let Some((conversation, generation)) = ({
            let mut guard = self.session.lock().await;
            guard.as_mut().map(|session| {
                // Fresh authoritative context: in-flight organic loads die.
                let generation = self.next_generation();
                session.generation = generation;
                session.loading = false;
                (session.conversation, generation)
            })
        }) else {
            return;
        };

        let located = self.loader.locate(conversation, target).await;
        let page = {
            let guard = self.session.lock().await;
            let Some(session) = guard.as_ref() else {
                return;
            };
            if !session.is_current(generation) {
                return;
            }
            match located {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(err = %e, "could not resolve jump target");
                    return;
                }
            }
        };

        let fetched = self
            .loader
            .fetch_at(conversation, self.identity.id, page)
            .await;
        self.finish_initial(generation, conversation, fetched, Some(target))
            .await;
    }

    // -----------------------------------------------------------------
    // Sending & reply threading
    // -----------------------------------------------------------------

    /// Publish a message to the open conversation's partner.
    ///
    /// The active reply selection, if any, is attached to the payload and
    /// cleared once the publish succeeds. The store is not touched here:
    /// the server echo arrives on the sender's own inbox topic and is
    /// inserted through the normal inbound path (dedup keeps a future
    /// optimistic insert safe).
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] for a missing conversation, invalid body, or
    /// transport failure (the reply selection survives a failed publish).
    pub async fn send_message(&self, body: &str) -> Result<(), SendError> {
        let body = body.trim();
        validate_body(body)?;

        let (conversation, receiver) = {
            let guard = self.session.lock().await;
            let session = guard.as_ref().ok_or(SendError::NoConversation)?;
            (session.conversation, session.partner.id)
        };
        let reply_to = {
            let reply = self.reply.lock().await;
            reply.current().map(|s| s.target)
        };

        let outbound = OutboundMessage {
            conversation,
            sender: self.identity.id,
            sender_name: self.identity.name.clone(),
            receiver,
            body: body.to_string(),
            reply_to,
        };
        self.publisher.publish_outbound(&outbound).await?;

        if self.reply.lock().await.cancel() {
            self.emit(EngineEvent::ReplyChanged(None));
        }
        Ok(())
    }

    /// Toggle a rendered message as the reply target.
    ///
    /// Returns `None` when the message is not in the store or its body is
    /// hidden by moderation.
    pub async fn toggle_reply(&self, target: MessageId) -> Option<ToggleOutcome> {
        let selection = {
            let store = self.store.lock().await;
            let message = store.message(&target)?;
            if message.moderation.is_hidden() {
                return None;
            }
            ReplyContext::selection_for(target, &message.sender_name, &message.body)
        };

        let (outcome, current) = {
            let mut reply = self.reply.lock().await;
            let outcome = reply.toggle(selection);
            (outcome, reply.current().cloned())
        };
        self.emit(EngineEvent::ReplyChanged(current));
        Some(outcome)
    }

    /// Explicitly clear the reply selection.
    pub async fn cancel_reply(&self) {
        if self.reply.lock().await.cancel() {
            self.emit(EngineEvent::ReplyChanged(None));
        }
    }

    // -----------------------------------------------------------------
    // Moderation
    // -----------------------------------------------------------------

    /// Report a message. A duplicate report is treated as success: either
    /// way the message's status becomes pending.
    ///
    /// # Errors
    ///
    /// Propagates [`ModerationError`] for outright rejections or backend
    /// failures (the status flag is left untouched).
    pub async fn report_message(
        &self,
        target: MessageId,
        reason: &str,
    ) -> Result<ReportOutcome, ModerationError> {
        let outcome = self
            .moderation
            .submit_report(self.identity.id, target, reason)
            .await?;
        self.store
            .lock()
            .await
            .set_moderation(&target, ModerationStatus::ReportedPending);
        Ok(outcome)
    }

    /// Apply a moderation outcome pushed by the backend (hide / reject).
    pub async fn apply_moderation(&self, target: MessageId, status: ModerationStatus) -> bool {
        self.store.lock().await.set_moderation(&target, status)
    }

    // -----------------------------------------------------------------
    // Push-channel input
    // -----------------------------------------------------------------

    /// Handle a message delivered on the viewer's inbox topic.
    ///
    /// A message for the open conversation is inserted (dedup makes the
    /// echo of a history-loaded message a no-op); inbound partner traffic
    /// for the open view triggers a mark-as-read. A partner message for
    /// any other conversation surfaces only as an unread hint.
    pub async fn handle_inbound(&self, inbound: InboundMessage) {
        let message = inbound.message;
        let from_self = message.sender == self.identity.id;
        let conversation = message.conversation;

        // The conversation check and the insert share one session guard so
        // a concurrent conversation switch cannot slip a stale message
        // into the freshly cleared store.
        let inserted = {
            let guard = self.session.lock().await;
            if guard
                .as_ref()
                .is_some_and(|session| session.conversation == conversation)
            {
                Some(self.store.lock().await.insert(message))
            } else {
                None
            }
        };

        match inserted {
            Some(inserted) => {
                if inserted && !from_self {
                    match self.read_state.mark_read(conversation, self.identity.id).await {
                        Ok(has_unread) => self.emit(EngineEvent::UnreadIndicator { has_unread }),
                        Err(e) => tracing::warn!(err = %e, "mark-as-read failed on delivery"),
                    }
                }
            }
            None => {
                if !from_self {
                    self.emit(EngineEvent::UnreadHint { conversation });
                }
            }
        }
    }

    /// Handle a receipt delivered on the conversation's read topic.
    pub async fn handle_receipt(&self, event: ReceiptEvent) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return;
        };
        if session.conversation != event.conversation {
            tracing::debug!(conversation = %event.conversation, "receipt for closed conversation ignored");
            return;
        }

        let mut store = self.store.lock().await;
        let mut tracker = self.tracker.lock().await;
        let was_read = tracker.partner_has_read();
        tracker.apply(&event, &mut store);
        let now_read = tracker.partner_has_read();
        session.partner_has_read = now_read;
        drop(tracker);
        drop(store);
        drop(guard);

        if now_read && !was_read {
            self.emit(EngineEvent::PartnerRead);
        }
    }

    // -----------------------------------------------------------------
    // Snapshots for the render coordinator and tests
    // -----------------------------------------------------------------

    /// The open conversation's id, if any.
    pub async fn open_conversation_id(&self) -> Option<ConversationId> {
        self.session.lock().await.as_ref().map(|s| s.conversation)
    }

    /// The current pagination position, if a conversation is open.
    pub async fn position(&self) -> Option<ViewPosition> {
        self.session.lock().await.as_ref().map(|s| s.position)
    }

    /// The current page cursor, if a conversation is open.
    pub async fn cursor(&self) -> Option<crate::session::PageCursor> {
        self.session.lock().await.as_ref().map(|s| s.cursor)
    }

    /// Snapshot of the messages in display order.
    pub async fn messages(&self) -> Vec<pawchat_proto::message::ChatMessage> {
        self.store.lock().await.messages().to_vec()
    }

    /// Snapshot of the rendered list, date markers included.
    pub async fn view_items(&self) -> Vec<ViewItem> {
        self.store.lock().await.items().to_vec()
    }

    /// Look up one rendered message.
    pub async fn message(&self, id: MessageId) -> Option<pawchat_proto::message::ChatMessage> {
        self.store.lock().await.message(&id).cloned()
    }

    /// Whether the partner has read through the latest sent message.
    pub async fn partner_has_read(&self) -> bool {
        self.tracker.lock().await.partner_has_read()
    }

    /// The active reply selection, if any.
    pub async fn reply_selection(&self) -> Option<ReplySelection> {
        self.reply.lock().await.current().cloned()
    }

    /// Remaining (un-stepped) search hits.
    pub async fn search_hits_remaining(&self) -> usize {
        self.results
            .lock()
            .await
            .as_ref()
            .map_or(0, SearchResults::remaining)
    }
}
