//! Ordered, deduplicated message store for the open conversation.
//!
//! Single source of truth for what the render coordinator shows. The store
//! keeps messages sorted ascending by `(timestamp, id)` — never by arrival
//! order, since push delivery and history-fetch delivery interleave
//! arbitrarily — and materializes the rendered list as [`ViewItem`]s with
//! a synthetic date marker wherever two adjacent messages fall on
//! different calendar dates.
//!
//! Mutations emit [`StoreEvent`]s on an mpsc channel. The renderer
//! re-reads store state on each event; events carry just enough shape
//! (reset / prepend count / append count / point update) to re-anchor
//! scroll position without re-deriving business logic.

use std::collections::HashSet;

use chrono::NaiveDate;
use tokio::sync::mpsc;

use pawchat_proto::message::{ChatMessage, MessageId, ModerationStatus, Timestamp, UserId};

/// One slot in the rendered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewItem {
    /// Synthetic separator: the messages after it fall on this date.
    DateMarker(NaiveDate),
    /// A message, identified by id; resolve via [`MessageStore::message`].
    Entry(MessageId),
}

/// Which mutable message field a point update touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatedField {
    /// The read flag flipped.
    Read,
    /// The moderation status changed.
    Moderation,
}

/// Store mutation notifications for the render coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The whole list changed; re-render from scratch and scroll to the
    /// bottom (most recent).
    Reset,
    /// `items` view items were inserted before the previous first message.
    /// The renderer adjusts its scroll offset by this count so the message
    /// that was first on screen stays put.
    Prepended {
        /// Net number of items the existing content shifted down by.
        items: usize,
    },
    /// `items` view items were appended after the previous last message.
    /// The renderer scrolls only if the viewer was already at the bottom.
    Appended {
        /// Number of items appended.
        items: usize,
    },
    /// A single message's field changed in place.
    PointUpdate {
        /// The message that changed.
        id: MessageId,
        /// Which field changed.
        field: UpdatedField,
    },
}

/// Batch merge modes, one per history-load direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDirection {
    /// Replace the visible collection entirely.
    Initial,
    /// Insert older messages before the current earliest entry.
    Prepend,
    /// Insert newer messages after the current latest entry.
    Append,
}

/// Convert a message timestamp to its calendar date (UTC).
fn calendar_date(ts: Timestamp) -> NaiveDate {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(
        i64::try_from(ts.as_millis()).unwrap_or(0),
    )
    .unwrap_or(chrono::DateTime::UNIX_EPOCH)
    .date_naive()
}

/// Build view items for a run of messages, given the date already rendered
/// at the boundary just before the run (`None` at the top of the list).
fn build_items(messages: &[ChatMessage], boundary: Option<NaiveDate>) -> Vec<ViewItem> {
    let mut items = Vec::with_capacity(messages.len() + 4);
    let mut last_date = boundary;
    for message in messages {
        let date = calendar_date(message.sent_at);
        if last_date != Some(date) {
            items.push(ViewItem::DateMarker(date));
            last_date = Some(date);
        }
        items.push(ViewItem::Entry(message.id));
    }
    items
}

/// The ordered, deduplicated collection behind the open conversation view.
pub struct MessageStore {
    /// Messages sorted ascending by `(sent_at, id)`.
    messages: Vec<ChatMessage>,
    /// Every id ever inserted since the last reset; enforces uniqueness.
    seen: HashSet<MessageId>,
    /// Materialized rendered list, date markers included.
    items: Vec<ViewItem>,
    /// Mutation events for the render coordinator.
    event_tx: mpsc::Sender<StoreEvent>,
}

impl MessageStore {
    /// Creates an empty store and the event receiver the render
    /// coordinator consumes.
    #[must_use]
    pub fn new(event_buffer: usize) -> (Self, mpsc::Receiver<StoreEvent>) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer);
        let store = Self {
            messages: Vec::new(),
            seen: HashSet::new(),
            items: Vec::new(),
            event_tx,
        };
        (store, event_rx)
    }

    /// Number of messages (date markers excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The rendered list, in display order.
    #[must_use]
    pub fn items(&self) -> &[ViewItem] {
        &self.items
    }

    /// Messages in display order.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Look up a message by id.
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == *id)
    }

    /// Whether an id has been inserted since the last reset.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    /// Calendar date of the last rendered message, if any.
    fn trailing_date(&self) -> Option<NaiveDate> {
        self.messages.last().map(|m| calendar_date(m.sent_at))
    }

    /// Drop everything, including the dedup set. Emits [`StoreEvent::Reset`].
    pub fn clear(&mut self) {
        self.messages.clear();
        self.seen.clear();
        self.items.clear();
        self.emit(StoreEvent::Reset);
    }

    /// Insert one message, typically a live push delivery.
    ///
    /// No-op (returns `false`) if the id is already present. Messages at or
    /// after the current tail take the append fast path; an out-of-order
    /// arrival falls back to a full rebuild so the order invariant holds
    /// regardless of delivery interleaving.
    pub fn insert(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id) {
            tracing::debug!(id = %message.id, "duplicate message dropped");
            return false;
        }

        let key = message.sort_key();
        let at_tail = self.messages.last().is_none_or(|m| m.sort_key() <= key);
        if at_tail {
            let boundary = self.trailing_date();
            let date = calendar_date(message.sent_at);
            let mut added = 1;
            if boundary != Some(date) {
                self.items.push(ViewItem::DateMarker(date));
                added += 1;
            }
            self.items.push(ViewItem::Entry(message.id));
            self.messages.push(message);
            self.emit(StoreEvent::Appended { items: added });
        } else {
            tracing::debug!(id = %message.id, "out-of-order arrival, rebuilding view");
            let pos = self.messages.partition_point(|m| m.sort_key() <= key);
            self.messages.insert(pos, message);
            self.items = build_items(&self.messages, None);
            self.emit(StoreEvent::Reset);
        }
        true
    }

    /// Apply a batch in the given direction. Returns how many messages were
    /// newly inserted (duplicates are skipped silently).
    pub fn merge(&mut self, batch: Vec<ChatMessage>, direction: MergeDirection) -> usize {
        match direction {
            MergeDirection::Initial => self.merge_initial(batch),
            MergeDirection::Prepend => self.merge_prepend(batch),
            MergeDirection::Append => self.merge_append(batch),
        }
    }

    /// Replace the collection entirely; position is bottom (most recent).
    fn merge_initial(&mut self, batch: Vec<ChatMessage>) -> usize {
        self.messages.clear();
        self.seen.clear();

        let mut fresh: Vec<ChatMessage> = Vec::with_capacity(batch.len());
        for message in batch {
            if self.seen.insert(message.id) {
                fresh.push(message);
            }
        }
        fresh.sort_by_key(ChatMessage::sort_key);

        let count = fresh.len();
        self.items = build_items(&fresh, None);
        self.messages = fresh;
        self.emit(StoreEvent::Reset);
        count
    }

    /// Insert an older page before the current earliest entry, preserving
    /// the viewer's scroll anchor via the `Prepended` item count.
    fn merge_prepend(&mut self, batch: Vec<ChatMessage>) -> usize {
        let mut fresh: Vec<ChatMessage> = batch
            .into_iter()
            .filter(|m| !self.seen.contains(&m.id))
            .collect();
        if fresh.is_empty() {
            return 0;
        }
        fresh.sort_by_key(ChatMessage::sort_key);
        for message in &fresh {
            self.seen.insert(message.id);
        }

        // An older page must wholly precede existing content; anything else
        // means the server's paging shifted under us — rebuild instead of
        // corrupting the seam.
        let ordered = match (fresh.last(), self.messages.first()) {
            (Some(last), Some(first)) => last.sort_key() < first.sort_key(),
            _ => true,
        };
        if !ordered {
            tracing::warn!("prepended batch overlaps existing range, rebuilding view");
            return self.rebuild_with(fresh);
        }

        let count = fresh.len();
        let mut block = build_items(&fresh, None);
        let block_len = block.len();

        // Seam check, re-done on every merge: the existing list starts with
        // a marker for its first date. If the last prepended message shares
        // that date, the marker is now a duplicate and must go; if dates
        // differ, it is exactly the separator the seam needs.
        let seam_duplicate = match (fresh.last(), self.items.first()) {
            (Some(last_new), Some(ViewItem::DateMarker(first_date))) => {
                calendar_date(last_new.sent_at) == *first_date
            }
            _ => false,
        };
        let mut removed = 0;
        if seam_duplicate {
            self.items.remove(0);
            removed = 1;
        }

        block.append(&mut self.items);
        self.items = block;

        fresh.append(&mut self.messages);
        self.messages = fresh;

        self.emit(StoreEvent::Prepended {
            items: block_len - removed,
        });
        count
    }

    /// Append a newer page after the current latest entry.
    fn merge_append(&mut self, batch: Vec<ChatMessage>) -> usize {
        let mut fresh: Vec<ChatMessage> = batch
            .into_iter()
            .filter(|m| !self.seen.contains(&m.id))
            .collect();
        if fresh.is_empty() {
            return 0;
        }
        fresh.sort_by_key(ChatMessage::sort_key);
        for message in &fresh {
            self.seen.insert(message.id);
        }

        let ordered = match (self.messages.last(), fresh.first()) {
            (Some(last), Some(first)) => last.sort_key() < first.sort_key(),
            _ => true,
        };
        if !ordered {
            tracing::warn!("appended batch overlaps existing range, rebuilding view");
            return self.rebuild_with(fresh);
        }

        let count = fresh.len();
        // The trailing date is the seam boundary: a marker appears only if
        // the first appended message starts a new calendar date.
        let block = build_items(&fresh, self.trailing_date());
        let added = block.len();
        self.items.extend(block);
        self.messages.extend(fresh);

        self.emit(StoreEvent::Appended { items: added });
        count
    }

    /// Merge an overlapping batch by full re-sort and re-render.
    fn rebuild_with(&mut self, mut fresh: Vec<ChatMessage>) -> usize {
        let count = fresh.len();
        self.messages.append(&mut fresh);
        self.messages.sort_by_key(ChatMessage::sort_key);
        self.items = build_items(&self.messages, None);
        self.emit(StoreEvent::Reset);
        count
    }

    /// Set a message's moderation status in place.
    ///
    /// Returns `false` if the message is not present or already carries the
    /// status. Emits a `PointUpdate` when something actually changed.
    pub fn set_moderation(&mut self, id: &MessageId, status: ModerationStatus) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == *id) else {
            return false;
        };
        if message.moderation == status {
            return false;
        }
        message.moderation = status;
        self.emit(StoreEvent::PointUpdate {
            id: *id,
            field: UpdatedField::Moderation,
        });
        true
    }

    /// Mark every message authored by `author` as read.
    ///
    /// Idempotent: messages already carrying the read flag are untouched
    /// and produce no event. Returns how many messages flipped.
    pub fn mark_sent_read(&mut self, author: UserId) -> usize {
        let mut flipped = Vec::new();
        for message in &mut self.messages {
            if message.sender == author && !message.read {
                message.read = true;
                flipped.push(message.id);
            }
        }
        for id in &flipped {
            self.emit(StoreEvent::PointUpdate {
                id: *id,
                field: UpdatedField::Read,
            });
        }
        flipped.len()
    }

    /// Best-effort event emission; a saturated renderer loses shape hints
    /// but can always recover by re-reading store state.
    fn emit(&self, event: StoreEvent) {
        let _ = self.event_tx.try_send(event);
    }
}
