//! Per-conversation coordination state.
//!
//! A [`ConversationSession`] is created when the user selects a
//! conversation and replaced wholesale — never mutated across — when a
//! different one is selected. It carries the generation token that
//! logically cancels stale fetches, the pagination cursor, the loading
//! guard, and the [`ViewPosition`] state machine.

use pawchat_proto::message::{ConversationId, UserId};

/// Monotonic token identifying one "authoritative load context".
///
/// Every fetch captures the session's generation at issue time; a result
/// whose generation no longer matches on completion is discarded
/// unapplied. This is logical cancellation — the network call itself is
/// never aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Wraps a raw counter value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

/// The conversation partner's identity, denormalized for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partner {
    /// Partner's member id.
    pub id: UserId,
    /// Partner's display name.
    pub name: String,
}

/// Pagination cursor over the history service's page space.
///
/// Page 0 is the newest window; higher pages are older.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    /// The page currently at the loaded window's old edge.
    pub page: u32,
    /// Whether older pages may still exist.
    pub has_more_older: bool,
    /// Whether newer pages exist between the window and the present.
    pub has_more_newer: bool,
}

impl PageCursor {
    /// Cursor for a freshly loaded page-0 view.
    #[must_use]
    pub const fn at_bottom(has_more_older: bool) -> Self {
        Self {
            page: 0,
            has_more_older,
            has_more_newer: false,
        }
    }

    /// Cursor after jumping straight to `page`.
    #[must_use]
    pub const fn at_page(page: u32) -> Self {
        Self {
            page,
            // Whether older history exists past the target page is unknown
            // until a shorter-than-full page says otherwise.
            has_more_older: true,
            has_more_newer: page > 0,
        }
    }
}

/// Where the viewer stands in the pagination state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPosition {
    /// Viewing the newest window (page 0).
    AtBottom,
    /// Scrolled back into history; `page` > 0 is the loaded old edge.
    InHistory {
        /// The deepest loaded page.
        page: u32,
    },
    /// Walking back toward the present, one `newer` load per page.
    Returning {
        /// The page the walk started from.
        from: u32,
    },
}

/// Coordination state for the currently open conversation.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    /// The open conversation.
    pub conversation: ConversationId,
    /// The counterpart in the conversation.
    pub partner: Partner,
    /// Authoritative-load token; see [`Generation`].
    pub generation: Generation,
    /// Pagination cursor.
    pub cursor: PageCursor,
    /// Guard against duplicate older/newer fetches from one scroll
    /// gesture. Known limitation inherited from the engine this models: a
    /// fetch that never resolves leaves the guard set forever.
    pub loading: bool,
    /// Pagination state machine position.
    pub position: ViewPosition,
    /// Read watermark: whether the partner has read through the viewer's
    /// latest sent message. Mutated only by receipt events.
    pub partner_has_read: bool,
}

impl ConversationSession {
    /// Creates the session for a newly selected conversation.
    #[must_use]
    pub const fn new(
        conversation: ConversationId,
        partner: Partner,
        generation: Generation,
    ) -> Self {
        Self {
            conversation,
            partner,
            generation,
            cursor: PageCursor::at_bottom(true),
            loading: false,
            position: ViewPosition::AtBottom,
            partner_has_read: false,
        }
    }

    /// Whether `generation` is still the authoritative load context.
    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.generation == generation
    }

    /// Commit a successful older-page load: the cursor edge moves to
    /// `page` and the position enters (or deepens) history.
    pub fn commit_older(&mut self, page: u32, short_page: bool) {
        self.cursor.page = page;
        if short_page {
            self.cursor.has_more_older = false;
        }
        self.position = ViewPosition::InHistory { page };
    }

    /// Record that an older fetch came back empty: the edge stays put and
    /// no more older pages exist.
    pub fn exhaust_older(&mut self) {
        self.cursor.has_more_older = false;
    }

    /// Commit a successful newer-page load, terminating at the bottom when
    /// page 0 is reached.
    pub fn commit_newer(&mut self, page: u32) {
        self.cursor.page = page;
        self.cursor.has_more_newer = page > 0;
        self.position = if page == 0 {
            ViewPosition::AtBottom
        } else {
            match self.position {
                ViewPosition::Returning { from } => ViewPosition::Returning { from },
                _ => ViewPosition::InHistory { page },
            }
        };
    }

    /// Enter the sequential return walk from the current in-history page.
    ///
    /// Returns `false` when already at the bottom (nothing to do).
    pub fn begin_return(&mut self) -> bool {
        match self.position {
            ViewPosition::InHistory { page } if page > 0 => {
                self.position = ViewPosition::Returning { from: page };
                true
            }
            _ => false,
        }
    }

    /// Commit a jump to an arbitrary page (initial-style reset).
    pub fn commit_jump(&mut self, page: u32) {
        self.cursor = PageCursor::at_page(page);
        self.loading = false;
        self.position = if page == 0 {
            ViewPosition::AtBottom
        } else {
            ViewPosition::InHistory { page }
        };
    }
}
