//! Reply selection state.
//!
//! At most one message can be "being replied to". Selecting a second
//! message replaces the first; selecting the current one again cancels
//! (toggle); sending consumes the selection.

use pawchat_proto::message::{MessageId, ReplyPreview};

/// The active reply target shown in the preview bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplySelection {
    /// The message being replied to.
    pub target: MessageId,
    /// Its author's display name.
    pub sender_name: String,
    /// Truncated body preview.
    pub preview: String,
}

/// What a toggle did to the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The message became the active selection.
    Selected,
    /// The message was already selected; the selection was cleared.
    Cleared,
}

/// Holder of the at-most-one reply selection.
#[derive(Debug, Default)]
pub struct ReplyContext {
    current: Option<ReplySelection>,
}

impl ReplyContext {
    /// Creates an empty context.
    #[must_use]
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// The active selection, if any.
    #[must_use]
    pub const fn current(&self) -> Option<&ReplySelection> {
        self.current.as_ref()
    }

    /// Toggle a message as the reply target.
    ///
    /// Selecting the currently selected message clears the selection;
    /// anything else replaces it.
    pub fn toggle(&mut self, selection: ReplySelection) -> ToggleOutcome {
        if self
            .current
            .as_ref()
            .is_some_and(|cur| cur.target == selection.target)
        {
            self.current = None;
            ToggleOutcome::Cleared
        } else {
            self.current = Some(selection);
            ToggleOutcome::Selected
        }
    }

    /// Explicitly clear the selection. Returns whether one was set.
    pub fn cancel(&mut self) -> bool {
        self.current.take().is_some()
    }

    /// Consume the selection for an outgoing send.
    ///
    /// The selection is cleared immediately; the returned id is attached
    /// to the publish payload.
    pub fn take(&mut self) -> Option<MessageId> {
        self.current.take().map(|s| s.target)
    }

    /// Build the preview a selection carries from the target's fields.
    #[must_use]
    pub fn selection_for(target: MessageId, sender_name: &str, body: &str) -> ReplySelection {
        let preview = ReplyPreview::new(target, sender_name, body);
        ReplySelection {
            target,
            sender_name: preview.sender_name,
            preview: preview.body,
        }
    }
}
