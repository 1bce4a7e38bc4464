// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the satellite state machines: read receipts,
//! reply threading, and moderation reporting.

use std::sync::Arc;

use parking_lot::Mutex;
use pawchat::engine::{ChatEngine, EngineConfig, EngineEvent, LocalIdentity, SendError};
use pawchat::memory::InMemoryBackend;
use pawchat::reply::ToggleOutcome;
use pawchat::session::Partner;
use pawchat::transport::{Publisher, TransportError};
use pawchat_proto::message::{ConversationId, ModerationStatus, Timestamp, UserId};
use pawchat_proto::payload::{OutboundMessage, ReceiptEvent};
use tokio::sync::mpsc;

const BASE_MS: u64 = 1_700_000_000_000;

/// Publisher that records every outbound payload.
#[derive(Clone, Default)]
struct CapturePublisher {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    fail: Arc<Mutex<bool>>,
}

impl CapturePublisher {
    fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

impl Publisher for CapturePublisher {
    async fn publish_outbound(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        if *self.fail.lock() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

type TestEngine = ChatEngine<
    CapturePublisher,
    InMemoryBackend,
    InMemoryBackend,
    InMemoryBackend,
    InMemoryBackend,
>;

struct Fixture {
    engine: Arc<TestEngine>,
    events: mpsc::Receiver<EngineEvent>,
    publisher: CapturePublisher,
    backend: InMemoryBackend,
    conversation: ConversationId,
}

/// Seeded conversation between user 1 (viewer) and user 2, opened.
async fn fixture() -> Fixture {
    let backend = InMemoryBackend::new();
    let conversation = backend.create_conversation(UserId::new(1), UserId::new(2));
    for (i, (sender, body)) in [
        (1, "is Biscuit's harness back in stock?"),
        (2, "yes, both sizes"),
        (1, "great, I'll take the small one"),
    ]
    .into_iter()
    .enumerate()
    {
        backend.seed_message(
            conversation,
            UserId::new(sender),
            if sender == 1 { "Ana" } else { "Shop" },
            body,
            Timestamp::from_millis(BASE_MS + (i as u64) * 1000),
            false,
        );
    }

    let publisher = CapturePublisher::default();
    let (engine, events, _store_rx) = ChatEngine::new(
        LocalIdentity {
            id: UserId::new(1),
            name: "Ana".into(),
        },
        publisher.clone(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        &EngineConfig::default(),
    );
    let engine = Arc::new(engine);
    engine
        .open_conversation(
            conversation,
            Partner {
                id: UserId::new(2),
                name: "Shop".into(),
            },
        )
        .await;

    Fixture {
        engine,
        events,
        publisher,
        backend,
        conversation,
    }
}

fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Read receipts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn partner_receipt_marks_sent_messages_and_raises_watermark() {
    let mut fx = fixture().await;
    drain(&mut fx.events);

    fx.engine
        .handle_receipt(ReceiptEvent {
            conversation: fx.conversation,
            reader: UserId::new(2),
        })
        .await;

    assert!(fx.engine.partner_has_read().await);
    let events = drain(&mut fx.events);
    assert!(events.contains(&EngineEvent::PartnerRead));

    let mine_all_read = fx
        .engine
        .messages()
        .await
        .iter()
        .filter(|m| m.sender == UserId::new(1))
        .all(|m| m.read);
    assert!(mine_all_read);
}

#[tokio::test]
async fn second_receipt_emits_no_duplicate_event() {
    let mut fx = fixture().await;
    fx.engine
        .handle_receipt(ReceiptEvent {
            conversation: fx.conversation,
            reader: UserId::new(2),
        })
        .await;
    drain(&mut fx.events);

    fx.engine
        .handle_receipt(ReceiptEvent {
            conversation: fx.conversation,
            reader: UserId::new(2),
        })
        .await;

    let events = drain(&mut fx.events);
    assert!(
        !events.contains(&EngineEvent::PartnerRead),
        "idempotent receipt must not re-announce"
    );
}

#[tokio::test]
async fn own_receipt_echo_is_ignored() {
    let mut fx = fixture().await;
    drain(&mut fx.events);

    fx.engine
        .handle_receipt(ReceiptEvent {
            conversation: fx.conversation,
            reader: UserId::new(1),
        })
        .await;

    assert!(!fx.engine.partner_has_read().await);
    assert!(drain(&mut fx.events).is_empty());
}

#[tokio::test]
async fn receipt_for_other_conversation_is_ignored() {
    let mut fx = fixture().await;
    drain(&mut fx.events);
    let other = fx
        .backend
        .create_conversation(UserId::new(1), UserId::new(7));

    fx.engine
        .handle_receipt(ReceiptEvent {
            conversation: other,
            reader: UserId::new(7),
        })
        .await;

    assert!(!fx.engine.partner_has_read().await);
}

#[tokio::test]
async fn watermark_seeds_from_already_read_history() {
    let backend = InMemoryBackend::new();
    let conversation = backend.create_conversation(UserId::new(1), UserId::new(2));
    backend.seed_message(
        conversation,
        UserId::new(1),
        "Ana",
        "seen long ago",
        Timestamp::from_millis(BASE_MS),
        true,
    );

    let (engine, mut events, _store_rx) = ChatEngine::new(
        LocalIdentity {
            id: UserId::new(1),
            name: "Ana".into(),
        },
        CapturePublisher::default(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        backend,
        &EngineConfig::default(),
    );
    engine
        .open_conversation(
            conversation,
            Partner {
                id: UserId::new(2),
                name: "Shop".into(),
            },
        )
        .await;

    assert!(engine.partner_has_read().await);
    assert!(drain(&mut events).contains(&EngineEvent::PartnerRead));
}

#[tokio::test]
async fn opening_a_conversation_reports_global_unread_state() {
    let mut fx = fixture().await;
    // The open in fixture() already marked the only conversation read.
    let events = drain(&mut fx.events);
    assert!(
        events.contains(&EngineEvent::UnreadIndicator { has_unread: false }),
        "expected an unread-indicator update, got {events:?}"
    );
}

// ---------------------------------------------------------------------------
// Reply threading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn toggle_selects_then_clears() {
    let mut fx = fixture().await;
    drain(&mut fx.events);
    let target = fx.engine.messages().await[1].id;

    assert_eq!(
        fx.engine.toggle_reply(target).await,
        Some(ToggleOutcome::Selected)
    );
    let selection = fx.engine.reply_selection().await.unwrap();
    assert_eq!(selection.target, target);
    assert_eq!(selection.sender_name, "Shop");

    // Selecting the same message again clears (toggle semantics).
    assert_eq!(
        fx.engine.toggle_reply(target).await,
        Some(ToggleOutcome::Cleared)
    );
    assert!(fx.engine.reply_selection().await.is_none());

    let events = drain(&mut fx.events);
    let reply_changes: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::ReplyChanged(_)))
        .collect();
    assert_eq!(reply_changes.len(), 2);
}

#[tokio::test]
async fn selecting_a_second_message_replaces_the_first() {
    let fx = fixture().await;
    let messages = fx.engine.messages().await;

    fx.engine.toggle_reply(messages[0].id).await;
    fx.engine.toggle_reply(messages[1].id).await;

    let selection = fx.engine.reply_selection().await.unwrap();
    assert_eq!(selection.target, messages[1].id);
}

#[tokio::test]
async fn send_attaches_reply_and_clears_it() {
    let fx = fixture().await;
    let target = fx.engine.messages().await[1].id;
    fx.engine.toggle_reply(target).await;

    fx.engine.send_message("taking this one").await.unwrap();

    let sent = fx.publisher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].reply_to, Some(target));
    assert_eq!(sent[0].receiver, UserId::new(2));
    assert!(
        fx.engine.reply_selection().await.is_none(),
        "selection is cleared immediately after send"
    );

    // The next send carries no reply.
    fx.engine.send_message("unrelated").await.unwrap();
    assert_eq!(fx.publisher.sent()[1].reply_to, None);
}

#[tokio::test]
async fn failed_send_keeps_the_reply_selection() {
    let fx = fixture().await;
    let target = fx.engine.messages().await[1].id;
    fx.engine.toggle_reply(target).await;

    fx.publisher.set_failing(true);
    let result = fx.engine.send_message("will not go out").await;
    assert!(matches!(result, Err(SendError::Transport(_))));
    assert!(fx.engine.reply_selection().await.is_some());
}

#[tokio::test]
async fn empty_body_fails_validation_before_publish() {
    let fx = fixture().await;
    let result = fx.engine.send_message("   ").await;
    assert!(matches!(result, Err(SendError::Validation(_))));
    assert!(fx.publisher.sent().is_empty());
}

#[tokio::test]
async fn send_without_open_conversation_is_refused() {
    let backend = InMemoryBackend::new();
    let (engine, _events, _store_rx) = ChatEngine::new(
        LocalIdentity {
            id: UserId::new(1),
            name: "Ana".into(),
        },
        CapturePublisher::default(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        backend,
        &EngineConfig::default(),
    );
    let result = engine.send_message("hello?").await;
    assert!(matches!(result, Err(SendError::NoConversation)));
}

// ---------------------------------------------------------------------------
// Moderation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reporting_marks_the_message_pending() {
    let fx = fixture().await;
    let target = fx.engine.messages().await[1].id;

    fx.engine.report_message(target, "abusive").await.unwrap();

    assert_eq!(
        fx.engine.message(target).await.unwrap().moderation,
        ModerationStatus::ReportedPending
    );
}

#[tokio::test]
async fn duplicate_report_is_success_equivalent() {
    let fx = fixture().await;
    let target = fx.engine.messages().await[1].id;

    fx.engine.report_message(target, "abusive").await.unwrap();
    // Conflict comes back as Ok; the status stays pending either way.
    let outcome = fx.engine.report_message(target, "abusive").await.unwrap();
    assert_eq!(
        outcome,
        pawchat::moderation::ReportOutcome::AlreadyReported
    );
    assert_eq!(
        fx.engine.message(target).await.unwrap().moderation,
        ModerationStatus::ReportedPending
    );
}

#[tokio::test]
async fn hidden_message_cannot_become_reply_target() {
    let fx = fixture().await;
    let target = fx.engine.messages().await[1].id;

    fx.engine
        .apply_moderation(target, ModerationStatus::Hidden)
        .await;

    assert_eq!(fx.engine.toggle_reply(target).await, None);
    assert!(fx.engine.reply_selection().await.is_none());
}
