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

//! Integration tests for the pagination state machine: sequential
//! return-to-present, jump-to-message through the generation guard, and
//! the keyword-search walk that feeds jumps.

use std::sync::Arc;
use std::time::Duration;

use pawchat::engine::{ChatEngine, EngineConfig, EngineEvent, LocalIdentity};
use pawchat::history::{HistoryError, HistoryService};
use pawchat::memory::InMemoryBackend;
use pawchat::session::{Partner, ViewPosition};
use pawchat::transport::{Publisher, TransportError};
use pawchat_proto::message::{ChatMessage, ConversationId, MessageId, Timestamp, UserId};
use pawchat_proto::payload::OutboundMessage;
use tokio::sync::mpsc;

const BASE_MS: u64 = 1_700_000_000_000;

struct NullPublisher;

impl Publisher for NullPublisher {
    async fn publish_outbound(&self, _message: &OutboundMessage) -> Result<(), TransportError> {
        Ok(())
    }
}

type TestEngine = ChatEngine<
    NullPublisher,
    InMemoryBackend,
    InMemoryBackend,
    InMemoryBackend,
    InMemoryBackend,
>;

fn seed_conversation(backend: &InMemoryBackend, count: usize) -> ConversationId {
    let conversation = backend.create_conversation(UserId::new(1), UserId::new(2));
    for i in 0..count {
        backend.seed_message(
            conversation,
            UserId::new(if i % 2 == 0 { 1 } else { 2 }),
            "seed",
            &format!("message {i}"),
            Timestamp::from_millis(BASE_MS + (i as u64) * 1000),
            false,
        );
    }
    conversation
}

fn make_engine(
    backend: &InMemoryBackend,
) -> (Arc<TestEngine>, mpsc::Receiver<EngineEvent>) {
    let (engine, engine_rx, _store_rx) = ChatEngine::new(
        LocalIdentity {
            id: UserId::new(1),
            name: "user-1".into(),
        },
        NullPublisher,
        backend.clone(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        &EngineConfig::default(),
    );
    (Arc::new(engine), engine_rx)
}

fn partner(id: u64) -> Partner {
    Partner {
        id: UserId::new(id),
        name: format!("user-{id}"),
    }
}

async fn wait_for<F: Fn(&EngineEvent) -> bool>(
    rx: &mut mpsc::Receiver<EngineEvent>,
    pred: F,
) -> EngineEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for engine event")
            .expect("engine event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn return_terminates_after_exactly_k_newer_loads() {
    let backend = InMemoryBackend::new();
    let conversation = seed_conversation(&backend, 150);
    let (engine, mut rx) = make_engine(&backend);

    engine.open_conversation(conversation, partner(2)).await;
    engine.load_older().await; // page 1
    engine.load_older().await; // page 2
    assert_eq!(
        engine.position().await,
        Some(ViewPosition::InHistory { page: 2 })
    );

    engine.return_to_present().await;

    let event = wait_for(&mut rx, |e| {
        matches!(e, EngineEvent::ReturnedToPresent { .. })
    })
    .await;
    assert_eq!(event, EngineEvent::ReturnedToPresent { pages: 2 });
    assert_eq!(engine.position().await, Some(ViewPosition::AtBottom));
    assert_eq!(engine.cursor().await.unwrap().page, 0);
}

#[tokio::test]
async fn return_from_bottom_is_a_noop() {
    let backend = InMemoryBackend::new();
    let conversation = seed_conversation(&backend, 10);
    let (engine, mut rx) = make_engine(&backend);

    engine.open_conversation(conversation, partner(2)).await;
    engine.return_to_present().await;

    while let Ok(event) = rx.try_recv() {
        assert!(
            !matches!(event, EngineEvent::ReturnedToPresent { .. }),
            "no walk should have run from the bottom"
        );
    }
    assert_eq!(engine.position().await, Some(ViewPosition::AtBottom));
}

#[tokio::test]
async fn newer_loads_walk_pages_down_one_at_a_time() {
    let backend = InMemoryBackend::new();
    let conversation = seed_conversation(&backend, 150);
    let (engine, _rx) = make_engine(&backend);

    engine.open_conversation(conversation, partner(2)).await;
    engine.load_older().await;
    engine.load_older().await;

    engine.load_newer().await;
    assert_eq!(
        engine.position().await,
        Some(ViewPosition::InHistory { page: 1 })
    );
    engine.load_newer().await;
    assert_eq!(engine.position().await, Some(ViewPosition::AtBottom));

    // At page 0, a further newer load has nothing to do.
    engine.load_newer().await;
    assert_eq!(engine.cursor().await.unwrap().page, 0);
}

#[tokio::test]
async fn jump_resets_store_to_target_page_window() {
    let backend = InMemoryBackend::new();
    // 3 full pages of 50 (150 total).
    let conversation = seed_conversation(&backend, 150);
    let (engine, mut rx) = make_engine(&backend);

    engine.open_conversation(conversation, partner(2)).await;
    engine.load_older().await; // page 1
    engine.load_older().await; // page 2
    engine.load_older().await; // page 3: empty, exhausts older history
    assert_eq!(engine.messages().await.len(), 150);
    assert!(!engine.cursor().await.unwrap().has_more_older);

    // Jump to a message on page 2 (oldest 50): the accumulated pages are
    // discarded, only page 2's window remains.
    let target = backend.log_snapshot(conversation)[10].id;
    engine.jump_to(target).await;

    let event = wait_for(&mut rx, |e| matches!(e, EngineEvent::ScrollTo(_))).await;
    assert_eq!(event, EngineEvent::ScrollTo(target));

    let messages = engine.messages().await;
    assert_eq!(messages.len(), 50, "only the target page's window remains");
    assert_eq!(messages.first().unwrap().body, "message 0");
    assert_eq!(messages.last().unwrap().body, "message 49");
    assert!(messages.iter().any(|m| m.id == target));

    let cursor = engine.cursor().await.unwrap();
    assert_eq!(cursor.page, 2);
    assert!(cursor.has_more_newer);
    assert_eq!(
        engine.position().await,
        Some(ViewPosition::InHistory { page: 2 })
    );
}

#[tokio::test]
async fn jump_then_return_walks_back_from_target_page() {
    let backend = InMemoryBackend::new();
    let conversation = seed_conversation(&backend, 150);
    let (engine, mut rx) = make_engine(&backend);

    engine.open_conversation(conversation, partner(2)).await;
    let target = backend.log_snapshot(conversation)[10].id;
    engine.jump_to(target).await;
    wait_for(&mut rx, |e| matches!(e, EngineEvent::ScrollTo(_))).await;

    engine.return_to_present().await;
    let event = wait_for(&mut rx, |e| {
        matches!(e, EngineEvent::ReturnedToPresent { .. })
    })
    .await;
    assert_eq!(event, EngineEvent::ReturnedToPresent { pages: 2 });
    assert_eq!(engine.messages().await.len(), 150);
    assert_eq!(engine.position().await, Some(ViewPosition::AtBottom));
}

#[tokio::test]
async fn jump_invalidates_in_flight_older_load() {
    /// Delays only older-page fetches so the jump can overtake them.
    #[derive(Clone)]
    struct SlowOlder {
        inner: InMemoryBackend,
    }

    impl HistoryService for SlowOlder {
        async fn fetch_page(
            &self,
            conversation: ConversationId,
            viewer: UserId,
            page: u32,
            size: usize,
        ) -> Result<Vec<ChatMessage>, HistoryError> {
            if page == 1 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.inner.fetch_page(conversation, viewer, page, size).await
        }

        async fn locate_page(
            &self,
            conversation: ConversationId,
            message: MessageId,
            size: usize,
        ) -> Result<u32, HistoryError> {
            self.inner.locate_page(conversation, message, size).await
        }
    }

    let backend = InMemoryBackend::new();
    let conversation = seed_conversation(&backend, 150);
    let (engine, _engine_rx, _store_rx) = ChatEngine::new(
        LocalIdentity {
            id: UserId::new(1),
            name: "user-1".into(),
        },
        NullPublisher,
        SlowOlder {
            inner: backend.clone(),
        },
        backend.clone(),
        backend.clone(),
        backend.clone(),
        &EngineConfig::default(),
    );
    let engine = Arc::new(engine);

    engine.open_conversation(conversation, partner(2)).await;

    // Organic older load takes 100ms; jump lands first and bumps the
    // generation, so the older page must be discarded.
    let slow = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.load_older().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let target = backend.log_snapshot(conversation)[10].id;
    engine.jump_to(target).await;
    slow.await.unwrap();

    let messages = engine.messages().await;
    assert_eq!(
        messages.len(),
        50,
        "stale older page must not merge into the jump landing"
    );
    assert_eq!(engine.cursor().await.unwrap().page, 2);
}

#[tokio::test]
async fn search_walk_feeds_jumps_until_exhausted() {
    let backend = InMemoryBackend::new();
    let conversation = backend.create_conversation(UserId::new(1), UserId::new(2));
    for i in 0..120 {
        let body = if i % 40 == 0 {
            format!("kibble restock {i}")
        } else {
            format!("message {i}")
        };
        backend.seed_message(
            conversation,
            UserId::new(2),
            "seed",
            &body,
            Timestamp::from_millis(BASE_MS + i * 1000),
            false,
        );
    }
    let (engine, mut rx) = make_engine(&backend);
    engine.open_conversation(conversation, partner(2)).await;

    assert_eq!(engine.search("kibble").await, 3);
    wait_for(&mut rx, |e| matches!(e, EngineEvent::SearchCompleted { .. })).await;
    assert_eq!(engine.search_hits_remaining().await, 3);

    // Each /next steps the walk and jumps; the walk never restarts.
    let first = engine.jump_to_next_hit().await.unwrap();
    assert!(engine.message(first).await.is_some());
    assert_eq!(engine.search_hits_remaining().await, 2);

    let second = engine.jump_to_next_hit().await.unwrap();
    assert_ne!(first, second);
    let third = engine.jump_to_next_hit().await.unwrap();
    assert_ne!(second, third);
    assert_eq!(engine.jump_to_next_hit().await, None);

    // A fresh query replaces the exhausted walk.
    assert_eq!(engine.search("kibble").await, 3);
    assert_eq!(engine.search_hits_remaining().await, 3);
}

#[tokio::test]
async fn search_in_closed_view_returns_nothing() {
    let backend = InMemoryBackend::new();
    seed_conversation(&backend, 10);
    let (engine, _rx) = make_engine(&backend);

    assert_eq!(engine.search("anything").await, 0);
}
