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

//! Integration tests for history-load races: the generation-counter
//! discard protocol, the loading guard, and the per-direction failure
//! semantics (initial renders an empty/error state, older/newer leave
//! pagination unchanged and retryable).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use pawchat::engine::{ChatEngine, EmptyReason, EngineConfig, EngineEvent, LocalIdentity};
use pawchat::history::{HistoryError, HistoryService};
use pawchat::memory::InMemoryBackend;
use pawchat::session::Partner;
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

/// History wrapper that delays every page fetch, making races reproducible.
#[derive(Clone)]
struct SlowHistory {
    inner: InMemoryBackend,
    delay: Duration,
}

impl HistoryService for SlowHistory {
    async fn fetch_page(
        &self,
        conversation: ConversationId,
        viewer: UserId,
        page: u32,
        size: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        tokio::time::sleep(self.delay).await;
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

/// History wrapper that fails a configurable number of fetches first.
#[derive(Clone)]
struct FlakyHistory {
    inner: InMemoryBackend,
    failures_left: Arc<AtomicU32>,
}

impl HistoryService for FlakyHistory {
    async fn fetch_page(
        &self,
        conversation: ConversationId,
        viewer: UserId,
        page: u32,
        size: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(HistoryError::Backend("simulated outage".into()));
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

type RacingEngine =
    ChatEngine<NullPublisher, SlowHistory, InMemoryBackend, InMemoryBackend, InMemoryBackend>;
type FlakyEngine =
    ChatEngine<NullPublisher, FlakyHistory, InMemoryBackend, InMemoryBackend, InMemoryBackend>;

fn seed_conversation(backend: &InMemoryBackend, count: usize, tag: &str) -> ConversationId {
    let conversation = backend.create_conversation(UserId::new(1), UserId::new(2));
    for i in 0..count {
        backend.seed_message(
            conversation,
            UserId::new(2),
            "seed",
            &format!("{tag} {i}"),
            Timestamp::from_millis(BASE_MS + (i as u64) * 1000),
            false,
        );
    }
    conversation
}

fn partner(id: u64) -> Partner {
    Partner {
        id: UserId::new(id),
        name: format!("user-{id}"),
    }
}

fn racing_engine(
    backend: &InMemoryBackend,
    delay: Duration,
) -> (Arc<RacingEngine>, mpsc::Receiver<EngineEvent>) {
    let (engine, engine_rx, _store_rx) = ChatEngine::new(
        LocalIdentity {
            id: UserId::new(1),
            name: "user-1".into(),
        },
        NullPublisher,
        SlowHistory {
            inner: backend.clone(),
            delay,
        },
        backend.clone(),
        backend.clone(),
        backend.clone(),
        &EngineConfig::default(),
    );
    (Arc::new(engine), engine_rx)
}

fn flaky_engine(
    backend: &InMemoryBackend,
    failures: u32,
) -> (Arc<FlakyEngine>, mpsc::Receiver<EngineEvent>) {
    let (engine, engine_rx, _store_rx) = ChatEngine::new(
        LocalIdentity {
            id: UserId::new(1),
            name: "user-1".into(),
        },
        NullPublisher,
        FlakyHistory {
            inner: backend.clone(),
            failures_left: Arc::new(AtomicU32::new(failures)),
        },
        backend.clone(),
        backend.clone(),
        backend.clone(),
        &EngineConfig::default(),
    );
    (Arc::new(engine), engine_rx)
}

fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn stale_initial_load_never_reaches_the_new_conversation() {
    let backend = InMemoryBackend::new();
    let conv_a = seed_conversation(&backend, 5, "alpha");
    let conv_b = seed_conversation(&backend, 5, "bravo");

    let (engine, _rx) = racing_engine(&backend, Duration::from_millis(100));

    // Conversation A's initial load is still sleeping when B is opened.
    let racer = Arc::clone(&engine);
    let slow_open = tokio::spawn(async move {
        racer.open_conversation(conv_a, partner(2)).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.open_conversation(conv_b, partner(2)).await;
    slow_open.await.unwrap();

    // A's page resolved after B took over; it must have been discarded.
    let messages = engine.messages().await;
    assert_eq!(messages.len(), 5);
    assert!(
        messages.iter().all(|m| m.body.starts_with("bravo")),
        "conversation A's stale page leaked into B's view"
    );
    assert_eq!(engine.open_conversation_id().await, Some(conv_b));
}

#[tokio::test]
async fn loading_guard_collapses_duplicate_older_fetches() {
    let backend = InMemoryBackend::new();
    let conversation = seed_conversation(&backend, 150, "msg");
    let (engine, _rx) = racing_engine(&backend, Duration::from_millis(50));

    engine.open_conversation(conversation, partner(2)).await;
    assert_eq!(engine.messages().await.len(), 50);

    // Two "scroll hit the top" signals from the same gesture.
    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.load_older().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.load_older().await; // guard makes this a no-op
    first.await.unwrap();

    assert_eq!(
        engine.messages().await.len(),
        100,
        "exactly one older page must have been applied"
    );
    assert_eq!(engine.cursor().await.unwrap().page, 1);
}

#[tokio::test]
async fn initial_failure_renders_error_empty_state() {
    let backend = InMemoryBackend::new();
    let conversation = seed_conversation(&backend, 5, "msg");
    let (engine, mut rx) = flaky_engine(&backend, 1);

    engine.open_conversation(conversation, partner(2)).await;

    let events = drain(&mut rx);
    assert!(
        events.contains(&EngineEvent::EmptyState(EmptyReason::LoadFailed)),
        "initial failure must surface as an error empty state, got {events:?}"
    );
    assert!(engine.messages().await.is_empty());
}

#[tokio::test]
async fn access_denied_renders_denied_empty_state() {
    let backend = InMemoryBackend::new();
    // Viewer 1 is not a member of this conversation.
    let foreign = backend.create_conversation(UserId::new(8), UserId::new(9));
    let (engine, mut rx) = flaky_engine(&backend, 0);

    engine.open_conversation(foreign, partner(9)).await;

    let events = drain(&mut rx);
    assert!(
        events.contains(&EngineEvent::EmptyState(EmptyReason::AccessDenied)),
        "expected access-denied empty state, got {events:?}"
    );
}

#[tokio::test]
async fn empty_conversation_renders_no_messages_state() {
    let backend = InMemoryBackend::new();
    let conversation = backend.create_conversation(UserId::new(1), UserId::new(2));
    let (engine, mut rx) = flaky_engine(&backend, 0);

    engine.open_conversation(conversation, partner(2)).await;

    let events = drain(&mut rx);
    assert!(events.contains(&EngineEvent::EmptyState(EmptyReason::NoMessages)));
}

#[tokio::test]
async fn older_failure_leaves_pagination_retryable() {
    let backend = InMemoryBackend::new();
    let conversation = seed_conversation(&backend, 150, "msg");

    let failures = Arc::new(AtomicU32::new(0));
    let (engine, _engine_rx, _store_rx) = ChatEngine::new(
        LocalIdentity {
            id: UserId::new(1),
            name: "user-1".into(),
        },
        NullPublisher,
        FlakyHistory {
            inner: backend.clone(),
            failures_left: Arc::clone(&failures),
        },
        backend.clone(),
        backend.clone(),
        backend.clone(),
        &EngineConfig::default(),
    );

    // Initial load succeeds, then the next fetch is set up to fail.
    engine.open_conversation(conversation, partner(2)).await;
    failures.store(1, Ordering::SeqCst);

    // Failed older load: cursor unchanged, nothing merged.
    engine.load_older().await;
    assert_eq!(engine.messages().await.len(), 50);
    assert_eq!(engine.cursor().await.unwrap().page, 0);
    assert!(engine.cursor().await.unwrap().has_more_older);

    // Scrolling again retries and succeeds.
    engine.load_older().await;
    assert_eq!(engine.messages().await.len(), 100);
    assert_eq!(engine.cursor().await.unwrap().page, 1);
}

#[tokio::test]
async fn mark_read_failure_does_not_block_history() {
    /// Read-state service that always fails.
    #[derive(Clone)]
    struct DownReadState;

    impl pawchat::receipts::ReadStateService for DownReadState {
        async fn mark_read(
            &self,
            _conversation: ConversationId,
            _reader: UserId,
        ) -> Result<bool, pawchat::receipts::ReadStateError> {
            Err(pawchat::receipts::ReadStateError::Backend(
                "read-state down".into(),
            ))
        }
    }

    let backend = InMemoryBackend::new();
    let conversation = seed_conversation(&backend, 5, "msg");
    let (engine, _engine_rx, _store_rx) = ChatEngine::new(
        LocalIdentity {
            id: UserId::new(1),
            name: "user-1".into(),
        },
        NullPublisher,
        backend.clone(),
        DownReadState,
        backend.clone(),
        backend.clone(),
        &EngineConfig::default(),
    );

    engine.open_conversation(conversation, partner(2)).await;
    assert_eq!(engine.messages().await.len(), 5, "history loads regardless");
}

/// The loading guard stays set if a fetch never resolves — inherited
/// limitation, pinned down so a future timeout change is deliberate.
#[tokio::test]
async fn hung_fetch_leaves_guard_set() {
    /// History service whose older fetches hang forever.
    #[derive(Clone)]
    struct HangingHistory {
        inner: InMemoryBackend,
        hang: Arc<AtomicBool>,
    }

    impl HistoryService for HangingHistory {
        async fn fetch_page(
            &self,
            conversation: ConversationId,
            viewer: UserId,
            page: u32,
            size: usize,
        ) -> Result<Vec<ChatMessage>, HistoryError> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
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
    let conversation = seed_conversation(&backend, 150, "msg");
    let hang = Arc::new(AtomicBool::new(false));
    let (engine, _engine_rx, _store_rx) = ChatEngine::new(
        LocalIdentity {
            id: UserId::new(1),
            name: "user-1".into(),
        },
        NullPublisher,
        HangingHistory {
            inner: backend.clone(),
            hang: Arc::clone(&hang),
        },
        backend.clone(),
        backend.clone(),
        backend.clone(),
        &EngineConfig::default(),
    );
    let engine = Arc::new(engine);

    engine.open_conversation(conversation, partner(2)).await;
    hang.store(true, Ordering::SeqCst);

    let hung = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.load_older().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Further older loads are refused while the first never returns.
    engine.load_older().await;
    assert_eq!(engine.messages().await.len(), 50);
    hung.abort();
}
