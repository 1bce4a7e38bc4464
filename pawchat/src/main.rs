//! `PawChat` sync-engine demo.
//!
//! Wires the conversation engine to a running `pawchat-broker` with an
//! in-memory backend playing the marketplace services, and renders store
//! mutations as plain log lines — a minimal stand-in for the real render
//! coordinator.
//!
//! ```bash
//! # In one terminal
//! cargo run --bin pawchat-broker -- --bind 127.0.0.1:9100
//!
//! # In another
//! cargo run --bin pawchat -- --broker-url ws://127.0.0.1:9100/ws
//! ```
//!
//! Commands: plain text sends a message; `/older` and `/present` drive
//! pagination; `/search <kw>` then `/next` jump between hits; `/reply <n>`
//! toggles a reply on the n-th most recent message; `/partner <text>`
//! injects a partner message; `/read` injects a partner read receipt;
//! `/quit` exits.

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use pawchat_proto::codec;
use pawchat_proto::message::{Timestamp, UserId};
use pawchat_proto::payload::{OutboundMessage, ReceiptEvent};
use pawchat_proto::topic::Topic;

use pawchat::config::{CliArgs, ClientConfig};
use pawchat::engine::{ChatEngine, EngineEvent, LocalIdentity};
use pawchat::memory::InMemoryBackend;
use pawchat::net::{self, ReceiptWatcher};
use pawchat::session::Partner;
use pawchat::store::{StoreEvent, ViewItem};
use pawchat::transport::session::TransportSession;
use pawchat::transport::ws::WsConnector;

/// The engine as wired by this demo.
type DemoEngine = ChatEngine<
    Arc<TransportSession<WsConnector>>,
    InMemoryBackend,
    InMemoryBackend,
    InMemoryBackend,
    InMemoryBackend,
>;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(broker_url) = config.broker_url.clone() else {
        eprintln!("No broker configured. Pass --broker-url ws://127.0.0.1:9100/ws");
        std::process::exit(1);
    };
    let connector = match WsConnector::new(&broker_url) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid broker URL: {e}");
            std::process::exit(1);
        }
    };

    // Demo fixture: the viewer and a grooming shop, with history crossing
    // a calendar date so the date markers show up.
    let me = UserId::new(cli.user_id);
    let partner = UserId::new(cli.user_id + 1);
    let backend = InMemoryBackend::new();
    let conversation = backend.create_conversation(me, partner);
    let day = 24 * 60 * 60 * 1000;
    let now = Timestamp::now().as_millis();
    for (i, (sender, body)) in [
        (partner, "Hi! Maple's groom is booked for Saturday."),
        (me, "Great - does she need the flea bath too?"),
        (partner, "Only if she's been outdoors a lot."),
        (me, "She has. Add it please!"),
    ]
    .into_iter()
    .enumerate()
    {
        let offset = if i < 2 { 2 * day } else { 0 };
        backend.seed_message(
            conversation,
            sender,
            if sender == me { cli.user_name.as_str() } else { "Maple Grooming" },
            body,
            Timestamp::from_millis(now - offset - day + (i as u64) * 60_000),
            i < 2,
        );
    }

    let (session, _session_events) = TransportSession::spawn(connector, config.reconnect.clone());
    let session = Arc::new(session);

    // This process doubles as the message service: bridge the send topic.
    let send_sub = session.subscribe(Topic::send()).await;
    tokio::spawn(net::serve_sends(
        Arc::clone(&session),
        backend.clone(),
        send_sub,
    ));

    let (engine, engine_rx, store_rx) = ChatEngine::new(
        LocalIdentity {
            id: me,
            name: cli.user_name.clone(),
        },
        Arc::clone(&session),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        backend,
        &config.engine,
    );
    let engine = Arc::new(engine);

    net::watch_inbox(&session, Arc::clone(&engine)).await;

    engine
        .open_conversation(
            conversation,
            Partner {
                id: partner,
                name: "Maple Grooming".to_string(),
            },
        )
        .await;
    let receipts = ReceiptWatcher::new();
    receipts
        .rotate(&session, Arc::clone(&engine), conversation)
        .await;

    tokio::spawn(render(Arc::clone(&engine), engine_rx, store_rx));

    run_input_loop(&engine, &session, conversation, partner).await;
}

/// Minimal render coordinator: reacts to store/engine events with log lines.
async fn render(
    engine: Arc<DemoEngine>,
    mut engine_rx: mpsc::Receiver<EngineEvent>,
    mut store_rx: mpsc::Receiver<StoreEvent>,
) {
    loop {
        tokio::select! {
            event = store_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    StoreEvent::Reset => {
                        println!("----- conversation -----");
                        let items = engine.view_items().await;
                        for line in render_items(&engine, &items).await {
                            println!("{line}");
                        }
                    }
                    StoreEvent::Appended { items } => {
                        let all = engine.view_items().await;
                        let start = all.len().saturating_sub(items);
                        for line in render_items(&engine, &all[start..]).await {
                            println!("{line}");
                        }
                    }
                    StoreEvent::Prepended { items } => {
                        println!("[{items} older item(s) loaded above]");
                    }
                    StoreEvent::PointUpdate { id, field } => {
                        println!("[message {id} updated: {field:?}]");
                    }
                }
            }
            event = engine_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    EngineEvent::EmptyState(reason) => println!("[empty: {reason:?}]"),
                    EngineEvent::ScrollTo(id) => println!("[scrolled to {id}]"),
                    EngineEvent::PartnerRead => println!("[partner has read your messages]"),
                    EngineEvent::UnreadIndicator { has_unread } => {
                        println!("[unread anywhere: {has_unread}]");
                    }
                    EngineEvent::UnreadHint { conversation } => {
                        println!("[new activity in {conversation}]");
                    }
                    EngineEvent::ReplyChanged(Some(sel)) => {
                        println!("[replying to {}: {}]", sel.sender_name, sel.preview);
                    }
                    EngineEvent::ReplyChanged(None) => println!("[reply cleared]"),
                    EngineEvent::ReturnedToPresent { pages } => {
                        println!("[back at the present after {pages} page(s)]");
                    }
                    EngineEvent::SearchCompleted { hits } => println!("[{hits} hit(s)]"),
                    EngineEvent::ConversationOpened { partner, .. } => {
                        println!("=== chatting with {} ===", partner.name);
                    }
                }
            }
        }
    }
}

/// Format a run of view items.
async fn render_items(engine: &Arc<DemoEngine>, items: &[ViewItem]) -> Vec<String> {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        match item {
            ViewItem::DateMarker(date) => lines.push(format!("--- {date} ---")),
            ViewItem::Entry(id) => {
                if let Some(message) = engine.message(*id).await {
                    let mut line = String::new();
                    if let Some(reply) = &message.reply {
                        line.push_str(&format!("  > {}: {}\n", reply.sender_name, reply.body));
                    }
                    let marker = if message.moderation.is_hidden() {
                        "(hidden by moderation)".to_string()
                    } else {
                        message.body.clone()
                    };
                    line.push_str(&format!("{}: {}", message.sender_name, marker));
                    if message.read && message.sender == engine.identity().id {
                        line.push_str("  [read]");
                    }
                    lines.push(line);
                }
            }
        }
    }
    lines
}

/// Read stdin and translate lines into engine calls.
async fn run_input_loop(
    engine: &Arc<DemoEngine>,
    session: &Arc<TransportSession<WsConnector>>,
    conversation: pawchat_proto::message::ConversationId,
    partner: UserId,
) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('/') {
            let (command, arg) = rest.split_once(' ').unwrap_or((rest, ""));
            match command {
                "quit" => break,
                "older" => engine.load_older().await,
                "present" => engine.return_to_present().await,
                "search" => {
                    engine.search(arg).await;
                }
                "next" => {
                    if engine.jump_to_next_hit().await.is_none() {
                        println!("[no more hits]");
                    }
                }
                "reply" => {
                    let n: usize = arg.parse().unwrap_or(1);
                    let messages = engine.messages().await;
                    if let Some(target) = messages.iter().rev().nth(n.saturating_sub(1)) {
                        engine.toggle_reply(target.id).await;
                    }
                }
                "report" => {
                    let n: usize = arg.parse().unwrap_or(1);
                    let messages = engine.messages().await;
                    if let Some(target) = messages.iter().rev().nth(n.saturating_sub(1)) {
                        match engine.report_message(target.id, "demo report").await {
                            Ok(outcome) => println!("[report: {outcome:?}]"),
                            Err(e) => println!("[report failed: {e}]"),
                        }
                    }
                }
                "partner" => {
                    // Inject a partner message through the normal send path.
                    let outbound = OutboundMessage {
                        conversation,
                        sender: partner,
                        sender_name: "Maple Grooming".to_string(),
                        receiver: engine.identity().id,
                        body: arg.to_string(),
                        reply_to: None,
                    };
                    publish_or_log(session, &Topic::send(), &outbound).await;
                }
                "read" => {
                    let receipt = ReceiptEvent {
                        conversation,
                        reader: partner,
                    };
                    publish_or_log(session, &Topic::read_receipts(conversation), &receipt).await;
                }
                other => println!("[unknown command: /{other}]"),
            }
        } else if let Err(e) = engine.send_message(&line).await {
            println!("[send failed: {e}]");
        }
    }
}

/// Encode and publish, logging failures instead of crashing the demo.
async fn publish_or_log<T: serde::Serialize>(
    session: &Arc<TransportSession<WsConnector>>,
    topic: &Topic,
    payload: &T,
) {
    match codec::encode(payload) {
        Ok(bytes) => {
            if let Err(e) = session.publish(topic, &bytes).await {
                println!("[publish failed: {e}]");
            }
        }
        Err(e) => println!("[encode failed: {e}]"),
    }
}
