//! Wiring between the transport session and the engine.
//!
//! The engine consumes typed payloads; subscriptions carry raw bytes.
//! These pumps decode and forward, logging and skipping malformed
//! payloads rather than disconnecting. [`ReceiptWatcher`] rotates the
//! per-conversation receipt subscription when the open conversation
//! changes, unsubscribing the previous topic so receipts are never
//! delivered twice.

use std::sync::Arc;

use tokio::sync::Mutex;

use pawchat_proto::codec;
use pawchat_proto::message::ConversationId;
use pawchat_proto::payload::{InboundMessage, OutboundMessage, ReceiptEvent};
use pawchat_proto::topic::Topic;

use crate::engine::ChatEngine;
use crate::history::HistoryService;
use crate::memory::InMemoryBackend;
use crate::moderation::ModerationService;
use crate::receipts::ReadStateService;
use crate::search::SearchIndex;
use crate::transport::session::{Subscription, TransportSession};
use crate::transport::{Publisher, PushConnector};

/// Subscribe to the viewer's inbox topic and spawn the decode pump.
pub async fn watch_inbox<C, P, H, R, S, M>(
    session: &TransportSession<C>,
    engine: Arc<ChatEngine<P, H, R, S, M>>,
) -> tokio::task::JoinHandle<()>
where
    C: PushConnector,
    P: Publisher + Send + Sync + 'static,
    H: HistoryService + Send + Sync + 'static,
    R: ReadStateService + Send + Sync + 'static,
    S: SearchIndex + Send + Sync + 'static,
    M: ModerationService + Send + Sync + 'static,
{
    let topic = Topic::inbox(engine.identity().id);
    let sub = session.subscribe(topic).await;
    tokio::spawn(pump_inbox(engine, sub))
}

/// Forward inbox deliveries into [`ChatEngine::handle_inbound`].
pub async fn pump_inbox<P, H, R, S, M>(
    engine: Arc<ChatEngine<P, H, R, S, M>>,
    mut sub: Subscription,
) where
    P: Publisher + Send + Sync + 'static,
    H: HistoryService + Send + Sync + 'static,
    R: ReadStateService + Send + Sync + 'static,
    S: SearchIndex + Send + Sync + 'static,
    M: ModerationService + Send + Sync + 'static,
{
    while let Some(payload) = sub.next().await {
        match codec::decode::<InboundMessage>(&payload) {
            Ok(inbound) => engine.handle_inbound(inbound).await,
            Err(e) => tracing::warn!(err = %e, "malformed inbox payload, skipping"),
        }
    }
    tracing::debug!("inbox pump exiting");
}

/// Forward receipt deliveries into [`ChatEngine::handle_receipt`].
pub async fn pump_receipts<P, H, R, S, M>(
    engine: Arc<ChatEngine<P, H, R, S, M>>,
    mut sub: Subscription,
) where
    P: Publisher + Send + Sync + 'static,
    H: HistoryService + Send + Sync + 'static,
    R: ReadStateService + Send + Sync + 'static,
    S: SearchIndex + Send + Sync + 'static,
    M: ModerationService + Send + Sync + 'static,
{
    while let Some(payload) = sub.next().await {
        match codec::decode::<ReceiptEvent>(&payload) {
            Ok(event) => engine.handle_receipt(event).await,
            Err(e) => tracing::warn!(err = %e, "malformed receipt payload, skipping"),
        }
    }
    tracing::debug!("receipt pump exiting");
}

/// Rotates the per-conversation receipt subscription.
///
/// Opening conversation B while A's receipts are subscribed unsubscribes
/// A's topic first; the old pump ends when its subscription dies. The
/// intent for the new topic survives reconnects like any other.
#[derive(Default)]
pub struct ReceiptWatcher {
    current: Mutex<Option<Topic>>,
}

impl ReceiptWatcher {
    /// Creates a watcher with no active subscription.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: Mutex::const_new(None),
        }
    }

    /// Point the receipt subscription at a newly opened conversation.
    pub async fn rotate<C, P, H, R, S, M>(
        &self,
        session: &TransportSession<C>,
        engine: Arc<ChatEngine<P, H, R, S, M>>,
        conversation: ConversationId,
    ) where
        C: PushConnector,
        P: Publisher + Send + Sync + 'static,
        H: HistoryService + Send + Sync + 'static,
        R: ReadStateService + Send + Sync + 'static,
        S: SearchIndex + Send + Sync + 'static,
        M: ModerationService + Send + Sync + 'static,
    {
        let topic = Topic::read_receipts(conversation);
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take()
            && previous != topic
        {
            session.unsubscribe(&previous).await;
        }
        let sub = session.subscribe(topic.clone()).await;
        *current = Some(topic);
        drop(current);
        tokio::spawn(pump_receipts(engine, sub));
    }
}

/// Bridge the shared send topic to an [`InMemoryBackend`].
///
/// Stand-in for the marketplace message service in tests and the demo:
/// accepts outbound messages, assigns server ids, and fans the accepted
/// message out to both participants' inbox topics.
pub async fn serve_sends<C: PushConnector>(
    session: Arc<TransportSession<C>>,
    backend: InMemoryBackend,
    mut sub: Subscription,
) {
    while let Some(payload) = sub.next().await {
        let outbound: OutboundMessage = match codec::decode(&payload) {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(err = %e, "malformed send payload, skipping");
                continue;
            }
        };

        match backend.ingest(&outbound) {
            Ok(message) => {
                for receiver in [outbound.sender, outbound.receiver] {
                    let inbound = InboundMessage {
                        message: message.clone(),
                        receiver,
                    };
                    match codec::encode(&inbound) {
                        Ok(bytes) => {
                            if let Err(e) =
                                session.publish(&Topic::inbox(receiver), &bytes).await
                            {
                                tracing::warn!(err = %e, receiver = %receiver, "inbox fan-out failed");
                            }
                        }
                        Err(e) => tracing::error!(err = %e, "failed to encode inbound message"),
                    }
                }
            }
            Err(e) => tracing::warn!(err = %e, "rejected outbound message"),
        }
    }
    tracing::debug!("send bridge exiting");
}
