//! Long-lived transport session over a reconnecting push channel.
//!
//! A [`TransportSession`] owns the lifecycle of one push-channel connection
//! via a supervisor task: connect, re-establish subscription intents, pump
//! deliveries to subscribers, and on disconnect retry indefinitely with a
//! jittered delay. Connection loss is never surfaced as a hard error —
//! only as a [`SessionEvent`] and failed publishes in the gap.
//!
//! Subscription *intent* outlives any single connection: `subscribe`
//! records the consumer in an intent map, and every successful reconnect
//! replays the map against the fresh channel before deliveries resume.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, RwLock, mpsc};

use pawchat_proto::codec;
use pawchat_proto::payload::OutboundMessage;
use pawchat_proto::topic::Topic;

use super::{PushChannel, PushConnector, Publisher, TransportError};

/// Buffer size for each subscription's delivery channel.
const SUBSCRIPTION_BUFFER: usize = 256;

/// Buffer size for the session event channel.
const EVENT_BUFFER: usize = 32;

/// Upper bound on the attempt multiplier applied to the jitter window.
///
/// Keeps the worst-case delay bounded under a prolonged outage while still
/// spreading clients out more the longer the outage lasts.
const MAX_JITTER_SCALE: u32 = 6;

/// Reconnection timing parameters.
///
/// The base delay is fixed (no exponential growth); the jitter window
/// scales with the attempt count so that a fleet of clients reconnecting
/// after a broker restart does not stampede in lockstep.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Fixed delay before every reconnect attempt.
    pub base_delay: Duration,
    /// Maximum random jitter added per attempt step.
    pub jitter_max: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            jitter_max: Duration::from_secs(2),
        }
    }
}

impl ReconnectConfig {
    /// Compute the delay before the given (1-based) reconnect attempt.
    fn delay_for(&self, attempt: u32) -> Duration {
        let scale = u64::from(attempt.clamp(1, MAX_JITTER_SCALE));
        let window = u64::try_from(self.jitter_max.as_millis())
            .unwrap_or(u64::MAX)
            .saturating_mul(scale);
        let jitter = if window == 0 {
            0
        } else {
            rand::rng().random_range(0..window)
        };
        self.base_delay + Duration::from_millis(jitter)
    }
}

/// Connectivity notifications emitted by the supervisor task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connection was established and all intents re-subscribed.
    Connected {
        /// How many failed attempts preceded this connection (0 on the first).
        after_attempts: u32,
        /// Number of topics re-subscribed from the intent map.
        resubscribed: usize,
    },
    /// The connection was lost; a reconnect is scheduled.
    Disconnected,
}

/// A live subscription to one topic.
///
/// Dropping the subscription (or replacing it by subscribing to the same
/// topic again) stops delivery; the supervisor prunes the intent and tells
/// the channel to unsubscribe.
pub struct Subscription {
    topic: Topic,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Subscription {
    /// The topic this subscription delivers.
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Receive the next payload, or `None` once the subscription is dead
    /// (replaced or session shut down).
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// State shared between the session handle and its supervisor task.
struct SessionShared<C: PushConnector> {
    connector: C,
    config: ReconnectConfig,
    /// Topic -> consumer sender. Survives reconnects.
    intents: Mutex<HashMap<Topic, mpsc::Sender<Vec<u8>>>>,
    /// The currently live channel, if any.
    current: RwLock<Option<Arc<C::Channel>>>,
    connected: AtomicBool,
    event_tx: mpsc::Sender<SessionEvent>,
}

/// Handle to a supervised push-channel session.
pub struct TransportSession<C: PushConnector> {
    shared: Arc<SessionShared<C>>,
    supervisor: tokio::task::JoinHandle<()>,
}

impl<C: PushConnector> TransportSession<C> {
    /// Spawn a session over the given connector.
    ///
    /// Returns the session handle and a receiver for [`SessionEvent`]s.
    /// The supervisor starts connecting immediately and retries forever.
    #[must_use]
    pub fn spawn(connector: C, config: ReconnectConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let shared = Arc::new(SessionShared {
            connector,
            config,
            intents: Mutex::new(HashMap::new()),
            current: RwLock::new(None),
            connected: AtomicBool::new(false),
            event_tx,
        });

        let supervisor = tokio::spawn(supervise(Arc::clone(&shared)));

        (Self { shared, supervisor }, event_rx)
    }

    /// Publish an opaque payload to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] while the session is
    /// between connections; the caller is expected to log and move on
    /// (connection errors are non-fatal by design).
    pub async fn publish(&self, topic: &Topic, payload: &[u8]) -> Result<(), TransportError> {
        let channel = { self.shared.current.read().await.clone() };
        match channel {
            Some(ch) => ch.publish(topic, payload).await,
            None => Err(TransportError::NotConnected),
        }
    }

    /// Subscribe to a topic, replacing any existing subscription for it.
    ///
    /// The previous consumer (if any) stops receiving — its
    /// [`Subscription::next`] returns `None`. The intent is recorded
    /// immediately even while disconnected; it takes effect on the next
    /// (re)connect.
    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let replaced = self
            .shared
            .intents
            .lock()
            .await
            .insert(topic.clone(), tx);
        if replaced.is_some() {
            tracing::debug!(topic = %topic, "replaced existing subscription");
        }

        // Best effort on the live channel; a failure here is repaired by
        // the resubscribe pass of the next reconnect.
        let channel = { self.shared.current.read().await.clone() };
        if let Some(ch) = channel
            && let Err(e) = ch.subscribe(&topic).await
        {
            tracing::warn!(topic = %topic, err = %e, "subscribe on live channel failed");
        }

        Subscription { topic, rx }
    }

    /// Drop the subscription intent for a topic.
    pub async fn unsubscribe(&self, topic: &Topic) {
        let removed = self.shared.intents.lock().await.remove(topic).is_some();
        if !removed {
            return;
        }
        let channel = { self.shared.current.read().await.clone() };
        if let Some(ch) = channel
            && let Err(e) = ch.unsubscribe(topic).await
        {
            tracing::debug!(topic = %topic, err = %e, "unsubscribe on live channel failed");
        }
    }

    /// Whether the session currently has a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Stop the supervisor task. The session cannot be restarted.
    pub fn shutdown(&self) {
        self.supervisor.abort();
        self.shared.connected.store(false, Ordering::Relaxed);
    }
}

impl<C: PushConnector> Publisher for TransportSession<C> {
    async fn publish_outbound(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let bytes = codec::encode(message)?;
        self.publish(&Topic::send(), &bytes).await
    }
}

/// Supervisor task: connect, resubscribe, pump, back off, repeat forever.
async fn supervise<C: PushConnector>(shared: Arc<SessionShared<C>>) {
    let mut attempt: u32 = 0;

    loop {
        match shared.connector.connect().await {
            Ok(channel) => {
                let channel = Arc::new(channel);
                match resubscribe_intents(&shared, &channel).await {
                    Ok(count) => {
                        *shared.current.write().await = Some(Arc::clone(&channel));
                        shared.connected.store(true, Ordering::Relaxed);
                        let _ = shared.event_tx.try_send(SessionEvent::Connected {
                            after_attempts: attempt,
                            resubscribed: count,
                        });
                        tracing::info!(after_attempts = attempt, resubscribed = count, "push channel connected");
                        attempt = 0;

                        pump_deliveries(&shared, &channel).await;

                        *shared.current.write().await = None;
                        shared.connected.store(false, Ordering::Relaxed);
                        let _ = shared.event_tx.try_send(SessionEvent::Disconnected);
                        tracing::warn!("push channel disconnected");
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, "resubscribe after connect failed, dropping channel");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(attempt, err = %e, "push channel connect failed");
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = shared.config.delay_for(attempt);
        tracing::debug!(attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "scheduling reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// Replay the intent map against a fresh channel.
async fn resubscribe_intents<C: PushConnector>(
    shared: &Arc<SessionShared<C>>,
    channel: &Arc<C::Channel>,
) -> Result<usize, TransportError> {
    let topics: Vec<Topic> = shared.intents.lock().await.keys().cloned().collect();
    let mut count = 0;
    for topic in &topics {
        channel.subscribe(topic).await?;
        count += 1;
    }
    Ok(count)
}

/// Forward deliveries from the channel to subscription consumers until the
/// channel dies.
async fn pump_deliveries<C: PushConnector>(shared: &Arc<SessionShared<C>>, channel: &Arc<C::Channel>) {
    loop {
        match channel.recv().await {
            Ok((topic, payload)) => {
                // Clone the sender out of the lock so a slow consumer cannot
                // block subscribe/unsubscribe calls.
                let sender = { shared.intents.lock().await.get(&topic).cloned() };
                let Some(tx) = sender else {
                    tracing::debug!(topic = %topic, "delivery for topic without consumer");
                    continue;
                };
                if tx.send(payload).await.is_err() {
                    // Consumer dropped its Subscription. Remove the intent
                    // unless it was already replaced by a newer one.
                    let mut intents = shared.intents.lock().await;
                    if intents
                        .get(&topic)
                        .is_some_and(|current| current.same_channel(&tx))
                    {
                        intents.remove(&topic);
                        drop(intents);
                        let _ = channel.unsubscribe(&topic).await;
                        tracing::debug!(topic = %topic, "pruned abandoned subscription");
                    }
                }
            }
            Err(_) => break,
        }
    }
}
