//! In-process push channel for testing.
//!
//! [`LoopbackHub`] plays the broker's role inside the test process: it
//! routes published payloads to topic subscribers over [`tokio::sync::mpsc`]
//! channels. The hub can simulate outages two ways:
//! - [`LoopbackHub::drop_connections`] kills every live channel (server
//!   restart — clients must reconnect);
//! - [`LoopbackHub::set_online`] gates whether new connects succeed
//!   (prolonged outage — reconnect attempts keep failing).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use pawchat_proto::topic::Topic;

use super::{PushChannel, PushConnector, TransportError};

/// Per-connection delivery channel capacity.
const DELIVERY_BUFFER: usize = 256;

/// Shared hub state: live connections and topic subscriptions.
struct HubInner {
    /// Delivery sender per live connection.
    conns: Mutex<HashMap<u64, mpsc::Sender<(Topic, Vec<u8>)>>>,
    /// Connection ids subscribed to each topic.
    topics: Mutex<HashMap<String, HashSet<u64>>>,
    /// Whether new connections are accepted.
    online: AtomicBool,
    /// Source of connection ids.
    next_conn_id: AtomicU64,
}

/// In-process topic hub; cloning shares the same hub.
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHub {
    /// Creates a new hub that accepts connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                conns: Mutex::new(HashMap::new()),
                topics: Mutex::new(HashMap::new()),
                online: AtomicBool::new(true),
                next_conn_id: AtomicU64::new(1),
            }),
        }
    }

    /// Gate whether new connections succeed.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    /// Kill every live connection, simulating a broker restart.
    ///
    /// Subscription records go with the connections, exactly like a real
    /// restart — clients must re-subscribe after reconnecting.
    pub fn drop_connections(&self) {
        self.inner.conns.lock().clear();
        self.inner.topics.lock().clear();
    }

    /// Number of currently live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.conns.lock().len()
    }

    /// Number of live subscriptions to a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic.as_str())
            .map_or(0, HashSet::len)
    }

    /// Publish directly from the test side, as the backend would.
    ///
    /// Returns the number of connections the payload was delivered to.
    pub fn publish_from_server(&self, topic: &Topic, payload: &[u8]) -> usize {
        self.inner.route(topic, payload)
    }
}

impl HubInner {
    /// Fan a payload out to all live subscribers of a topic.
    fn route(&self, topic: &Topic, payload: &[u8]) -> usize {
        let subscriber_ids: Vec<u64> = self
            .topics
            .lock()
            .get(topic.as_str())
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let conns = self.conns.lock();
        let mut delivered = 0;
        for id in subscriber_ids {
            if let Some(tx) = conns.get(&id)
                && tx.try_send((topic.clone(), payload.to_vec())).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }
}

impl PushConnector for LoopbackHub {
    type Channel = LoopbackChannel;

    async fn connect(&self) -> Result<Self::Channel, TransportError> {
        if !self.inner.online.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("hub is offline".to_string()));
        }

        let conn_id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        self.inner.conns.lock().insert(conn_id, tx);

        Ok(LoopbackChannel {
            conn_id,
            hub: Arc::clone(&self.inner),
            rx: tokio::sync::Mutex::new(rx),
        })
    }
}

/// One live connection to a [`LoopbackHub`].
pub struct LoopbackChannel {
    /// Hub-assigned connection id.
    conn_id: u64,
    /// The owning hub.
    hub: Arc<HubInner>,
    /// Incoming deliveries for this connection.
    rx: tokio::sync::Mutex<mpsc::Receiver<(Topic, Vec<u8>)>>,
}

impl LoopbackChannel {
    /// Whether the hub still holds this connection's delivery sender.
    fn is_live(&self) -> bool {
        self.hub.conns.lock().contains_key(&self.conn_id)
    }
}

impl PushChannel for LoopbackChannel {
    async fn publish(&self, topic: &Topic, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_live() {
            return Err(TransportError::ChannelClosed);
        }
        self.hub.route(topic, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        if !self.is_live() {
            return Err(TransportError::ChannelClosed);
        }
        self.hub
            .topics
            .lock()
            .entry(topic.as_str().to_string())
            .or_default()
            .insert(self.conn_id);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        let mut topics = self.hub.topics.lock();
        if let Some(ids) = topics.get_mut(topic.as_str()) {
            ids.remove(&self.conn_id);
            if ids.is_empty() {
                topics.remove(topic.as_str());
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<(Topic, Vec<u8>), TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::ChannelClosed)
    }

    fn is_open(&self) -> bool {
        self.is_live()
    }
}

impl Drop for LoopbackChannel {
    fn drop(&mut self) {
        self.hub.conns.lock().remove(&self.conn_id);
        let mut topics = self.hub.topics.lock();
        topics.retain(|_, ids| {
            ids.remove(&self.conn_id);
            !ids.is_empty()
        });
    }
}
