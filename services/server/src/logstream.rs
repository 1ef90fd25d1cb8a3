//! Log-stream subscription registry (spec §3, §4.5). A browser connection
//! to `/ws/logs/:host_id/:container_id` registers a bounded outbound
//! queue here; the agent read pump calls [`LogStreamRegistry::fan_out`]
//! for every `log_data` event it decodes, which delivers to every
//! subscriber matching that `(host_id, container_id)` pair.
//!
//! Fan-out is non-blocking: a subscriber whose queue is full gets the
//! frame dropped rather than stalling the agent's read pump (§5
//! backpressure rules).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flotilla_protocol::Envelope;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

type Key = (String, String);

pub struct LogStreamRegistry {
    subscribers: RwLock<HashMap<Key, HashMap<u64, mpsc::Sender<Envelope>>>>,
    next_id: AtomicU64,
}

/// A handle returned on subscribe; drop it (or call `unsubscribe`
/// explicitly) to stop receiving frames for this stream.
pub struct LogSubscription {
    registry: Arc<LogStreamRegistry>,
    key: Key,
    id: u64,
}

impl LogSubscription {
    pub async fn unsubscribe(self) {
        self.registry.remove(&self.key, self.id).await;
    }
}

impl LogStreamRegistry {
    pub fn new() -> Self {
        Self { subscribers: RwLock::new(HashMap::new()), next_id: AtomicU64::new(0) }
    }

    pub async fn subscribe(
        self: &Arc<Self>,
        host_id: &str,
        container_id: &str,
    ) -> (LogSubscription, mpsc::Receiver<Envelope>) {
        let key = (host_id.to_string(), container_id.to_string());
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.entry(key.clone()).or_default().insert(id, tx);
        (LogSubscription { registry: self.clone(), key, id }, rx)
    }

    async fn remove(&self, key: &Key, id: u64) {
        let mut subs = self.subscribers.write().await;
        if let Some(bucket) = subs.get_mut(key) {
            bucket.remove(&id);
            if bucket.is_empty() {
                subs.remove(key);
            }
        }
    }

    /// Delivers `envelope` to every subscription registered for
    /// `(host_id, container_id)`. Non-blocking per subscriber.
    pub async fn fan_out(&self, host_id: &str, container_id: &str, envelope: &Envelope) {
        let key = (host_id.to_string(), container_id.to_string());
        let subs = self.subscribers.read().await;
        let Some(bucket) = subs.get(&key) else { return };
        for tx in bucket.values() {
            if tx.try_send(envelope.clone()).is_err() {
                debug!(host_id, container_id, "log subscriber queue full or closed, dropping frame");
            }
        }
    }
}

impl Default for LogStreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber_for_the_same_container() {
        let registry = Arc::new(LogStreamRegistry::new());
        let (_sub_a, mut rx_a) = registry.subscribe("host-1", "c1").await;
        let (_sub_b, mut rx_b) = registry.subscribe("host-1", "c1").await;
        let (_sub_other, mut rx_other) = registry.subscribe("host-1", "c2").await;

        let envelope = Envelope::event("log_data", serde_json::json!({"container_id": "c1", "data": "hello"}));
        registry.fan_out("host-1", "c1", &envelope).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery() {
        let registry = Arc::new(LogStreamRegistry::new());
        let (sub, mut rx) = registry.subscribe("host-1", "c1").await;
        sub.unsubscribe().await;

        let envelope = Envelope::event("log_data", serde_json::json!({"container_id": "c1", "data": "x"}));
        registry.fan_out("host-1", "c1", &envelope).await;
        assert!(rx.try_recv().is_err());
    }
}
