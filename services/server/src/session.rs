//! The hub's per-agent `Session` record (spec §3): binds one agent
//! connection to exactly one host identity and tracks the bookkeeping the
//! read/write pumps and the liveness ticker need — `last_seen`, the
//! outbound send queue, the single-start guard that keeps a session's
//! pumps from being started twice (P2), and the shutdown signal that
//! lets `unregister_session` actually tear down a running socket.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use flotilla_protocol::Envelope;
use tokio::sync::{mpsc, watch, Mutex};

pub const SEND_QUEUE_CAPACITY: usize = 256;

/// A live agent session. Cheap to clone: the fields that matter for
/// fan-out and liveness are already behind `Arc`-friendly primitives.
pub struct Session {
    pub agent_id: String,
    pub host_id: String,
    send_tx: mpsc::Sender<Envelope>,
    send_rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    last_seen_unix_ms: AtomicI64,
    started: Mutex<bool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Session {
    pub fn new(agent_id: String, host_id: String) -> Self {
        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            agent_id,
            host_id,
            send_tx,
            send_rx: Mutex::new(Some(send_rx)),
            last_seen_unix_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            started: Mutex::new(false),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Takes the receive half of the send queue exactly once. The write
    /// pump calls this; a second call (a duplicate pump start) gets
    /// `None` and should log a warning and return without touching the
    /// socket (the single-start guard, P2).
    pub async fn take_send_queue(&self) -> Option<mpsc::Receiver<Envelope>> {
        let mut guard = self.started.lock().await;
        if *guard {
            return None;
        }
        *guard = true;
        self.send_rx.lock().await.take()
    }

    pub fn sender(&self) -> mpsc::Sender<Envelope> {
        self.send_tx.clone()
    }

    pub fn touch(&self) {
        self.last_seen_unix_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_seen_unix_ms(&self) -> i64 {
        self.last_seen_unix_ms.load(Ordering::Relaxed)
    }

    /// A fresh handle onto this session's shutdown signal. `watch`
    /// remembers the last value independently of when a receiver starts
    /// waiting, so a `shutdown()` fired a moment before the write pump
    /// calls `changed()` is still observed — unlike `Notify`, there's no
    /// window where the signal can be missed.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Signals the agent's read/write pumps to tear down the socket.
    /// Idempotent: a session that already shut down, or whose pumps
    /// never started, just gets another no-op send.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_queue_can_only_be_taken_once() {
        let session = Session::new("a1".to_string(), "h1".to_string());
        assert!(session.take_send_queue().await.is_some());
        assert!(session.take_send_queue().await.is_none(), "second pump start must be a no-op");
    }

    #[tokio::test]
    async fn touch_advances_last_seen() {
        let session = Session::new("a1".to_string(), "h1".to_string());
        let before = session.last_seen_unix_ms();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        session.touch();
        assert!(session.last_seen_unix_ms() >= before);
    }

    #[tokio::test]
    async fn shutdown_is_observed_even_if_fired_before_anyone_subscribed() {
        let session = Session::new("a1".to_string(), "h1".to_string());
        session.shutdown();
        let mut rx = session.subscribe_shutdown();
        // `watch` retains the last value, so a receiver created after the
        // signal fired still sees it on its very first `changed()`.
        rx.changed().await.expect("sender still alive");
        assert!(*rx.borrow());
    }
}
