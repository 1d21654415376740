//! WebSocket connection registry.
//!
//! Maps connections to their chat session and device, carries the
//! outbound frame channel for each socket, and provides the broadcast
//! utilities. All maps live behind a single mutex; locks are short and
//! never held across an await.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use ad_domain::trace::TraceEvent;

use crate::server::session::ChatSession;

/// What the socket writer task consumes.
#[derive(Debug)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

struct ConnectionEntry {
    device_id: Option<String>,
    session_id: Option<Uuid>,
    outbound: mpsc::Sender<OutboundFrame>,
    last_seen: DateTime<Utc>,
    chat: Option<Arc<ChatSession>>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<Uuid, ConnectionEntry>,
    by_session: HashMap<Uuid, HashSet<Uuid>>,
    by_device: HashMap<String, HashSet<Uuid>>,
}

/// Serialized registry of live connections.
#[derive(Default)]
pub struct ConnectionManager {
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh connection with its outbound channel.
    pub fn register(&self, conn_id: Uuid, outbound: mpsc::Sender<OutboundFrame>) {
        self.inner.lock().connections.insert(
            conn_id,
            ConnectionEntry {
                device_id: None,
                session_id: None,
                outbound,
                last_seen: Utc::now(),
                chat: None,
            },
        );
    }

    /// Attach the chat session created by `init_agent` to its connection.
    pub fn bind_session(&self, conn_id: &Uuid, chat: Arc<ChatSession>, device_id: Option<String>) {
        let mut inner = self.inner.lock();
        let session_id = chat.session_id();
        if let Some(entry) = inner.connections.get_mut(conn_id) {
            entry.session_id = Some(session_id);
            entry.device_id = device_id.clone();
            entry.chat = Some(chat);
            entry.last_seen = Utc::now();
        }
        inner.by_session.entry(session_id).or_default().insert(*conn_id);
        if let Some(device) = device_id {
            inner.by_device.entry(device).or_default().insert(*conn_id);
        }
    }

    pub fn chat_session(&self, conn_id: &Uuid) -> Option<Arc<ChatSession>> {
        self.inner.lock().connections.get(conn_id)?.chat.clone()
    }

    pub fn touch(&self, conn_id: &Uuid) {
        if let Some(entry) = self.inner.lock().connections.get_mut(conn_id) {
            entry.last_seen = Utc::now();
        }
    }

    /// Remove a connection, returning its chat session for shutdown.
    pub fn remove(&self, conn_id: &Uuid) -> Option<Arc<ChatSession>> {
        let mut inner = self.inner.lock();
        let entry = inner.connections.remove(conn_id)?;

        if let Some(session_id) = entry.session_id {
            if let Some(set) = inner.by_session.get_mut(&session_id) {
                set.remove(conn_id);
                if set.is_empty() {
                    inner.by_session.remove(&session_id);
                }
            }
        }
        if let Some(device) = &entry.device_id {
            if let Some(set) = inner.by_device.get_mut(device) {
                set.remove(conn_id);
                if set.is_empty() {
                    inner.by_device.remove(device);
                }
            }
        }
        entry.chat
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    // ──────────────────────────────────────────────────────────────
    // Broadcast utilities
    // ──────────────────────────────────────────────────────────────

    fn senders_for(&self, conn_ids: &HashSet<Uuid>) -> Vec<mpsc::Sender<OutboundFrame>> {
        let inner = self.inner.lock();
        conn_ids
            .iter()
            .filter_map(|id| inner.connections.get(id))
            .map(|e| e.outbound.clone())
            .collect()
    }

    pub fn broadcast_to_session(&self, session_id: &Uuid, frame: String) {
        let targets = {
            let inner = self.inner.lock();
            inner.by_session.get(session_id).cloned().unwrap_or_default()
        };
        for tx in self.senders_for(&targets) {
            let _ = tx.try_send(OutboundFrame::Text(frame.clone()));
        }
    }

    pub fn broadcast_to_device(&self, device_id: &str, frame: String) {
        let targets = {
            let inner = self.inner.lock();
            inner.by_device.get(device_id).cloned().unwrap_or_default()
        };
        for tx in self.senders_for(&targets) {
            let _ = tx.try_send(OutboundFrame::Text(frame.clone()));
        }
    }

    pub fn broadcast_to_all(&self, frame: String) {
        let senders: Vec<_> = {
            let inner = self.inner.lock();
            inner
                .connections
                .values()
                .map(|e| e.outbound.clone())
                .collect()
        };
        for tx in senders {
            let _ = tx.try_send(OutboundFrame::Text(frame.clone()));
        }
    }

    // ──────────────────────────────────────────────────────────────
    // Idle sweep
    // ──────────────────────────────────────────────────────────────

    /// Close connections idle longer than `idle_timeout`. Returns how many
    /// were asked to close; actual cleanup happens when the socket loop
    /// observes the close frame.
    pub fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::hours(1));

        let idle: Vec<mpsc::Sender<OutboundFrame>> = {
            let inner = self.inner.lock();
            inner
                .connections
                .values()
                .filter(|e| e.last_seen < cutoff)
                .map(|e| e.outbound.clone())
                .collect()
        };

        let count = idle.len();
        for tx in idle {
            let _ = tx.try_send(OutboundFrame::Close);
        }
        if count > 0 {
            TraceEvent::ConnectionClosed {
                reason: format!("idle sweep closed {count} connection(s)"),
            }
            .emit();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<OutboundFrame>, mpsc::Receiver<OutboundFrame>) {
        mpsc::channel(8)
    }

    #[test]
    fn register_touch_remove() {
        let mgr = ConnectionManager::new();
        let conn = Uuid::new_v4();
        let (tx, _rx) = channel();

        mgr.register(conn, tx);
        assert_eq!(mgr.connection_count(), 1);
        mgr.touch(&conn);

        assert!(mgr.remove(&conn).is_none()); // no chat bound
        assert_eq!(mgr.connection_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_to_all_reaches_every_connection() {
        let mgr = ConnectionManager::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        mgr.register(Uuid::new_v4(), tx1);
        mgr.register(Uuid::new_v4(), tx2);

        mgr.broadcast_to_all("ping".into());

        assert!(matches!(rx1.recv().await, Some(OutboundFrame::Text(t)) if t == "ping"));
        assert!(matches!(rx2.recv().await, Some(OutboundFrame::Text(t)) if t == "ping"));
    }

    #[tokio::test]
    async fn sweep_closes_idle_connections() {
        let mgr = ConnectionManager::new();
        let conn = Uuid::new_v4();
        let (tx, mut rx) = channel();
        mgr.register(conn, tx);

        // Nothing is idle yet.
        assert_eq!(mgr.sweep_idle(Duration::from_secs(3600)), 0);

        // Zero timeout: everything is idle.
        assert_eq!(mgr.sweep_idle(Duration::ZERO), 1);
        assert!(matches!(rx.recv().await, Some(OutboundFrame::Close)));
    }
}
