/// Delivery registry
///
/// Holds one push handle per connected recipient, drives the periodic
/// unread check for each connection, and reclaims entries on disconnect.
/// The registry map is shared state guarded for concurrent insert,
/// remove and lookup from any number of tasks.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::delivery::frames::PushFrame;
use crate::metrics;
use crate::models::Notification;
use crate::storage::{NotificationRepository, Store};

pub type FrameSender = UnboundedSender<PushFrame>;

/// Unique id for one registered connection. A reconnect replaces the
/// registry entry; teardown paths compare ids so an old connection's
/// cleanup can never tear down its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct ConnectionHandle {
    id: SubscriberId,
    sender: FrameSender,
    /// Everything created at or before this instant has been pushed.
    watermark: DateTime<Utc>,
    closed: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct DeliveryRegistry {
    connections: Arc<RwLock<HashMap<Uuid, ConnectionHandle>>>,
    store: Arc<dyn Store>,
    tick_interval: Duration,
    snapshot_limit: i64,
}

impl DeliveryRegistry {
    pub fn new(store: Arc<dyn Store>, tick_interval: Duration, snapshot_limit: i64) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            store,
            tick_interval,
            snapshot_limit,
        }
    }

    /// Registers a connection for `recipient` and starts its tick task.
    ///
    /// The watermark starts at the Unix epoch, not "now": notifications
    /// created in the gap between connect intent and registration are
    /// delivered by the initial snapshot instead of being lost. The
    /// frames pushed immediately are `connected` followed by the full
    /// unread set.
    pub async fn register(&self, recipient: Uuid) -> (SubscriberId, UnboundedReceiver<PushFrame>) {
        let (tx, rx) = unbounded_channel();
        let id = SubscriberId::new();
        let closed = Arc::new(AtomicBool::new(false));

        let handle = ConnectionHandle {
            id,
            sender: tx.clone(),
            watermark: DateTime::<Utc>::UNIX_EPOCH,
            closed: closed.clone(),
        };

        {
            let mut connections = self.connections.write().await;
            if let Some(old) = connections.insert(recipient, handle) {
                // The previous handle is presumed already broken; its
                // tick task observes the flag and exits.
                old.closed.store(true, Ordering::SeqCst);
                debug!(%recipient, "replaced existing connection");
            }
        }

        self.send_frame(&tx, PushFrame::Connected);

        match self.store.unread(recipient, self.snapshot_limit).await {
            Ok(unread) if !unread.is_empty() => {
                if self.send_frame(&tx, PushFrame::snapshot(unread)) {
                    self.advance_watermark(recipient, id, Utc::now()).await;
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%recipient, error = %err, "failed to load initial unread snapshot");
            }
        }

        let registry = self.clone();
        tokio::spawn(async move {
            registry.run_ticks(recipient, id, closed).await;
        });

        (id, rx)
    }

    /// Removes the connection if `id` still owns the entry. Safe to call
    /// concurrently from any number of failure paths; only the call that
    /// actually removes the entry returns true.
    pub async fn deregister(&self, recipient: Uuid, id: SubscriberId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&recipient) {
            Some(handle) if handle.id == id => {
                handle.closed.store(true, Ordering::SeqCst);
                connections.remove(&recipient);
                debug!(%recipient, "connection deregistered");
                true
            }
            _ => false,
        }
    }

    /// Instant-delivery fast path, called when a notification is created
    /// for a recipient that may be connected. Optimization only: the
    /// watermark is not advanced, so the tick path still guarantees
    /// delivery if this push is lost.
    pub async fn offer(&self, notification: &Notification) {
        let target = {
            let connections = self.connections.read().await;
            connections
                .get(&notification.recipient_id)
                .map(|h| (h.id, h.sender.clone(), h.closed.clone()))
        };

        if let Some((id, sender, closed)) = target {
            if closed.load(Ordering::SeqCst) {
                return;
            }
            if !self.send_frame(&sender, PushFrame::instant(notification.clone())) {
                self.deregister(notification.recipient_id, id).await;
            }
        }
    }

    pub async fn is_connected(&self, recipient: Uuid) -> bool {
        self.connections.read().await.contains_key(&recipient)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn run_ticks(self, recipient: Uuid, id: SubscriberId, closed: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately;
        // consume it so the snapshot and first incremental check don't
        // race.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if closed.load(Ordering::SeqCst) {
                break;
            }

            // Re-check the registry each tick; a replacement connection
            // ends this task.
            let (sender, watermark) = {
                let connections = self.connections.read().await;
                match connections.get(&recipient) {
                    Some(handle) if handle.id == id => {
                        (handle.sender.clone(), handle.watermark)
                    }
                    _ => break,
                }
            };

            match self.store.unread(recipient, self.snapshot_limit).await {
                Ok(unread) => {
                    let fresh: Vec<Notification> = unread
                        .into_iter()
                        .filter(|n| n.created_at > watermark)
                        .collect();
                    if !fresh.is_empty() {
                        if !self.send_frame(&sender, PushFrame::incremental(fresh)) {
                            self.deregister(recipient, id).await;
                            break;
                        }
                        // Advance only after the push went through.
                        self.advance_watermark(recipient, id, Utc::now()).await;
                    }
                }
                Err(err) => {
                    // Transient store failure; the next tick retries.
                    warn!(%recipient, error = %err, "unread check failed");
                }
            }

            if !self.send_frame(&sender, PushFrame::Ping) {
                self.deregister(recipient, id).await;
                break;
            }
        }

        debug!(%recipient, "tick task ended");
    }

    async fn advance_watermark(&self, recipient: Uuid, id: SubscriberId, to: DateTime<Utc>) {
        let mut connections = self.connections.write().await;
        if let Some(handle) = connections.get_mut(&recipient) {
            if handle.id == id {
                handle.watermark = to;
            }
        }
    }

    fn send_frame(&self, sender: &FrameSender, frame: PushFrame) -> bool {
        let kind = frame.kind();
        let sent = sender.send(frame).is_ok();
        if sent {
            metrics::observe_push_frame(kind);
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewNotification;
    use crate::storage::{MemoryStore, NotificationRepository};

    fn registry(store: Arc<MemoryStore>) -> DeliveryRegistry {
        DeliveryRegistry::new(store, Duration::from_millis(25), 50)
    }

    #[tokio::test]
    async fn test_register_pushes_connected_then_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let recipient = Uuid::new_v4();
        store
            .create_notification(&NewNotification::follow(recipient, "bob"))
            .await
            .unwrap();

        let reg = registry(store);
        let (_id, mut rx) = reg.register(recipient).await;

        assert_eq!(rx.recv().await.unwrap(), PushFrame::Connected);
        match rx.recv().await.unwrap() {
            PushFrame::Notifications { data } => assert_eq!(data.len(), 1),
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_unread_set_skips_snapshot_frame() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store);
        let (_id, mut rx) = reg.register(Uuid::new_v4()).await;

        assert_eq!(rx.recv().await.unwrap(), PushFrame::Connected);
        // Next frame is a keepalive from the tick, not a snapshot.
        match tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            PushFrame::Ping => {}
            other => panic!("expected ping, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deregister_is_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store);
        let recipient = Uuid::new_v4();
        let (id, _rx) = reg.register(recipient).await;

        assert!(reg.deregister(recipient, id).await);
        assert!(!reg.deregister(recipient, id).await);
        assert!(!reg.is_connected(recipient).await);
    }

    #[tokio::test]
    async fn test_stale_id_cannot_remove_replacement() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store);
        let recipient = Uuid::new_v4();

        let (old_id, _old_rx) = reg.register(recipient).await;
        let (_new_id, _new_rx) = reg.register(recipient).await;

        // The first connection's teardown must not evict the second.
        assert!(!reg.deregister(recipient, old_id).await);
        assert!(reg.is_connected(recipient).await);
    }

    #[tokio::test]
    async fn test_dropped_receiver_reclaims_entry() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store);
        let recipient = Uuid::new_v4();

        let (_id, rx) = reg.register(recipient).await;
        drop(rx);

        // The next tick's keepalive fails to send and deregisters.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!reg.is_connected(recipient).await);
    }
}
