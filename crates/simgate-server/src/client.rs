use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use simgate_core::events::EventCategory;
use simgate_core::ids::{ConnectionId, TicketId};
use tokio::sync::{mpsc, Mutex};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

/// A connected WebSocket client bound to the ticket it presented.
pub struct Connection {
    pub id: ConnectionId,
    pub ticket: TicketId,
    pub subscriptions: HashSet<EventCategory>,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_pong: std::sync::atomic::AtomicU64,
}

impl Connection {
    fn new(id: ConnectionId, ticket: TicketId, tx: mpsc::Sender<String>) -> Self {
        let now = now_secs();
        Self {
            id,
            ticket,
            subscriptions: HashSet::new(),
            tx,
            connected: AtomicBool::new(true),
            last_pong: std::sync::atomic::AtomicU64::new(now),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CONNECTION_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Outcome of a subscription toggle, reported back to the client so
/// repeated requests observably announce their no-op nature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    Subscribed,
    Unsubscribed,
    AlreadySubscribed,
    NotSubscribed,
}

/// Registry of all connected WebSocket clients and their subscriptions.
///
/// Removing an entry drops the connection's send-queue sender; the writer
/// task drains what was queued, sends a Close frame, and the connection
/// pumps tear each other down — `remove` IS forced close.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Mutex<Connection>>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new connection under a fresh id with an empty
    /// subscription set. Returns the id and the send-queue receiver.
    pub fn register(&self, ticket: TicketId) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let conn = Arc::new(Mutex::new(Connection::new(id.clone(), ticket, tx)));
        self.connections.insert(id.clone(), conn);
        (id, rx)
    }

    /// Remove a connection by id. Idempotent.
    pub fn remove(&self, id: &ConnectionId) {
        if let Some((_, conn)) = self.connections.remove(id) {
            if let Ok(c) = conn.try_lock() {
                c.connected.store(false, Ordering::Relaxed);
            }
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// The ticket a connection was registered with, if the connection exists.
    pub async fn ticket_for(&self, id: &ConnectionId) -> Option<TicketId> {
        let conn = self.connections.get(id)?.clone();
        let guard = conn.lock().await;
        Some(guard.ticket.clone())
    }

    /// Toggle subscription membership in one read-modify-write under the
    /// connection's lock. `None` when the connection is gone.
    pub async fn toggle(
        &self,
        id: &ConnectionId,
        category: EventCategory,
        subscribe: bool,
    ) -> Option<ToggleOutcome> {
        let conn = self.connections.get(id)?.clone();
        let mut guard = conn.lock().await;
        let outcome = match (guard.subscriptions.contains(&category), subscribe) {
            (true, false) => {
                guard.subscriptions.remove(&category);
                ToggleOutcome::Unsubscribed
            }
            (true, true) => ToggleOutcome::AlreadySubscribed,
            (false, true) => {
                guard.subscriptions.insert(category);
                ToggleOutcome::Subscribed
            }
            (false, false) => ToggleOutcome::NotSubscribed,
        };
        Some(outcome)
    }

    pub async fn subscriptions_of(&self, id: &ConnectionId) -> Option<HashSet<EventCategory>> {
        let conn = self.connections.get(id)?.clone();
        let guard = conn.lock().await;
        Some(guard.subscriptions.clone())
    }

    /// Send a message to a specific connection. Drops the message when the
    /// send queue is full.
    pub async fn send_to(&self, id: &ConnectionId, message: String) -> bool {
        if let Some(conn) = self.connections.get(id) {
            let tx = conn.lock().await.tx.clone();
            match tx.try_send(message) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(msg)) => {
                    tracing::warn!(
                        conn_id = %id,
                        msg_len = msg.len(),
                        "Send queue full, dropping message"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        } else {
            false
        }
    }

    /// Deliver a serialized event to every connection subscribed to the
    /// category. One connection's full queue never blocks the others.
    pub fn broadcast(&self, category: EventCategory, message: &str) -> usize {
        let mut delivered = 0;
        for entry in self.connections.iter() {
            match entry.value().try_lock() {
                Ok(conn) => {
                    if conn.subscriptions.contains(&category) && conn.is_connected() {
                        if conn.tx.try_send(message.to_string()).is_ok() {
                            delivered += 1;
                        } else {
                            tracing::warn!(conn_id = %conn.id, category = %category, "Dropped event for slow connection");
                        }
                    }
                }
                Err(_) => {
                    tracing::warn!(conn_id = %entry.key(), category = %category, "Connection busy, skipped broadcast delivery");
                }
            }
        }
        delivered
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Remove connections whose transport stopped answering pings.
    pub fn cleanup_dead_connections(&self) -> usize {
        let mut removed = 0;
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter_map(|entry| {
                if let Ok(conn) = entry.value().try_lock() {
                    if !conn.is_alive() {
                        return Some(conn.id.clone());
                    }
                }
                None
            })
            .collect();

        for id in dead {
            self.remove(&id);
            removed += 1;
            tracing::info!(conn_id = %id, "Cleaned up dead connection");
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn get_raw(&self, id: &ConnectionId) -> Option<Arc<Mutex<Connection>>> {
        self.connections.get(id).map(|e| e.clone())
    }
}

/// Handle a WebSocket connection: split into reader/writer, manage
/// lifecycle with heartbeat. Returns once the transport is gone; the
/// caller's registry entry is removed here, but the bound ticket is left
/// alone so its sliding expiration outlives the connection.
pub async fn handle_ws_connection(
    socket: WebSocket,
    conn_id: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ConnectionRegistry>,
    on_message: mpsc::Sender<(ConnectionId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward queued messages to the socket + periodic ping
    let writer_cid = conn_id.clone();
    let writer_registry = Arc::clone(&registry);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(conn_id = %writer_cid, "Sent ping");
                }
            }
        }

        // The queue closing means the registry entry is gone (terminal
        // rejection or shutdown); tell the peer before the socket drops.
        let _ = ws_tx.send(WsMessage::Close(None)).await;

        if let Some(conn) = writer_registry.connections.get(&writer_cid) {
            if let Ok(c) = conn.try_lock() {
                c.connected.store(false, Ordering::Relaxed);
            }
        }
    });

    // Reader task: forward inbound text frames to the processor, track pongs
    let reader_cid = conn_id.clone();
    let reader_registry = Arc::clone(&registry);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_message.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Pong(_) => {
                    if let Some(conn) = reader_registry.connections.get(&reader_cid) {
                        if let Ok(c) = conn.try_lock() {
                            c.record_pong();
                        }
                    }
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pings automatically
                _ => {}
            }
        }
    });

    // Whichever pump finishes first, abort the survivor so both socket
    // halves drop and the transport actually closes.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    tracing::info!(conn_id = %conn_id, "Closing connection");
    registry.remove(&conn_id);
}

/// Start a background task that periodically sweeps dead connections.
pub fn start_cleanup_task(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_connections();
            if removed > 0 {
                tracing::info!(removed = removed, "Dead connection cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> TicketId {
        TicketId::new()
    }

    #[test]
    fn register_and_remove() {
        let registry = ConnectionRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register(ticket());
        let (id2, _rx2) = registry.register(ticket());
        assert_eq!(registry.count(), 2);
        assert!(registry.contains(&id1));

        registry.remove(&id1);
        assert_eq!(registry.count(), 1);
        assert!(!registry.contains(&id1));

        // Idempotent
        registry.remove(&id1);
        registry.remove(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn fresh_ids_per_registration() {
        let registry = ConnectionRegistry::new(32);
        let shared = ticket();
        let (id1, _rx1) = registry.register(shared.clone());
        let (id2, _rx2) = registry.register(shared);
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn ticket_for_returns_bound_ticket() {
        let registry = ConnectionRegistry::new(32);
        let t = ticket();
        let (id, _rx) = registry.register(t.clone());
        assert_eq!(registry.ticket_for(&id).await, Some(t));

        registry.remove(&id);
        assert_eq!(registry.ticket_for(&id).await, None);
    }

    #[tokio::test]
    async fn toggle_is_an_idempotent_set_operation() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register(ticket());
        let cat = EventCategory::CatalogEvents;

        assert_eq!(registry.toggle(&id, cat, true).await, Some(ToggleOutcome::Subscribed));
        assert_eq!(
            registry.toggle(&id, cat, true).await,
            Some(ToggleOutcome::AlreadySubscribed)
        );
        // Double-subscribe never requires double-unsubscribe.
        assert_eq!(registry.toggle(&id, cat, false).await, Some(ToggleOutcome::Unsubscribed));
        assert_eq!(
            registry.toggle(&id, cat, false).await,
            Some(ToggleOutcome::NotSubscribed)
        );
        assert!(registry.subscriptions_of(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn toggle_missing_connection_is_none() {
        let registry = ConnectionRegistry::new(32);
        let ghost = ConnectionId::new();
        assert_eq!(registry.toggle(&ghost, EventCategory::ScenarioEvents, true).await, None);
    }

    #[tokio::test]
    async fn broadcast_scopes_to_subscribers() {
        let registry = ConnectionRegistry::new(32);
        let (id1, mut rx1) = registry.register(ticket());
        let (id2, mut rx2) = registry.register(ticket());
        let (_id3, mut rx3) = registry.register(ticket());

        registry.toggle(&id1, EventCategory::CatalogEvents, true).await;
        registry.toggle(&id2, EventCategory::ScenarioEvents, true).await;

        let delivered = registry.broadcast(EventCategory::CatalogEvents, "hello");
        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_isolates_full_queues() {
        let registry = ConnectionRegistry::new(1);
        let (id1, _rx1) = registry.register(ticket());
        let (id2, mut rx2) = registry.register(ticket());
        registry.toggle(&id1, EventCategory::SimulationEvents, true).await;
        registry.toggle(&id2, EventCategory::SimulationEvents, true).await;

        // Fill id1's queue so the next broadcast drops for it only.
        assert!(registry.send_to(&id1, "filler".into()).await);

        let delivered = registry.broadcast(EventCategory::SimulationEvents, "evt");
        assert_eq!(delivered, 1);
        assert_eq!(rx2.try_recv().unwrap(), "evt");
    }

    #[tokio::test]
    async fn broadcast_skips_busy_connection() {
        let registry = ConnectionRegistry::new(32);
        let (id1, mut rx1) = registry.register(ticket());
        let (id2, mut rx2) = registry.register(ticket());
        registry.toggle(&id1, EventCategory::CatalogEvents, true).await;
        registry.toggle(&id2, EventCategory::CatalogEvents, true).await;

        // Hold id1's lock for the duration of the broadcast; it is skipped,
        // the rest still get the event.
        let conn1 = registry.get_raw(&id1).unwrap();
        let guard = conn1.lock().await;
        let delivered = registry.broadcast(EventCategory::CatalogEvents, "evt");
        drop(guard);

        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), "evt");
    }

    #[tokio::test]
    async fn send_to_specific_connection() {
        let registry = ConnectionRegistry::new(32);
        let (id, mut rx) = registry.register(ticket());

        assert!(registry.send_to(&id, "test message".into()).await);
        assert_eq!(rx.recv().await.unwrap(), "test message");
    }

    #[tokio::test]
    async fn send_to_missing_connection() {
        let registry = ConnectionRegistry::new(32);
        let ghost = ConnectionId::new();
        assert!(!registry.send_to(&ghost, "test".into()).await);
    }

    #[test]
    fn cleanup_removes_silent_connections() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register(ticket());
        assert_eq!(registry.count(), 1);

        if let Some(conn) = registry.get_raw(&id) {
            if let Ok(c) = conn.try_lock() {
                c.last_pong.store(0, Ordering::Relaxed);
            }
        }

        let removed = registry.cleanup_dead_connections();
        assert_eq!(removed, 1);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn pong_tracking_keeps_connection_alive() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(ConnectionId::new(), TicketId::new(), tx);
        assert!(conn.is_alive());
        conn.record_pong();
        assert!(conn.is_alive());
    }
}
