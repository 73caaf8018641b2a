//! WebSocket Hub (spec §4.7). Registers clients, broadcasts the domain
//! event stream with per-client queueing, and disconnects slow consumers
//! instead of blocking the broadcaster. Grounded in
//! `ferrex-server::websocket::connection::Connection` (per-connection id,
//! `mpsc::Sender`, ping-tracked health) generalised to a registry + one
//! broadcast task per spec §5 ("one writer task per client plus one
//! broadcast task").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::events::Event;

/// Bound on a client's outbound queue. Once full the client is
/// disconnected rather than the broadcaster blocking (spec §4.7, §9, P10).
const CLIENT_QUEUE_CAPACITY: usize = 128;

/// One registered WebSocket client. `sender` feeds that client's writer
/// task; `send_message` in `ferrex_core`'s `Connection` is the same shape.
struct Client {
    id: Uuid,
    sender: mpsc::Sender<Event>,
}

#[derive(Default)]
struct HubState {
    clients: RwLock<Vec<Client>>,
}

/// A registration handle. Dropping it unregisters the client; callers
/// normally drive `recv()` in the connection's write loop instead of
/// dropping explicitly, but both paths lead to the same cleanup.
pub struct ClientHandle {
    id: Uuid,
    receiver: mpsc::Receiver<Event>,
    hub: Arc<HubState>,
    count: Arc<AtomicUsize>,
}

impl ClientHandle {
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let id = self.id;
        let count = self.count.clone();
        tokio::spawn(async move {
            let mut clients = hub.clients.write().await;
            let before = clients.len();
            clients.retain(|c| c.id != id);
            if clients.len() < before {
                count.fetch_sub(1, Ordering::Relaxed);
            }
        });
    }
}

/// Registry + broadcaster for WebSocket clients (spec §4.7). `Clone` is
/// cheap; every handler/task shares one hub instance via `AppState`.
#[derive(Clone)]
pub struct WsHub {
    state: Arc<HubState>,
    client_count: Arc<AtomicUsize>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(HubState::default()),
            client_count: Arc::new(AtomicUsize::new(0)),
            shutdown: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Registers a new client and returns its receive handle. The caller's
    /// WebSocket write loop should `recv()` in a loop and forward frames.
    pub async fn register(&self) -> Option<ClientHandle> {
        if self.shutdown.load(Ordering::Acquire) {
            return None;
        }
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let id = Uuid::new_v4();
        self.state.clients.write().await.push(Client { id, sender: tx });
        self.client_count.fetch_add(1, Ordering::Relaxed);
        Some(ClientHandle {
            id,
            receiver: rx,
            hub: self.state.clone(),
            count: self.client_count.clone(),
        })
    }

    /// Broadcasts one domain event to every registered client. Per-client
    /// delivery is FIFO (spec §5); a client whose queue is full is
    /// unregistered rather than making the broadcaster wait (P10).
    pub async fn broadcast(&self, event: Event) {
        let clients = self.state.clients.read().await;
        let mut full = Vec::new();
        for client in clients.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = client.sender.try_send(event.clone())
            {
                full.push(client.id);
            }
        }
        drop(clients);

        if !full.is_empty() {
            let mut clients = self.state.clients.write().await;
            clients.retain(|c| !full.contains(&c.id));
            let dropped = full.len();
            self.client_count.fetch_sub(dropped, Ordering::Relaxed);
            warn!(dropped, "disconnected slow WebSocket clients");
        }
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    /// Closes every socket with a normal-closure frame (the axum handler
    /// observes this by the receiver closing) and stops accepting new
    /// registrations.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.state.clients.write().await.clear();
        self.client_count.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AggregateType;
    use serde_json::json;

    fn sample_event() -> Event {
        Event {
            id: 1,
            aggregate_type: AggregateType::Corruption.as_str().to_string(),
            aggregate_id: "agg-1".to_string(),
            event_type: "CorruptionDetected".to_string(),
            payload: json!({}),
            version: 1,
            created_at: chrono::Utc::now(),
            actor_id: None,
        }
    }

    #[tokio::test]
    async fn registered_client_receives_broadcast() {
        let hub = WsHub::new();
        let mut client = hub.register().await.unwrap();
        assert_eq!(hub.client_count(), 1);

        hub.broadcast(sample_event()).await;
        let received = client.recv().await.unwrap();
        assert_eq!(received.id, 1);
    }

    #[tokio::test]
    async fn full_queue_disconnects_client_without_blocking() {
        let hub = WsHub::new();
        let _client = hub.register().await.unwrap();

        for _ in 0..(CLIENT_QUEUE_CAPACITY + 5) {
            hub.broadcast(sample_event()).await;
        }

        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_clears_clients_and_rejects_new_registrations() {
        let hub = WsHub::new();
        let _client = hub.register().await.unwrap();
        hub.shutdown().await;
        assert_eq!(hub.client_count(), 0);
        assert!(hub.register().await.is_none());
    }
}
