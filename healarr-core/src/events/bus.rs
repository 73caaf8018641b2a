//! Event bus (spec §4.2). Delivers every appended event to in-process
//! subscribers; the WS hub is just another subscriber that re-encodes events
//! as WebSocket frames.
//!
//! Subscriber queues are bounded ring buffers guarded by a per-subscriber
//! mutex plus a `Notify`, rather than `tokio::sync::mpsc`: `mpsc::Sender`
//! only supports "reject when full", and spec §4.2 requires "drop oldest for
//! that subscription", which means the publisher needs to evict from the
//! queue it is pushing into — something `try_send` cannot express. This
//! mirrors the bounded-state-behind-a-lock style of
//! `ferrex-server::websocket::connection::Connection`, just applied to a
//! queue instead of a few scalar fields.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::timeout;
use uuid::Uuid;

use super::{Event, EventType};
use crate::error::{HealarrError, Result};

const DEFAULT_QUEUE_CAPACITY: usize = 256;
const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

struct Subscriber {
    id: Uuid,
    filter: Option<Vec<EventType>>,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

impl Subscriber {
    fn matches(&self, event: &Event) -> bool {
        match (&self.filter, event.event_type()) {
            (None, _) => true,
            (Some(types), Some(et)) => types.contains(&et),
            (Some(_), None) => false,
        }
    }

    async fn push(&self, event: Event) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_waiters();
    }
}

/// Handle returned by `subscribe`. Single-consumer: call `recv` in a loop
/// from one task.
pub struct Subscription {
    subscriber: Arc<Subscriber>,
    bus: Arc<InProcessEventBusInner>,
}

impl Subscription {
    /// Waits for the next event, or `None` once the bus has been shut down
    /// and the queue has drained.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            {
                let mut queue = self.subscriber.queue.lock().await;
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
            }
            if self.bus.shutdown.load(Ordering::Acquire) {
                return None;
            }
            self.subscriber.notify.notified().await;
        }
    }

    /// Count of events dropped for this subscription due to queue overflow
    /// (spec §4.2 "drop oldest ... and record a dropped-count").
    pub fn dropped_count(&self) -> u64 {
        self.subscriber.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let bus = self.bus.clone();
        let id = self.subscriber.id;
        tokio::spawn(async move {
            bus.subscribers.write().await.retain(|s| s.id != id);
        });
    }
}

struct InProcessEventBusInner {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    shutdown: std::sync::atomic::AtomicBool,
}

/// In-process fan-out bus (spec §4.2). `Clone` is cheap (`Arc` inside).
#[derive(Clone)]
pub struct InProcessEventBus {
    inner: Arc<InProcessEventBusInner>,
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessEventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(InProcessEventBusInner {
                subscribers: RwLock::new(Vec::new()),
                shutdown: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Publish an event to every matching subscriber. Never blocks: each
    /// subscriber push is an immediate mutex-protected queue operation, not
    /// a channel send that could suspend on backpressure.
    pub async fn publish(&self, event: Event) -> Result<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(HealarrError::Unavailable(
                "event bus is shut down".to_string(),
            ));
        }

        let subscribers = self.inner.subscribers.read().await;
        for subscriber in subscribers.iter() {
            if subscriber.matches(&event) {
                subscriber.push(event.clone()).await;
            }
        }
        Ok(())
    }

    /// Subscribe to a set of event types. `None` subscribes to everything
    /// and preserves cross-aggregate order (spec §4.2).
    pub async fn subscribe(&self, event_types: Option<Vec<EventType>>) -> Subscription {
        let subscriber = Arc::new(Subscriber {
            id: Uuid::new_v4(),
            filter: event_types,
            queue: Mutex::new(VecDeque::with_capacity(DEFAULT_QUEUE_CAPACITY)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity: DEFAULT_QUEUE_CAPACITY,
        });
        self.inner.subscribers.write().await.push(subscriber.clone());
        Subscription {
            subscriber,
            bus: self.inner.clone(),
        }
    }

    /// Drains outstanding deliveries with a fixed deadline, then closes every
    /// subscription and rejects further publishes.
    pub async fn shutdown(&self) {
        let subscribers = self.inner.subscribers.read().await.clone();
        let _ = timeout(SHUTDOWN_DRAIN_DEADLINE, async {
            for subscriber in &subscribers {
                loop {
                    let empty = subscriber.queue.lock().await.is_empty();
                    if empty {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        })
        .await;

        self.inner.shutdown.store(true, Ordering::Release);
        for subscriber in &subscribers {
            subscriber.notify.notify_waiters();
        }
    }
}
