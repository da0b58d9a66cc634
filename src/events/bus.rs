//! Bounded fan-out of panel events to live subscribers

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::Event;

/// Maximum number of concurrent subscribers
pub const MAX_SUBSCRIBERS: usize = 4;
/// Per-subscriber queue depth
pub const SUBSCRIBER_BUFFER: usize = 16;

struct BusInner {
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<Event>>>,
    max_subscribers: usize,
    buffer: usize,
}

impl BusInner {
    fn remove(&self, id: &Uuid) -> bool {
        self.subscribers.lock().remove(id).is_some()
    }
}

/// Event bus shared by the watchdog, the process controller and the SSE handlers
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_limits(MAX_SUBSCRIBERS, SUBSCRIBER_BUFFER)
    }

    pub fn with_limits(max_subscribers: usize, buffer: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                max_subscribers,
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register a subscriber; `None` when every slot is taken
    pub fn subscribe(&self) -> Option<Subscription> {
        let mut subscribers = self.inner.subscribers.lock();
        if subscribers.len() >= self.inner.max_subscribers {
            debug!("Event bus full ({} subscribers)", subscribers.len());
            return None;
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        subscribers.insert(id, tx);
        debug!("Subscriber {} joined ({} total)", id, subscribers.len());

        Some(Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Remove a subscriber; its stream ends once drained
    pub fn unsubscribe(&self, id: &Uuid) {
        if self.inner.remove(id) {
            debug!("Subscriber {} left", id);
        }
    }

    /// Deliver `event` to every subscriber without blocking
    pub fn publish(&self, event: Event) {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Subscriber {} is behind, dropping {} event", id, event.kind);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of one subscriber; leaves the bus when dropped
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Event>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.id);
        }
    }
}
