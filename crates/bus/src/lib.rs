//! Process-local publish/subscribe bus.
//!
//! Subscribers register an async handler against a textual topic. Every
//! subscriber owns a bounded inbox drained by its own Tokio task, which means:
//!
//! - handlers never run on the publisher's task,
//! - a single subscriber observes events in the order they were published,
//! - a slow subscriber applies back-pressure to [`Bus::publish`] only, and is
//!   skipped (refused) by [`Bus::try_publish`] once its inbox is full,
//! - a panicking handler is logged and absorbed; neither the publisher nor the
//!   other subscribers notice.
//!
//! Publishing returns a [`Receipt`] that resolves once every subscriber that
//! accepted the payload has finished handling it.
//!
//! ```
//! use kiln_bus::Bus;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus: Bus<String> = Bus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! bus.subscribe("greetings", move |_message: String| {
//!     let counter = Arc::clone(&counter);
//!     async move {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     }
//! });
//! let delivered = bus.publish("greetings", "hello".to_string()).await.delivered().await;
//! assert_eq!(delivered, 1);
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! # }
//! ```

mod receipt;

pub use crate::receipt::Receipt;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

/// Inbox size used by [`Bus::new`].
pub const DEFAULT_CAPACITY: usize = 1024;

struct Envelope<P> {
    payload: P,
    ack: oneshot::Sender<()>,
}

struct Subscriber<P> {
    id: u64,
    inbox: mpsc::Sender<Envelope<P>>,
}

/// Handle identifying one registration made with [`Bus::subscribe`].
///
/// Dropping the handle does **not** unsubscribe; pass it to
/// [`Bus::unsubscribe`] to stop delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    topic: String,
    id: u64,
}
impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Topic-keyed publish/subscribe bus.
pub struct Bus<P> {
    topics: RwLock<HashMap<String, Vec<Subscriber<P>>>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl<P> fmt::Debug for Bus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Bus")
            .field("topics", &topics.iter().map(|(t, s)| (t.clone(), s.len())).collect::<HashMap<_, _>>())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<P: Clone + Send + 'static> Default for Bus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone + Send + 'static> Bus<P> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus whose subscriber inboxes hold at most `capacity` pending
    /// payloads each.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `topic`.
    ///
    /// Spawns the subscriber's delivery task, so this must be called from
    /// within a Tokio runtime.
    pub fn subscribe<F, Fut>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (inbox, rx) = mpsc::channel(self.capacity);
        tokio::spawn(drain(topic.clone(), id, rx, handler));
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { id, inbox });
        tracing::debug!(topic = %topic, subscriber = id, "Subscribed to topic");
        Subscription { topic, id }
    }

    /// Remove a subscription. Payloads already queued in its inbox are still
    /// handled; nothing new is delivered.
    ///
    /// Returns `false` if the subscription was unknown.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = topics.get_mut(&subscription.topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != subscription.id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            topics.remove(&subscription.topic);
        }
        removed
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Snapshot the inboxes for a topic so that no lock is held while sending.
    fn inboxes(&self, topic: &str) -> Vec<(u64, mpsc::Sender<Envelope<P>>)> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|subscribers| subscribers.iter().map(|s| (s.id, s.inbox.clone())).collect())
            .unwrap_or_default()
    }

    /// Deliver `payload` to every subscriber of `topic`, waiting for inbox
    /// capacity where a subscriber is lagging.
    pub async fn publish(&self, topic: &str, payload: P) -> Receipt {
        let mut receipt = Receipt::default();
        for (id, inbox) in self.inboxes(topic) {
            let (ack, acked) = oneshot::channel();
            match inbox.send(Envelope { payload: payload.clone(), ack }).await {
                Ok(()) => receipt.accept(acked),
                Err(_) => {
                    tracing::debug!(topic, subscriber = id, "Subscriber task has stopped; skipping");
                    receipt.refuse();
                },
            }
        }
        receipt
    }

    /// Deliver `payload` without waiting. Subscribers whose inbox is full
    /// are refused the payload.
    pub fn try_publish(&self, topic: &str, payload: P) -> Receipt {
        let mut receipt = Receipt::default();
        for (id, inbox) in self.inboxes(topic) {
            let (ack, acked) = oneshot::channel();
            match inbox.try_send(Envelope { payload: payload.clone(), ack }) {
                Ok(()) => receipt.accept(acked),
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(topic, subscriber = id, "Subscriber inbox is full; payload refused");
                    receipt.refuse();
                },
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(topic, subscriber = id, "Subscriber task has stopped; skipping");
                    receipt.refuse();
                },
            }
        }
        receipt
    }
}

async fn drain<P, F, Fut>(topic: String, id: u64, mut rx: mpsc::Receiver<Envelope<P>>, handler: F)
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    while let Some(Envelope { payload, ack }) = rx.recv().await {
        // The handler call itself happens inside the caught future, so both
        // a panicking constructor and a panicking poll are absorbed.
        let outcome = AssertUnwindSafe(async { handler(payload).await }).catch_unwind().await;
        if let Err(panic) = outcome {
            tracing::error!(topic = %topic, subscriber = id, panic = panic_message(&*panic), "Subscriber panicked");
        }
        _ = ack.send(());
    }
    tracing::trace!(topic = %topic, subscriber = id, "Subscriber task finished");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
