//! Lossy, non-blocking fan-out of frames to independently paced consumers.
//!
//! - Every consumer owns a zero-capacity channel, so a frame is handed over
//!   only to a consumer that is already blocked in `recv`.
//! - `publish` never waits: a consumer that is still busy with its previous
//!   frame misses this one (counted as a drop) and picks up whatever is
//!   published after it is ready again. A consumer whose receiver is gone is
//!   pruned.
//! - A `Subscription` detaches itself when dropped.
//!
//! The topic table lock is only held while walking the consumer list with
//! `try_send`, so a stalled viewer can never hold up the publisher.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use crate::frame::SharedFrame;
use crate::stats::Stats;

/// Outcome of a single `publish`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

struct Consumer {
    id: u64,
    tx: Sender<SharedFrame>,
}

#[derive(Default)]
struct Topic {
    consumers: Vec<Consumer>,
    latest: Option<SharedFrame>,
    closed: bool,
}

struct Inner {
    topics: Mutex<HashMap<String, Topic>>,
    stats: Arc<Stats>,
    next_id: AtomicU64,
}

impl Inner {
    fn unsubscribe(&self, topic: &str, id: u64) {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(t) = topics.get_mut(topic) {
            t.consumers.retain(|c| c.id != id);
        }
    }
}

/// Named broadcast points shared by the decoder, the worker and the HTTP server.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                stats,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Offer `frame` to every consumer of `topic` without blocking.
    pub fn publish(&self, topic: &str, frame: SharedFrame) -> Delivery {
        let mut delivery = Delivery::default();
        let mut topics = self
            .inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let t = topics.entry(topic.to_string()).or_default();
        if t.closed {
            return delivery;
        }

        t.consumers.retain(|consumer| {
            match consumer.tx.try_send(Arc::clone(&frame)) {
                Ok(()) => {
                    delivery.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    delivery.dropped += 1;
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::debug!("pruning disconnected consumer {} on {}", consumer.id, topic);
                    false
                }
            }
        });
        t.latest = Some(frame);
        drop(topics);

        if delivery.dropped > 0 {
            self.inner.stats.frames_dropped(delivery.dropped as u64);
        }
        delivery
    }

    /// Attach a new consumer to `topic`.
    ///
    /// Subscribing to a closed topic yields a subscription that is already at
    /// end of stream.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        self.subscribe_with_latest(topic).0
    }

    /// Attach a new consumer and return the topic's latest frame with it.
    ///
    /// Both are taken under one lock: every frame published afterwards is
    /// newer than the returned one.
    pub fn subscribe_with_latest(&self, topic: &str) -> (Subscription, Option<SharedFrame>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(0);
        let latest = {
            let mut topics = self
                .inner
                .topics
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let t = topics.entry(topic.to_string()).or_default();
            if !t.closed {
                t.consumers.push(Consumer { id, tx });
            }
            t.latest.clone()
        };
        log::debug!("consumer {} subscribed to {}", id, topic);
        let subscription = Subscription {
            id,
            topic: topic.to_string(),
            rx,
            inner: Arc::downgrade(&self.inner),
        };
        (subscription, latest)
    }

    /// Detach every consumer of `topic` and reject further publishes.
    pub fn close(&self, topic: &str) {
        let mut topics = self
            .inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let t = topics.entry(topic.to_string()).or_default();
        t.closed = true;
        t.consumers.clear();
    }

    pub fn is_closed(&self, topic: &str) -> bool {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|t| t.closed)
            .unwrap_or(false)
    }

    /// Last frame published to `topic`.
    pub fn latest(&self, topic: &str) -> Option<SharedFrame> {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .and_then(|t| t.latest.clone())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|t| t.consumers.len())
            .unwrap_or(0)
    }

    pub fn has_subscribers(&self, topic: &str) -> bool {
        self.subscriber_count(topic) > 0
    }
}

/// One consumer's end of a topic.
pub struct Subscription {
    id: u64,
    topic: String,
    rx: Receiver<SharedFrame>,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the next frame; `None` once the topic is closed.
    pub fn recv(&self) -> Option<SharedFrame> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<SharedFrame, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(&self.topic, self.id);
            log::debug!("consumer {} left {}", self.id, self.topic);
        }
    }
}
