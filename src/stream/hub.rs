use crate::stream::frame::Frame;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Default per-subscriber queue depth
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Handle for one connection's queue, registered against one car
#[derive(Debug)]
pub struct Subscriber {
    id: u64,
    car_id: i64,
    rx: mpsc::Receiver<Frame>,
}

impl Subscriber {
    pub fn car_id(&self) -> i64 {
        self.car_id
    }

    /// Wait for the next frame; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next frame if one is already queued
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

/// Per-car fan-out of frames to many subscribers.
///
/// Broadcasting never blocks: each subscriber has a bounded queue and a frame
/// that does not fit is dropped for that subscriber only.
pub struct Hub {
    subscribers: DashMap<i64, HashMap<u64, mpsc::Sender<Frame>>>,
    next_id: AtomicU64,
    capacity: usize,
    dropped: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new bounded queue for `car_id`
    pub fn subscribe(&self, car_id: i64) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.entry(car_id).or_default().insert(id, tx);
        debug!(car_id = car_id, subscriber = id, "Subscriber registered");
        Subscriber { id, car_id, rx }
    }

    /// Remove the subscriber and close its queue.
    ///
    /// The car's subscriber set is released with its last member.
    pub fn unsubscribe(&self, subscriber: &Subscriber) {
        let car_id = subscriber.car_id;
        if let Some(mut set) = self.subscribers.get_mut(&car_id) {
            // Dropping the only sender closes the queue
            set.remove(&subscriber.id);
        }
        self.subscribers.remove_if(&car_id, |_, set| set.is_empty());
        debug!(car_id = car_id, subscriber = subscriber.id, "Subscriber removed");
    }

    /// Offer `frame` to every subscriber of `car_id` without waiting.
    ///
    /// Returns how many queues accepted it. Empty frames are never delivered.
    pub fn broadcast(&self, car_id: i64, frame: Frame) -> usize {
        if frame.is_empty() {
            return 0;
        }
        let Some(set) = self.subscribers.get(&car_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, tx) in set.iter() {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(car_id = car_id, subscriber = id, "Queue full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, car_id: i64) -> usize {
        self.subscribers.get(&car_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Cars with at least one subscriber
    pub fn active_cars(&self) -> usize {
        self.subscribers.len()
    }

    /// Frames dropped for slow subscribers since startup
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber that removes itself from the hub when dropped, so every exit path of
/// its owner unsubscribes
pub struct Subscription {
    hub: Arc<Hub>,
    subscriber: Subscriber,
}

impl Subscription {
    pub fn new(hub: Arc<Hub>, car_id: i64) -> Self {
        let subscriber = hub.subscribe(car_id);
        Self { hub, subscriber }
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        self.subscriber.recv().await
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.subscriber);
    }
}
