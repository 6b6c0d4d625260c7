//! Demodulator subscribers and the registry the dispatcher iterates

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::pool::BlockLease;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Items delivered to a subscriber's input queue
#[derive(Debug)]
pub enum DemodFeed {
    /// Shared converted samples; drop the lease once read
    Samples(BlockLease),
    /// Subscriber went out of range: metadata only, no payload
    Idle { frequency: i64, sample_rate: u32 },
}

/// One demodulator consumer bound to the post-processing stage
#[derive(Debug)]
pub struct Subscriber {
    id: u64,
    name: String,
    frequency: AtomicI64,
    active: AtomicBool,
    follow: AtomicBool,
    tracking: AtomicBool,
    queue: Sender<DemodFeed>,
}

impl Subscriber {
    /// Create an inactive subscriber tuned to `frequency`, returning the
    /// receiving end of its input queue
    pub fn new(name: impl Into<String>, frequency: i64) -> (Arc<Self>, Receiver<DemodFeed>) {
        let (queue, rx) = unbounded();
        let subscriber = Arc::new(Self {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            frequency: AtomicI64::new(frequency),
            active: AtomicBool::new(false),
            follow: AtomicBool::new(false),
            tracking: AtomicBool::new(false),
            queue,
        });
        (subscriber, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frequency(&self) -> i64 {
        self.frequency.load(Ordering::Acquire)
    }

    pub fn set_frequency(&self, frequency: i64) {
        self.frequency.store(frequency, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// One-shot request that the application retune to this subscriber
    pub fn is_follow(&self) -> bool {
        self.follow.load(Ordering::Acquire)
    }

    pub fn set_follow(&self, follow: bool) {
        self.follow.store(follow, Ordering::Release);
    }

    /// Tracking subscribers are never deactivated for being out of range
    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::Acquire)
    }

    pub fn set_tracking(&self, tracking: bool) {
        self.tracking.store(tracking, Ordering::Release);
    }

    /// Non-blocking push; a disconnected consumer just drops the item
    pub(crate) fn push(&self, feed: DemodFeed) -> bool {
        self.queue.send(feed).is_ok()
    }
}

/// Bound subscribers, guarded by the lock shared with the dispatch pass
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber; binding twice has no effect
    pub fn bind(&self, subscriber: Arc<Subscriber>) {
        let mut subscribers = self.lock();
        if !subscribers.iter().any(|s| Arc::ptr_eq(s, &subscriber)) {
            subscribers.push(subscriber);
        }
    }

    /// Remove a subscriber; unknown subscribers are ignored
    pub fn unbind(&self, subscriber: &Arc<Subscriber>) {
        self.lock().retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Exclusive access for the duration of a dispatch pass
    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<Arc<Subscriber>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
