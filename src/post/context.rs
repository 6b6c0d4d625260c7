//! Application state the dispatcher consults and updates

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::registry::Subscriber;

/// Calls out from the dispatcher to the application holding tuner state
pub trait RadioContext: Send + Sync {
    /// Current device sample rate (samples/second)
    fn sample_rate(&self) -> u32;

    /// Frequency the application is tuned to (Hz)
    fn frequency(&self) -> i64;

    /// Ask the application to retune
    fn set_frequency(&self, frequency: i64);

    /// Subscriber the application last marked active, if any
    fn last_active(&self) -> Option<Arc<Subscriber>>;

    /// Make `subscriber` the application's active subscriber
    fn set_active_subscriber(&self, subscriber: &Arc<Subscriber>);
}

/// Shared tuner state used by the binary and tests
#[derive(Debug, Default)]
pub struct TunerState {
    frequency: AtomicI64,
    sample_rate: AtomicU32,
    retunes: AtomicU64,
    last_active: Mutex<Option<Weak<Subscriber>>>,
}

impl TunerState {
    pub fn new(frequency: i64, sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            frequency: AtomicI64::new(frequency),
            sample_rate: AtomicU32::new(sample_rate),
            ..Self::default()
        })
    }

    /// Number of retune requests received
    pub fn retune_count(&self) -> u64 {
        self.retunes.load(Ordering::Relaxed)
    }
}

impl RadioContext for TunerState {
    fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    fn frequency(&self) -> i64 {
        self.frequency.load(Ordering::Acquire)
    }

    fn set_frequency(&self, frequency: i64) {
        self.retunes.fetch_add(1, Ordering::Relaxed);
        self.frequency.store(frequency, Ordering::Release);
    }

    fn last_active(&self) -> Option<Arc<Subscriber>> {
        self.last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn set_active_subscriber(&self, subscriber: &Arc<Subscriber>) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::downgrade(subscriber));
    }
}
