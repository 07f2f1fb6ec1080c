//! Observable progress value shared by the upload controller and its observers
//!
//! The value lives in `[0, 100]`. Exactly one [`ProgressWriter`] exists per
//! channel; any number of [`ProgressSignal`] read handles can be cloned from
//! it. Readers that must not miss a threshold crossing take a
//! [`ProgressSubscription`], which delivers every published value in order.
//! Readers that only care about the latest value use [`ProgressSignal::watch`].

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};

pub const PROGRESS_MIN: f64 = 0.0;
pub const PROGRESS_MAX: f64 = 100.0;

/// Clamp any input into the progress range. NaN collapses to 0.
#[must_use]
pub fn clamp_progress(value: f64) -> f64 {
    if value.is_nan() {
        return PROGRESS_MIN;
    }
    value.clamp(PROGRESS_MIN, PROGRESS_MAX)
}

struct Shared {
    current: watch::Sender<f64>,
    subscribers: Mutex<Subscribers>,
}

#[derive(Default)]
struct Subscribers {
    senders: Vec<mpsc::UnboundedSender<f64>>,
    /// Set once the writer is dropped.
    closed: bool,
}

impl Shared {
    fn subscribers(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a new progress channel starting at 0.
#[must_use]
pub fn progress_channel() -> (ProgressWriter, ProgressSignal) {
    let (current, _) = watch::channel(PROGRESS_MIN);
    let shared = Arc::new(Shared {
        current,
        subscribers: Mutex::new(Subscribers::default()),
    });
    (
        ProgressWriter {
            shared: Arc::clone(&shared),
        },
        ProgressSignal { shared },
    )
}

/// The single write side of a progress channel. Not `Clone`.
pub struct ProgressWriter {
    shared: Arc<Shared>,
}

impl ProgressWriter {
    /// Publish `value` (clamped). Returns `false` when the value did not change.
    pub fn publish(&self, value: f64) -> bool {
        let value = clamp_progress(value);
        let mut subscribers = self.shared.subscribers();
        if (*self.shared.current.borrow() - value).abs() < f64::EPSILON {
            return false;
        }
        self.shared.current.send_replace(value);
        subscribers.senders.retain(|tx| tx.send(value).is_ok());
        true
    }

    /// Publish `value` only if it moves progress forward.
    pub fn advance(&self, value: f64) -> bool {
        let value = clamp_progress(value);
        if value <= self.value() {
            return false;
        }
        self.publish(value)
    }

    pub fn reset(&self) -> bool {
        self.publish(PROGRESS_MIN)
    }

    pub fn complete(&self) -> bool {
        self.publish(PROGRESS_MAX)
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        *self.shared.current.borrow()
    }

    /// A read handle onto this channel.
    #[must_use]
    pub fn signal(&self) -> ProgressSignal {
        ProgressSignal {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for ProgressWriter {
    fn drop(&mut self) {
        let mut subscribers = self.shared.subscribers();
        subscribers.closed = true;
        subscribers.senders.clear();
    }
}

impl std::fmt::Debug for ProgressWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressWriter")
            .field("value", &self.value())
            .finish()
    }
}

/// Read-only handle. Cloning it never grants write access.
#[derive(Clone)]
pub struct ProgressSignal {
    shared: Arc<Shared>,
}

impl ProgressSignal {
    #[must_use]
    pub fn value(&self) -> f64 {
        *self.shared.current.borrow()
    }

    /// Ordered, non-coalescing stream of values. The current value is
    /// delivered first.
    #[must_use]
    pub fn subscribe(&self) -> ProgressSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.shared.subscribers();
        // Seeded under the lock so no publish can slip in between.
        let _ = tx.send(*self.shared.current.borrow());
        if !subscribers.closed {
            subscribers.senders.push(tx);
        }
        ProgressSubscription { rx }
    }

    /// Latest-value view; intermediate values may be skipped.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<f64> {
        self.shared.current.subscribe()
    }

    /// Number of live subscriptions, pruning closed ones.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.shared.subscribers();
        subscribers.senders.retain(|tx| !tx.is_closed());
        subscribers.senders.len()
    }
}

impl std::fmt::Debug for ProgressSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSignal")
            .field("value", &self.value())
            .finish()
    }
}

/// Receives every value published after (and including) subscription time.
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct ProgressSubscription {
    rx: mpsc::UnboundedReceiver<f64>,
}

impl ProgressSubscription {
    /// Next published value, or `None` once the writer is dropped and the
    /// backlog is drained.
    pub async fn next(&mut self) -> Option<f64> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Self::next`].
    pub fn try_next(&mut self) -> Option<f64> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}
