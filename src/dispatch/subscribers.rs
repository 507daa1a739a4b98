//! Subscriber Sets
//!
//! A set of callbacks keyed by allocation identity. Delivery snapshots the
//! set before invoking anything, so callbacks may register or unregister
//! while a dispatch is running.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// A subscriber callback. Identity is the `Arc` allocation, so keep the
/// handle around to unregister it later.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Wrap a closure into a [`Callback`]
pub fn callback<T, F>(f: F) -> Callback<T>
where
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn identity<T: ?Sized>(callback: &Arc<T>) -> usize {
    Arc::as_ptr(callback) as *const () as usize
}

/// Outcome of one delivery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that returned normally
    pub delivered: usize,
    /// Callbacks that panicked
    pub failed: usize,
}

/// A subscriber panicked while handling a payload
#[derive(Debug, Clone, Error)]
#[error("Subscriber on {channel} panicked: {message}")]
pub struct DeliveryError {
    pub channel: &'static str,
    pub message: String,
}

/// Set of callbacks for one payload type
pub struct SubscriberSet<T> {
    // The map holds a clone of each Arc, so an address cannot be reused
    // while its entry is present.
    callbacks: RwLock<HashMap<usize, Callback<T>>>,
}

impl<T> SubscriberSet<T> {
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
        }
    }

    /// Add a callback. Returns false if it was already registered.
    pub fn add(&self, callback: &Callback<T>) -> bool {
        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let key = identity(callback);
        if callbacks.contains_key(&key) {
            return false;
        }
        callbacks.insert(key, Arc::clone(callback));
        true
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn remove(&self, callback: &Callback<T>) -> bool {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&identity(callback))
            .is_some()
    }

    pub fn contains(&self, callback: &Callback<T>) -> bool {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&identity(callback))
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Invoke every registered callback exactly once with `payload`
    ///
    /// A panicking callback is logged and counted; the rest still run.
    pub fn deliver(&self, channel: &'static str, payload: &T) -> DispatchReport {
        let snapshot: Vec<Callback<T>> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut report = DispatchReport::default();

        for callback in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    let error = DeliveryError {
                        channel,
                        message: panic_message(panic.as_ref()),
                    };
                    tracing::error!(channel, error = %error, "Subscriber failed during dispatch");
                }
            }
        }

        if report.delivered + report.failed > 0 {
            tracing::trace!(
                channel,
                delivered = report.delivered,
                failed = report.failed,
                "Dispatched payload"
            );
        }

        report
    }
}

impl<T> Default for SubscriberSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
