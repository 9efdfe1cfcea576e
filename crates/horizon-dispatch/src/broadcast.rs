//! Broadcast of string notifications to registered listeners.
//!
//! A [`BroadcastSink`] fans a value out to every listener in registration
//! order, synchronously, on the calling thread. The message loop only calls
//! it from the owning thread, so listeners never race each other.
//!
//! # Fan-out semantics
//!
//! Each pass iterates a snapshot of the listener list taken when the pass
//! starts:
//!
//! - a listener registered during a pass is not called in that pass;
//! - a listener deregistered during a pass is still called in that pass.
//!
//! A panicking listener is logged and skipped; the remaining listeners still
//! receive the value.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::logging::{panic_message, targets};

/// Receives broadcast values.
pub trait ActionListener: Send + Sync {
    /// Called with each broadcast value.
    fn action(&self, message: &str);
}

impl<F> ActionListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn action(&self, message: &str) {
        self(message)
    }
}

/// A unique identifier for a registered broadcast listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Get the raw u64 value of this listener ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Global counter for generating unique listener IDs.
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

fn next_listener_id() -> ListenerId {
    ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
}

struct ListenerEntry {
    id: ListenerId,
    listener: Arc<dyn ActionListener>,
}

/// An ordered list of broadcast listeners.
#[derive(Default)]
pub struct BroadcastSink {
    listeners: Mutex<Vec<ListenerEntry>>,
}

impl BroadcastSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener at the end of the list.
    ///
    /// Registering the same `Arc` twice returns the existing id; a listener
    /// is never called twice for one value.
    pub fn register(&self, listener: Arc<dyn ActionListener>) -> ListenerId {
        let mut listeners = self.listeners.lock();
        if let Some(entry) = listeners.iter().find(|e| Arc::ptr_eq(&e.listener, &listener)) {
            return entry.id;
        }
        let id = next_listener_id();
        listeners.push(ListenerEntry { id, listener });
        id
    }

    /// Remove a listener.
    ///
    /// Returns `true` if the listener was registered.
    pub fn deregister(&self, id: ListenerId) -> bool {
        let removed = {
            let mut listeners = self.listeners.lock();
            listeners
                .iter()
                .position(|e| e.id == id)
                .map(|pos| listeners.remove(pos))
        };
        removed.is_some()
    }

    /// Send `value` to every listener in registration order.
    ///
    /// Returns the number of listeners that were called.
    pub fn broadcast(&self, value: &str) -> usize {
        let snapshot: Vec<Arc<dyn ActionListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|e| e.listener.clone())
            .collect();

        tracing::trace!(target: targets::BROADCAST, listeners = snapshot.len(), value, "broadcasting");

        for listener in &snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener.action(value))) {
                tracing::error!(
                    target: targets::BROADCAST,
                    panic = panic_message(payload.as_ref()),
                    "broadcast listener panicked"
                );
            }
        }
        snapshot.len()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Remove every listener.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.listeners.lock());
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn ActionListener> {
        let log = log.clone();
        Arc::new(move |value: &str| log.lock().push(format!("{name}:{value}")))
    }

    #[test]
    fn test_registration_order() {
        let sink = BroadcastSink::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        sink.register(recorder(&log, "L1"));
        sink.register(recorder(&log, "L2"));

        assert_eq!(sink.broadcast("x"), 2);
        assert_eq!(*log.lock(), vec!["L1:x", "L2:x"]);
    }

    #[test]
    fn test_deregister() {
        let sink = BroadcastSink::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = sink.register(recorder(&log, "L1"));
        sink.register(recorder(&log, "L2"));

        assert!(sink.deregister(first));
        assert!(!sink.deregister(first));

        sink.broadcast("y");
        assert_eq!(*log.lock(), vec!["L2:y"]);
    }

    #[test]
    fn test_duplicate_registration() {
        let sink = BroadcastSink::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let listener = recorder(&log, "L");

        let a = sink.register(listener.clone());
        let b = sink.register(listener);
        assert_eq!(a, b);
        assert_eq!(sink.len(), 1);

        sink.broadcast("z");
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_listener_added_during_pass_is_skipped() {
        let sink = Arc::new(BroadcastSink::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let sink_clone = sink.clone();
        let late = recorder(&log, "late");
        sink.register(Arc::new(move |_: &str| {
            sink_clone.register(late.clone());
        }));

        sink.broadcast("first");
        assert!(log.lock().is_empty());
        assert_eq!(sink.len(), 2);

        sink.broadcast("second");
        assert_eq!(*log.lock(), vec!["late:second"]);
    }

    #[test]
    fn test_listener_removed_during_pass_still_called() {
        let sink = Arc::new(BroadcastSink::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let victim_id = Arc::new(Mutex::new(None));

        let sink_clone = sink.clone();
        let victim_clone = victim_id.clone();
        sink.register(Arc::new(move |_: &str| {
            if let Some(id) = *victim_clone.lock() {
                sink_clone.deregister(id);
            }
        }));
        *victim_id.lock() = Some(sink.register(recorder(&log, "victim")));

        sink.broadcast("once");
        assert_eq!(*log.lock(), vec!["victim:once"]);
        assert_eq!(sink.len(), 1);

        sink.broadcast("twice");
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let sink = BroadcastSink::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        fn failing(_: &str) {
            panic!("listener failure");
        }

        sink.register(Arc::new(failing));
        sink.register(recorder(&log, "after"));

        assert_eq!(sink.broadcast("v"), 2);
        assert_eq!(*log.lock(), vec!["after:v"]);
    }
}
