//! Addressable recipients of envelopes.
//!
//! Membership in the live set is the only authority on whether a
//! [`RecipientId`] may still be delivered to. Envelopes addressed to an id that
//! is no longer registered are dropped without touching the recipient.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use horizon_dispatch::{Envelope, MessageLoop};
//!
//! let message_loop = MessageLoop::new();
//! let id = message_loop.register_recipient(Arc::new(|envelope: &Envelope| {
//!     println!("got tag {}", envelope.tag());
//! }));
//!
//! message_loop.post(Envelope::new(id, 1));
//! message_loop.dispatch_pending();
//!
//! assert!(message_loop.deregister_recipient(id));
//! ```

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use slotmap::{SlotMap, new_key_type};

use crate::envelope::Envelope;

new_key_type! {
    /// A handle to a registered recipient.
    ///
    /// Ids are never reused, so an envelope addressed to a recipient that has
    /// been deregistered cannot reach a newer recipient by accident.
    pub struct RecipientId;
}

/// Something that handles envelopes on the owning thread.
///
/// A handler may panic; the dispatch loop isolates the panic and carries on
/// with the next envelope.
pub trait Recipient: Send + Sync {
    /// Handle one envelope addressed to this recipient.
    fn handle(&self, envelope: &Envelope);
}

impl<F> Recipient for F
where
    F: Fn(&Envelope) + Send + Sync,
{
    fn handle(&self, envelope: &Envelope) {
        self(envelope)
    }
}

/// The set of live recipients.
#[derive(Default)]
pub(crate) struct RecipientSet {
    recipients: RwLock<SlotMap<RecipientId, Arc<dyn Recipient>>>,
}

impl RecipientSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, recipient: Arc<dyn Recipient>) -> RecipientId {
        self.recipients.write().insert(recipient)
    }

    pub fn remove(&self, id: RecipientId) -> bool {
        // Dropped outside the write lock: a recipient's destructor may call back in.
        let removed = self.recipients.write().remove(id);
        removed.is_some()
    }

    /// Look up a live recipient. The read lock is released before returning,
    /// so the handler may (de)register recipients while it runs.
    pub fn get(&self, id: RecipientId) -> Option<Arc<dyn Recipient>> {
        self.recipients.read().get(id).cloned()
    }

    pub fn contains(&self, id: RecipientId) -> bool {
        self.recipients.read().contains_key(id)
    }

    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.recipients.write());
        drop(removed);
    }
}

/// Deregisters a recipient when dropped.
///
/// Returned by [`MessageLoop::register_recipient_guarded`](crate::MessageLoop::register_recipient_guarded).
/// The guard does not keep the message loop alive; dropping it after the loop
/// is gone does nothing.
pub struct RecipientGuard {
    set: Weak<RecipientSet>,
    id: RecipientId,
}

impl RecipientGuard {
    pub(crate) fn new(set: &Arc<RecipientSet>, id: RecipientId) -> Self {
        Self {
            set: Arc::downgrade(set),
            id,
        }
    }

    /// The id of the guarded recipient.
    pub fn id(&self) -> RecipientId {
        self.id
    }
}

impl Drop for RecipientGuard {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_insert_get_remove() {
        let set = RecipientSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = calls.clone();
        let id = set.insert(Arc::new(move |_: &Envelope| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(set.contains(id));
        set.get(id).unwrap().handle(&Envelope::control(0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(set.remove(id));
        assert!(!set.remove(id));
        assert!(set.get(id).is_none());
    }

    #[test]
    fn test_ids_not_reused() {
        let set = RecipientSet::new();
        let first = set.insert(Arc::new(|_: &Envelope| {}));
        set.remove(first);
        let second = set.insert(Arc::new(|_: &Envelope| {}));

        assert_ne!(first, second);
        assert!(!set.contains(first));
    }

    #[test]
    fn test_guard_deregisters() {
        let set = Arc::new(RecipientSet::new());
        let id = set.insert(Arc::new(|_: &Envelope| {}));

        let guard = RecipientGuard::new(&set, id);
        assert_eq!(guard.id(), id);
        assert!(set.contains(id));

        drop(guard);
        assert!(!set.contains(id));
    }

    #[test]
    fn test_guard_outliving_set() {
        let set = Arc::new(RecipientSet::new());
        let id = set.insert(Arc::new(|_: &Envelope| {}));
        let guard = RecipientGuard::new(&set, id);

        drop(set);
        drop(guard);
    }
}
