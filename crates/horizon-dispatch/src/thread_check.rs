//! Thread affinity tracking for the owning thread.
//!
//! A message loop belongs to exactly one thread at a time, the *owning*
//! thread. Only that thread may run the dispatch loop or touch the broadcast
//! listener list. This module records which thread that is and provides the
//! assertions used to catch violations.
//!
//! # Thread Safety Checks
//!
//! Two levels of checking are provided:
//!
//! - **Debug assertions** (`debug_assert_owner_thread!`): Only active in debug
//!   builds. Used on every owner-only entry point of the crate.
//!
//! - **Runtime assertions** (`assert_owner_thread!`): Always active. Use for
//!   operations where a violation must be caught even in release builds.
//!
//! ```ignore
//! use horizon_dispatch::{debug_assert_owner_thread, MessageLoop};
//!
//! fn update_model(message_loop: &MessageLoop) {
//!     debug_assert_owner_thread!(message_loop);
//!     // ... touch owned state ...
//! }
//! ```

use std::thread::ThreadId;

use parking_lot::RwLock;

/// The identifier of the calling thread.
#[inline]
pub fn current_thread_id() -> ThreadId {
    std::thread::current().id()
}

/// Records the owning thread of a message loop.
///
/// The owner is captured at construction and only changes through
/// [`reassign`](Self::reassign). Reassignment is not synchronized with
/// dispatch; the caller must make sure no loop is running while it happens.
#[derive(Debug)]
pub struct OwnerThread {
    thread_id: RwLock<ThreadId>,
}

impl Default for OwnerThread {
    fn default() -> Self {
        Self::current()
    }
}

impl OwnerThread {
    /// Make the calling thread the owner.
    pub fn current() -> Self {
        Self::new(current_thread_id())
    }

    /// Make a specific thread the owner.
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id: RwLock::new(thread_id),
        }
    }

    /// The identifier of the owning thread.
    #[inline]
    pub fn owner_thread(&self) -> ThreadId {
        *self.thread_id.read()
    }

    /// Whether the calling thread is the owner.
    #[inline]
    pub fn is_owner_thread(&self) -> bool {
        current_thread_id() == self.owner_thread()
    }

    /// Overwrite the owning thread unconditionally.
    pub fn reassign(&self, thread_id: ThreadId) {
        *self.thread_id.write() = thread_id;
    }
}

/// Panics if the calling thread does not own the given loop.
///
/// Accepts anything with `is_owner_thread()` and `owner_thread()` methods,
/// i.e. a [`MessageLoop`](crate::MessageLoop) or an [`OwnerThread`]. Always
/// active, in both debug and release builds.
#[macro_export]
macro_rules! assert_owner_thread {
    ($owner:expr) => {
        $crate::assert_owner_thread!($owner, "operation must be performed on the owning thread")
    };
    ($owner:expr, $msg:expr) => {
        if !$owner.is_owner_thread() {
            $crate::thread_check::panic_not_owner_thread(
                $msg,
                $owner.owner_thread(),
                file!(),
                line!(),
            );
        }
    };
}

/// Debug-only variant of [`assert_owner_thread!`]. A no-op in release builds.
#[macro_export]
macro_rules! debug_assert_owner_thread {
    ($owner:expr) => {
        #[cfg(debug_assertions)]
        $crate::assert_owner_thread!($owner)
    };
    ($owner:expr, $msg:expr) => {
        #[cfg(debug_assertions)]
        $crate::assert_owner_thread!($owner, $msg)
    };
}

/// Generate the panic for an owner-thread violation.
#[cold]
#[inline(never)]
#[doc(hidden)]
pub fn panic_not_owner_thread(msg: &str, owner: ThreadId, file: &str, line: u32) -> ! {
    let current = std::thread::current();
    let current_name = current.name().unwrap_or("<unnamed>");
    let current_id = current.id();

    panic!(
        "\n\
        ══════════════════════════════════════════════════════════════════════\n\
        OWNER THREAD VIOLATION\n\
        ══════════════════════════════════════════════════════════════════════\n\
        \n\
        {msg}\n\
        \n\
        Location: {file}:{line}\n\
        Current thread: \"{current_name}\" (ID: {current_id:?})\n\
        Owning thread ID: {owner:?}\n\
        \n\
        The dispatch loop and the broadcast listener list may only be used\n\
        from the thread that owns the message loop.\n\
        \n\
        POSSIBLE SOLUTIONS:\n\
        \n\
        1. Post an envelope and handle it on the owning thread:\n\
           message_loop.post_message(recipient, tag, params);\n\
        \n\
        2. Queue a closure for the owning thread:\n\
           message_loop.invoke_on_owner(|| update());\n\
        \n\
        3. Take the cross-thread lock for synchronous access:\n\
           let _lock = message_loop.lock();\n\
        \n\
        ══════════════════════════════════════════════════════════════════════"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_is_creating_thread() {
        let owner = OwnerThread::current();
        assert!(owner.is_owner_thread());
        assert_eq!(owner.owner_thread(), current_thread_id());
        assert_owner_thread!(owner);
    }

    #[test]
    fn test_owner_check_from_other_thread() {
        let owner = std::sync::Arc::new(OwnerThread::current());
        let owner_clone = owner.clone();

        let is_owner = std::thread::spawn(move || owner_clone.is_owner_thread())
            .join()
            .unwrap();
        assert!(!is_owner, "a spawned thread must not be the owner");
    }

    #[test]
    fn test_assert_panics_on_wrong_thread() {
        let owner = std::sync::Arc::new(OwnerThread::current());
        let owner_clone = owner.clone();

        let result = std::thread::spawn(move || {
            assert_owner_thread!(owner_clone, "custom message");
        })
        .join();

        assert!(result.is_err(), "expected an owner thread violation");
    }

    #[test]
    fn test_reassign() {
        let owner = OwnerThread::current();
        let other = std::thread::spawn(current_thread_id).join().unwrap();

        owner.reassign(other);
        assert_eq!(owner.owner_thread(), other);
        assert!(!owner.is_owner_thread());

        owner.reassign(current_thread_id());
        assert!(owner.is_owner_thread());
    }
}
