//! The reentrant cross-thread lock.
//!
//! Any thread, owning or not, takes a [`MessageLoopLock`] to get exclusive,
//! serialized access to the state owned by a message loop. The dispatch loop
//! takes the same lock around every delivery, so while a foreign thread holds
//! it no handler runs.
//!
//! # Reentrancy
//!
//! The underlying mutex is a [`parking_lot::ReentrantMutex`]: a thread that
//! already holds the lock acquires it again without blocking. Each guard
//! remembers the holder it replaced and restores it on release, so
//! [`MessageLoop::current_lock_holder`](crate::MessageLoop::current_lock_holder)
//! stays correct through nested scopes as long as guards are dropped in
//! reverse order of acquisition (which scoping guarantees).
//!
//! # Cancellation
//!
//! [`MessageLoop::lock_cancellable`](crate::MessageLoop::lock_cancellable)
//! polls instead of blocking. Before every attempt it asks the caller's
//! [`ShouldExit`] flag whether to give up; if so, the returned guard reports
//! [`is_locked`](MessageLoopLock::is_locked) `== false` and holds nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::logging::targets;
use crate::thread_check::current_thread_id;

/// A flag polled by cancellable operations.
pub trait ShouldExit {
    /// Whether the caller wants to abandon what it is waiting for.
    fn should_exit(&self) -> bool;
}

impl ShouldExit for AtomicBool {
    fn should_exit(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

impl<T: ShouldExit + ?Sized> ShouldExit for Arc<T> {
    fn should_exit(&self) -> bool {
        (**self).should_exit()
    }
}

/// A token for cooperative cancellation.
///
/// Cloning a token yields a handle to the same flag. Typically a thread keeps
/// one clone and whoever wants to stop it keeps another.
///
/// # Example
///
/// ```
/// use horizon_dispatch::{CancellationToken, MessageLoop};
///
/// let message_loop = MessageLoop::new();
/// let token = CancellationToken::new();
///
/// token.cancel();
/// let lock = message_loop.lock_cancellable(&token);
/// assert!(!lock.is_locked());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl ShouldExit for CancellationToken {
    fn should_exit(&self) -> bool {
        self.is_cancelled()
    }
}

/// Mutex plus holder bookkeeping shared by every guard of one loop.
pub(crate) struct LockState {
    mutex: ReentrantMutex<()>,
    /// `None` while unlocked. Only written by a thread holding `mutex`.
    holder: Mutex<Option<ThreadId>>,
    poll_interval: Duration,
}

impl LockState {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            mutex: ReentrantMutex::new(()),
            holder: Mutex::new(None),
            poll_interval,
        }
    }

    /// Block until the lock is granted.
    pub fn lock(&self) -> MessageLoopLock<'_> {
        let guard = self.mutex.lock();
        MessageLoopLock::granted(self, guard)
    }

    /// Poll for the lock until granted or `exit` asks to give up.
    pub fn lock_cancellable(&self, exit: &dyn ShouldExit) -> MessageLoopLock<'_> {
        loop {
            if exit.should_exit() {
                tracing::trace!(target: targets::LOCK, "lock acquisition cancelled");
                return MessageLoopLock::not_acquired(self);
            }
            if let Some(guard) = self.mutex.try_lock() {
                return MessageLoopLock::granted(self, guard);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    pub fn holder(&self) -> Option<ThreadId> {
        *self.holder.lock()
    }

    pub fn current_thread_holds_lock(&self) -> bool {
        self.holder() == Some(current_thread_id())
    }
}

/// A scoped hold on the message loop lock.
///
/// Releasing happens on drop, on every exit path. The guard is `!Send`: it
/// must be released by the thread that acquired it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MessageLoopLock<'a> {
    state: &'a LockState,
    guard: Option<ReentrantMutexGuard<'a, ()>>,
    previous_holder: Option<ThreadId>,
}

impl<'a> MessageLoopLock<'a> {
    fn granted(state: &'a LockState, guard: ReentrantMutexGuard<'a, ()>) -> Self {
        let previous_holder = state.holder.lock().replace(current_thread_id());
        tracing::trace!(target: targets::LOCK, nested = previous_holder.is_some(), "lock acquired");
        Self {
            state,
            guard: Some(guard),
            previous_holder,
        }
    }

    fn not_acquired(state: &'a LockState) -> Self {
        Self {
            state,
            guard: None,
            previous_holder: None,
        }
    }

    /// Whether this guard actually holds the lock.
    ///
    /// Always `true` for [`MessageLoop::lock`](crate::MessageLoop::lock). A
    /// cancellable acquisition that was abandoned returns `false`; the caller
    /// must not touch owned state in that case.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for MessageLoopLock<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            // Restore before releasing so the next holder never sees our id.
            *self.state.holder.lock() = self.previous_holder;
            drop(guard);
            tracing::trace!(target: targets::LOCK, "lock released");
        }
    }
}

impl std::fmt::Debug for MessageLoopLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLoopLock")
            .field("locked", &self.is_locked())
            .field("previous_holder", &self.previous_holder)
            .finish()
    }
}

static_assertions::assert_not_impl_any!(MessageLoopLock<'static>: Send);
