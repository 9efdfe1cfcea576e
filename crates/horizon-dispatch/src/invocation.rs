//! Closures queued for execution on the owning thread.
//!
//! # How It Works
//!
//! 1. A closure is wrapped in a [`QueuedInvocation`] and packed into a control
//!    envelope tagged [`INVOKE_TAG`](crate::INVOKE_TAG).
//!
//! 2. The envelope travels through the queue like any other.
//!
//! 3. When the dispatch loop reaches it, the closure runs on the owning
//!    thread under the message loop lock.
//!
//! If the envelope is dropped instead (quit was requested, the queue was torn
//! down), the closure is dropped with it and any [`PendingResult`] waiting on
//! it resolves to `None`.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, bounded};

/// A type-erased closure waiting to run on the owning thread.
pub struct QueuedInvocation {
    invoke: Box<dyn FnOnce() + Send>,
}

impl QueuedInvocation {
    /// Wrap a closure.
    pub fn new<F>(invoke: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
        }
    }

    /// Wrap a closure whose return value is delivered to a [`PendingResult`].
    pub fn with_result<F, T>(invoke: F) -> (Self, PendingResult<T>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = bounded(1);
        let invocation = Self::new(move || {
            // The waiter may have given up; that is fine.
            let _ = sender.send(invoke());
        });
        (invocation, PendingResult { receiver })
    }

    /// Run the closure.
    pub fn execute(self) {
        (self.invoke)();
    }
}

/// The result of a closure queued with [`QueuedInvocation::with_result`].
///
/// # Warning
///
/// Waiting on the owning thread for a closure that has been queued to that
/// same thread deadlocks: the loop cannot run it while the thread is blocked
/// here. [`MessageLoop::call_on_owner`](crate::MessageLoop::call_on_owner)
/// avoids this by running the closure inline on the owner.
#[derive(Debug)]
pub struct PendingResult<T> {
    receiver: Receiver<T>,
}

impl<T> PendingResult<T> {
    /// Block until the closure has run.
    ///
    /// Returns `None` if the closure was dropped without running.
    pub fn wait(self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Block until the closure has run or the timeout elapses.
    ///
    /// Returns `Err(self)` on timeout so the caller can keep waiting.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Option<T>, Self> {
        match self.receiver.recv_timeout(timeout) {
            Ok(value) => Ok(Some(value)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(self),
        }
    }

    /// Take the result if the closure has already run.
    pub fn try_take(&self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_execute() {
        let executed = Arc::new(AtomicBool::new(false));

        let executed_clone = executed.clone();
        let invocation = QueuedInvocation::new(move || {
            executed_clone.store(true, Ordering::SeqCst);
        });

        invocation.execute();
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_result_across_threads() {
        let (invocation, pending) = QueuedInvocation::with_result(|| 6 * 7);

        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            invocation.execute();
        });

        assert_eq!(pending.wait(), Some(42));
        thread.join().unwrap();
    }

    #[test]
    fn test_dropped_invocation_resolves_to_none() {
        let (invocation, pending) = QueuedInvocation::with_result(|| "never");
        drop(invocation);
        assert_eq!(pending.wait(), None);
    }

    #[test]
    fn test_wait_timeout() {
        let (invocation, pending) = QueuedInvocation::with_result(|| 1);

        let pending = pending
            .wait_timeout(Duration::from_millis(10))
            .expect_err("should time out before execution");
        assert!(pending.try_take().is_none());

        invocation.execute();
        assert_eq!(pending.wait_timeout(Duration::from_secs(1)).ok(), Some(Some(1)));
    }
}
