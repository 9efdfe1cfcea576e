//! The queue adapter between producer threads and the owning thread.
//!
//! The message loop never talks to a platform event queue directly. It goes
//! through [`MessageQueue`], which a host can implement on top of whatever
//! wakes its UI thread. [`ChannelQueue`] is the default implementation, built
//! on a crossbeam channel.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded};
use parking_lot::RwLock;

use crate::envelope::Envelope;
use crate::logging::targets;

/// How long [`MessageQueue::drain_one`] may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainWait {
    /// Return immediately if nothing is queued.
    NoWait,
    /// Block until an envelope arrives or the instant passes.
    Until(Instant),
    /// Block until an envelope arrives or the queue shuts down.
    Forever,
}

/// A FIFO of envelopes that wakes the owning thread.
///
/// Implementations must preserve per-producer order and must be usable from
/// any thread. Only the owning thread drains.
pub trait MessageQueue: Send + Sync {
    /// Hand an envelope to the queue.
    ///
    /// Returns `false` if the queue refused it; the envelope is dropped.
    fn enqueue(&self, envelope: Envelope) -> bool;

    /// Take the next envelope, blocking according to `wait`.
    fn drain_one(&self, wait: DrainWait) -> Option<Envelope>;

    /// Number of envelopes currently queued.
    fn len(&self) -> usize;

    /// Whether the queue is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One-time setup, called when the owning message loop is created.
    fn initialize(&self) {}

    /// Tear the queue down. Queued envelopes are dropped undelivered and
    /// later enqueues are refused.
    fn shutdown(&self) {}
}

/// Interval at which a drain with no deadline re-checks for shutdown.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The default [`MessageQueue`], backed by a crossbeam channel.
#[derive(Debug)]
pub struct ChannelQueue {
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
    /// `true` after shutdown. Enqueues hold the read side while sending so
    /// nothing lands in the channel after the shutdown drain.
    closed: RwLock<bool>,
}

impl ChannelQueue {
    /// Create an unbounded queue.
    pub fn unbounded() -> Self {
        let (sender, receiver) = unbounded();
        Self::from_parts(sender, receiver)
    }

    /// Create a queue that refuses envelopes while `capacity` are pending.
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self::from_parts(sender, receiver)
    }

    fn from_parts(sender: Sender<Envelope>, receiver: Receiver<Envelope>) -> Self {
        Self {
            sender,
            receiver,
            closed: RwLock::new(false),
        }
    }

    /// Whether [`shutdown`](MessageQueue::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl MessageQueue for ChannelQueue {
    fn enqueue(&self, envelope: Envelope) -> bool {
        // A refused envelope is dropped after the gate is released.
        let refused = {
            let closed = self.closed.read();
            if *closed {
                Some(envelope)
            } else {
                match self.sender.try_send(envelope) {
                    Ok(()) => None,
                    Err(TrySendError::Full(envelope)) => {
                        tracing::debug!(target: targets::QUEUE, ?envelope, "queue full, envelope refused");
                        Some(envelope)
                    }
                    Err(TrySendError::Disconnected(envelope)) => Some(envelope),
                }
            }
        };
        refused.is_none()
    }

    fn drain_one(&self, wait: DrainWait) -> Option<Envelope> {
        if self.is_closed() {
            return None;
        }
        match wait {
            DrainWait::NoWait => self.receiver.try_recv().ok(),
            DrainWait::Until(deadline) => self.receiver.recv_deadline(deadline).ok(),
            DrainWait::Forever => loop {
                // Use a timeout so shutdown is noticed.
                match self.receiver.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
                    Ok(envelope) => return Some(envelope),
                    Err(RecvTimeoutError::Timeout) if !self.is_closed() => continue,
                    Err(_) => return None,
                }
            },
        }
    }

    fn len(&self) -> usize {
        self.receiver.len()
    }

    fn shutdown(&self) {
        let remaining: Vec<Envelope> = {
            let mut closed = self.closed.write();
            if *closed {
                return;
            }
            *closed = true;
            self.receiver.try_iter().collect()
        };
        // Dropped outside the gate: an envelope's payload may post again.
        tracing::debug!(target: targets::QUEUE, dropped = remaining.len(), "queue shut down");
        drop(remaining);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = ChannelQueue::unbounded();
        for tag in 0..5 {
            assert!(queue.enqueue(Envelope::control(tag)));
        }
        assert_eq!(queue.len(), 5);

        let tags: Vec<i32> = std::iter::from_fn(|| queue.drain_one(DrainWait::NoWait))
            .map(|e| e.tag())
            .collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_bounded_rejects_when_full() {
        let queue = ChannelQueue::bounded(1);
        assert!(queue.enqueue(Envelope::control(1)));
        assert!(!queue.enqueue(Envelope::control(2)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_until_deadline() {
        let queue = ChannelQueue::unbounded();
        let start = Instant::now();
        let result = queue.drain_one(DrainWait::Until(start + Duration::from_millis(20)));
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_drain_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(ChannelQueue::unbounded());
        let producer = queue.clone();

        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.enqueue(Envelope::control(9));
        });

        let envelope = queue.drain_one(DrainWait::Forever).expect("envelope should arrive");
        assert_eq!(envelope.tag(), 9);
        thread.join().unwrap();
    }

    #[test]
    fn test_shutdown_refuses_and_drops() {
        let queue = ChannelQueue::unbounded();
        queue.enqueue(Envelope::control(1));
        queue.shutdown();

        assert!(queue.is_closed());
        assert!(queue.is_empty());
        assert!(!queue.enqueue(Envelope::control(2)));
        assert!(queue.drain_one(DrainWait::NoWait).is_none());
    }

    #[test]
    fn test_shutdown_racing_producers_leaves_nothing_behind() {
        let queue = std::sync::Arc::new(ChannelQueue::unbounded());

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let producer = queue.clone();
                std::thread::spawn(move || {
                    let mut accepted = 0_usize;
                    while producer.enqueue(Envelope::control(1)) {
                        accepted += 1;
                    }
                    accepted
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(5));
        queue.shutdown();

        for producer in producers {
            producer.join().unwrap();
        }
        assert!(queue.is_closed());
        assert_eq!(queue.len(), 0, "envelope enqueued after the shutdown drain");
    }

    #[test]
    fn test_shutdown_wakes_blocked_drain() {
        let queue = std::sync::Arc::new(ChannelQueue::unbounded());
        let closer = queue.clone();

        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            closer.shutdown();
        });

        assert!(queue.drain_one(DrainWait::Forever).is_none());
        thread.join().unwrap();
    }
}
