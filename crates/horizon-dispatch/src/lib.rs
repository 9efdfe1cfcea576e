//! Single-owner message dispatch for Horizon.
//!
//! This crate lets worker threads hand work to one *owning* thread and get
//! synchronous access to the state that thread owns:
//!
//! - **Message Loop**: a FIFO of envelopes delivered on the owning thread,
//!   with a quit protocol that guarantees nothing is queued after the quit
//!   sentinel
//! - **Recipients**: addressable handlers; envelopes for a recipient that has
//!   gone away are dropped instead of delivered
//! - **Cross-Thread Lock**: a reentrant lock any thread can take, with a
//!   cancellable variant for threads that must be able to give up
//! - **Broadcasts**: string notifications fanned out to listeners in
//!   registration order
//! - **Invocations**: closures queued for the owning thread, optionally
//!   returning a value to the caller
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use horizon_dispatch::{Envelope, MessageLoop};
//!
//! let message_loop = Arc::new(MessageLoop::new());
//!
//! let id = message_loop.register_recipient(Arc::new(|envelope: &Envelope| {
//!     println!("received {} with {:?}", envelope.tag(), envelope.param(0));
//! }));
//!
//! let worker = {
//!     let message_loop = message_loop.clone();
//!     std::thread::spawn(move || {
//!         message_loop.post(Envelope::new(id, 1).with_param(0, "hello"));
//!
//!         // Exclusive access to owned state from a foreign thread.
//!         let lock = message_loop.lock();
//!         assert!(lock.is_locked());
//!         drop(lock);
//!
//!         message_loop.request_quit();
//!     })
//! };
//!
//! // The owning thread dispatches until the worker asks it to stop.
//! let timed_out = message_loop.run_until(Some(Duration::from_secs(5)));
//! assert!(!timed_out);
//! worker.join().unwrap();
//! ```
//!
//! # Logging
//!
//! Everything is instrumented with `tracing`; see [`logging`] for the targets.

mod broadcast;
mod config;
mod envelope;
mod error;
pub mod global;
mod invocation;
mod lock;
pub mod logging;
mod message_loop;
mod queue;
mod recipient;
pub mod thread_check;

pub use broadcast::{ActionListener, BroadcastSink, ListenerId};
pub use config::{DEFAULT_LOCK_POLL_INTERVAL, DispatchConfig};
pub use envelope::{BROADCAST_TAG, Envelope, INVOKE_TAG, Param, QUIT_TAG};
pub use error::{DispatchError, Result};
pub use invocation::{PendingResult, QueuedInvocation};
pub use lock::{CancellationToken, MessageLoopLock, ShouldExit};
pub use message_loop::{MessageLoop, MessageLoopBuilder};
pub use queue::{ChannelQueue, DrainWait, MessageQueue};
pub use recipient::{Recipient, RecipientGuard, RecipientId};
pub use thread_check::OwnerThread;
