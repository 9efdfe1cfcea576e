//! The message loop: owner registry, dispatch loop and quit protocol.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::broadcast::{ActionListener, BroadcastSink, ListenerId};
use crate::config::DispatchConfig;
use crate::envelope::{BROADCAST_TAG, Envelope, INVOKE_TAG, Param, QUIT_TAG};
use crate::error::{DispatchError, Result};
use crate::invocation::QueuedInvocation;
use crate::lock::{LockState, MessageLoopLock, ShouldExit};
use crate::logging::{panic_message, targets};
use crate::queue::{ChannelQueue, DrainWait, MessageQueue};
use crate::recipient::{Recipient, RecipientGuard, RecipientId, RecipientSet};
use crate::thread_check::OwnerThread;
use crate::debug_assert_owner_thread;

/// A single-owner message loop.
///
/// One thread, the owner, runs the dispatch loop. Any thread may post
/// envelopes, which are delivered on the owner in arrival order. Any thread
/// may take the [`MessageLoopLock`] for synchronous access to owned state.
///
/// # Lifecycle
///
/// `new()` → any number of operations → [`shutdown`](Self::shutdown), which
/// also runs on drop. Shutdown drops every queued envelope undelivered,
/// forgets all recipients and broadcast listeners, and makes the queue refuse
/// further envelopes.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use horizon_dispatch::{Envelope, MessageLoop};
///
/// let message_loop = Arc::new(MessageLoop::new());
/// let id = message_loop.register_recipient(Arc::new(|envelope: &Envelope| {
///     println!("tag {}", envelope.tag());
/// }));
///
/// let producer = message_loop.clone();
/// std::thread::spawn(move || {
///     producer.post(Envelope::new(id, 1));
///     producer.request_quit();
/// })
/// .join()
/// .unwrap();
///
/// // Returns false: the loop stopped because quit was observed.
/// assert!(!message_loop.run_until(Some(Duration::from_secs(5))));
/// ```
pub struct MessageLoop {
    name: String,
    owner: OwnerThread,
    queue: Box<dyn MessageQueue>,
    /// `true` once quit has been requested. Posts hold the read side while
    /// enqueueing so nothing can be enqueued after the sentinel.
    quit_gate: RwLock<bool>,
    /// Set when the queue refused the sentinel; quit is observed once the
    /// queue has drained.
    quit_pending: AtomicBool,
    quit_observed: AtomicBool,
    recipients: Arc<RecipientSet>,
    broadcast: BroadcastSink,
    lock: LockState,
    shut_down: AtomicBool,
}

impl Default for MessageLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLoop {
    /// Create a message loop owned by the calling thread, with an unbounded
    /// [`ChannelQueue`] and default configuration.
    pub fn new() -> Self {
        Self::from_parts(
            DispatchConfig::default(),
            Box::new(ChannelQueue::unbounded()),
            OwnerThread::current(),
        )
    }

    /// Start building a message loop with custom settings.
    pub fn builder() -> MessageLoopBuilder {
        MessageLoopBuilder::new()
    }

    fn from_parts(config: DispatchConfig, queue: Box<dyn MessageQueue>, owner: OwnerThread) -> Self {
        queue.initialize();
        tracing::info!(
            target: targets::DISPATCH,
            name = %config.name,
            owner = ?owner.owner_thread(),
            "message loop created"
        );
        Self {
            name: config.name,
            owner,
            queue,
            quit_gate: RwLock::new(false),
            quit_pending: AtomicBool::new(false),
            quit_observed: AtomicBool::new(false),
            recipients: Arc::new(RecipientSet::new()),
            broadcast: BroadcastSink::new(),
            lock: LockState::new(config.lock_poll_interval),
            shut_down: AtomicBool::new(false),
        }
    }

    /// The name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    // -------------------------------------------------------------------------
    // Owner thread
    // -------------------------------------------------------------------------

    /// Whether the calling thread owns this loop.
    #[inline]
    pub fn is_owner_thread(&self) -> bool {
        self.owner.is_owner_thread()
    }

    /// The identifier of the owning thread.
    #[inline]
    pub fn owner_thread(&self) -> ThreadId {
        self.owner.owner_thread()
    }

    /// Hand ownership to another thread.
    ///
    /// The caller must make sure no dispatch is running while this happens.
    pub fn set_owner_thread(&self, thread_id: ThreadId) {
        tracing::debug!(target: targets::DISPATCH, owner = ?thread_id, "owner thread reassigned");
        self.owner.reassign(thread_id);
    }

    // -------------------------------------------------------------------------
    // Posting
    // -------------------------------------------------------------------------

    /// Post an envelope from any thread.
    ///
    /// After quit has been requested, or if the queue refuses it, the
    /// envelope is dropped silently. Use [`try_post`](Self::try_post) to find
    /// out whether that happened.
    pub fn post(&self, envelope: Envelope) {
        if let Err(err) = self.try_post(envelope) {
            tracing::trace!(target: targets::DISPATCH, %err, "envelope discarded");
        }
    }

    /// Post an envelope and report whether it was queued.
    ///
    /// On error the envelope has already been dropped.
    pub fn try_post(&self, envelope: Envelope) -> Result<()> {
        let quit_requested = self.quit_gate.read();
        if *quit_requested {
            return Err(DispatchError::QuitRequested);
        }
        if self.queue.enqueue(envelope) {
            Ok(())
        } else {
            Err(DispatchError::QueueRejected)
        }
    }

    /// Post an envelope addressed to `recipient`.
    pub fn post_message(&self, recipient: RecipientId, tag: i32, params: [Param; 3]) {
        self.post(Envelope::new(recipient, tag).with_params(params));
    }

    /// Number of envelopes waiting in the queue.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    // -------------------------------------------------------------------------
    // Dispatch loop
    // -------------------------------------------------------------------------

    /// Run the dispatch loop until quit is observed or `timeout` elapses.
    ///
    /// `None` runs without a deadline. Returns `true` if the loop stopped
    /// because time ran out or the loop has been shut down, and
    /// `false` if the quit sentinel was observed. Once quit has been observed
    /// every later call returns `false` immediately.
    ///
    /// Must be called on the owning thread.
    #[tracing::instrument(
        skip(self),
        target = "horizon_dispatch::dispatch",
        level = "debug",
        fields(name = %self.name)
    )]
    pub fn run_until(&self, timeout: Option<Duration>) -> bool {
        debug_assert_owner_thread!(self, "run_until() must only be called on the owning thread");

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        while !self.observe_quit() {
            let wait = match deadline {
                Some(deadline) if Instant::now() >= deadline => break,
                Some(deadline) => DrainWait::Until(deadline),
                None => DrainWait::Forever,
            };

            match self.queue.drain_one(wait) {
                Some(envelope) => self.deliver(envelope),
                None if self.is_shut_down() => break,
                None => {}
            }
        }

        let timed_out = !self.quit_observed();
        tracing::debug!(target: targets::DISPATCH, timed_out, "dispatch loop returned");
        timed_out
    }

    /// Run the dispatch loop until quit is observed.
    ///
    /// Must be called on the owning thread.
    pub fn run(&self) {
        tracing::info!(target: targets::DISPATCH, name = %self.name, "starting dispatch loop");
        self.run_until(None);
    }

    /// Deliver whatever is already queued without blocking.
    ///
    /// Stops early if the quit sentinel is observed. Returns the number of
    /// envelopes taken from the queue. Must be called on the owning thread.
    pub fn dispatch_pending(&self) -> usize {
        debug_assert_owner_thread!(self, "dispatch_pending() must only be called on the owning thread");

        let mut count = 0;
        while !self.observe_quit() {
            let Some(envelope) = self.queue.drain_one(DrainWait::NoWait) else {
                break;
            };
            self.deliver(envelope);
            count += 1;
        }
        count
    }

    /// Ask the dispatch loop to stop.
    ///
    /// Queues the quit sentinel, then refuses every later post, so the
    /// sentinel is the last envelope ever queued. Envelopes queued before it
    /// are still delivered. If the queue refuses the sentinel, quit is
    /// observed once the queue has drained instead. Callable from any thread; repeated calls do
    /// nothing.
    pub fn request_quit(&self) {
        let mut quit_requested = self.quit_gate.write();
        if *quit_requested {
            return;
        }
        if !self.queue.enqueue(Envelope::quit()) {
            // Nothing can be queued after this point, so an empty queue
            // stands in for the sentinel.
            tracing::warn!(target: targets::DISPATCH, "quit sentinel refused by queue, stopping once drained");
            self.quit_pending.store(true, Ordering::Release);
        }
        *quit_requested = true;
        tracing::info!(target: targets::DISPATCH, name = %self.name, "quit requested");
    }

    /// Whether [`request_quit`](Self::request_quit) has been called.
    pub fn quit_requested(&self) -> bool {
        *self.quit_gate.read()
    }

    /// Whether the dispatch loop has seen the quit sentinel, or drained the
    /// queue after the sentinel was refused.
    pub fn quit_observed(&self) -> bool {
        self.quit_observed.load(Ordering::Acquire)
    }

    /// Whether the loop should stop, completing a quit whose sentinel was
    /// refused once everything queued before it has been delivered.
    fn observe_quit(&self) -> bool {
        if self.quit_pending.load(Ordering::Acquire)
            && !self.quit_observed()
            && self.queue.is_empty()
        {
            tracing::debug!(target: targets::DISPATCH, "queue drained after refused sentinel, quit observed");
            self.quit_observed.store(true, Ordering::Release);
        }
        self.quit_observed()
    }

    fn deliver(&self, mut envelope: Envelope) {
        let _lock = self.lock.lock();

        match envelope.recipient() {
            Some(id) => match self.recipients.get(id) {
                Some(recipient) => {
                    isolate("recipient", || recipient.handle(&envelope));
                }
                None => {
                    tracing::trace!(target: targets::DISPATCH, ?id, "recipient gone, envelope dropped");
                }
            },
            None => match envelope.tag() {
                QUIT_TAG => {
                    tracing::debug!(target: targets::DISPATCH, "quit sentinel observed");
                    self.quit_observed.store(true, Ordering::Release);
                }
                INVOKE_TAG => {
                    if let Some(invocation) = envelope.take_invocation() {
                        isolate("invocation", || invocation.execute());
                    }
                }
                BROADCAST_TAG => {
                    if let Some(value) = envelope.param(0).as_str() {
                        self.broadcast.broadcast(value);
                    }
                }
                tag => {
                    tracing::trace!(target: targets::DISPATCH, tag, "unaddressed envelope dropped");
                }
            },
        }
    }

    // -------------------------------------------------------------------------
    // Invocations
    // -------------------------------------------------------------------------

    /// Queue a closure to run on the owning thread.
    ///
    /// Dropped without running if quit has been requested or the loop shuts
    /// down before reaching it.
    pub fn invoke_on_owner<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Envelope::invocation(QueuedInvocation::new(f)));
    }

    /// Run a closure on the owning thread and wait for its result.
    ///
    /// On the owning thread the closure runs immediately under the lock. From
    /// any other thread it is queued and the caller blocks until the loop has
    /// run it. Returns `None` if the closure was dropped without running.
    ///
    /// # Warning
    ///
    /// A foreign thread blocks until the owning thread reaches the closure. If
    /// the owner never runs its loop again and the loop is never shut down,
    /// this never returns.
    ///
    /// Calling this from a foreign thread while holding [`lock`](Self::lock)
    /// deadlocks: the loop takes the same lock before it can run the closure.
    pub fn call_on_owner<F, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_owner_thread() {
            let _lock = self.lock.lock();
            return Some(f());
        }

        let (invocation, pending) = QueuedInvocation::with_result(f);
        self.post(Envelope::invocation(invocation));
        pending.wait()
    }

    // -------------------------------------------------------------------------
    // Recipients
    // -------------------------------------------------------------------------

    /// Register a recipient and return its id.
    pub fn register_recipient(&self, recipient: Arc<dyn Recipient>) -> RecipientId {
        self.recipients.insert(recipient)
    }

    /// Register a recipient that is deregistered when the guard drops.
    pub fn register_recipient_guarded(&self, recipient: Arc<dyn Recipient>) -> RecipientGuard {
        let id = self.recipients.insert(recipient);
        RecipientGuard::new(&self.recipients, id)
    }

    /// Deregister a recipient. Envelopes still queued for it will be dropped.
    ///
    /// Returns `true` if the recipient was registered.
    pub fn deregister_recipient(&self, id: RecipientId) -> bool {
        self.recipients.remove(id)
    }

    /// Whether `id` is currently registered.
    pub fn is_recipient_live(&self, id: RecipientId) -> bool {
        self.recipients.contains(id)
    }

    // -------------------------------------------------------------------------
    // Broadcast
    // -------------------------------------------------------------------------

    /// Add a broadcast listener. Must be called on the owning thread.
    pub fn register_broadcast_listener(&self, listener: Arc<dyn ActionListener>) -> ListenerId {
        debug_assert_owner_thread!(self, "broadcast listeners may only be registered on the owning thread");
        self.broadcast.register(listener)
    }

    /// Remove a broadcast listener. Must be called on the owning thread.
    pub fn deregister_broadcast_listener(&self, id: ListenerId) -> bool {
        debug_assert_owner_thread!(self, "broadcast listeners may only be deregistered on the owning thread");
        self.broadcast.deregister(id)
    }

    /// Fan `value` out to every listener now, in registration order.
    ///
    /// Must be called on the owning thread. Returns the number of listeners
    /// called.
    pub fn deliver_broadcast(&self, value: &str) -> usize {
        debug_assert_owner_thread!(self, "broadcasts may only be delivered on the owning thread");
        self.broadcast.broadcast(value)
    }

    /// Queue a broadcast from any thread; listeners are called when the loop
    /// reaches it.
    pub fn post_broadcast(&self, value: impl Into<String>) {
        self.post(Envelope::broadcast(value));
    }

    // -------------------------------------------------------------------------
    // Cross-thread lock
    // -------------------------------------------------------------------------

    /// Block until the message loop lock is granted.
    ///
    /// Reentrant: the holding thread may lock again without blocking.
    pub fn lock(&self) -> MessageLoopLock<'_> {
        self.lock.lock()
    }

    /// Try for the lock every poll interval until granted or `exit` says to
    /// give up. Check [`MessageLoopLock::is_locked`] before touching owned
    /// state.
    pub fn lock_cancellable(&self, exit: &dyn ShouldExit) -> MessageLoopLock<'_> {
        self.lock.lock_cancellable(exit)
    }

    /// Whether the calling thread currently holds the lock.
    pub fn current_thread_holds_lock(&self) -> bool {
        self.lock.current_thread_holds_lock()
    }

    /// The thread currently holding the lock, or `None` if unlocked.
    pub fn current_lock_holder(&self) -> Option<ThreadId> {
        self.lock.holder()
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Tear the loop down. Only the first call has an effect.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.broadcast.clear();
        self.queue.shutdown();
        self.recipients.clear();
        tracing::info!(target: targets::DISPATCH, name = %self.name, "message loop shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MessageLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLoop")
            .field("name", &self.name)
            .field("owner", &self.owner_thread())
            .field("pending", &self.pending_count())
            .field("quit_requested", &self.quit_requested())
            .field("quit_observed", &self.quit_observed())
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(MessageLoop: Send, Sync);

/// Run `f`, logging and swallowing any panic.
fn isolate(what: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(
            target: targets::DISPATCH,
            what,
            panic = panic_message(payload.as_ref()),
            "handler panicked during delivery"
        );
    }
}

/// Builder for [`MessageLoop`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use horizon_dispatch::MessageLoop;
///
/// let message_loop = MessageLoop::builder()
///     .name("ui")
///     .lock_poll_interval(Duration::from_millis(2))
///     .queue_capacity(1024)
///     .build()
///     .expect("valid configuration");
/// assert_eq!(message_loop.name(), "ui");
/// ```
#[derive(Default)]
pub struct MessageLoopBuilder {
    config: DispatchConfig,
    queue: Option<Box<dyn MessageQueue>>,
    owner: Option<ThreadId>,
}

impl MessageLoopBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the loop name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the cancellable-lock poll interval.
    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.config.lock_poll_interval = interval;
        self
    }

    /// Bound the default queue. Ignored when a custom queue is supplied.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    /// Use a custom queue adapter instead of a [`ChannelQueue`].
    pub fn queue(mut self, queue: impl MessageQueue + 'static) -> Self {
        self.queue = Some(Box::new(queue));
        self
    }

    /// Make a specific thread the owner instead of the building thread.
    pub fn owner_thread(mut self, thread_id: ThreadId) -> Self {
        self.owner = Some(thread_id);
        self
    }

    /// Build the message loop.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] if the configuration does not
    /// validate.
    pub fn build(self) -> Result<MessageLoop> {
        self.config.validate()?;
        let queue: Box<dyn MessageQueue> = match (self.queue, self.config.queue_capacity) {
            (Some(queue), _) => queue,
            (None, Some(capacity)) => Box::new(ChannelQueue::bounded(capacity)),
            (None, None) => Box::new(ChannelQueue::unbounded()),
        };
        let owner = match self.owner {
            Some(thread_id) => OwnerThread::new(thread_id),
            None => OwnerThread::current(),
        };
        Ok(MessageLoop::from_parts(self.config, queue, owner))
    }
}
