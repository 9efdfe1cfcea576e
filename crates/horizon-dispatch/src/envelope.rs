//! Message envelopes carried through the message loop.
//!
//! An [`Envelope`] is created by any thread, handed to the queue, and consumed
//! exactly once by the owning thread. It is addressed to a
//! [`RecipientId`] or, for control messages, to nobody.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::invocation::QueuedInvocation;
use crate::recipient::RecipientId;

/// Tag of the control envelope that stops the dispatch loop.
pub const QUIT_TAG: i32 = 0xfffff321_u32 as i32;

/// Tag of a control envelope carrying a closure for the owning thread.
pub const INVOKE_TAG: i32 = 0xfffff322_u32 as i32;

/// Tag of a control envelope whose first parameter is fanned out to the
/// broadcast listeners.
pub const BROADCAST_TAG: i32 = 0xfffff323_u32 as i32;

/// A single envelope parameter.
#[derive(Clone, Default)]
pub enum Param {
    /// No value.
    #[default]
    None,
    /// An integer value.
    Int(i64),
    /// A string value.
    Str(String),
    /// A shared, type-erased value.
    Any(Arc<dyn Any + Send + Sync>),
}

impl Param {
    /// Wrap an arbitrary value.
    pub fn any<T: Any + Send + Sync>(value: T) -> Self {
        Self::Any(Arc::new(value))
    }

    /// The integer value, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow a type-erased value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Any(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Whether this parameter holds no value.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Self::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Self::Any(_) => write!(f, "Any(..)"),
        }
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// An immutable unit of asynchronous work.
///
/// Envelopes are not `Clone`: each one is delivered at most once and dropped
/// afterwards, whether or not a handler ran.
pub struct Envelope {
    recipient: Option<RecipientId>,
    tag: i32,
    params: [Param; 3],
    invocation: Option<QueuedInvocation>,
}

impl Envelope {
    /// Create an envelope addressed to a recipient.
    pub fn new(recipient: RecipientId, tag: i32) -> Self {
        Self {
            recipient: Some(recipient),
            tag,
            params: Default::default(),
            invocation: None,
        }
    }

    /// Create a control envelope with no recipient.
    pub fn control(tag: i32) -> Self {
        Self {
            recipient: None,
            tag,
            params: Default::default(),
            invocation: None,
        }
    }

    /// Create the quit sentinel.
    pub fn quit() -> Self {
        Self::control(QUIT_TAG)
    }

    /// Create a broadcast envelope carrying `value`.
    pub fn broadcast(value: impl Into<String>) -> Self {
        Self::control(BROADCAST_TAG).with_param(0, Param::Str(value.into()))
    }

    pub(crate) fn invocation(invocation: QueuedInvocation) -> Self {
        Self {
            invocation: Some(invocation),
            ..Self::control(INVOKE_TAG)
        }
    }

    /// Set one of the three parameters.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not 0, 1 or 2.
    pub fn with_param(mut self, index: usize, param: impl Into<Param>) -> Self {
        self.params[index] = param.into();
        self
    }

    /// Set all three parameters at once.
    pub fn with_params(mut self, params: [Param; 3]) -> Self {
        self.params = params;
        self
    }

    /// The addressed recipient, or `None` for control envelopes.
    pub fn recipient(&self) -> Option<RecipientId> {
        self.recipient
    }

    /// The operation tag.
    pub fn tag(&self) -> i32 {
        self.tag
    }

    /// One of the three parameters. Out-of-range indices yield [`Param::None`].
    pub fn param(&self, index: usize) -> &Param {
        static NONE: Param = Param::None;
        self.params.get(index).unwrap_or(&NONE)
    }

    /// All three parameters.
    pub fn params(&self) -> &[Param; 3] {
        &self.params
    }

    /// Whether this is the quit sentinel.
    pub fn is_quit(&self) -> bool {
        self.recipient.is_none() && self.tag == QUIT_TAG
    }

    pub(crate) fn take_invocation(&mut self) -> Option<QueuedInvocation> {
        self.invocation.take()
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("recipient", &self.recipient)
            .field("tag", &format_args!("{:#x}", self.tag))
            .field("params", &self.params)
            .field("invocation", &self.invocation.is_some())
            .finish()
    }
}

static_assertions::assert_impl_all!(Envelope: Send);
