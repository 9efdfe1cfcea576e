//! An optional process-wide message loop.
//!
//! Most code should create a [`MessageLoop`] and pass it around explicitly.
//! Hosts that want exactly one loop per process can use these functions
//! instead:
//!
//! - [`instance`] creates the loop on first use, owned by the calling thread;
//! - [`try_instance`] returns it only if it already exists;
//! - [`release_instance`] shuts it down for good.
//!
//! After release the slot stays closed. [`instance`] reports
//! [`DispatchError::TornDown`] rather than quietly creating a second loop.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DispatchError, Result};
use crate::logging::targets;
use crate::message_loop::MessageLoop;

struct GlobalSlot {
    instance: Option<Arc<MessageLoop>>,
    torn_down: bool,
}

static GLOBAL_LOOP: Mutex<GlobalSlot> = Mutex::new(GlobalSlot {
    instance: None,
    torn_down: false,
});

/// Get the process-wide message loop, creating it if needed.
///
/// The first successful call makes the calling thread the owner.
///
/// # Errors
///
/// Returns [`DispatchError::TornDown`] once [`release_instance`] has run.
pub fn instance() -> Result<Arc<MessageLoop>> {
    let mut slot = GLOBAL_LOOP.lock();
    if slot.torn_down {
        return Err(DispatchError::TornDown);
    }
    let message_loop = slot
        .instance
        .get_or_insert_with(|| {
            tracing::debug!(target: targets::DISPATCH, "creating process-wide message loop");
            Arc::new(MessageLoop::new())
        })
        .clone();
    Ok(message_loop)
}

/// Get the process-wide message loop if it exists and has not been released.
pub fn try_instance() -> Option<Arc<MessageLoop>> {
    GLOBAL_LOOP.lock().instance.clone()
}

/// Shut the process-wide message loop down and close the slot.
///
/// Handles obtained earlier stay valid but refer to a loop that is shut
/// down. Returns `true` if a loop existed.
pub fn release_instance() -> bool {
    let released = {
        let mut slot = GLOBAL_LOOP.lock();
        slot.torn_down = true;
        slot.instance.take()
    };
    match released {
        Some(message_loop) => {
            message_loop.shutdown();
            true
        }
        None => false,
    }
}
