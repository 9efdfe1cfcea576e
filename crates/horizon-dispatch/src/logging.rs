//! Logging facilities for Horizon Dispatch.
//!
//! Horizon Dispatch uses the `tracing` crate for instrumentation. Nothing is
//! printed unless the application installs a subscriber:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("horizon_dispatch=debug")
//!         .init();
//!
//!     // ...
//! }
//! ```
//!
//! Every event emitted by this crate carries one of the [`targets`] below, so
//! individual subsystems can be filtered independently.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Loop lifecycle, quit protocol and envelope delivery.
    pub const DISPATCH: &str = "horizon_dispatch::dispatch";
    /// Cross-thread lock acquisition and release.
    pub const LOCK: &str = "horizon_dispatch::lock";
    /// Broadcast listener fan-out.
    pub const BROADCAST: &str = "horizon_dispatch::broadcast";
    /// Queue adapter activity.
    pub const QUEUE: &str = "horizon_dispatch::queue";
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_of(f: fn()) -> Box<dyn std::any::Any + Send> {
        std::panic::catch_unwind(f).expect_err("closure should panic")
    }

    #[test]
    fn test_panic_message_variants() {
        let payload = payload_of(|| panic!("static message"));
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = payload_of(|| panic!("formatted {}", 42));
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");

        let payload = payload_of(|| std::panic::panic_any(7_u32));
        assert_eq!(panic_message(payload.as_ref()), "<non-string panic payload>");
    }
}
