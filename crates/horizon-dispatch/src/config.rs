//! Configuration for a [`MessageLoop`](crate::MessageLoop).

use std::time::Duration;

use crate::error::{DispatchError, Result};

/// Default interval between attempts of a cancellable lock acquisition.
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for creating a message loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Name used in log output to tell loops apart.
    pub name: String,
    /// How long a cancellable lock acquisition sleeps between attempts.
    pub lock_poll_interval: Duration,
    /// Capacity of the default queue. `None` means unbounded; a bounded queue
    /// rejects envelopes while full.
    pub queue_capacity: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            name: "message-loop".to_string(),
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            queue_capacity: None,
        }
    }
}

impl DispatchConfig {
    /// Create a configuration with a specific name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Check that the configuration can be used.
    pub fn validate(&self) -> Result<()> {
        if self.lock_poll_interval.is_zero() {
            return Err(DispatchError::invalid_config(
                "lock poll interval must be non-zero",
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(DispatchError::invalid_config(
                "queue capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();
        assert_eq!(config.lock_poll_interval, Duration::from_millis(1));
        assert_eq!(config.queue_capacity, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_name() {
        let config = DispatchConfig::with_name("ui");
        assert_eq!(config.name, "ui");
        assert_eq!(config.lock_poll_interval, DEFAULT_LOCK_POLL_INTERVAL);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = DispatchConfig {
            lock_poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DispatchError::InvalidConfig(_))));

        let config = DispatchConfig {
            queue_capacity: Some(0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DispatchError::InvalidConfig(_))));
    }
}
