//! Timeout configuration for boda-link operations.
//!
//! Centralizes every timer the engine arms: connection establishment,
//! heartbeat cadence, join acknowledgement, and validation retries.

use std::time::Duration;

/// Timeout configuration for boda-link operations.
///
/// All values have sensible defaults tuned for mobile radio conditions.
///
/// # Examples
///
/// ```rust
/// use boda_link::BodaLinkTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = BodaLinkTimeouts::default();
///
/// // Custom timeouts for high-latency environments
/// let timeouts = BodaLinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .join_timeout(Duration::from_secs(20))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct BodaLinkTimeouts {
    /// Timeout for establishing the WebSocket connection (TCP + TLS + upgrade).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Interval between heartbeat pings while the connection is healthy.
    /// Set to 0 to disable heartbeats.
    /// Default: 15 seconds
    pub heartbeat_interval: Duration,

    /// Maximum wait for a pong (or any frame) after sending a heartbeat ping.
    /// Exceeding it marks the connection unhealthy but does not reconnect.
    /// Default: 10 seconds
    pub pong_timeout: Duration,

    /// Timeout for a `join_ride` acknowledgement from the server.
    /// Default: 10 seconds
    pub join_timeout: Duration,

    /// Per-attempt timeout for the authoritative ride validation query.
    /// Default: 10 seconds
    pub validation_timeout: Duration,

    /// Fixed delay between validation retry attempts.
    /// Default: 2 seconds
    pub validation_retry_delay: Duration,
}

impl Default for BodaLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(10),
            validation_timeout: Duration::from_secs(10),
            validation_retry_delay: Duration::from_secs(2),
        }
    }
}

impl BodaLinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> BodaLinkTimeoutsBuilder {
        BodaLinkTimeoutsBuilder::new()
    }

    /// Timeouts optimized for fast local development and tests.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(3),
            join_timeout: Duration::from_secs(3),
            validation_timeout: Duration::from_secs(2),
            validation_retry_delay: Duration::from_millis(200),
        }
    }

    /// Timeouts optimized for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(20),
            join_timeout: Duration::from_secs(20),
            validation_timeout: Duration::from_secs(30),
            validation_retry_delay: Duration::from_secs(5),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for creating custom [`BodaLinkTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct BodaLinkTimeoutsBuilder {
    timeouts: BodaLinkTimeouts,
}

impl BodaLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: BodaLinkTimeouts::default(),
        }
    }

    /// Set the connection establishment timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the heartbeat ping interval. Set to 0 to disable heartbeats.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.timeouts.heartbeat_interval = interval;
        self
    }

    /// Set the pong timeout (max wait for a response after a heartbeat ping).
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    /// Set the join acknowledgement timeout.
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.join_timeout = timeout;
        self
    }

    /// Set the per-attempt validation query timeout.
    pub fn validation_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.validation_timeout = timeout;
        self
    }

    /// Set the fixed delay between validation retry attempts.
    pub fn validation_retry_delay(mut self, delay: Duration) -> Self {
        self.timeouts.validation_retry_delay = delay;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> BodaLinkTimeouts {
        self.timeouts
    }
}
