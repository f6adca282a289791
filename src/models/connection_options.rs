use serde::{Deserialize, Serialize};

/// Connection-level behavior options for the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Automatically reconnect after the transport closes.
    /// Default: true
    pub auto_reconnect: bool,

    /// Base reconnection delay in milliseconds (doubles per attempt).
    /// Default: 1000
    pub reconnect_delay_ms: u64,

    /// Cap on the reconnection delay in milliseconds.
    /// Default: 30000
    pub max_reconnect_delay_ms: u64,

    /// Attempt count past which the delay stops growing. Reconnection itself
    /// never gives up; attempts beyond this retry at the capped delay.
    /// Default: Some(10)
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            max_reconnect_attempts: Some(10),
        }
    }
}

impl ConnectionOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable automatic reconnection.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the base reconnection delay in milliseconds.
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the reconnection delay cap in milliseconds.
    pub fn with_max_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = delay_ms;
        self
    }
}
