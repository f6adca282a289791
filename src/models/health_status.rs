use serde::{Deserialize, Serialize};

/// Liveness assessment of the current connection.
///
/// An unhealthy connection is not necessarily torn down: a missed heartbeat
/// reply marks the link unhealthy while the transport may still recover on
/// its own. Consumers that need certainty should trigger a health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    /// Optional human-readable reason for an unhealthy verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}
