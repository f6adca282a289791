use super::driver_info::DriverInfo;
use super::location::DriverLocation;
use super::place::Place;
use super::ride_status::RideStatus;
use serde::{Deserialize, Serialize};

/// Minimal persisted projection of a ride, durable across process restarts.
///
/// Written on every accepted non-terminal state mutation and deleted when the
/// ride reaches a terminal status or reconciliation definitively fails. After
/// startup it is always superseded by the reconciler's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSnapshot {
    pub ride_id: String,
    pub status: RideStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_location: Option<DriverLocation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup: Option<Place>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropoff: Option<Place>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_fare: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_fare: Option<f64>,

    /// Millis since Unix epoch of the last accepted mutation.
    pub last_update: u64,
}

impl RideSnapshot {
    /// Whether this snapshot is older than the given staleness window.
    pub fn is_stale(&self, now_ms: u64, staleness_window_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_update) > staleness_window_ms
    }
}
