use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a ride.
///
/// Status flow: pending → accepted → in_progress → completed/cancelled, with
/// no_driver_found as the no-match terminal outcome. Anything the server
/// sends that we do not recognize maps to [`RideStatus::Unknown`] so a newer
/// server cannot crash an older client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    /// Requested, waiting for a driver.
    Pending,
    /// A driver accepted and is on the way.
    Accepted,
    /// Rider on board.
    InProgress,
    /// Terminal: ride finished normally.
    Completed,
    /// Terminal: ride was cancelled by either party.
    Cancelled,
    /// Terminal: no driver could be matched.
    NoDriverFound,
    /// Unrecognized status string from the server.
    #[serde(other)]
    Unknown,
}

impl RideStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RideStatus::Completed | RideStatus::Cancelled | RideStatus::NoDriverFound
        )
    }

    /// A recognized, non-terminal status.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RideStatus::Pending | RideStatus::Accepted | RideStatus::InProgress
        )
    }

    /// Wire representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
            RideStatus::NoDriverFound => "no_driver_found",
            RideStatus::Unknown => "unknown",
        }
    }

    /// Parse a status string, mapping unrecognized values to `Unknown`.
    pub fn parse(s: &str) -> RideStatus {
        match s {
            "pending" => RideStatus::Pending,
            "accepted" => RideStatus::Accepted,
            "in_progress" => RideStatus::InProgress,
            "completed" => RideStatus::Completed,
            "cancelled" => RideStatus::Cancelled,
            "no_driver_found" => RideStatus::NoDriverFound,
            _ => RideStatus::Unknown,
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
