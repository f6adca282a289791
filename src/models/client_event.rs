use serde::{Deserialize, Serialize};

/// Client-to-server events on the live channel.
///
/// Serialized with an `event_type` tag, matching the server's dispatch table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe to the live event room for a ride.
    JoinRide {
        /// The ride to join.
        ride_id: String,
    },

    /// Leave the live event room for a ride. Best-effort; local state is
    /// cleared regardless of whether this reaches the server.
    LeaveRide {
        /// The ride to leave.
        ride_id: String,
    },

    /// Heartbeat probe. The server answers with `pong`.
    Ping {
        /// Opaque echo payload (epoch millis).
        timestamp: String,
    },

    /// Answer to a server-initiated `ping`.
    Pong {
        /// Opaque echo payload.
        timestamp: String,
    },

    /// Driver position report, broadcast by the server to the ride room.
    LocationUpdate {
        ride_id: String,
        latitude: f64,
        longitude: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heading: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

impl ClientEvent {
    /// Event tag for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRide { .. } => "join_ride",
            ClientEvent::LeaveRide { .. } => "leave_ride",
            ClientEvent::Ping { .. } => "ping",
            ClientEvent::Pong { .. } => "pong",
            ClientEvent::LocationUpdate { .. } => "location_update",
        }
    }
}
