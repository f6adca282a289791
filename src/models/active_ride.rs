use super::ride_status::RideStatus;
use serde::{Deserialize, Serialize};

/// The server's notion of the caller's current ride, carried by the
/// `connected` handshake event to support state resume after a reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRideRef {
    /// Ride identifier.
    pub ride_id: String,
    /// Status at the time the connection was accepted.
    pub status: RideStatus,
}
