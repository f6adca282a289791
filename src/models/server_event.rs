use super::active_ride::ActiveRideRef;
use super::driver_info::DriverInfo;
use super::location::DriverLocation;
use super::ride_state::RideUpdate;
use super::ride_status::RideStatus;

use serde::{Deserialize, Serialize};

/// Server-to-client events on the live channel.
///
/// A closed tagged union: unknown `event_type` values fail to parse and are
/// logged and dropped by the connection task, never dispatched blindly.
/// Payload fields beyond what the engine needs are tolerated and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake acknowledgement, sent once per connection. Carries the
    /// server's notion of the caller's current ride, if any.
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_ride: Option<ActiveRideRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Acknowledgement of a `join_ride` request.
    JoinedRide {
        ride_id: String,
        /// Current ride status for state sync.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ride_status: Option<RideStatus>,
        /// Last driver position known to the room, for immediate map display.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_driver_location: Option<DriverLocation>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Acknowledgement of a `leave_ride` request.
    LeftRide {
        ride_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Server-initiated keepalive; must be answered with `pong`.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Answer to a client `ping`.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Operation rejection. Messages of the shape
    /// `"Cannot join ride with status: X"` signal a terminal-ride join
    /// rejection; see [`ServerEvent::terminal_join_rejection`].
    Error { message: String },

    /// Live driver position for a joined ride.
    DriverLocationUpdate {
        ride_id: String,
        driver_id: String,
        latitude: f64,
        longitude: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heading: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// A driver accepted the ride.
    RideAccepted {
        ride_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        driver: Option<DriverInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// The ride began (rider picked up).
    RideStarted {
        ride_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Terminal: the ride finished.
    RideCompleted {
        ride_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_fare: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distance_km: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_minutes: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Terminal: the ride was cancelled.
    RideCancelled {
        ride_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cancelled_by: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Terminal: no driver could be matched.
    NoDriverFound {
        ride_id: String,
        /// `"timeout"` or `"max_attempts"`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Fleet-wide availability broadcast. Passed through untouched.
    DriverAvailabilityChanged {
        driver_id: String,
        is_available: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        available_drivers_count: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

impl ServerEvent {
    /// The ride this event refers to, if it is ride-scoped.
    pub fn ride_id(&self) -> Option<&str> {
        match self {
            ServerEvent::JoinedRide { ride_id, .. }
            | ServerEvent::LeftRide { ride_id, .. }
            | ServerEvent::DriverLocationUpdate { ride_id, .. }
            | ServerEvent::RideAccepted { ride_id, .. }
            | ServerEvent::RideStarted { ride_id, .. }
            | ServerEvent::RideCompleted { ride_id, .. }
            | ServerEvent::RideCancelled { ride_id, .. }
            | ServerEvent::NoDriverFound { ride_id, .. } => Some(ride_id),
            ServerEvent::Connected { active_ride, .. } => {
                active_ride.as_ref().map(|r| r.ride_id.as_str())
            }
            _ => None,
        }
    }

    /// Event tag for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::JoinedRide { .. } => "joined_ride",
            ServerEvent::LeftRide { .. } => "left_ride",
            ServerEvent::Ping { .. } => "ping",
            ServerEvent::Pong { .. } => "pong",
            ServerEvent::Error { .. } => "error",
            ServerEvent::DriverLocationUpdate { .. } => "driver_location_update",
            ServerEvent::RideAccepted { .. } => "ride_accepted",
            ServerEvent::RideStarted { .. } => "ride_started",
            ServerEvent::RideCompleted { .. } => "ride_completed",
            ServerEvent::RideCancelled { .. } => "ride_cancelled",
            ServerEvent::NoDriverFound { .. } => "no_driver_found",
            ServerEvent::DriverAvailabilityChanged { .. } => "driver_availability_changed",
        }
    }

    /// The terminal status this event signals for its ride, if any.
    pub fn terminal_status(&self) -> Option<RideStatus> {
        match self {
            ServerEvent::RideCompleted { .. } => Some(RideStatus::Completed),
            ServerEvent::RideCancelled { .. } => Some(RideStatus::Cancelled),
            ServerEvent::NoDriverFound { .. } => Some(RideStatus::NoDriverFound),
            _ => None,
        }
    }

    /// Whether this is a domain event the engine passes through to the
    /// caller's handlers (as opposed to protocol plumbing).
    pub fn is_domain_event(&self) -> bool {
        matches!(
            self,
            ServerEvent::DriverLocationUpdate { .. }
                | ServerEvent::RideAccepted { .. }
                | ServerEvent::RideStarted { .. }
                | ServerEvent::RideCompleted { .. }
                | ServerEvent::RideCancelled { .. }
                | ServerEvent::NoDriverFound { .. }
                | ServerEvent::DriverAvailabilityChanged { .. }
        )
    }

    /// Build the partial state update this event implies for its ride, if
    /// any. Feeds the single safe-merge mutation funnel.
    pub fn as_ride_update(&self) -> Option<(String, RideUpdate)> {
        match self {
            ServerEvent::DriverLocationUpdate {
                ride_id,
                latitude,
                longitude,
                heading,
                speed,
                timestamp,
                ..
            } => Some((
                ride_id.clone(),
                RideUpdate {
                    driver_location: Some(DriverLocation {
                        latitude: *latitude,
                        longitude: *longitude,
                        heading: *heading,
                        speed: *speed,
                        timestamp: timestamp.clone(),
                    }),
                    ..RideUpdate::default()
                },
            )),
            ServerEvent::RideAccepted { ride_id, driver, .. } => Some((
                ride_id.clone(),
                RideUpdate {
                    status: Some(RideStatus::Accepted),
                    driver: driver.clone(),
                    ..RideUpdate::default()
                },
            )),
            ServerEvent::RideStarted { ride_id, .. } => {
                Some((ride_id.clone(), RideUpdate::status(RideStatus::InProgress)))
            }
            ServerEvent::RideCompleted {
                ride_id, final_fare, ..
            } => Some((
                ride_id.clone(),
                RideUpdate {
                    status: Some(RideStatus::Completed),
                    final_fare: *final_fare,
                    ..RideUpdate::default()
                },
            )),
            ServerEvent::RideCancelled { ride_id, .. } => {
                Some((ride_id.clone(), RideUpdate::status(RideStatus::Cancelled)))
            }
            ServerEvent::NoDriverFound { ride_id, .. } => Some((
                ride_id.clone(),
                RideUpdate::status(RideStatus::NoDriverFound),
            )),
            _ => None,
        }
    }

    /// Extract the terminal ride status from an `error` join rejection of the
    /// shape `"Cannot join ride with status: X"`.
    pub fn terminal_join_rejection(message: &str) -> Option<RideStatus> {
        message
            .strip_prefix("Cannot join ride with status: ")
            .map(|status| RideStatus::parse(status.trim()))
    }
}
