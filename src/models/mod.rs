//! Data models for the live ride channel.
//!
//! One type per file. Wire-facing types derive Serialize/Deserialize and
//! follow the server's snake_case, `event_type`-tagged JSON envelope.

pub mod active_ride;
pub mod client_event;
pub mod connection_options;
pub mod driver_info;
pub mod health_status;
pub mod location;
pub mod place;
pub mod ride_snapshot;
pub mod ride_state;
pub mod ride_status;
pub mod server_event;
pub mod terminal_notice;
pub mod utils;

pub use active_ride::ActiveRideRef;
pub use client_event::ClientEvent;
pub use connection_options::ConnectionOptions;
pub use driver_info::DriverInfo;
pub use health_status::HealthStatus;
pub use location::DriverLocation;
pub use place::Place;
pub use ride_snapshot::RideSnapshot;
pub use ride_state::{RideState, RideUpdate};
pub use ride_status::RideStatus;
pub use server_event::ServerEvent;
pub use terminal_notice::{TerminalKind, TerminalNotice};
