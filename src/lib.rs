//! # boda-link
//!
//! Client-side session engine for the E-Boda ride service: keeps a mobile
//! client's view of its in-progress ride consistent with server truth
//! across an unreliable transport.
//!
//! Three partially-ordered sources of truth are reconciled:
//!
//! - the live WebSocket channel (ride events, best-effort)
//! - a point-in-time authoritative REST query
//! - a locally persisted ride snapshot that survives restarts
//!
//! The engine owns reconnection with capped exponential backoff,
//! heartbeat-based health assessment, connection-scoped ride-room
//! membership, app background/foreground handling, and the single
//! safe-merge funnel through which every ride mutation flows.
//!
//! ## Quick start
//!
//! ```no_run
//! use boda_link::{BodaLinkClient, EventHandlers};
//!
//! # async fn run() -> boda_link::Result<()> {
//! let client = BodaLinkClient::builder()
//!     .base_url("https://api.eboda.example")
//!     .jwt_token("eyJ...")
//!     .event_handlers(
//!         EventHandlers::new()
//!             .on_ride_event(|event| println!("ride event: {:?}", event))
//!             .on_terminal_ride(|notice| println!("ride over: {:?}", notice.kind)),
//!     )
//!     .connect()
//!     .await?;
//!
//! client.join_ride("68af31c2").await?;
//! # Ok(())
//! # }
//! ```
//!
//! This crate installs no logger; it logs through the `log` facade.

mod backoff;
mod connection;
mod state;

pub mod error;
pub mod event_handlers;
pub mod lifecycle;
pub mod models;
pub mod reconciler;
pub mod session;
pub mod snapshot;
pub mod subscription;
pub mod timeouts;
pub mod validator;

pub use error::{BodaLinkError, Result};
pub use event_handlers::{EventHandlers, ReconnectReason};
pub use lifecycle::{LifecycleOptions, LifecycleSignal};
pub use models::{
    ActiveRideRef, ClientEvent, ConnectionOptions, DriverInfo, DriverLocation, HealthStatus,
    Place, RideSnapshot, RideState, RideStatus, RideUpdate, ServerEvent, TerminalKind,
    TerminalNotice,
};
pub use reconciler::RoutePlanner;
pub use session::{BodaLinkClient, BodaLinkClientBuilder};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use subscription::JoinGrant;
pub use timeouts::BodaLinkTimeouts;
pub use validator::{RideApi, RideDetails, RideValidator, ValidationOutcome};
