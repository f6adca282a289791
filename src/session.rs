//! The `BodaLinkClient` facade: one object that owns the connection, the
//! tracked ride, reconciliation, and lifecycle handling.
//!
//! Built with [`BodaLinkClientBuilder`]. Internally a session-driver task
//! consumes engine events from the connection task and funnels every ride
//! mutation through [`SessionState::apply_update`].

use crate::connection::{ConnectionManager, EngineEvent};
use crate::error::{BodaLinkError, Result};
use crate::event_handlers::{EventHandlers, ReconnectReason};
use crate::lifecycle::{LifecycleCoordinator, LifecycleOptions, LifecycleSignal, SessionControl};
use crate::models::{
    ClientEvent, ConnectionOptions, DriverLocation, HealthStatus, RideState, RideStatus,
    RideUpdate, ServerEvent, TerminalKind, TerminalNotice,
};
use crate::reconciler::{LiveChannel, ReconcileTrigger, RideReconciler, RoutePlanner};
use crate::snapshot::{FileSnapshotStore, SnapshotStore};
use crate::state::{ApplyOutcome, SessionState};
use crate::subscription::JoinGrant;
use crate::timeouts::BodaLinkTimeouts;
use crate::validator::{RideApi, RideValidator};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Client for the E-Boda live ride channel.
///
/// ```no_run
/// use boda_link::{BodaLinkClient, LifecycleSignal};
///
/// # async fn run() -> boda_link::Result<()> {
/// let client = BodaLinkClient::builder()
///     .base_url("https://api.eboda.example")
///     .jwt_token("eyJ...")
///     .connect()
///     .await?;
///
/// let grant = client.join_ride("68af31c2").await?;
/// println!("joined with status {:?}", grant.ride_status);
///
/// client.notify_lifecycle(LifecycleSignal::Background);
/// # Ok(())
/// # }
/// ```
pub struct BodaLinkClient {
    connection: Arc<ConnectionManager>,
    state: Arc<SessionState>,
    reconciler: Arc<RideReconciler>,
    lifecycle: LifecycleCoordinator,
    _driver: JoinHandle<()>,
}

impl std::fmt::Debug for BodaLinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodaLinkClient").finish_non_exhaustive()
    }
}

impl BodaLinkClient {
    pub fn builder() -> BodaLinkClientBuilder {
        BodaLinkClientBuilder::new()
    }

    /// Join a ride room and start tracking the ride. Idempotent.
    pub async fn join_ride(&self, ride_id: &str) -> Result<JoinGrant> {
        let grant = self.connection.join_ride(ride_id).await?;

        let mut state = match self.state.current() {
            Some(current) if current.ride_id == ride_id => current,
            _ => RideState::new(ride_id, grant.ride_status.unwrap_or(RideStatus::Pending)),
        };
        state.merge(RideUpdate {
            status: grant.ride_status,
            driver_location: grant.last_driver_location.clone(),
            ..RideUpdate::default()
        });
        self.state.set(state);
        Ok(grant)
    }

    /// Leave a ride room and stop tracking it if it is the current ride.
    pub async fn leave_ride(&self, ride_id: &str) {
        self.connection.leave_ride(ride_id).await;
        if self.state.ride_id().as_deref() == Some(ride_id) {
            self.state.remove();
        }
    }

    /// Stream the device position for the tracked ride. Coordinates are
    /// validated before anything goes out; sending while disconnected is a
    /// logged no-op.
    pub async fn send_location(
        &self,
        latitude: f64,
        longitude: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    ) -> Result<()> {
        let ride_id = self.state.ride_id().ok_or_else(|| {
            BodaLinkError::RideNotFound("no ride is currently tracked".to_string())
        })?;
        let location = DriverLocation {
            latitude,
            longitude,
            heading,
            speed,
            timestamp: Some(crate::models::utils::now_timestamp()),
        };
        if !location.is_valid() {
            return Err(BodaLinkError::ConfigurationError(format!(
                "Coordinates out of range: ({}, {})",
                latitude, longitude
            )));
        }
        self.connection
            .send_event(ClientEvent::LocationUpdate {
                ride_id,
                latitude,
                longitude,
                heading,
                speed,
                timestamp: location.timestamp,
            })
            .await;
        Ok(())
    }

    /// The ride being tracked, if any.
    pub fn current_ride(&self) -> Option<RideState> {
        self.state.current()
    }

    /// Whether the live channel is currently open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Current connection health verdict.
    pub async fn health(&self) -> HealthStatus {
        self.connection.check_health().await
    }

    /// Whether a ride room is currently joined on the live channel.
    pub async fn is_joined(&self, ride_id: &str) -> bool {
        self.connection.is_joined(ride_id).await
    }

    /// Feed a host lifecycle transition (see [`LifecycleSignal`]).
    pub fn notify_lifecycle(&self, signal: LifecycleSignal) {
        self.lifecycle.signal(signal);
    }

    /// Run an explicit reconciliation pass against server truth.
    pub async fn resync(&self) {
        self.reconciler
            .reconcile(ReconcileTrigger::Resync, None)
            .await;
    }

    /// Gracefully close the live channel and stop background tasks. No
    /// handler fires after this returns: lifecycle signals and
    /// reconciliation triggers are dropped from here on.
    pub async fn shutdown(&self) {
        self.lifecycle.shutdown();
        self.reconciler.close();
        self.connection.disconnect().await;
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Builder for [`BodaLinkClient`].
pub struct BodaLinkClientBuilder {
    base_url: Option<String>,
    jwt_token: Option<String>,
    timeouts: BodaLinkTimeouts,
    connection_options: ConnectionOptions,
    lifecycle_options: LifecycleOptions,
    event_handlers: EventHandlers,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    validator: Option<Arc<dyn RideValidator>>,
    route_planner: Option<Arc<dyn RoutePlanner>>,
}

impl Default for BodaLinkClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BodaLinkClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            jwt_token: None,
            timeouts: BodaLinkTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            lifecycle_options: LifecycleOptions::default(),
            event_handlers: EventHandlers::new(),
            snapshot_store: None,
            validator: None,
            route_planner: None,
        }
    }

    /// Ride service base URL, e.g. `https://api.eboda.example`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// JWT for both the WebSocket handshake and REST validation calls.
    pub fn jwt_token(mut self, token: impl Into<String>) -> Self {
        self.jwt_token = Some(token.into());
        self
    }

    pub fn timeouts(mut self, timeouts: BodaLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    pub fn lifecycle_options(mut self, options: LifecycleOptions) -> Self {
        self.lifecycle_options = options;
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Override the snapshot store (default: JSON file under the platform
    /// config directory).
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    /// Override the authoritative ride validator (default: the service's
    /// REST API).
    pub fn validator(mut self, validator: Arc<dyn RideValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// External route-fetch collaborator, invoked once after the first
    /// hydration of a ride that still needs a planned route.
    pub fn route_planner(mut self, planner: Arc<dyn RoutePlanner>) -> Self {
        self.route_planner = Some(planner);
        self
    }

    /// Connect and assemble the client. An unreachable server is not fatal:
    /// the connection keeps retrying and startup reconciliation falls back
    /// to the persisted snapshot.
    pub async fn connect(self) -> Result<BodaLinkClient> {
        let base_url = self
            .base_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| BodaLinkError::ConfigurationError("base_url is required".to_string()))?;
        let jwt_token = self
            .jwt_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                BodaLinkError::ConfigurationError("jwt_token is required".to_string())
            })?;

        let snapshot_store = self
            .snapshot_store
            .unwrap_or_else(|| Arc::new(FileSnapshotStore::new()) as Arc<dyn SnapshotStore>);
        let validator = match self.validator {
            Some(validator) => validator,
            None => Arc::new(RideApi::new(
                &base_url,
                &jwt_token,
                self.timeouts.validation_timeout,
            )?) as Arc<dyn RideValidator>,
        };

        let state = Arc::new(SessionState::new(snapshot_store));

        let (connection, engine_rx) = ConnectionManager::connect(
            base_url,
            jwt_token,
            self.timeouts.clone(),
            self.connection_options,
            self.event_handlers.clone(),
        )
        .await?;
        let connection = Arc::new(connection);

        let reconciler = Arc::new(RideReconciler::new(
            state.clone(),
            validator,
            connection.clone() as Arc<dyn LiveChannel>,
            self.route_planner,
            self.event_handlers.clone(),
            self.timeouts,
        ));

        // Set when a foreground transition forces a reconnect, so the driver
        // can report the right reconnect reason.
        let foreground_reconnect = Arc::new(AtomicBool::new(false));

        let driver = tokio::spawn(drive_engine(
            engine_rx,
            state.clone(),
            connection.clone(),
            reconciler.clone(),
            self.event_handlers.clone(),
            foreground_reconnect.clone(),
        ));

        // Initial connection may have failed; reconcile from the snapshot
        // anyway so a remembered ride resurfaces without the network.
        if !connection.is_connected() {
            let startup_reconciler = reconciler.clone();
            tokio::spawn(async move {
                startup_reconciler
                    .reconcile(ReconcileTrigger::Startup, None)
                    .await;
            });
        }

        let control = Arc::new(ControlBridge {
            connection: connection.clone(),
            reconciler: reconciler.clone(),
            foreground_reconnect,
        });
        let lifecycle =
            LifecycleCoordinator::new(self.lifecycle_options, control as Arc<dyn SessionControl>);

        Ok(BodaLinkClient {
            connection,
            state,
            reconciler,
            lifecycle,
            _driver: driver,
        })
    }
}

// ── Lifecycle bridge ────────────────────────────────────────────────────────

struct ControlBridge {
    connection: Arc<ConnectionManager>,
    reconciler: Arc<RideReconciler>,
    foreground_reconnect: Arc<AtomicBool>,
}

#[async_trait]
impl SessionControl for ControlBridge {
    async fn pause_reconnect(&self) {
        self.connection.pause_reconnect().await;
    }

    async fn resume_reconnect(&self) {
        self.connection.resume_reconnect().await;
    }

    async fn reset_subscriptions(&self) {
        self.connection.reset_subscriptions().await;
    }

    async fn check_health(&self) -> HealthStatus {
        self.connection.check_health().await
    }

    async fn force_reconnect(&self) {
        self.foreground_reconnect.store(true, Ordering::SeqCst);
        self.connection.force_reconnect().await;
    }

    async fn resync(&self) {
        self.reconciler
            .reconcile(ReconcileTrigger::Resync, None)
            .await;
    }
}

// ── Session driver ──────────────────────────────────────────────────────────

/// Consume engine events from the connection task: trigger reconciliation
/// on (re)connect, funnel domain events into the tracked ride, and run the
/// ordered teardown when the ride ends.
async fn drive_engine(
    mut engine_rx: mpsc::Receiver<EngineEvent>,
    state: Arc<SessionState>,
    connection: Arc<ConnectionManager>,
    reconciler: Arc<RideReconciler>,
    event_handlers: EventHandlers,
    foreground_reconnect: Arc<AtomicBool>,
) {
    while let Some(event) = engine_rx.recv().await {
        match event {
            EngineEvent::Connected {
                active_ride,
                reconnect,
            } => {
                let trigger = if reconnect {
                    let reason = if foreground_reconnect.swap(false, Ordering::SeqCst) {
                        ReconnectReason::ForegroundResume
                    } else {
                        ReconnectReason::Reconnected
                    };
                    event_handlers.emit_reconnect(reason);
                    ReconcileTrigger::Reconnect
                } else {
                    ReconcileTrigger::Startup
                };
                reconciler.reconcile(trigger, active_ride).await;
            },
            EngineEvent::Disconnected { reason } => {
                log::info!("[boda-link] Live channel lost: {}", reason);
            },
            EngineEvent::Domain(server_event) => {
                handle_domain_event(&state, &connection, &event_handlers, server_event).await;
            },
            EngineEvent::JoinRejected {
                ride_id,
                status,
                message,
            } => {
                if state.ride_id().as_deref() == Some(ride_id.as_str()) {
                    // No room to leave; the server already refused entry.
                    state.remove();
                    let kind =
                        TerminalKind::from_status(status).unwrap_or(TerminalKind::Cancelled);
                    event_handlers.emit_terminal_ride(
                        TerminalNotice::new(ride_id, kind).with_message(message),
                    );
                }
            },
        }
    }
    log::debug!("[boda-link] Engine channel closed; session driver exiting");
}

async fn handle_domain_event(
    state: &SessionState,
    connection: &ConnectionManager,
    event_handlers: &EventHandlers,
    event: ServerEvent,
) {
    let (ride_id, update) = match event.as_ride_update() {
        Some(projected) => projected,
        None => {
            // Fleet-wide broadcasts carry no ride; pass them through.
            event_handlers.emit_ride_event(event);
            return;
        },
    };

    match state.apply_update(&ride_id, update) {
        ApplyOutcome::Updated(_) => {
            event_handlers.emit_ride_event(event);
        },
        ApplyOutcome::Terminal(final_state) => {
            event_handlers.emit_ride_event(event.clone());
            // Ordered teardown: leave, delete snapshot, notify once.
            connection.leave_ride(&ride_id).await;
            state.remove();
            let kind = TerminalKind::from_status(final_state.status)
                .unwrap_or(TerminalKind::Cancelled);
            let mut notice = TerminalNotice::new(ride_id, kind);
            if let Some(message) = terminal_message(&event) {
                notice = notice.with_message(message);
            }
            event_handlers.emit_terminal_ride(notice);
        },
        ApplyOutcome::Ignored => {
            log::debug!(
                "Dropping {} for untracked ride {}",
                event.event_name(),
                ride_id
            );
        },
    }
}

/// Human-readable reason attached to a terminal event, if the server sent one.
fn terminal_message(event: &ServerEvent) -> Option<String> {
    match event {
        ServerEvent::RideCompleted { message, .. } => message.clone(),
        ServerEvent::RideCancelled { reason, .. } => reason.clone(),
        ServerEvent::NoDriverFound {
            message, reason, ..
        } => message.clone().or_else(|| reason.clone()),
        _ => None,
    }
}
