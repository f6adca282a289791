//! Reconciliation of remembered rides against server truth.
//!
//! Whenever the session (re)gains a connection or restarts, some remembered
//! ride may or may not still be real. The reconciler takes the best local
//! candidate, asks the REST API for the authoritative record, and then
//! either adopts, tears down, or provisionally keeps the ride. It runs at
//! most once at a time; concurrent triggers are dropped, not queued.

use crate::error::{BodaLinkError, Result};
use crate::event_handlers::EventHandlers;
use crate::models::{
    ActiveRideRef, Place, RideState, RideStatus, RideUpdate, TerminalKind, TerminalNotice,
};
use crate::state::{ApplyOutcome, SessionState};
use crate::subscription::JoinGrant;
use crate::timeouts::BodaLinkTimeouts;
use crate::validator::{RideValidator, ValidationOutcome};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Validation attempts before the server is declared unreachable.
const VALIDATION_ATTEMPTS: u32 = 3;

/// What prompted a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconcileTrigger {
    /// Process start, possibly with a persisted snapshot.
    Startup,
    /// The live channel came back after a drop.
    Reconnect,
    /// Explicit refresh, e.g. after a foreground transition.
    Resync,
}

/// Live-channel operations the reconciler needs. Abstracted so tests can
/// run the full algorithm without a socket.
#[async_trait]
pub(crate) trait LiveChannel: Send + Sync {
    async fn join_ride(&self, ride_id: &str) -> Result<JoinGrant>;
    async fn leave_ride(&self, ride_id: &str);
    fn is_connected(&self) -> bool;
}

#[async_trait]
impl LiveChannel for crate::connection::ConnectionManager {
    async fn join_ride(&self, ride_id: &str) -> Result<JoinGrant> {
        crate::connection::ConnectionManager::join_ride(self, ride_id).await
    }

    async fn leave_ride(&self, ride_id: &str) {
        crate::connection::ConnectionManager::leave_ride(self, ride_id).await;
    }

    fn is_connected(&self) -> bool {
        crate::connection::ConnectionManager::is_connected(self)
    }
}

/// External route-fetch collaborator, invoked once per process when a
/// freshly hydrated ride still needs a planned route. The host typically
/// calls its maps provider here.
#[async_trait]
pub trait RoutePlanner: Send + Sync {
    async fn plan_route(&self, ride_id: &str, pickup: &Place, dropoff: &Place) -> Result<()>;
}

pub(crate) struct RideReconciler {
    state: Arc<SessionState>,
    validator: Arc<dyn RideValidator>,
    channel: Arc<dyn LiveChannel>,
    route_planner: Option<Arc<dyn RoutePlanner>>,
    event_handlers: EventHandlers,
    timeouts: BodaLinkTimeouts,
    /// Single-flight guard.
    in_flight: AtomicBool,
    /// Set after the first successful hydration of this process.
    hydrated_once: AtomicBool,
    /// Set on shutdown; no pass (and no handler) runs from then on.
    closed: AtomicBool,
}

impl RideReconciler {
    pub fn new(
        state: Arc<SessionState>,
        validator: Arc<dyn RideValidator>,
        channel: Arc<dyn LiveChannel>,
        route_planner: Option<Arc<dyn RoutePlanner>>,
        event_handlers: EventHandlers,
        timeouts: BodaLinkTimeouts,
    ) -> Self {
        Self {
            state,
            validator,
            channel,
            route_planner,
            event_handlers,
            timeouts,
            in_flight: AtomicBool::new(false),
            hydrated_once: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Refuse all further passes. Called on session shutdown so nothing can
    /// fire caller handlers afterwards.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Run one reconciliation pass. A pass already in flight makes this a
    /// no-op; the running pass will observe any fresher server state itself.
    pub async fn reconcile(&self, trigger: ReconcileTrigger, hint: Option<ActiveRideRef>) {
        if self.closed.load(Ordering::SeqCst) {
            log::debug!("Ignoring {:?} trigger after shutdown", trigger);
            return;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Reconciliation already in flight; ignoring {:?} trigger", trigger);
            return;
        }
        self.run(trigger, hint).await;
        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn run(&self, trigger: ReconcileTrigger, hint: Option<ActiveRideRef>) {
        let candidate = match self.candidate(hint) {
            Some(candidate) => candidate,
            None => {
                log::debug!("No ride candidate on {:?}; nothing to reconcile", trigger);
                return;
            },
        };
        let ride_id = candidate.ride_id.clone();
        log::info!(
            "Reconciling ride {} on {:?} (local status {})",
            ride_id,
            trigger,
            candidate.status
        );

        // Bounded validation loop. Not-found and terminal are definitive and
        // short-circuit; transport failures and unrecognized statuses get
        // retried a fixed number of times.
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.validator.fetch_ride(&ride_id).await {
                Ok(ValidationOutcome::Found(details)) if details.status == RideStatus::Unknown => {
                    log::warn!(
                        "Ride {} has unrecognized status (attempt {}/{})",
                        ride_id,
                        attempt,
                        VALIDATION_ATTEMPTS
                    );
                },
                Ok(ValidationOutcome::Found(details)) if details.status.is_terminal() => {
                    log::info!("Ride {} is {}; tearing down", ride_id, details.status);
                    let kind = TerminalKind::from_status(details.status)
                        .unwrap_or(TerminalKind::Cancelled);
                    self.teardown(&ride_id, kind, None).await;
                    return;
                },
                Ok(ValidationOutcome::Found(details)) => {
                    self.adopt(candidate, details.into_update()).await;
                    return;
                },
                Ok(ValidationOutcome::NotFound) => {
                    log::info!("Ride {} no longer exists; dropping stale reference", ride_id);
                    self.teardown(
                        &ride_id,
                        TerminalKind::NotFound,
                        Some("Ride no longer exists".to_string()),
                    )
                    .await;
                    return;
                },
                Err(e) => {
                    log::warn!(
                        "Validation of ride {} failed (attempt {}/{}): {}",
                        ride_id,
                        attempt,
                        VALIDATION_ATTEMPTS,
                        e
                    );
                },
            }

            if attempt >= VALIDATION_ATTEMPTS {
                break;
            }
            tokio::time::sleep(self.timeouts.validation_retry_delay).await;
        }

        // Server unreachable (or persistently ambiguous).
        match trigger {
            ReconcileTrigger::Startup => {
                // Keep what we remember so the rider still sees their ride;
                // the record is provisional and the next pass re-validates.
                log::warn!(
                    "Server unreachable; keeping ride {} provisionally",
                    ride_id
                );
                self.state.set_provisional(candidate);
                self.join_adopted(&ride_id).await;
            },
            ReconcileTrigger::Reconnect | ReconcileTrigger::Resync => {
                // A connection exists but the record cannot be confirmed;
                // showing it would risk presenting a dead ride as live.
                log::warn!(
                    "Server unreachable; discarding unconfirmed ride {}",
                    ride_id
                );
                self.state.remove_memory_only();
            },
        }
    }

    /// Best local guess at the ride worth reconciling, richest source wins
    /// for detail but the server hint wins for identity.
    fn candidate(&self, hint: Option<ActiveRideRef>) -> Option<RideState> {
        if let Some(hint) = hint {
            if let Some(current) = self.state.current() {
                if current.ride_id == hint.ride_id {
                    return Some(current);
                }
            }
            if let Ok(Some(snapshot)) = self.state.store().load_usable() {
                if snapshot.ride_id == hint.ride_id {
                    return Some(RideState::from_snapshot(&snapshot));
                }
            }
            return Some(RideState::new(hint.ride_id, hint.status));
        }
        if let Some(current) = self.state.current() {
            return Some(current);
        }
        match self.state.store().load_usable() {
            Ok(Some(snapshot)) => Some(RideState::from_snapshot(&snapshot)),
            Ok(None) => None,
            Err(e) => {
                log::warn!("Failed to load ride snapshot: {}", e);
                None
            },
        }
    }

    /// The server confirmed the ride is live: merge the authoritative
    /// record, persist, rejoin the room, and plan the route once.
    async fn adopt(&self, mut candidate: RideState, update: RideUpdate) {
        candidate.merge(update);
        let ride_id = candidate.ride_id.clone();
        self.state.set(candidate);
        self.join_adopted(&ride_id).await;

        let first_hydration = !self.hydrated_once.swap(true, Ordering::SeqCst);
        if first_hydration {
            if let (Some(planner), Some(state)) = (&self.route_planner, self.state.current()) {
                if state.needs_route_plan() {
                    // needs_route_plan() verified both endpoints exist
                    if let (Some(pickup), Some(dropoff)) = (&state.pickup, &state.dropoff) {
                        if let Err(e) = planner.plan_route(&state.ride_id, pickup, dropoff).await {
                            log::warn!("Route planning for {} failed: {}", state.ride_id, e);
                        }
                    }
                }
            }
        }
    }

    /// Best-effort room join for an adopted ride, folding the grant's
    /// status and driver position into the tracked state.
    async fn join_adopted(&self, ride_id: &str) {
        if !self.channel.is_connected() {
            log::debug!("Skipping join for {}: not connected", ride_id);
            return;
        }
        match self.channel.join_ride(ride_id).await {
            Ok(grant) => {
                let update = RideUpdate {
                    status: grant.ride_status,
                    driver_location: grant.last_driver_location,
                    ..RideUpdate::default()
                };
                if let ApplyOutcome::Terminal(final_state) =
                    self.state.apply_update(ride_id, update)
                {
                    let kind = TerminalKind::from_status(final_state.status)
                        .unwrap_or(TerminalKind::Cancelled);
                    self.teardown(ride_id, kind, None).await;
                }
            },
            Err(BodaLinkError::RideClosed { status }) => {
                let parsed = RideStatus::parse(&status);
                let kind = TerminalKind::from_status(parsed).unwrap_or(TerminalKind::Cancelled);
                self.teardown(
                    ride_id,
                    kind,
                    Some(format!("Cannot join ride with status: {}", status)),
                )
                .await;
            },
            Err(e) => {
                // The ride stays adopted; the next reconnect pass rejoins.
                log::warn!("Join for reconciled ride {} failed: {}", ride_id, e);
            },
        }
    }

    /// Ordered teardown of a finished or vanished ride: leave the room,
    /// delete the snapshot, then notify exactly once.
    async fn teardown(&self, ride_id: &str, kind: TerminalKind, message: Option<String>) {
        self.channel.leave_ride(ride_id).await;
        self.state.remove();
        let mut notice = TerminalNotice::new(ride_id, kind);
        if let Some(message) = message {
            notice = notice.with_message(message);
        }
        self.event_handlers.emit_terminal_ride(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DriverLocation;
    use crate::snapshot::{MemorySnapshotStore, SnapshotStore};
    use crate::validator::RideDetails;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockValidator {
        outcomes: Mutex<VecDeque<Result<ValidationOutcome>>>,
        call_count: std::sync::atomic::AtomicU32,
    }

    impl MockValidator {
        fn new(outcomes: Vec<Result<ValidationOutcome>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                call_count: std::sync::atomic::AtomicU32::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RideValidator for MockValidator {
        async fn fetch_ride(&self, _ride_id: &str) -> Result<ValidationOutcome> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(BodaLinkError::NetworkError("exhausted".to_string())))
        }
    }

    #[derive(Default)]
    struct MockChannel {
        connected: bool,
        join_result: Option<BodaLinkError>,
        joins: Mutex<Vec<String>>,
        leaves: Mutex<Vec<String>>,
        grant_status: Option<RideStatus>,
    }

    #[async_trait]
    impl LiveChannel for MockChannel {
        async fn join_ride(&self, ride_id: &str) -> Result<JoinGrant> {
            self.joins.lock().unwrap().push(ride_id.to_string());
            if let Some(err) = &self.join_result {
                return Err(err.clone());
            }
            Ok(JoinGrant {
                ride_id: ride_id.to_string(),
                ride_status: self.grant_status,
                last_driver_location: Some(DriverLocation::new(0.31, 32.58)),
            })
        }

        async fn leave_ride(&self, ride_id: &str) {
            self.leaves.lock().unwrap().push(ride_id.to_string());
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    fn active_details(ride_id: &str, status: RideStatus) -> ValidationOutcome {
        ValidationOutcome::Found(RideDetails {
            id: ride_id.to_string(),
            status,
            driver: None,
            pickup: None,
            dropoff: None,
            estimated_fare: Some(5_000.0),
            final_fare: None,
        })
    }

    struct Fixture {
        state: Arc<SessionState>,
        store: Arc<MemorySnapshotStore>,
        reconciler: RideReconciler,
        channel: Arc<MockChannel>,
    }

    fn fixture(validator: Arc<MockValidator>, channel: MockChannel) -> Fixture {
        let store = Arc::new(MemorySnapshotStore::new());
        let state = Arc::new(SessionState::new(store.clone() as Arc<dyn SnapshotStore>));
        let channel = Arc::new(channel);
        let reconciler = RideReconciler::new(
            state.clone(),
            validator as Arc<dyn RideValidator>,
            channel.clone() as Arc<dyn LiveChannel>,
            None,
            EventHandlers::new(),
            BodaLinkTimeouts::fast(),
        );
        Fixture {
            state,
            store,
            reconciler,
            channel,
        }
    }

    #[tokio::test]
    async fn test_cold_start_with_valid_ride() {
        let validator = MockValidator::new(vec![Ok(active_details(
            "r-1",
            RideStatus::InProgress,
        ))]);
        let fx = fixture(
            validator.clone(),
            MockChannel {
                connected: true,
                grant_status: Some(RideStatus::InProgress),
                ..MockChannel::default()
            },
        );
        fx.store
            .save(&RideState::new("r-1", RideStatus::Accepted).to_snapshot())
            .unwrap();

        fx.reconciler
            .reconcile(ReconcileTrigger::Startup, None)
            .await;

        let current = fx.state.current().unwrap();
        assert_eq!(current.ride_id, "r-1");
        assert_eq!(current.status, RideStatus::InProgress);
        assert_eq!(current.estimated_fare, Some(5_000.0));
        assert_eq!(*fx.channel.joins.lock().unwrap(), vec!["r-1".to_string()]);
        // Persisted with the reconciled status.
        assert_eq!(
            fx.store.load().unwrap().unwrap().status,
            RideStatus::InProgress
        );
        assert_eq!(validator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cold_start_with_completed_ride_tears_down() {
        let validator =
            MockValidator::new(vec![Ok(active_details("r-1", RideStatus::Completed))]);
        let fx = fixture(validator.clone(), MockChannel::default());
        fx.store
            .save(&RideState::new("r-1", RideStatus::InProgress).to_snapshot())
            .unwrap();

        fx.reconciler
            .reconcile(ReconcileTrigger::Startup, None)
            .await;

        assert!(fx.state.current().is_none());
        assert!(fx.store.load().unwrap().is_none());
        assert!(fx.channel.joins.lock().unwrap().is_empty());
        // Definitive verdict: exactly one query.
        assert_eq!(validator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_not_found_short_circuits() {
        let validator = MockValidator::new(vec![Ok(ValidationOutcome::NotFound)]);
        let fx = fixture(validator.clone(), MockChannel::default());
        fx.store
            .save(&RideState::new("r-gone", RideStatus::Accepted).to_snapshot())
            .unwrap();

        fx.reconciler
            .reconcile(ReconcileTrigger::Startup, None)
            .await;

        assert!(fx.state.current().is_none());
        assert!(fx.store.load().unwrap().is_none());
        assert_eq!(validator.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_unreachable_keeps_provisionally_and_joins() {
        let validator = MockValidator::new(vec![
            Err(BodaLinkError::NetworkError("down".to_string())),
            Err(BodaLinkError::NetworkError("down".to_string())),
            Err(BodaLinkError::NetworkError("down".to_string())),
        ]);
        let fx = fixture(
            validator.clone(),
            MockChannel {
                connected: true,
                ..MockChannel::default()
            },
        );
        fx.store
            .save(&RideState::new("r-1", RideStatus::Accepted).to_snapshot())
            .unwrap();

        fx.reconciler
            .reconcile(ReconcileTrigger::Startup, None)
            .await;

        assert_eq!(validator.call_count(), 3);
        // Ride kept provisionally and the room still joined.
        assert_eq!(fx.state.current().unwrap().ride_id, "r-1");
        assert_eq!(*fx.channel.joins.lock().unwrap(), vec!["r-1".to_string()]);
        // Snapshot left untouched for the next attempt.
        assert!(fx.store.load().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_unreachable_discards_memory() {
        let validator = MockValidator::new(vec![
            Err(BodaLinkError::NetworkError("down".to_string())),
            Err(BodaLinkError::NetworkError("down".to_string())),
            Err(BodaLinkError::NetworkError("down".to_string())),
        ]);
        let fx = fixture(validator.clone(), MockChannel::default());
        fx.state.set(RideState::new("r-1", RideStatus::Accepted));

        fx.reconciler
            .reconcile(ReconcileTrigger::Resync, None)
            .await;

        assert_eq!(validator.call_count(), 3);
        assert!(fx.state.current().is_none());
        assert!(fx.channel.joins.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hint_outranks_snapshot_identity() {
        let validator =
            MockValidator::new(vec![Ok(active_details("r-new", RideStatus::Accepted))]);
        let fx = fixture(
            validator,
            MockChannel {
                connected: true,
                ..MockChannel::default()
            },
        );
        fx.store
            .save(&RideState::new("r-old", RideStatus::Accepted).to_snapshot())
            .unwrap();

        fx.reconciler
            .reconcile(
                ReconcileTrigger::Reconnect,
                Some(ActiveRideRef {
                    ride_id: "r-new".to_string(),
                    status: RideStatus::Accepted,
                }),
            )
            .await;

        assert_eq!(fx.state.current().unwrap().ride_id, "r-new");
    }

    #[tokio::test]
    async fn test_terminal_join_rejection_during_adopt() {
        let validator =
            MockValidator::new(vec![Ok(active_details("r-1", RideStatus::Accepted))]);
        let fx = fixture(
            validator,
            MockChannel {
                connected: true,
                join_result: Some(BodaLinkError::RideClosed {
                    status: "completed".to_string(),
                }),
                ..MockChannel::default()
            },
        );
        fx.state.set(RideState::new("r-1", RideStatus::Accepted));

        fx.reconciler
            .reconcile(ReconcileTrigger::Reconnect, None)
            .await;

        // The REST record was stale; the join rejection wins.
        assert!(fx.state.current().is_none());
        assert!(fx.store.load().unwrap().is_none());
        assert_eq!(*fx.channel.leaves.lock().unwrap(), vec!["r-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_trigger_is_ignored() {
        // One unreachable pass takes several retry delays; a second trigger
        // arriving mid-pass must not add fetches.
        let validator = MockValidator::new(vec![
            Err(BodaLinkError::NetworkError("down".to_string())),
            Err(BodaLinkError::NetworkError("down".to_string())),
            Err(BodaLinkError::NetworkError("down".to_string())),
        ]);
        let fx = fixture(validator.clone(), MockChannel::default());
        fx.state.set(RideState::new("r-1", RideStatus::Accepted));

        let reconciler = Arc::new(fx.reconciler);
        let first = {
            let r = reconciler.clone();
            tokio::spawn(async move { r.reconcile(ReconcileTrigger::Resync, None).await })
        };
        tokio::task::yield_now().await;
        reconciler.reconcile(ReconcileTrigger::Resync, None).await;
        first.await.unwrap();

        assert_eq!(validator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_closed_reconciler_refuses_passes() {
        let validator = MockValidator::new(vec![Ok(active_details(
            "r-1",
            RideStatus::InProgress,
        ))]);
        let fx = fixture(validator.clone(), MockChannel::default());
        fx.state.set(RideState::new("r-1", RideStatus::Accepted));

        fx.reconciler.close();
        fx.reconciler
            .reconcile(ReconcileTrigger::Resync, None)
            .await;

        assert_eq!(validator.call_count(), 0);
        // State is untouched; nothing was validated or torn down.
        assert_eq!(fx.state.current().unwrap().status, RideStatus::Accepted);
    }

    #[tokio::test]
    async fn test_nothing_to_reconcile_is_quiet() {
        let validator = MockValidator::new(vec![]);
        let fx = fixture(validator.clone(), MockChannel::default());

        fx.reconciler
            .reconcile(ReconcileTrigger::Startup, None)
            .await;

        assert_eq!(validator.call_count(), 0);
        assert!(fx.state.current().is_none());
    }
}
