//! Shared holder for the tracked ride.
//!
//! All mutation goes through [`SessionState::apply_update`], the one funnel
//! that enforces the safe-merge rule and keeps the persisted snapshot in
//! step with memory. Events for rides other than the tracked one are
//! dropped here, not at the call sites.

use crate::models::{RideState, RideUpdate};
use crate::snapshot::SnapshotStore;
use log::warn;
use std::sync::{Arc, RwLock};

/// Result of applying an update through the funnel.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ApplyOutcome {
    /// No tracked ride, or the update targeted a different ride.
    Ignored,
    /// Merged into the tracked ride; snapshot written through.
    Updated(RideState),
    /// Merged to a terminal status. Memory is cleared here; the caller owns
    /// the rest of the teardown (leave, snapshot delete, notification).
    Terminal(RideState),
}

pub(crate) struct SessionState {
    current: RwLock<Option<RideState>>,
    store: Arc<dyn SnapshotStore>,
}

impl SessionState {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            current: RwLock::new(None),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Clone of the tracked ride, if any.
    pub fn current(&self) -> Option<RideState> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }

    pub fn ride_id(&self) -> Option<String> {
        self.current().map(|state| state.ride_id)
    }

    /// Replace the tracked ride wholesale and persist it. Used when the
    /// reconciler produces an authoritative state.
    pub fn set(&self, state: RideState) {
        self.persist(&state);
        if let Ok(mut guard) = self.current.write() {
            *guard = Some(state);
        }
    }

    /// Adopt a ride into memory without persisting, for provisional state
    /// the server has not confirmed yet.
    pub fn set_provisional(&self, state: RideState) {
        if let Ok(mut guard) = self.current.write() {
            *guard = Some(state);
        }
    }

    /// Apply a partial update to the tracked ride.
    pub fn apply_update(&self, ride_id: &str, update: RideUpdate) -> ApplyOutcome {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(_) => return ApplyOutcome::Ignored,
        };
        let state = match guard.as_mut() {
            Some(state) if state.ride_id == ride_id => state,
            _ => return ApplyOutcome::Ignored,
        };

        state.merge(update);
        if state.status.is_terminal() {
            let final_state = state.clone();
            *guard = None;
            return ApplyOutcome::Terminal(final_state);
        }

        let updated = state.clone();
        drop(guard);
        self.persist(&updated);
        ApplyOutcome::Updated(updated)
    }

    /// Drop the tracked ride from memory and delete its snapshot.
    pub fn remove(&self) {
        if let Ok(mut guard) = self.current.write() {
            *guard = None;
        }
        if let Err(err) = self.store.clear() {
            warn!("Failed to clear ride snapshot: {}", err);
        }
    }

    /// Drop the tracked ride from memory only, leaving any snapshot behind.
    pub fn remove_memory_only(&self) {
        if let Ok(mut guard) = self.current.write() {
            *guard = None;
        }
    }

    fn persist(&self, state: &RideState) {
        // Snapshot failures degrade restart recovery, never the live session.
        if let Err(err) = self.store.save(&state.to_snapshot()) {
            warn!("Failed to persist ride snapshot: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DriverInfo, RideStatus};
    use crate::snapshot::MemorySnapshotStore;

    fn state_with(ride: RideState) -> (SessionState, Arc<MemorySnapshotStore>) {
        let store = Arc::new(MemorySnapshotStore::new());
        let session = SessionState::new(store.clone() as Arc<dyn SnapshotStore>);
        session.set(ride);
        (session, store)
    }

    #[test]
    fn test_updates_for_other_rides_are_ignored() {
        let (session, _) = state_with(RideState::new("r-1", RideStatus::Accepted));
        let outcome = session.apply_update("r-2", RideUpdate::status(RideStatus::InProgress));
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert_eq!(session.current().unwrap().status, RideStatus::Accepted);
    }

    #[test]
    fn test_update_writes_through_to_snapshot() {
        let (session, store) = state_with(RideState::new("r-1", RideStatus::Pending));
        session.apply_update(
            "r-1",
            RideUpdate {
                status: Some(RideStatus::Accepted),
                driver: Some(DriverInfo::with_id("d-7")),
                ..RideUpdate::default()
            },
        );

        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.status, RideStatus::Accepted);
        assert_eq!(snapshot.driver.unwrap().id, "d-7");
    }

    #[test]
    fn test_terminal_update_clears_memory_but_not_snapshot() {
        let (session, store) = state_with(RideState::new("r-1", RideStatus::InProgress));
        let outcome = session.apply_update("r-1", RideUpdate::status(RideStatus::Completed));

        match outcome {
            ApplyOutcome::Terminal(final_state) => {
                assert_eq!(final_state.status, RideStatus::Completed)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(session.current().is_none());
        // The ordered teardown deletes the snapshot, not the funnel.
        assert!(store.load().unwrap().is_some());
    }

    #[test]
    fn test_remove_deletes_snapshot() {
        let (session, store) = state_with(RideState::new("r-1", RideStatus::Accepted));
        session.remove();
        assert!(session.current().is_none());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_provisional_state_is_not_persisted() {
        let store = Arc::new(MemorySnapshotStore::new());
        let session = SessionState::new(store.clone() as Arc<dyn SnapshotStore>);
        session.set_provisional(RideState::new("r-1", RideStatus::Accepted));
        assert!(session.current().is_some());
        assert!(store.load().unwrap().is_none());
    }
}
