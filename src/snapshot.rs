//! Persistent storage for the last-known active ride.
//!
//! A snapshot survives process restarts so the client can resume the ride
//! screen before the network is back. It is an optimistic cache only: the
//! reconciler always re-validates it against the server before trusting it.

use crate::error::Result;
use crate::models::{utils::now_ms, RideSnapshot};
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::RwLock;

/// Snapshots older than this are discarded on load. A ride this old is
/// almost certainly over; showing it would just flash stale UI.
pub const SNAPSHOT_STALENESS_MS: u64 = 2 * 60 * 60 * 1000;

const SNAPSHOT_FILE: &str = "active_ride.json";

/// Storage backend for the active-ride snapshot.
///
/// Implementations must be cheap enough to call inline from the state
/// write-through path; a single small JSON document is all that is stored.
pub trait SnapshotStore: Send + Sync {
    /// Load the raw persisted snapshot, if any.
    fn load(&self) -> Result<Option<RideSnapshot>>;

    /// Persist the snapshot, replacing any previous one.
    fn save(&self, snapshot: &RideSnapshot) -> Result<()>;

    /// Remove the persisted snapshot.
    fn clear(&self) -> Result<()>;

    /// Load a snapshot that is still worth reconciling: not stale and not
    /// terminal. Anything else is cleared from the store and dropped.
    fn load_usable(&self) -> Result<Option<RideSnapshot>> {
        match self.load()? {
            Some(snapshot) if snapshot.status.is_terminal() => {
                debug!(
                    "Discarding snapshot for ride {}: terminal status {}",
                    snapshot.ride_id, snapshot.status
                );
                self.clear()?;
                Ok(None)
            }
            Some(snapshot) if snapshot.is_stale(now_ms(), SNAPSHOT_STALENESS_MS) => {
                debug!(
                    "Discarding snapshot for ride {}: older than staleness window",
                    snapshot.ride_id
                );
                self.clear()?;
                Ok(None)
            }
            other => Ok(other),
        }
    }
}

/// File-backed store under the platform config directory
/// (`<config_dir>/boda/active_ride.json`).
#[derive(Debug)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store at the default platform location.
    pub fn new() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            path: base.join("boda").join(SNAPSHOT_FILE),
        }
    }

    /// Create a store at an explicit path. Used by tests and by hosts that
    /// manage their own storage locations.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Default for FileSnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<RideSnapshot>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&contents) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                // A corrupt snapshot is not worth failing startup over.
                warn!("Dropping unreadable ride snapshot: {}", err);
                self.clear()?;
                Ok(None)
            }
        }
    }

    fn save(&self, snapshot: &RideSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory store for tests and hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshot: RwLock<Option<RideSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<RideSnapshot>> {
        Ok(self
            .snapshot
            .read()
            .map_err(|_| crate::error::BodaLinkError::InternalError("snapshot lock poisoned".to_string()))?
            .clone())
    }

    fn save(&self, snapshot: &RideSnapshot) -> Result<()> {
        *self
            .snapshot
            .write()
            .map_err(|_| crate::error::BodaLinkError::InternalError("snapshot lock poisoned".to_string()))? =
            Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self
            .snapshot
            .write()
            .map_err(|_| crate::error::BodaLinkError::InternalError("snapshot lock poisoned".to_string()))? =
            None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RideState, RideStatus};

    fn sample_snapshot(status: RideStatus) -> RideSnapshot {
        RideState::new("r-42", status).to_snapshot()
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::with_path(dir.path().join("active_ride.json"));

        assert!(store.load().unwrap().is_none());

        let snapshot = sample_snapshot(RideStatus::Accepted);
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing an already-empty store is fine.
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_drops_corrupt_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active_ride.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileSnapshotStore::with_path(&path);
        assert!(store.load().unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_load_usable_discards_terminal() {
        let store = MemorySnapshotStore::new();
        store.save(&sample_snapshot(RideStatus::Completed)).unwrap();

        assert!(store.load_usable().unwrap().is_none());
        // Also cleared from the backing store.
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_load_usable_discards_stale() {
        let store = MemorySnapshotStore::new();
        let mut snapshot = sample_snapshot(RideStatus::InProgress);
        snapshot.last_update = now_ms().saturating_sub(SNAPSHOT_STALENESS_MS + 1_000);
        store.save(&snapshot).unwrap();

        assert!(store.load_usable().unwrap().is_none());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_load_usable_keeps_fresh_active() {
        let store = MemorySnapshotStore::new();
        let snapshot = sample_snapshot(RideStatus::InProgress);
        store.save(&snapshot).unwrap();

        assert_eq!(store.load_usable().unwrap(), Some(snapshot));
    }
}
