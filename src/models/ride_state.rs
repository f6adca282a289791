use super::driver_info::DriverInfo;
use super::location::DriverLocation;
use super::place::Place;
use super::ride_snapshot::RideSnapshot;
use super::ride_status::RideStatus;
use super::utils::now_ms;

/// In-memory representation of the client's current ride.
///
/// Mutated only through [`RideState::merge`], which applies the safe-merge
/// rule: fields present on the update override, fields absent never erase a
/// previously known value. This keeps partial, out-of-order events from
/// corrupting already-known good fields like the driver identity.
#[derive(Debug, Clone, PartialEq)]
pub struct RideState {
    pub ride_id: String,
    pub status: RideStatus,
    pub driver: Option<DriverInfo>,
    pub driver_location: Option<DriverLocation>,
    pub pickup: Option<Place>,
    pub dropoff: Option<Place>,
    pub estimated_fare: Option<f64>,
    pub final_fare: Option<f64>,
    /// Millis since Unix epoch of the last accepted mutation.
    pub updated_at_ms: u64,
}

/// A partial update to the current ride. `None` means "not reported", never
/// "clear the field".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RideUpdate {
    pub status: Option<RideStatus>,
    pub driver: Option<DriverInfo>,
    pub driver_location: Option<DriverLocation>,
    pub pickup: Option<Place>,
    pub dropoff: Option<Place>,
    pub estimated_fare: Option<f64>,
    pub final_fare: Option<f64>,
}

impl RideUpdate {
    /// An update that only changes the status.
    pub fn status(status: RideStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

impl RideState {
    /// Create a fresh state with only id and status known.
    pub fn new(ride_id: impl Into<String>, status: RideStatus) -> Self {
        Self {
            ride_id: ride_id.into(),
            status,
            driver: None,
            driver_location: None,
            pickup: None,
            dropoff: None,
            estimated_fare: None,
            final_fare: None,
            updated_at_ms: now_ms(),
        }
    }

    /// Apply a partial update. Present fields override; absent fields keep
    /// their previous value.
    pub fn merge(&mut self, update: RideUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(driver) = update.driver {
            self.driver = Some(driver);
        }
        if let Some(location) = update.driver_location {
            self.driver_location = Some(location);
        }
        if let Some(pickup) = update.pickup {
            self.pickup = Some(pickup);
        }
        if let Some(dropoff) = update.dropoff {
            self.dropoff = Some(dropoff);
        }
        if let Some(fare) = update.estimated_fare {
            self.estimated_fare = Some(fare);
        }
        if let Some(fare) = update.final_fare {
            self.final_fare = Some(fare);
        }
        self.updated_at_ms = now_ms();
    }

    /// Whether this ride still needs a planned route: active with both
    /// endpoints known. Used to trigger the external route fetch once on
    /// first hydration.
    pub fn needs_route_plan(&self) -> bool {
        self.status.is_active() && self.pickup.is_some() && self.dropoff.is_some()
    }

    /// Project this state into the persistable snapshot form.
    pub fn to_snapshot(&self) -> RideSnapshot {
        RideSnapshot {
            ride_id: self.ride_id.clone(),
            status: self.status,
            driver: self.driver.clone(),
            driver_location: self.driver_location.clone(),
            pickup: self.pickup.clone(),
            dropoff: self.dropoff.clone(),
            estimated_fare: self.estimated_fare,
            final_fare: self.final_fare,
            last_update: self.updated_at_ms,
        }
    }

    /// Rebuild in-memory state from a persisted snapshot.
    pub fn from_snapshot(snapshot: &RideSnapshot) -> Self {
        Self {
            ride_id: snapshot.ride_id.clone(),
            status: snapshot.status,
            driver: snapshot.driver.clone(),
            driver_location: snapshot.driver_location.clone(),
            pickup: snapshot.pickup.clone(),
            dropoff: snapshot.dropoff.clone(),
            estimated_fare: snapshot.estimated_fare,
            final_fare: snapshot.final_fare,
            updated_at_ms: snapshot.last_update,
        }
    }
}
