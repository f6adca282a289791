use serde::{Deserialize, Serialize};

/// Identity and vehicle details of the driver assigned to a ride.
///
/// Matches the `driver` object in server payloads. Everything except the id
/// is optional; a partial update never erases a previously known field (see
/// the merge rules on `RideState`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    /// Driver user id.
    pub id: String,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Contact phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// Vehicle registration plate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_plate: Option<String>,

    /// Vehicle make/model description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_model: Option<String>,

    /// Average driver rating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
}

impl DriverInfo {
    /// Create a driver record with only the id known.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            phone: None,
            vehicle_plate: None,
            vehicle_model: None,
            rating: None,
        }
    }
}
