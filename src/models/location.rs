use serde::{Deserialize, Serialize};

/// A driver position report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverLocation {
    pub latitude: f64,
    pub longitude: f64,

    /// Compass heading in degrees, if the device reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,

    /// Speed in m/s, if the device reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    /// Server-side timestamp (RFC 3339), if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl DriverLocation {
    /// Create a location from bare coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            heading: None,
            speed: None,
            timestamp: None,
        }
    }

    /// Coordinates within the valid WGS84 envelope.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}
