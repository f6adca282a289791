use serde::{Deserialize, Serialize};

/// A route endpoint (pickup or dropoff).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    /// Street address text.
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,

    /// Optional human-friendly label ("Home", "Airport Terminal 2").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
}
