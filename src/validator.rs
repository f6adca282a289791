//! Authoritative ride validation over the REST API.
//!
//! The live channel is best-effort; the REST record is the source of truth.
//! The reconciler consults a [`RideValidator`] whenever it must decide
//! whether a remembered ride is still real.

use crate::error::{BodaLinkError, Result};
use crate::models::{DriverInfo, Place, RideStatus, RideUpdate};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Verdict of an authoritative ride lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// The ride exists; here is its current record.
    Found(RideDetails),
    /// The server does not know this ride.
    NotFound,
}

/// Authoritative ride record as served by `GET /api/rides/{id}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RideDetails {
    pub id: String,
    pub status: RideStatus,
    #[serde(default)]
    pub driver: Option<DriverInfo>,
    #[serde(default)]
    pub pickup: Option<Place>,
    #[serde(default)]
    pub dropoff: Option<Place>,
    #[serde(default)]
    pub estimated_fare: Option<f64>,
    #[serde(default)]
    pub final_fare: Option<f64>,
}

impl RideDetails {
    /// Project the authoritative record into the merge funnel's shape.
    pub fn into_update(self) -> RideUpdate {
        RideUpdate {
            status: Some(self.status),
            driver: self.driver,
            pickup: self.pickup,
            dropoff: self.dropoff,
            estimated_fare: self.estimated_fare,
            final_fare: self.final_fare,
            ..RideUpdate::default()
        }
    }
}

/// Source of authoritative ride records.
#[async_trait]
pub trait RideValidator: Send + Sync {
    /// Fetch the current ride record.
    ///
    /// `Ok(NotFound)` means the server authoritatively denied the ride's
    /// existence; transport failures surface as `Err` so the caller can
    /// tell "gone" from "unreachable".
    async fn fetch_ride(&self, ride_id: &str) -> Result<ValidationOutcome>;
}

#[derive(Deserialize)]
struct RideEnvelope {
    success: bool,
    ride: RideDetails,
}

/// REST-backed validator hitting the ride service directly.
#[derive(Debug, Clone)]
pub struct RideApi {
    client: reqwest::Client,
    base_url: String,
    jwt_token: String,
}

impl RideApi {
    pub fn new(
        base_url: impl Into<String>,
        jwt_token: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                BodaLinkError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            jwt_token: jwt_token.into(),
        })
    }
}

#[async_trait]
impl RideValidator for RideApi {
    async fn fetch_ride(&self, ride_id: &str) -> Result<ValidationOutcome> {
        let url = format!("{}/api/rides/{}", self.base_url, ride_id);
        log::debug!("[boda-link] Validating ride {} against {}", ride_id, url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.jwt_token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ValidationOutcome::NotFound);
        }
        if !response.status().is_success() {
            return Err(BodaLinkError::NetworkError(format!(
                "Ride lookup failed: HTTP {}",
                response.status()
            )));
        }

        let envelope: RideEnvelope = response.json().await?;
        if !envelope.success {
            return Err(BodaLinkError::ProtocolError(
                "Ride lookup reported failure without an HTTP error".to_string(),
            ));
        }
        Ok(ValidationOutcome::Found(envelope.ride))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ride_details_from_rest_payload() {
        let raw = json!({
            "success": true,
            "ride": {
                "id": "68af3",
                "status": "accepted",
                "driver": {
                    "id": "d-12",
                    "name": "Okello",
                    "phone": "+256700000000",
                    "vehicle_plate": "UBF 441K",
                    "vehicle_model": "Bajaj Boxer",
                    "rating": 4.8
                },
                "pickup": {
                    "address": "Wandegeya Market",
                    "latitude": 0.3345,
                    "longitude": 32.5702,
                    "place_name": null
                },
                "dropoff": {
                    "address": "Acacia Mall",
                    "latitude": 0.3387,
                    "longitude": 32.5866,
                    "place_name": "Acacia Mall"
                },
                "estimated_fare": 7000.0,
                "final_fare": null,
                "distance_km": 3.2,
                "rider_notes": null
            }
        });
        let envelope: RideEnvelope = serde_json::from_value(raw).unwrap();
        assert!(envelope.success);

        let details = envelope.ride;
        assert_eq!(details.id, "68af3");
        assert_eq!(details.status, RideStatus::Accepted);
        assert_eq!(details.driver.as_ref().unwrap().vehicle_plate.as_deref(), Some("UBF 441K"));

        let update = details.into_update();
        assert_eq!(update.status, Some(RideStatus::Accepted));
        assert_eq!(update.pickup.unwrap().address, "Wandegeya Market");
        assert_eq!(update.estimated_fare, Some(7000.0));
        assert!(update.final_fare.is_none());
        assert!(update.driver_location.is_none());
    }

    #[test]
    fn test_ride_details_tolerates_missing_optionals() {
        let raw = json!({ "id": "r-1", "status": "pending" });
        let details: RideDetails = serde_json::from_value(raw).unwrap();
        assert!(details.driver.is_none());
        assert!(details.pickup.is_none());
    }
}
