//! Geocoding enrichment: resolve a free-text address into coordinates

mod client;
mod response;

pub use client::GeoEnrichmentClient;
pub use response::{parse_geocode_response, GeocodeResponse};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GeoResolutionFailure;

/// Latitude/longitude pair exactly as the service returned it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: String,
    pub longitude: String,
}

impl Coordinates {
    pub fn new(latitude: impl Into<String>, longitude: impl Into<String>) -> Self {
        Self {
            latitude: latitude.into(),
            longitude: longitude.into(),
        }
    }
}

/// Formats as `"<lat>,<lng>"`
impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// Anything that can turn an address into coordinates
///
/// `Ok(None)` means the service answered but had nothing usable.
/// Implementations are shared by every record of a pipeline and must be
/// safe for concurrent use.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn resolve(
        &self,
        identifier: &str,
        address: &str,
    ) -> Result<Option<Coordinates>, GeoResolutionFailure>;
}
