use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{EnrichmentOutcome, RecordContext, Stage, StageOutcome};
use crate::config::{EnrichmentFailurePolicy, GeoConfig};
use crate::error::StageError;
use crate::geo::Geocoder;
use crate::rate_limiter::RateLimiter;
use crate::record::Record;

const STAGE_NAME: &str = "geo_enrich";

/// Adds coordinates resolved from the record's address
///
/// Records without an address pass through untouched. Every lookup first
/// waits on the shared [`RateLimiter`]. An empty answer is only a warning;
/// a failed lookup forwards the record unchanged unless the failure policy
/// is [`EnrichmentFailurePolicy::Halt`].
pub struct GeoEnrichStage {
    geocoder: Arc<dyn Geocoder>,
    limiter: Arc<RateLimiter>,
    address_field: String,
    coordinates_field: String,
    on_failure: EnrichmentFailurePolicy,
}

impl GeoEnrichStage {
    pub fn new(geocoder: Arc<dyn Geocoder>, limiter: Arc<RateLimiter>, config: &GeoConfig) -> Self {
        Self {
            geocoder,
            limiter,
            address_field: config.address_field.clone(),
            coordinates_field: config.coordinates_field.clone(),
            on_failure: config.on_failure,
        }
    }
}

#[async_trait]
impl Stage for GeoEnrichStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    async fn process(
        &self,
        record: &mut Record,
        ctx: &mut RecordContext,
    ) -> Result<StageOutcome, StageError> {
        let address = match record.get_str(&self.address_field).map(str::trim) {
            Some(address) if !address.is_empty() => address.to_string(),
            _ => return Ok(StageOutcome::Forward),
        };
        let record_id = record.identifier();

        self.limiter.acquire().await;

        match self.geocoder.resolve(&record_id, &address).await {
            Ok(Some(coordinates)) => {
                debug!(record_id = %record_id, coordinates = %coordinates, "Record enriched");
                record.set_field(self.coordinates_field.as_str(), coordinates.to_string());
                ctx.enrichment = Some(EnrichmentOutcome::Enriched);
            },
            Ok(None) => {
                warn!(
                    record_id = %record_id,
                    address = %address,
                    "No coordinates found for address"
                );
                ctx.enrichment = Some(EnrichmentOutcome::Empty);
            },
            Err(failure) => {
                ctx.enrichment = Some(EnrichmentOutcome::Failed);
                match self.on_failure {
                    EnrichmentFailurePolicy::Forward => {
                        warn!(record_id = %record_id, error = %failure, "Geocoding failed, forwarding record");
                    },
                    EnrichmentFailurePolicy::Halt => {
                        return Err(StageError::new(STAGE_NAME, record_id, failure));
                    },
                }
            },
        }

        Ok(StageOutcome::Forward)
    }
}
