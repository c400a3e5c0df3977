//! Record stages
//!
//! A stage looks at one record, may change it, and then either forwards it
//! to the next stage or halts it. Stages are assembled into a
//! [`Pipeline`](crate::pipeline::Pipeline) once, in a fixed order, and run
//! one after another for every record.

mod compound_split;
mod field_trim;
mod geo_enrich;
mod required_fields;

pub use compound_split::CompoundFieldSplitStage;
pub use field_trim::FieldTrimStage;
pub use geo_enrich::GeoEnrichStage;
pub use required_fields::RequiredFieldsStage;

use async_trait::async_trait;

use crate::error::StageError;
use crate::record::Record;

/// What a stage decided for a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Hand the record to the next stage
    Forward,
    /// Reject the record; it is not committed
    Halt { reason: String },
}

impl StageOutcome {
    pub fn halt(reason: impl Into<String>) -> Self {
        StageOutcome::Halt {
            reason: reason.into(),
        }
    }
}

/// How enrichment went for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    Enriched,
    /// The service answered without usable coordinates
    Empty,
    Failed,
}

/// Per-record notes stages leave for the runner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordContext {
    pub enrichment: Option<EnrichmentOutcome>,
}

/// One unit of the ingestion pipeline
///
/// A stage returns `Err` only when it could not do its job for the record;
/// the record is then dropped and counted as failed.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn process(
        &self,
        record: &mut Record,
        ctx: &mut RecordContext,
    ) -> Result<StageOutcome, StageError>;
}
