//! Ordered stage chain ending in a commit
//!
//! Stages run one after another on the same record. The first stage that
//! halts or fails ends processing for that record, and only a record every
//! stage forwarded reaches the sink.

use docflow_common::DocflowError;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::IngestConfig;
use crate::error::StageError;
use crate::geo::Geocoder;
use crate::rate_limiter::RateLimiter;
use crate::record::Record;
use crate::sink::RecordSink;
use crate::stages::{
    CompoundFieldSplitStage, EnrichmentOutcome, FieldTrimStage, GeoEnrichStage, RecordContext,
    RequiredFieldsStage, Stage, StageOutcome,
};

/// Final state of one record
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Every stage forwarded and the record was committed
    Accepted,
    /// A stage rejected the record
    Halted { stage: String, reason: String },
    /// A stage could not process the record
    Failed(StageError),
    /// Every stage forwarded but the sink refused the record
    CommitFailed(DocflowError),
}

#[derive(Debug)]
pub struct ProcessReport {
    pub record_id: String,
    pub outcome: ProcessOutcome,
    pub enrichment: Option<EnrichmentOutcome>,
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    sink: Arc<dyn RecordSink>,
}

impl Pipeline {
    /// An empty chain: every record goes straight to `sink`
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self {
            stages: Vec::new(),
            sink,
        }
    }

    /// Append a stage to the end of the chain
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Assemble the standard chain
    ///
    /// Order: compound split, trim, required fields (if any), geocoding
    /// (if enabled). Splitting comes first so later stages see `year` and
    /// `language`; trimming precedes anything that matches on values.
    pub fn from_config(
        config: &IngestConfig,
        geocoder: Arc<dyn Geocoder>,
        limiter: Arc<RateLimiter>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let mut pipeline = Self::new(sink)
            .with_stage(CompoundFieldSplitStage::from_config(&config.compound))
            .with_stage(FieldTrimStage::from_config(&config.trim));

        if let Some(filter) = RequiredFieldsStage::from_config(&config.filter) {
            pipeline = pipeline.with_stage(filter);
        }

        if config.geo.enabled {
            pipeline = pipeline.with_stage(GeoEnrichStage::new(geocoder, limiter, &config.geo));
        }

        pipeline
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run one record through the chain and commit it if accepted
    ///
    /// Every outcome, a sink refusal included, lands in the report. One
    /// record never fails the caller.
    pub async fn process(&self, mut record: Record) -> ProcessReport {
        let record_id = record.identifier();
        let mut ctx = RecordContext::default();

        for stage in &self.stages {
            let outcome = match stage.process(&mut record, &mut ctx).await {
                Ok(StageOutcome::Forward) => continue,
                Ok(StageOutcome::Halt { reason }) => {
                    debug!(record_id = %record_id, stage = stage.name(), reason = %reason, "Record halted");
                    ProcessOutcome::Halted {
                        stage: stage.name().to_string(),
                        reason,
                    }
                },
                Err(err) => ProcessOutcome::Failed(err),
            };

            return ProcessReport {
                record_id,
                outcome,
                enrichment: ctx.enrichment,
            };
        }

        let outcome = match self.sink.commit(record).await {
            Ok(()) => ProcessOutcome::Accepted,
            Err(err) => {
                warn!(record_id = %record_id, error = %err, "Sink refused record");
                ProcessOutcome::CommitFailed(err)
            },
        };

        ProcessReport {
            record_id,
            outcome,
            enrichment: ctx.enrichment,
        }
    }
}
