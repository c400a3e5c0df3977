//! Docflow Ingest Library
//!
//! Loads fixed-width bibliographic flat files, cleans and enriches each
//! record, and hands accepted records to a sink.
//!
//! # Flow
//!
//! ```text
//! lines -> FixedWidthRecordParser -> Pipeline [stages...] -> RecordSink
//!                                        |
//!                          GeoEnrichStage -> RateLimiter -> Geocoder
//! ```
//!
//! # Example
//!
//! ```no_run
//! use docflow_ingest::{
//!     GeoEnrichmentClient, IngestConfig, IngestionRunner, JsonLinesSink, Pipeline, RateLimiter,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load(None)?;
//!     let geocoder = Arc::new(GeoEnrichmentClient::from_config(&config.geo)?);
//!     let limiter = Arc::new(RateLimiter::new(config.geo.min_interval()));
//!     let sink = Arc::new(JsonLinesSink::create("./records.jsonl").await?);
//!
//!     let pipeline = Pipeline::from_config(&config, geocoder, limiter, sink);
//!     let summary = IngestionRunner::from_config(&config, pipeline)
//!         .run_file("./data/books.dat")
//!         .await?;
//!     println!("accepted {} records", summary.accepted);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod geo;
pub mod parser;
pub mod pipeline;
pub mod rate_limiter;
pub mod record;
pub mod runner;
pub mod sink;
pub mod stages;

pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use geo::{Coordinates, GeoEnrichmentClient, Geocoder};
pub use parser::{FixedWidthRecordParser, ParsedLine};
pub use pipeline::{Pipeline, ProcessOutcome, ProcessReport};
pub use rate_limiter::RateLimiter;
pub use record::{FieldValue, Record, Scalar};
pub use runner::{IngestionRunner, IngestionSummary};
pub use sink::{JsonLinesSink, MemorySink, RecordSink};
