//! Error types for the ingestion pipeline
//!
//! Only [`IngestError`] ever stops a run. Everything else is contained per
//! record by the stage or the runner and turned into a warning plus a
//! counter in the run summary.

use docflow_common::DocflowError;
use thiserror::Error;

/// Result type alias for run-level operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Why a geocoding lookup failed
#[derive(Error, Debug)]
pub enum GeoErrorKind {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("service reported status {0}")]
    ServiceStatus(String),
}

/// A lookup for one record could not produce coordinates
#[derive(Error, Debug)]
#[error("Unable to resolve geolocation data for record {identifier}: {kind}")]
pub struct GeoResolutionFailure {
    pub identifier: String,
    #[source]
    pub kind: GeoErrorKind,
}

impl GeoResolutionFailure {
    pub fn new(identifier: impl Into<String>, kind: impl Into<GeoErrorKind>) -> Self {
        Self {
            identifier: identifier.into(),
            kind: kind.into(),
        }
    }
}

/// A stage could not finish its work on a record
#[derive(Error, Debug)]
#[error("Stage '{stage}' failed on record {record_id}: {cause}")]
pub struct StageError {
    pub stage: String,
    pub record_id: String,
    #[source]
    pub cause: Box<dyn std::error::Error + Send + Sync>,
}

impl StageError {
    pub fn new(
        stage: impl Into<String>,
        record_id: impl Into<String>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            stage: stage.into(),
            record_id: record_id.into(),
            cause: cause.into(),
        }
    }
}

/// Errors that abort an ingestion run
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to open input '{path}': {source}")]
    OpenInput {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read input: {0}")]
    ReadInput(#[from] std::io::Error),

    #[error("Malformed line {line_number}: expected {expected} characters, got {actual}")]
    MalformedLine {
        line_number: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Output error: {0}")]
    Output(#[source] DocflowError),

    #[error("Failed to build geocoding client: {0}")]
    Client(#[source] reqwest::Error),
}

impl From<DocflowError> for IngestError {
    fn from(err: DocflowError) -> Self {
        match err {
            DocflowError::Config(msg) | DocflowError::Parse(msg) => IngestError::Config(msg),
            other => IngestError::Output(other),
        }
    }
}
