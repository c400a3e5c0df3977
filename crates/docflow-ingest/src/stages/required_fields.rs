use async_trait::async_trait;
use tracing::debug;

use super::{RecordContext, Stage, StageOutcome};
use crate::config::FilterConfig;
use crate::error::StageError;
use crate::record::{FieldValue, Record};

/// Rejects records lacking any required field
///
/// A field holding only blank text counts as missing.
#[derive(Debug, Clone)]
pub struct RequiredFieldsStage {
    fields: Vec<String>,
}

impl RequiredFieldsStage {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// `None` when nothing is required
    pub fn from_config(config: &FilterConfig) -> Option<Self> {
        if config.required_fields.is_empty() {
            None
        } else {
            Some(Self::new(config.required_fields.clone()))
        }
    }

    fn first_missing<'a>(&'a self, record: &Record) -> Option<&'a str> {
        self.fields
            .iter()
            .find(|name| !has_value(record.get(name)))
            .map(String::as_str)
    }
}

fn has_value(value: Option<&FieldValue>) -> bool {
    match value {
        None => false,
        Some(value) => value
            .values()
            .iter()
            .any(|v| v.as_str().map_or(true, |s| !s.trim().is_empty())),
    }
}

#[async_trait]
impl Stage for RequiredFieldsStage {
    fn name(&self) -> &str {
        "required_fields"
    }

    async fn process(
        &self,
        record: &mut Record,
        _ctx: &mut RecordContext,
    ) -> Result<StageOutcome, StageError> {
        match self.first_missing(record) {
            None => Ok(StageOutcome::Forward),
            Some(field) => {
                debug!(record_id = %record.identifier(), field = %field, "Required field missing");
                Ok(StageOutcome::halt(format!("missing required field '{field}'")))
            },
        }
    }
}
