use async_trait::async_trait;
use tracing::trace;

use super::{RecordContext, Stage, StageOutcome};
use crate::config::TrimConfig;
use crate::error::StageError;
use crate::record::Record;

/// Strips one trailing marker character (default `_`) from target fields
#[derive(Debug, Clone)]
pub struct FieldTrimStage {
    fields: Vec<String>,
    marker: char,
}

impl FieldTrimStage {
    pub fn new(fields: Vec<String>, marker: char) -> Self {
        Self { fields, marker }
    }

    pub fn from_config(config: &TrimConfig) -> Self {
        Self::new(config.fields.clone(), config.marker)
    }

    fn trim_record(&self, record: &mut Record) {
        for field in &self.fields {
            let trimmed = match record
                .get_str(field)
                .and_then(|value| value.strip_suffix(self.marker))
            {
                Some(trimmed) => trimmed.to_string(),
                None => continue,
            };
            trace!(field = %field, "Removing trailing marker");
            record.set_field(field.as_str(), trimmed);
        }
    }
}

#[async_trait]
impl Stage for FieldTrimStage {
    fn name(&self) -> &str {
        "field_trim"
    }

    async fn process(
        &self,
        record: &mut Record,
        _ctx: &mut RecordContext,
    ) -> Result<StageOutcome, StageError> {
        self.trim_record(record);
        Ok(StageOutcome::Forward)
    }
}
