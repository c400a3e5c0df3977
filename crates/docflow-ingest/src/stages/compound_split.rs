use async_trait::async_trait;
use tracing::debug;

use super::{RecordContext, Stage, StageOutcome};
use crate::config::{CompoundConfig, DerivedField};
use crate::error::StageError;
use crate::record::{FieldValue, Record};

/// Splits a fixed-layout compound field into derived fields
///
/// Each derived field is taken only when the compound value is long enough
/// to contain its whole range. The compound field itself is always removed.
#[derive(Debug, Clone)]
pub struct CompoundFieldSplitStage {
    field: String,
    derived: Vec<DerivedField>,
}

impl CompoundFieldSplitStage {
    pub fn new(field: impl Into<String>, derived: Vec<DerivedField>) -> Self {
        Self {
            field: field.into(),
            derived,
        }
    }

    pub fn from_config(config: &CompoundConfig) -> Self {
        Self::new(config.field.clone(), config.derived.clone())
    }

    fn split(&self, record: &mut Record) {
        let Some(value) = record.remove_field(&self.field) else {
            return;
        };

        let compound = match &value {
            FieldValue::Single(scalar) => scalar.to_string(),
            FieldValue::Multi(values) => match values.first() {
                Some(first) => first.to_string(),
                None => return,
            },
        };

        for derived in &self.derived {
            match char_range(&compound, derived.start, derived.end) {
                Some(part) => record.set_field(derived.name.as_str(), part),
                None => debug!(
                    record_id = %record.identifier(),
                    field = %derived.name,
                    length = compound.chars().count(),
                    "Compound value too short for derived field"
                ),
            }
        }
    }
}

/// Characters `[start, end)`, or `None` if `s` is shorter than `end`
fn char_range(s: &str, start: usize, end: usize) -> Option<&str> {
    let mut indices = s.char_indices().map(|(i, _)| i).chain(std::iter::once(s.len()));
    let from = indices.nth(start)?;
    let to = match end.checked_sub(start)? {
        0 => from,
        width => indices.nth(width - 1)?,
    };
    Some(&s[from..to])
}

#[async_trait]
impl Stage for CompoundFieldSplitStage {
    fn name(&self) -> &str {
        "compound_split"
    }

    async fn process(
        &self,
        record: &mut Record,
        _ctx: &mut RecordContext,
    ) -> Result<StageOutcome, StageError> {
        self.split(record);
        Ok(StageOutcome::Forward)
    }
}
