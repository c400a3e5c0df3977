//! Ingestion configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML file, then `DOCFLOW_*` environment variables (`__` separates
//! sections, e.g. `DOCFLOW_GEO__MIN_INTERVAL_MS=0`).
//!
//! ```toml
//! [parser]
//! line_width = 107
//! malformed_lines = "skip"
//!
//! [[parser.fields]]
//! name = "id"
//! start = 0
//! end = 8
//!
//! [geo]
//! endpoint = "http://maps.googleapis.com/maps/api/geocode/xml?sensor=false"
//! min_interval_ms = 1000
//! ```

use docflow_common::{DocflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Width of one input line in the bibliographic flat-file layout.
pub const DEFAULT_LINE_WIDTH: usize = 107;

/// Compound MARC-style field split into `year` and `language`.
pub const DEFAULT_COMPOUND_FIELD: &str = "fixed_length_general_information";

/// Google Geocoding XML endpoint; the address is appended as a query parameter.
pub const DEFAULT_GEOCODING_ENDPOINT: &str =
    "http://maps.googleapis.com/maps/api/geocode/xml?sensor=false";

/// Spacing between geocoding requests, as the public Google endpoint requires.
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 1000;

pub const DEFAULT_GEOCODING_TIMEOUT_SECS: u64 = 10;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "DOCFLOW";

// ============================================================================
// Sections
// ============================================================================

/// Complete configuration for one ingestion pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub parser: ParserConfig,
    pub trim: TrimConfig,
    pub compound: CompoundConfig,
    pub geo: GeoConfig,
    pub filter: FilterConfig,
    pub runner: RunnerConfig,
}

/// What to do with a line whose length does not match the layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MalformedLinePolicy {
    /// Drop the line, count it, keep going
    #[default]
    Skip,
    /// Abort the run
    Fail,
}

/// What to do with a record whose geocoding lookup failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentFailurePolicy {
    /// Forward the record without coordinates
    #[default]
    Forward,
    /// Reject the record
    Halt,
}

/// One fixed-width column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// First character of the column
    pub start: usize,
    /// One past the last character; `None` runs to the end of the line
    #[serde(default)]
    pub end: Option<usize>,
    #[serde(default = "default_true")]
    pub trim: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, start: usize, end: Option<usize>) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            trim: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Fixed-width line layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub line_width: usize,
    pub fields: Vec<FieldSpec>,
    pub malformed_lines: MalformedLinePolicy,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            line_width: DEFAULT_LINE_WIDTH,
            fields: vec![
                FieldSpec::new("id", 0, Some(8)),
                FieldSpec::new("isbn", 8, Some(21)),
                FieldSpec::new("title", 21, Some(65)),
                FieldSpec::new("author", 65, None),
            ],
            malformed_lines: MalformedLinePolicy::Skip,
        }
    }
}

/// Trailing marker removal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    pub fields: Vec<String>,
    pub marker: char,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            fields: vec!["title".to_string(), "author".to_string()],
            marker: '_',
        }
    }
}

/// A sub-field cut out of the compound value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedField {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

impl DerivedField {
    pub fn new(name: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }
}

/// Compound field splitting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompoundConfig {
    pub field: String,
    pub derived: Vec<DerivedField>,
}

impl Default for CompoundConfig {
    fn default() -> Self {
        Self {
            field: DEFAULT_COMPOUND_FIELD.to_string(),
            derived: vec![
                DerivedField::new("year", 0, 4),
                DerivedField::new("language", 36, 39),
            ],
        }
    }
}

/// Geocoding enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub address_field: String,
    pub coordinates_field: String,
    /// Minimum spacing between outbound lookups; 0 disables throttling
    pub min_interval_ms: u64,
    pub timeout_secs: u64,
    pub on_failure: EnrichmentFailurePolicy,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_GEOCODING_ENDPOINT.to_string(),
            address_field: "address".to_string(),
            coordinates_field: "coordinates".to_string(),
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            timeout_secs: DEFAULT_GEOCODING_TIMEOUT_SECS,
            on_failure: EnrichmentFailurePolicy::Forward,
        }
    }
}

impl GeoConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Record rejection rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Records missing any of these fields are rejected
    pub required_fields: Vec<String>,
}

/// Runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Records processed at the same time
    pub concurrency: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl IngestConfig {
    /// Load defaults, an optional TOML file and `DOCFLOW_*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("trim.fields")
                .with_list_parse_key("filter.required_fields"),
        );

        Self::finish(builder)
    }

    /// Load from TOML text, without environment overrides
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml));
        Self::finish(builder)
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: IngestConfig = builder
            .build()
            .map_err(|e| DocflowError::config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| DocflowError::parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_parser()?;

        for derived in &self.compound.derived {
            if derived.name.is_empty() {
                return Err(DocflowError::config("compound.derived name cannot be empty"));
            }
            if derived.start >= derived.end {
                return Err(DocflowError::config(format!(
                    "compound.derived '{}' has an empty range [{}, {})",
                    derived.name, derived.start, derived.end
                )));
            }
        }

        if self.geo.enabled {
            if self.geo.endpoint.trim().is_empty() {
                return Err(DocflowError::config("geo.endpoint cannot be empty"));
            }
            reqwest::Url::parse(&self.geo.endpoint).map_err(|e| {
                DocflowError::config(format!("geo.endpoint '{}' is not a URL: {e}", self.geo.endpoint))
            })?;
            if self.geo.timeout_secs == 0 {
                return Err(DocflowError::config("geo.timeout_secs must be greater than 0"));
            }
            if self.geo.address_field.is_empty() || self.geo.coordinates_field.is_empty() {
                return Err(DocflowError::config(
                    "geo.address_field and geo.coordinates_field cannot be empty",
                ));
            }
        }

        if self.runner.concurrency == 0 {
            return Err(DocflowError::config("runner.concurrency must be greater than 0"));
        }

        Ok(())
    }

    fn validate_parser(&self) -> Result<()> {
        let parser = &self.parser;
        if parser.line_width == 0 {
            return Err(DocflowError::config("parser.line_width must be greater than 0"));
        }
        if parser.fields.is_empty() {
            return Err(DocflowError::config("parser.fields cannot be empty"));
        }

        let mut seen = HashSet::new();
        for field in &parser.fields {
            if field.name.is_empty() {
                return Err(DocflowError::config("parser field name cannot be empty"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(DocflowError::config(format!(
                    "parser field '{}' is declared twice",
                    field.name
                )));
            }
            let end = field.end.unwrap_or(parser.line_width);
            if field.start >= end || end > parser.line_width {
                return Err(DocflowError::config(format!(
                    "parser field '{}' range [{}, {}) does not fit a {}-character line",
                    field.name, field.start, end, parser.line_width
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IngestConfig::default();
        config.validate().unwrap();

        assert_eq!(config.parser.line_width, 107);
        assert_eq!(config.parser.fields.len(), 4);
        assert_eq!(config.compound.field, DEFAULT_COMPOUND_FIELD);
        assert_eq!(config.geo.min_interval(), Duration::from_millis(1000));
        assert_eq!(config.runner.concurrency, 1);
    }

    #[test]
    fn test_from_toml_overrides_sections() {
        let config = IngestConfig::from_toml_str(
            r#"
            [parser]
            line_width = 20
            malformed_lines = "fail"

            [[parser.fields]]
            name = "id"
            start = 0
            end = 4

            [[parser.fields]]
            name = "name"
            start = 4

            [trim]
            fields = ["name"]
            marker = "~"

            [geo]
            enabled = false
            on_failure = "halt"

            [runner]
            concurrency = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.parser.line_width, 20);
        assert_eq!(config.parser.malformed_lines, MalformedLinePolicy::Fail);
        assert_eq!(config.parser.fields[1], FieldSpec::new("name", 4, None));
        assert_eq!(config.trim.marker, '~');
        assert!(!config.geo.enabled);
        assert_eq!(config.geo.on_failure, EnrichmentFailurePolicy::Halt);
        assert_eq!(config.runner.concurrency, 4);
        // untouched sections keep their defaults
        assert_eq!(config.compound.derived.len(), 2);
    }

    #[test]
    fn test_rejects_field_past_line_width() {
        let mut config = IngestConfig::default();
        config.parser.fields.push(FieldSpec::new("extra", 100, Some(120)));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_fields() {
        let mut config = IngestConfig::default();
        config.parser.fields.push(FieldSpec::new("id", 0, Some(8)));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_endpoint_only_when_enabled() {
        let mut config = IngestConfig::default();
        config.geo.endpoint = "not a url".to_string();
        assert!(config.validate().is_err());

        config.geo.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut config = IngestConfig::default();
        config.runner.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wrong_value_type_is_a_parse_error() {
        let err = IngestConfig::from_toml_str("[runner]\nconcurrency = \"many\"\n").unwrap_err();
        assert!(matches!(err, DocflowError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docflow.toml");
        std::fs::write(&path, "[compound]\nfield = \"marc_008\"\n").unwrap();

        let config = IngestConfig::load(Some(&path)).unwrap();
        assert_eq!(config.compound.field, "marc_008");
    }
}
