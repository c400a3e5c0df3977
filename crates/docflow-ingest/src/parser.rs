//! Fixed-width flat-file parser
//!
//! Every input line must be exactly `line_width` characters long. Lines of
//! any other length produce no record; they are reported as
//! [`ParsedLine::Skipped`] so the caller can count them or, under a strict
//! policy, stop.
//!
//! # Format
//! ```text
//! 00000001ISBN-1234    A Sample Title ...        Author Name ...
//! |id    ||isbn       ||title (44 chars)        ||author (to end)
//! ```
//!
//! Column offsets count characters, not bytes, so accented titles slice the
//! same way as plain ASCII ones. Bytes that are not valid UTF-8 are replaced
//! with U+FFFD, one character per bad sequence, so a Latin-1 line keeps its
//! width and only that line is affected.

use futures::{Stream, StreamExt};
use std::borrow::Cow;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, warn};

use crate::config::{IngestConfig, ParserConfig};
use crate::record::Record;

/// Outcome of parsing one input line
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Record { line_number: usize, record: Record },
    Skipped { line_number: usize, length: usize },
}

/// Turns fixed-width lines into records
///
/// Holds no state between lines, so parsing the same input twice yields the
/// same sequence.
#[derive(Debug, Clone)]
pub struct FixedWidthRecordParser {
    layout: ParserConfig,
    positional: Option<String>,
}

impl FixedWidthRecordParser {
    pub fn new(layout: ParserConfig) -> Self {
        Self {
            layout,
            positional: None,
        }
    }

    /// Parser for the configured layout, keeping the compound field positional
    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.parser.clone()).with_positional_field(config.compound.field.clone())
    }

    /// Only trailing padding is trimmed from `name`
    ///
    /// Sub-fields are cut from a positional value by offset, so its leading
    /// blanks must stay.
    pub fn with_positional_field(mut self, name: impl Into<String>) -> Self {
        self.positional = Some(name.into());
        self
    }

    pub fn line_width(&self) -> usize {
        self.layout.line_width
    }

    /// Parse a single line, or `None` if its length does not match the layout
    pub fn parse_line(&self, line: &str) -> Option<Record> {
        let mut offsets: Vec<usize> = line.char_indices().map(|(i, _)| i).collect();
        let length = offsets.len();
        if length != self.layout.line_width {
            return None;
        }
        offsets.push(line.len());

        let mut record = Record::new();
        for field in &self.layout.fields {
            let end = field.end.unwrap_or(length).min(length);
            let start = field.start.min(end);
            let raw = &line[offsets[start]..offsets[end]];
            let value = match (field.trim, self.positional.as_deref()) {
                (false, _) => raw,
                (true, Some(positional)) if positional == field.name => raw.trim_end(),
                (true, _) => raw.trim(),
            };
            record.set_field(field.name.as_str(), value);
        }

        Some(record)
    }

    /// Parse one numbered line (numbering starts at 1)
    pub fn classify(&self, line_number: usize, line: &str) -> ParsedLine {
        match self.parse_line(line) {
            Some(record) => ParsedLine::Record {
                line_number,
                record,
            },
            None => {
                let length = line.chars().count();
                debug!(
                    line_number,
                    length,
                    expected = self.layout.line_width,
                    "Skipping line with unexpected length"
                );
                ParsedLine::Skipped {
                    line_number,
                    length,
                }
            },
        }
    }

    /// Parse in-memory content line by line
    pub fn parse_str<'a>(&'a self, content: &'a str) -> impl Iterator<Item = ParsedLine> + 'a {
        content
            .lines()
            .enumerate()
            .map(move |(index, line)| self.classify(index + 1, line))
    }

    /// Parse one raw line, without its `\n`
    pub fn classify_bytes(&self, line_number: usize, bytes: &[u8]) -> ParsedLine {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        let line = String::from_utf8_lossy(bytes);
        if let Cow::Owned(_) = line {
            warn!(line_number, "Line is not valid UTF-8, bad bytes replaced");
        }
        self.classify(line_number, &line)
    }

    /// Lazily parse an async line source
    ///
    /// Only I/O errors are passed through; the stream ends with the input.
    pub fn records<'a, R>(
        &'a self,
        reader: R,
    ) -> impl Stream<Item = std::io::Result<ParsedLine>> + 'a
    where
        R: AsyncBufRead + Unpin + 'a,
    {
        SplitStream::new(reader.split(b'\n'))
            .enumerate()
            .map(move |(index, line)| line.map(|bytes| self.classify_bytes(index + 1, &bytes)))
    }
}
