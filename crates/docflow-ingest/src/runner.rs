//! Drives parsed lines through the pipeline and tallies the results
//!
//! Per-record problems, sink refusals included, become warnings and
//! counters. A run only fails when the input cannot be opened or read, or
//! when a malformed line is met under [`MalformedLinePolicy::Fail`].

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{IngestConfig, MalformedLinePolicy};
use crate::error::{IngestError, Result};
use crate::parser::{FixedWidthRecordParser, ParsedLine};
use crate::pipeline::{Pipeline, ProcessOutcome, ProcessReport};
use crate::stages::EnrichmentOutcome;

/// Counts reported at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lines_read: u64,
    /// Lines of the wrong width
    pub skipped_lines: u64,
    pub accepted: u64,
    /// Halted by a stage
    pub rejected: u64,
    /// Dropped because a stage errored
    pub failed: u64,
    /// Accepted by every stage but refused by the sink
    pub commit_failed: u64,
    pub enriched: u64,
    pub enrichment_empty: u64,
    pub enrichment_failed: u64,
    pub cancelled: bool,
}

impl IngestionSummary {
    fn start(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            lines_read: 0,
            skipped_lines: 0,
            accepted: 0,
            rejected: 0,
            failed: 0,
            commit_failed: 0,
            enriched: 0,
            enrichment_empty: 0,
            enrichment_failed: 0,
            cancelled: false,
        }
    }

    fn record(&mut self, report: ProcessReport) {
        match report.enrichment {
            Some(EnrichmentOutcome::Enriched) => self.enriched += 1,
            Some(EnrichmentOutcome::Empty) => self.enrichment_empty += 1,
            Some(EnrichmentOutcome::Failed) => self.enrichment_failed += 1,
            None => {},
        }

        match report.outcome {
            ProcessOutcome::Accepted => self.accepted += 1,
            ProcessOutcome::Halted { .. } => self.rejected += 1,
            ProcessOutcome::Failed(err) => {
                warn!(record_id = %report.record_id, error = %err, "Record dropped after stage failure");
                self.failed += 1;
            },
            ProcessOutcome::CommitFailed(_) => self.commit_failed += 1,
        }
    }

    /// Records that went through the pipeline
    pub fn processed(&self) -> u64 {
        self.accepted + self.rejected + self.failed + self.commit_failed
    }
}

/// What one input line turned into
enum LineResult {
    Skipped,
    Processed(ProcessReport),
}

pub struct IngestionRunner {
    parser: FixedWidthRecordParser,
    pipeline: Pipeline,
    concurrency: usize,
    malformed_lines: MalformedLinePolicy,
    cancel: CancellationToken,
}

impl IngestionRunner {
    pub fn new(parser: FixedWidthRecordParser, pipeline: Pipeline) -> Self {
        Self {
            parser,
            pipeline,
            concurrency: 1,
            malformed_lines: MalformedLinePolicy::Skip,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &IngestConfig, pipeline: Pipeline) -> Self {
        Self::new(FixedWidthRecordParser::from_config(config), pipeline)
            .with_concurrency(config.runner.concurrency)
            .with_malformed_line_policy(config.parser.malformed_lines)
    }

    /// Records processed at the same time (at least one)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_malformed_line_policy(mut self, policy: MalformedLinePolicy) -> Self {
        self.malformed_lines = policy;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the run; no new lines are read once cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ingest a file
    pub async fn run_file(&self, path: impl AsRef<Path>) -> Result<IngestionSummary> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| IngestError::OpenInput {
                path: path.display().to_string(),
                source,
            })?;

        self.run(BufReader::new(file)).await
    }

    /// Ingest every line of `reader`
    pub async fn run<R>(&self, reader: R) -> Result<IngestionSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingestion_run", run_id = %run_id);

        self.run_inner(run_id, reader).instrument(span).await
    }

    async fn run_inner<R>(&self, run_id: Uuid, reader: R) -> Result<IngestionSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = IngestionSummary::start(run_id);
        info!(
            concurrency = self.concurrency,
            line_width = self.parser.line_width(),
            "Starting ingestion run"
        );

        let pipeline = &self.pipeline;
        let policy = self.malformed_lines;
        let expected = self.parser.line_width();
        let dispatched = AtomicU64::new(0);

        let results = self
            .parser
            .records(reader)
            .take_until(self.cancel.cancelled())
            .map(|line| {
                dispatched.fetch_add(1, Ordering::Relaxed);
                async move {
                    match line {
                        Err(err) => Err(IngestError::ReadInput(err)),
                        Ok(ParsedLine::Record { record, .. }) => {
                            Ok(LineResult::Processed(pipeline.process(record).await))
                        },
                        Ok(ParsedLine::Skipped {
                            line_number,
                            length,
                        }) => match policy {
                            MalformedLinePolicy::Skip => Ok(LineResult::Skipped),
                            MalformedLinePolicy::Fail => Err(IngestError::MalformedLine {
                                line_number,
                                expected,
                                actual: length,
                            }),
                        },
                    }
                }
            })
            .buffer_unordered(self.concurrency);
        futures::pin_mut!(results);

        while let Some(result) = results.next().await {
            summary.lines_read += 1;
            match result {
                Ok(LineResult::Skipped) => summary.skipped_lines += 1,
                Ok(LineResult::Processed(report)) => summary.record(report),
                Err(err) => {
                    let abandoned = dispatched
                        .load(Ordering::Relaxed)
                        .saturating_sub(summary.lines_read);
                    error!(
                        error = %err,
                        lines_read = summary.lines_read,
                        abandoned,
                        "Ingestion run aborted, in-flight records dropped uncommitted"
                    );
                    return Err(err);
                },
            }
        }

        summary.cancelled = self.cancel.is_cancelled();
        summary.finished_at = Some(Utc::now());

        if summary.skipped_lines > 0 {
            warn!(skipped = summary.skipped_lines, "Input contained lines of unexpected width");
        }
        info!(
            lines_read = summary.lines_read,
            accepted = summary.accepted,
            rejected = summary.rejected,
            failed = summary.failed,
            commit_failed = summary.commit_failed,
            enriched = summary.enriched,
            enrichment_failed = summary.enrichment_failed,
            cancelled = summary.cancelled,
            "Ingestion run finished"
        );

        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{EnrichmentFailurePolicy, ParserConfig};
    use crate::error::{GeoErrorKind, GeoResolutionFailure};
    use crate::geo::{Coordinates, Geocoder};
    use crate::rate_limiter::RateLimiter;
    use crate::record::Record;
    use crate::sink::{MemorySink, RecordSink};
    use crate::stages::{RecordContext, Stage, StageOutcome};
    use async_trait::async_trait;
    use docflow_common::DocflowError;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    fn book_line(id: &str, title: &str) -> String {
        format!("{:<8}{:<13}{:<44}{:<42}", id, "ISBN-1", title, "Author")
    }

    fn plain_runner(sink: Arc<MemorySink>) -> IngestionRunner {
        IngestionRunner::new(
            FixedWidthRecordParser::new(ParserConfig::default()),
            Pipeline::new(sink),
        )
    }

    /// Halts records whose title is "reject"
    struct RejectTitle;

    #[async_trait]
    impl Stage for RejectTitle {
        fn name(&self) -> &str {
            "reject_title"
        }

        async fn process(
            &self,
            record: &mut Record,
            _ctx: &mut RecordContext,
        ) -> std::result::Result<StageOutcome, crate::error::StageError> {
            if record.get_str("title") == Some("reject") {
                Ok(StageOutcome::halt("rejected title"))
            } else {
                Ok(StageOutcome::Forward)
            }
        }
    }

    /// Fails for identifiers ending in 9, otherwise answers after a delay
    struct FlakyGeocoder;

    #[async_trait]
    impl Geocoder for FlakyGeocoder {
        async fn resolve(
            &self,
            identifier: &str,
            _address: &str,
        ) -> std::result::Result<Option<Coordinates>, GeoResolutionFailure> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if identifier.ends_with('9') {
                Err(GeoResolutionFailure::new(
                    identifier,
                    GeoErrorKind::ServiceStatus("UNKNOWN_ERROR".to_string()),
                ))
            } else {
                Ok(Some(Coordinates::new("1", "2")))
            }
        }
    }

    /// Refuses one identifier
    struct FlakySink {
        refuse: &'static str,
        inner: MemorySink,
    }

    #[async_trait]
    impl RecordSink for FlakySink {
        async fn commit(&self, record: Record) -> docflow_common::Result<()> {
            if record.identifier() == self.refuse {
                return Err(DocflowError::Network("index rejected document".to_string()));
            }
            self.inner.commit(record).await
        }
    }

    /// Cancels the run on its first lookup, then answers slowly
    struct CancellingGeocoder {
        token: CancellationToken,
    }

    #[async_trait]
    impl Geocoder for CancellingGeocoder {
        async fn resolve(
            &self,
            _identifier: &str,
            _address: &str,
        ) -> std::result::Result<Option<Coordinates>, GeoResolutionFailure> {
            self.token.cancel();
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Some(Coordinates::new("1", "2")))
        }
    }

    /// Holds every record for a while
    struct SlowStage;

    #[async_trait]
    impl Stage for SlowStage {
        fn name(&self) -> &str {
            "slow"
        }

        async fn process(
            &self,
            _record: &mut Record,
            _ctx: &mut RecordContext,
        ) -> std::result::Result<StageOutcome, crate::error::StageError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(StageOutcome::Forward)
        }
    }

    fn geo_config() -> IngestConfig {
        let mut config = IngestConfig::default();
        config.parser.fields.push(crate::config::FieldSpec::new("address", 65, None));
        config.parser.fields.retain(|f| f.name != "author");
        config
    }

    #[tokio::test]
    async fn test_counts_accepted_rejected_and_skipped() {
        let sink = Arc::new(MemorySink::new());
        let runner = IngestionRunner::new(
            FixedWidthRecordParser::new(ParserConfig::default()),
            Pipeline::new(sink.clone()).with_stage(RejectTitle),
        );
        let input = format!(
            "{}\ntoo short\n{}\n{}\n",
            book_line("00000001", "Keep"),
            book_line("00000002", "reject"),
            book_line("00000003", "Keep too"),
        );

        let summary = runner.run(input.as_bytes()).await.unwrap();

        assert_eq!(summary.lines_read, 4);
        assert_eq!(summary.skipped_lines, 1);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.processed(), 3);
        assert!(!summary.cancelled);
        assert!(summary.finished_at.is_some());
        assert_eq!(sink.len().await, 2);
    }

    #[tokio::test]
    async fn test_fail_policy_aborts_on_malformed_line() {
        let sink = Arc::new(MemorySink::new());
        let runner =
            plain_runner(sink).with_malformed_line_policy(MalformedLinePolicy::Fail);
        let input = format!("{}\nbad\n", book_line("00000001", "T"));

        let err = runner.run(input.as_bytes()).await.unwrap_err();

        assert!(matches!(
            err,
            IngestError::MalformedLine {
                line_number: 2,
                expected: 107,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_enrichment_failures_do_not_stop_concurrent_run() {
        let mut config = geo_config();
        config.geo.on_failure = EnrichmentFailurePolicy::Forward;

        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::from_config(
            &config,
            Arc::new(FlakyGeocoder),
            Arc::new(RateLimiter::unlimited()),
            sink.clone(),
        );
        let runner = IngestionRunner::from_config(&config, pipeline).with_concurrency(4);

        let input: String = (1..=10)
            .map(|i| format!("{}\n", book_line(&format!("{i:08}"), "Title")))
            .collect();
        let summary = runner.run(input.as_bytes()).await.unwrap();

        assert_eq!(summary.accepted, 10);
        assert_eq!(summary.enrichment_failed, 1);
        assert_eq!(summary.enriched, 9);
        assert_eq!(sink.len().await, 10);
    }

    #[tokio::test]
    async fn test_halt_policy_counts_failed_records() {
        let mut config = geo_config();
        config.geo.on_failure = EnrichmentFailurePolicy::Halt;

        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::from_config(
            &config,
            Arc::new(FlakyGeocoder),
            Arc::new(RateLimiter::unlimited()),
            sink.clone(),
        );
        let runner = IngestionRunner::from_config(&config, pipeline);

        let input = format!(
            "{}\n{}\n",
            book_line("00000001", "T"),
            book_line("00000009", "T")
        );
        let summary = runner.run(input.as_bytes()).await.unwrap();

        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(sink.records().await[0].identifier(), "00000001");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped_not_fatal() {
        let sink = Arc::new(MemorySink::new());
        let runner = plain_runner(sink.clone());

        let mut input = format!("{}\n", book_line("00000001", "First")).into_bytes();
        input.extend_from_slice(b"\xff\xfe bad latin-1 line\n");
        input.extend_from_slice(format!("{}\n", book_line("00000003", "Third")).as_bytes());

        let summary = runner.run(input.as_slice()).await.unwrap();

        assert_eq!(summary.lines_read, 3);
        assert_eq!(summary.skipped_lines, 1);
        assert_eq!(summary.accepted, 2);
        let ids: Vec<String> = sink.records().await.iter().map(Record::identifier).collect();
        assert_eq!(ids, vec!["00000001", "00000003"]);
    }

    #[tokio::test]
    async fn test_refused_commit_does_not_stop_the_run() {
        let sink = Arc::new(FlakySink {
            refuse: "00000002",
            inner: MemorySink::new(),
        });
        let runner = IngestionRunner::new(
            FixedWidthRecordParser::new(ParserConfig::default()),
            Pipeline::new(sink.clone()),
        );
        let input: String = (1..=3)
            .map(|i| format!("{}\n", book_line(&format!("{i:08}"), "Title")))
            .collect();

        let summary = runner.run(input.as_bytes()).await.unwrap();

        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.commit_failed, 1);
        assert_eq!(summary.processed(), 3);
        let ids: Vec<String> = sink.inner.records().await.iter().map(Record::identifier).collect();
        assert_eq!(ids, vec!["00000001", "00000003"]);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_finishes_in_flight_records() {
        let config = geo_config();
        let token = CancellationToken::new();
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::from_config(
            &config,
            Arc::new(CancellingGeocoder {
                token: token.clone(),
            }),
            Arc::new(RateLimiter::unlimited()),
            sink.clone(),
        );
        let runner = IngestionRunner::from_config(&config, pipeline)
            .with_concurrency(2)
            .with_cancellation(token);

        let input: String = (1..=6)
            .map(|i| format!("{}\n", book_line(&format!("{i:08}"), "Title")))
            .collect();
        let summary = runner.run(input.as_bytes()).await.unwrap();

        assert!(summary.cancelled);
        // the two records already pulled when the token fired
        assert_eq!(summary.lines_read, 2);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.enriched, 2);

        let mut ids: Vec<String> = sink.records().await.iter().map(Record::identifier).collect();
        ids.sort();
        assert_eq!(ids, vec!["00000001", "00000002"]);
        assert!(sink
            .records()
            .await
            .iter()
            .all(|r| r.get_str("coordinates") == Some("1,2")));
    }

    #[tokio::test]
    async fn test_aborted_run_commits_nothing_in_flight() {
        let sink = Arc::new(MemorySink::new());
        let runner = IngestionRunner::new(
            FixedWidthRecordParser::new(ParserConfig::default()),
            Pipeline::new(sink.clone()).with_stage(SlowStage),
        )
        .with_concurrency(3)
        .with_malformed_line_policy(MalformedLinePolicy::Fail);

        let input = format!(
            "{}\nbad\n{}\n",
            book_line("00000001", "T"),
            book_line("00000003", "T")
        );
        let err = runner.run(input.as_bytes()).await.unwrap_err();

        assert!(matches!(err, IngestError::MalformedLine { line_number: 2, .. }));
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancelled_run_reads_nothing_more() {
        let sink = Arc::new(MemorySink::new());
        let runner = plain_runner(sink.clone());
        runner.cancellation_token().cancel();

        let input = format!("{}\n", book_line("00000001", "T"));
        let summary = runner.run(input.as_bytes()).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.lines_read, 0);
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_run_file_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", book_line("00000001", "From disk")).unwrap();

        let sink = Arc::new(MemorySink::new());
        let summary = plain_runner(sink.clone()).run_file(file.path()).await.unwrap();

        assert_eq!(summary.accepted, 1);
        assert_eq!(sink.records().await[0].get_str("title"), Some("From disk"));
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let sink = Arc::new(MemorySink::new());
        let err = plain_runner(sink)
            .run_file("/nonexistent/docflow/input.dat")
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::OpenInput { .. }));
    }

    #[test]
    fn test_summary_serializes() {
        let summary = IngestionSummary::start(Uuid::new_v4());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["accepted"], 0);
        assert_eq!(json["cancelled"], false);
    }
}
