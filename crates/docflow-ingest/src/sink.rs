//! Where accepted records go
//!
//! The pipeline hands a record to its [`RecordSink`] only after every stage
//! forwarded it.

use async_trait::async_trait;
use docflow_common::Result;
use serde_jsonlines::AsyncJsonLinesWriter;
use std::path::Path;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

use crate::record::Record;

/// The committing collaborator
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn commit(&self, record: Record) -> Result<()>;
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writes each record as one JSON object per line
pub struct JsonLinesSink {
    writer: Mutex<AsyncJsonLinesWriter<BoxedWriter>>,
}

impl JsonLinesSink {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: BoxedWriter = Box::new(writer);
        Self {
            writer: Mutex::new(AsyncJsonLinesWriter::new(writer)),
        }
    }

    /// Create (or truncate) a file and write to it
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self::new(file))
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn commit(&self, record: Record) -> Result<()> {
        // one lock per record keeps lines whole under concurrent commits
        let mut writer = self.writer.lock().await;
        writer.write(&record).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Keeps committed records in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything committed so far, in commit order
    pub async fn records(&self) -> Vec<Record> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn commit(&self, record: Record) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}
