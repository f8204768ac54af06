//! Payload sink trait and in-process sinks

use crate::http_sink::{HttpSink, HttpSinkConfig};
use crate::jsonl_sink::JsonlSink;
use async_trait::async_trait;
use callscope_core::{ExportPayload, SinkConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Collector returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Export timed out after {0:?}")]
    Timeout(Duration),

    #[error("Sink panicked")]
    Panicked,

    #[error("Invalid sink configuration: {0}")]
    Config(String),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Destination for exported payloads
#[async_trait]
pub trait PayloadSink: Send + Sync {
    /// Deliver one batch
    async fn export(&self, batch: &[ExportPayload]) -> ExportResult<()>;

    /// Flush anything the sink buffers internally
    async fn flush(&self) -> ExportResult<()> {
        Ok(())
    }

    /// Release resources; no further batches follow
    async fn shutdown(&self) -> ExportResult<()> {
        Ok(())
    }

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Keeps every delivered payload in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    payloads: Mutex<Vec<ExportPayload>>,
    batches: Mutex<Vec<usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all delivered payloads, in delivery order
    pub fn payloads(&self) -> Vec<ExportPayload> {
        self.payloads
            .lock()
            .map(|payloads| payloads.clone())
            .unwrap_or_default()
    }

    /// Size of each delivered batch
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.payloads.lock().map(|p| p.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything delivered so far
    pub fn take(&self) -> Vec<ExportPayload> {
        self.payloads
            .lock()
            .map(|mut payloads| std::mem::take(&mut *payloads))
            .unwrap_or_default()
    }
}

#[async_trait]
impl PayloadSink for MemorySink {
    async fn export(&self, batch: &[ExportPayload]) -> ExportResult<()> {
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.extend_from_slice(batch);
        }
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(batch.len());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Accepts and drops every batch
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

#[async_trait]
impl PayloadSink for DiscardSink {
    async fn export(&self, batch: &[ExportPayload]) -> ExportResult<()> {
        tracing::trace!(count = batch.len(), "Discarding exported payloads");
        Ok(())
    }

    fn name(&self) -> &str {
        "discard"
    }
}

/// Build the sink described by configuration
pub fn sink_from_config(config: &SinkConfig) -> ExportResult<Arc<dyn PayloadSink>> {
    config
        .validate()
        .map_err(|e| ExportError::Config(e.to_string()))?;

    let sink: Arc<dyn PayloadSink> = match config {
        SinkConfig::Discard => Arc::new(DiscardSink),
        SinkConfig::Jsonl { path } => {
            let expanded = shellexpand::tilde(path);
            Arc::new(JsonlSink::new(expanded.as_ref()))
        }
        SinkConfig::Http {
            endpoint,
            headers,
            timeout_ms,
        } => Arc::new(HttpSink::new(HttpSinkConfig {
            endpoint: endpoint.clone(),
            headers: headers.clone(),
            timeout: Duration::from_millis(*timeout_ms),
        })?),
    };

    tracing::debug!(sink = sink.name(), "Export sink created");
    Ok(sink)
}
