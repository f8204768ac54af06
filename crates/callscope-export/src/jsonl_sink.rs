//! JSONL file sink

use crate::sink::{ExportResult, PayloadSink};
use async_trait::async_trait;
use callscope_core::ExportPayload;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Appends one JSON payload per line to a single file
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> ExportResult<tokio::fs::File> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(file)
    }
}

#[async_trait]
impl PayloadSink for JsonlSink {
    async fn export(&self, batch: &[ExportPayload]) -> ExportResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // Serialize everything first so a bad payload never leaves a partial batch
        let mut buffer = Vec::new();
        for payload in batch {
            serde_json::to_writer(&mut buffer, payload)?;
            buffer.push(b'\n');
        }

        let mut file = self.open().await?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}
