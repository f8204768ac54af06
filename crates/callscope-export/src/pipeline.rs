//! Export pipeline
//!
//! Producers hand payloads over with a non-blocking `try_send`; a single
//! background worker owns the batch buffer and talks to the sinks. Sink
//! failures, timeouts and panics are logged and never reach producers.

use crate::sink::{ExportError, ExportResult, PayloadSink};
use callscope_core::{ExportConfig, ExportMode, ExportPayload};
use callscope_observability::metrics::{DropReason, PipelineMetrics};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Tick used for immediate mode, where every payload flushes on arrival
const IMMEDIATE_TICK: Duration = Duration::from_secs(1);

enum Command {
    Payload(ExportPayload),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Configuration for the export pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: ExportMode,
    /// Bounded queue between producers and the worker
    pub max_queue_size: usize,
    /// Upper bound for a single sink call
    pub export_timeout: Duration,
}

impl PipelineConfig {
    fn batch_limits(&self) -> (usize, Duration) {
        match self.mode {
            ExportMode::Batched {
                max_batch_size,
                batch_timeout_ms,
            } => (
                max_batch_size.max(1),
                Duration::from_millis(batch_timeout_ms.max(1)),
            ),
            ExportMode::Immediate => (1, IMMEDIATE_TICK),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for PipelineConfig {
    fn from(config: &ExportConfig) -> Self {
        Self {
            mode: config.mode,
            max_queue_size: config.max_queue_size.max(1),
            export_timeout: Duration::from_millis(config.export_timeout_ms),
        }
    }
}

/// Non-blocking, batching delivery of payloads to one or more sinks
pub struct ExportPipeline {
    tx: mpsc::Sender<Command>,
    accepting: AtomicBool,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl ExportPipeline {
    /// Create a pipeline delivering to a single sink
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(sink: Arc<dyn PayloadSink>, config: PipelineConfig) -> Self {
        Self::with_sinks(vec![sink], config, None)
    }

    pub fn with_sinks(
        sinks: Vec<Arc<dyn PayloadSink>>,
        config: PipelineConfig,
        metrics: Option<Arc<PipelineMetrics>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.max_queue_size.max(1));

        let worker_metrics = metrics.clone();
        let worker_handle = tokio::spawn(async move {
            Self::worker_loop(rx, sinks, config, worker_metrics).await;
        });

        Self {
            tx,
            accepting: AtomicBool::new(true),
            worker_handle: Mutex::new(Some(worker_handle)),
            metrics,
        }
    }

    /// Enqueue a payload (non-blocking, fire-and-forget)
    ///
    /// Returns false if the payload was dropped because the pipeline is shut
    /// down or its queue is full.
    pub fn submit(&self, payload: ExportPayload) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            tracing::debug!(call_id = %payload.call_id, "Export pipeline shut down, dropping payload");
            self.record_dropped(DropReason::ShutDown);
            return false;
        }

        match self.tx.try_send(Command::Payload(payload)) {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_submitted();
                }
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Export queue full, dropping payload");
                self.record_dropped(DropReason::QueueFull);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("Export worker channel closed");
                self.record_dropped(DropReason::ShutDown);
                false
            }
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Deliver everything enqueued before this call
    ///
    /// Returns false if the worker is no longer running.
    pub async fn force_flush(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(reply_tx)).await.is_err() {
            return false;
        }
        reply_rx.await.is_ok()
    }

    /// Stop accepting payloads, drain the queue, shut the sinks down and wait
    /// for the worker to exit
    ///
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);

        let mut guard = self.worker_handle.lock().await;
        let Some(handle) = guard.take() else {
            return;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }

        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Export worker task failed");
        }
        tracing::info!("Export pipeline shutdown complete");
    }

    fn record_dropped(&self, reason: DropReason) {
        if let Some(metrics) = &self.metrics {
            metrics.record_dropped(reason);
        }
    }

    /// Background worker loop
    async fn worker_loop(
        mut rx: mpsc::Receiver<Command>,
        sinks: Vec<Arc<dyn PayloadSink>>,
        config: PipelineConfig,
        metrics: Option<Arc<PipelineMetrics>>,
    ) {
        let (batch_size, batch_timeout) = config.batch_limits();
        let mut buffer = Vec::with_capacity(batch_size.min(1024));
        let mut interval = tokio::time::interval(batch_timeout);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Payload(payload)) => {
                        buffer.push(payload);

                        // Flush when buffer is full
                        if buffer.len() >= batch_size {
                            Self::flush_buffer(&sinks, &mut buffer, &config, metrics.as_deref()).await;
                        }
                    }
                    Some(Command::Flush(reply)) => {
                        Self::flush_buffer(&sinks, &mut buffer, &config, metrics.as_deref()).await;
                        Self::flush_sinks(&sinks, config.export_timeout).await;
                        let _ = reply.send(());
                    }
                    Some(Command::Shutdown(reply)) => {
                        Self::flush_buffer(&sinks, &mut buffer, &config, metrics.as_deref()).await;
                        Self::flush_sinks(&sinks, config.export_timeout).await;
                        Self::shutdown_sinks(&sinks, config.export_timeout).await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        // Pipeline dropped without shutdown(), flush remaining and exit
                        Self::flush_buffer(&sinks, &mut buffer, &config, metrics.as_deref()).await;
                        Self::shutdown_sinks(&sinks, config.export_timeout).await;
                        break;
                    }
                },
                _ = interval.tick() => {
                    // Periodic flush for low-traffic periods
                    if !buffer.is_empty() {
                        Self::flush_buffer(&sinks, &mut buffer, &config, metrics.as_deref()).await;
                    }
                }
            }
        }

        // Anything that raced past the shutdown flag
        rx.close();
        let mut dropped = 0usize;
        while let Ok(command) = rx.try_recv() {
            if let Command::Payload(_) = command {
                dropped += 1;
                if let Some(metrics) = &metrics {
                    metrics.record_dropped(DropReason::ShutDown);
                }
            }
        }
        if dropped > 0 {
            tracing::warn!(dropped, "Dropped payloads submitted during shutdown");
        }

        tracing::debug!("Export worker loop exited");
    }

    /// Deliver the buffer to every sink
    async fn flush_buffer(
        sinks: &[Arc<dyn PayloadSink>],
        buffer: &mut Vec<ExportPayload>,
        config: &PipelineConfig,
        metrics: Option<&PipelineMetrics>,
    ) {
        if buffer.is_empty() {
            return;
        }

        let batch = std::mem::take(buffer);
        let batch_size = batch.len();

        let deliveries: Vec<_> = sinks
            .iter()
            .map(|sink| deliver(sink.as_ref(), &batch, config.export_timeout))
            .collect();
        let results = futures::future::join_all(deliveries).await;

        // Log any delivery failures but don't propagate
        for (sink, result) in sinks.iter().zip(results) {
            match result {
                Ok(()) => {
                    if let Some(metrics) = metrics {
                        metrics.record_exported(batch_size);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        sink = sink.name(),
                        error = %e,
                        batch_size,
                        "Failed to export payloads"
                    );
                    if let Some(metrics) = metrics {
                        metrics.record_export_failure();
                    }
                }
            }
        }
    }

    async fn flush_sinks(sinks: &[Arc<dyn PayloadSink>], timeout: Duration) {
        for sink in sinks {
            let flush = AssertUnwindSafe(sink.flush()).catch_unwind();
            if let Err(e) = settle(tokio::time::timeout(timeout, flush).await, timeout) {
                tracing::warn!(sink = sink.name(), error = %e, "Sink flush failed");
            }
        }
    }

    async fn shutdown_sinks(sinks: &[Arc<dyn PayloadSink>], timeout: Duration) {
        for sink in sinks {
            let shutdown = AssertUnwindSafe(sink.shutdown()).catch_unwind();
            if let Err(e) = settle(tokio::time::timeout(timeout, shutdown).await, timeout) {
                tracing::warn!(sink = sink.name(), error = %e, "Sink shutdown failed");
            }
        }
    }
}

impl Drop for ExportPipeline {
    fn drop(&mut self) {
        // Worker drains and exits once tx is dropped, but nothing waits for it
        if self.worker_handle.get_mut().is_some() {
            tracing::warn!(
                "ExportPipeline dropped without calling shutdown(). \
                 Worker will exit but pending payloads may not be fully delivered."
            );
        }
    }
}

async fn deliver(
    sink: &dyn PayloadSink,
    batch: &[ExportPayload],
    timeout: Duration,
) -> ExportResult<()> {
    let export = AssertUnwindSafe(sink.export(batch)).catch_unwind();
    settle(tokio::time::timeout(timeout, export).await, timeout)
}

/// Collapse timeout and panic layers into one result
fn settle(
    outcome: Result<Result<ExportResult<()>, Box<dyn std::any::Any + Send>>, tokio::time::error::Elapsed>,
    timeout: Duration,
) -> ExportResult<()> {
    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(ExportError::Panicked),
        Err(_) => Err(ExportError::Timeout(timeout)),
    }
}

/// Builder for ExportPipeline
pub struct PipelineBuilder {
    sinks: Vec<Arc<dyn PayloadSink>>,
    config: PipelineConfig,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            config: PipelineConfig::default(),
            metrics: None,
        }
    }

    pub fn add_sink(mut self, sink: Arc<dyn PayloadSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Take mode, queue size and timeout from configuration
    pub fn config(mut self, config: &ExportConfig) -> Self {
        self.config = PipelineConfig::from(config);
        self
    }

    pub fn mode(mut self, mode: ExportMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config.max_queue_size = size;
        self
    }

    pub fn export_timeout(mut self, timeout: Duration) -> Self {
        self.config.export_timeout = timeout;
        self
    }

    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> ExportPipeline {
        if self.sinks.is_empty() {
            tracing::warn!("Export pipeline built without sinks, payloads will be discarded");
        }
        ExportPipeline::with_sinks(self.sinks, self.config, self.metrics)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
