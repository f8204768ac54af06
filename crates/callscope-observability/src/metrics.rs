//! Metrics collection with Prometheus
//!
//! Metrics describing the capture pipeline itself:
//! - Payloads submitted, dropped (by reason) and exported
//! - Export failures and batch sizes
//! - Bodies discarded for exceeding their capture limit

use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

/// Why a payload never reached a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    ShutDown,
    Ineligible,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::QueueFull => "queue_full",
            DropReason::ShutDown => "shut_down",
            DropReason::Ineligible => "ineligible",
        }
    }
}

/// Pipeline metrics on a private registry
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Arc<Registry>,

    /// Payloads accepted into the export queue
    pub payloads_submitted: Counter,
    /// Payloads dropped before delivery
    pub payloads_dropped: CounterVec,
    /// Payloads delivered to a sink
    pub payloads_exported: Counter,
    /// Failed or timed-out sink calls
    pub export_failures: Counter,
    /// Payloads per delivered batch
    pub export_batch_size: Histogram,
    /// Bodies replaced by the truncation marker
    pub bodies_truncated: CounterVec,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let payloads_submitted = Counter::with_opts(Opts::new(
            "callscope_payloads_submitted_total",
            "Total number of payloads accepted for export",
        ))?;

        let payloads_dropped = CounterVec::new(
            Opts::new(
                "callscope_payloads_dropped_total",
                "Total number of payloads dropped before export",
            ),
            &["reason"],
        )?;

        let payloads_exported = Counter::with_opts(Opts::new(
            "callscope_payloads_exported_total",
            "Total number of payloads delivered to a sink",
        ))?;

        let export_failures = Counter::with_opts(Opts::new(
            "callscope_export_failures_total",
            "Total number of failed or timed-out export attempts",
        ))?;

        let export_batch_size = Histogram::with_opts(
            HistogramOpts::new(
                "callscope_export_batch_size",
                "Number of payloads per exported batch",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]),
        )?;

        let bodies_truncated = CounterVec::new(
            Opts::new(
                "callscope_bodies_truncated_total",
                "Total number of bodies discarded for exceeding the capture limit",
            ),
            &["side"],
        )?;

        registry.register(Box::new(payloads_submitted.clone()))?;
        registry.register(Box::new(payloads_dropped.clone()))?;
        registry.register(Box::new(payloads_exported.clone()))?;
        registry.register(Box::new(export_failures.clone()))?;
        registry.register(Box::new(export_batch_size.clone()))?;
        registry.register(Box::new(bodies_truncated.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            payloads_submitted,
            payloads_dropped,
            payloads_exported,
            export_failures,
            export_batch_size,
            bodies_truncated,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_submitted(&self) {
        self.payloads_submitted.inc();
    }

    pub fn record_dropped(&self, reason: DropReason) {
        self.payloads_dropped
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    pub fn record_exported(&self, batch_size: usize) {
        self.payloads_exported.inc_by(batch_size as f64);
        self.export_batch_size.observe(batch_size as f64);
    }

    pub fn record_export_failure(&self) {
        self.export_failures.inc();
    }

    /// `side` is `request` or `response`
    pub fn record_truncated(&self, side: &str) {
        self.bodies_truncated.with_label_values(&[side]).inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to encode metrics");
                String::new()
            })
    }
}
