//! Callscope Observability
//!
//! This crate provides observability for the capture pipeline itself:
//! - Structured logging setup
//! - Pipeline metrics (Prometheus)
//! - Bridging finished payloads onto OpenTelemetry spans

pub mod logging;
pub mod metrics;
pub mod otel;

pub use logging::init_logging;
pub use metrics::PipelineMetrics;
