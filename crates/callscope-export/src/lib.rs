//! Callscope Export
//!
//! Everything between a finished payload and its telemetry backend:
//! - Eligibility checks for payloads produced elsewhere
//! - A non-blocking export pipeline with batched or immediate delivery
//! - Delivery sinks (memory, JSONL file, HTTP)

pub mod eligibility;
pub mod http_sink;
pub mod jsonl_sink;
pub mod pipeline;
pub mod sink;

pub use eligibility::{Eligibility, EligibilityFilter, resolve_target};
pub use http_sink::{HttpSink, HttpSinkConfig};
pub use jsonl_sink::JsonlSink;
pub use pipeline::{ExportPipeline, PipelineBuilder, PipelineConfig};
pub use sink::{DiscardSink, ExportError, ExportResult, MemorySink, PayloadSink, sink_from_config};
