//! Callscope Capture
//!
//! Per-call lifecycle tracking for outbound calls:
//! - Bounded body buffering with all-or-nothing truncation
//! - Call handles that correlate connection, header and body events
//! - An identity-keyed registry for event APIs that only carry an id
//! - Extraction of finished calls into export payloads

pub mod body;
pub mod extractor;
pub mod record;
pub mod registry;
pub mod tracker;

pub use body::{BodyBuffer, BodyContent};
pub use extractor::RecordExtractor;
pub use record::{CallOutcome, CallState, FinishedCall, OutboundRequest};
pub use registry::CallRegistry;
pub use tracker::{CallEvent, CallHandle};
