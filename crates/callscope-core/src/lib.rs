//! Callscope Core Types
//!
//! This crate provides the fundamental types shared by every stage of the
//! outbound-call capture pipeline:
//! - Canonical header representation
//! - Network timing marks and derived durations
//! - Export payloads and attribute naming conventions
//! - Request-scoped overrides and capture configuration
//! - Core error types

pub mod attributes;
pub mod config;
pub mod error;
pub mod headers;
pub mod id;
pub mod payload;
pub mod scope;
pub mod timing;

pub use attributes::AttributeValue;
pub use config::{
    BodyLimits, CaptureConfig, DomainFilterConfig, DomainRule, ExportConfig, ExportMode,
    HeaderRedactionConfig, HeaderRules, LogFormat, LoggingConfig, RedactionStrategy, SinkConfig,
};
pub use error::{Error, Result};
pub use headers::{HeaderMap, HeaderValue};
pub use id::CallId;
pub use payload::{ExportPayload, PayloadOverrides, PayloadStatus, SpanKind};
pub use scope::RequestScope;
pub use timing::{NetworkTimings, TimingBreakdown};
