//! Callscope Filtering and Redaction
//!
//! This crate decides what of an outbound call is worth keeping:
//! - Sensitive header detection and value masking
//! - Header normalization and allow/deny filtering
//! - Domain/path allow/deny matching
//! - Body capture policy resolution (call > domain > global)

pub mod domain;
pub mod headers;
pub mod policy;
pub mod redaction;

pub use domain::{DomainMatcher, DomainVerdict, TargetUrl, domain_matches, parse_target};
pub use headers::HeaderFilter;
pub use policy::{CapturePolicy, CapturePolicyResolver, PolicySource, ResolvedFlag};
pub use redaction::HeaderRedactor;
