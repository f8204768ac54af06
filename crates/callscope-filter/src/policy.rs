//! Body capture policy resolution
//!
//! Each capture flag is resolved independently, in strict order:
//! call-scoped override, matching domain rule, global default, `false`.
//! Unset levels are skipped rather than read as `false`.

use callscope_core::{CaptureConfig, DomainRule, RequestScope};
use serde::Serialize;

/// Effective body capture flags for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CapturePolicy {
    pub capture_request_body: bool,
    pub capture_response_body: bool,
}

impl CapturePolicy {
    pub fn nothing() -> Self {
        Self::default()
    }

    pub fn everything() -> Self {
        Self {
            capture_request_body: true,
            capture_response_body: true,
        }
    }
}

/// Which level decided a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    CallScope,
    DomainRule,
    Global,
    Default,
}

impl PolicySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicySource::CallScope => "call scope",
            PolicySource::DomainRule => "domain rule",
            PolicySource::Global => "global default",
            PolicySource::Default => "built-in default",
        }
    }
}

/// A resolved flag together with the level it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedFlag {
    pub value: bool,
    pub source: PolicySource,
}

fn resolve_flag(call: Option<bool>, domain: Option<bool>, global: Option<bool>) -> ResolvedFlag {
    [
        (call, PolicySource::CallScope),
        (domain, PolicySource::DomainRule),
        (global, PolicySource::Global),
    ]
    .into_iter()
    .find_map(|(value, source)| value.map(|value| ResolvedFlag { value, source }))
    .unwrap_or(ResolvedFlag {
        value: false,
        source: PolicySource::Default,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CapturePolicyResolver {
    global_request: Option<bool>,
    global_response: Option<bool>,
}

impl CapturePolicyResolver {
    pub fn new(config: &CaptureConfig) -> Self {
        Self::from_defaults(config.capture_request_body, config.capture_response_body)
    }

    pub fn from_defaults(global_request: Option<bool>, global_response: Option<bool>) -> Self {
        Self {
            global_request,
            global_response,
        }
    }

    /// Resolve the request body flag and report which level decided it
    pub fn resolve_request(&self, scope: &RequestScope, rule: Option<&DomainRule>) -> ResolvedFlag {
        resolve_flag(
            scope.capture_request_body,
            rule.and_then(|r| r.capture_request_body),
            self.global_request,
        )
    }

    /// Resolve the response body flag and report which level decided it
    pub fn resolve_response(&self, scope: &RequestScope, rule: Option<&DomainRule>) -> ResolvedFlag {
        resolve_flag(
            scope.capture_response_body,
            rule.and_then(|r| r.capture_response_body),
            self.global_response,
        )
    }

    /// Resolve both flags for one call
    pub fn resolve(&self, scope: &RequestScope, rule: Option<&DomainRule>) -> CapturePolicy {
        CapturePolicy {
            capture_request_body: self.resolve_request(scope, rule).value,
            capture_response_body: self.resolve_response(scope, rule).value,
        }
    }
}
