//! Export eligibility
//!
//! Payloads may come from the capture pipeline or from a tracing substrate
//! that records far more than outbound calls. Only client-side records that
//! carry network attributes (under either naming generation) and whose
//! target passes the domain lists are exported.

use callscope_core::attributes::{
    self, HOST_KEYS, LEGACY_NETWORK_KEYS, MODERN_NETWORK_KEYS, URL_KEYS,
};
use callscope_core::{ExportPayload, SpanKind};
use callscope_filter::{DomainMatcher, DomainVerdict, TargetUrl, parse_target};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    NotClient,
    NoNetworkAttributes,
    DomainRejected,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EligibilityFilter {
    matcher: Arc<DomainMatcher>,
}

impl EligibilityFilter {
    pub fn new(matcher: Arc<DomainMatcher>) -> Self {
        Self { matcher }
    }

    /// No domain restrictions
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn check(&self, payload: &ExportPayload) -> Eligibility {
        if payload.kind != SpanKind::Client {
            return Eligibility::NotClient;
        }

        let has_network = LEGACY_NETWORK_KEYS
            .iter()
            .chain(MODERN_NETWORK_KEYS)
            .any(|key| payload.attributes.contains_key(*key));
        if !has_network {
            return Eligibility::NoNetworkAttributes;
        }

        match resolve_target(payload) {
            Some(target) => match self.matcher.evaluate(&target) {
                DomainVerdict::Captured(_) => Eligibility::Eligible,
                DomainVerdict::Denied(_) | DomainVerdict::NotAllowed => {
                    Eligibility::DomainRejected
                }
            },
            // Nothing to match against
            None => Eligibility::Eligible,
        }
    }

    pub fn is_eligible(&self, payload: &ExportPayload) -> bool {
        self.check(payload).is_eligible()
    }
}

/// Best-effort target from whichever attributes are present
pub fn resolve_target(payload: &ExportPayload) -> Option<TargetUrl> {
    if let Some(url) = payload.first_str(URL_KEYS) {
        return Some(parse_target(url));
    }

    let host = payload.first_str(HOST_KEYS)?;
    let mut target = parse_target(host);
    if let Some(path) = payload.first_str(&[attributes::URL_PATH, attributes::HTTP_TARGET]) {
        // http.target may carry a query string
        let path = path.split(['?', '#']).next().unwrap_or_default();
        target.path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
    }
    Some(target)
}
