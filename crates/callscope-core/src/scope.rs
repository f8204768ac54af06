//! Request-scoped overrides
//!
//! A `RequestScope` is built by the calling code and handed explicitly to the
//! calls it wraps. It is never looked up from ambient state.

use crate::attributes::{self, AttributeValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestScope {
    /// Per-call override for request body capture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_request_body: Option<bool>,

    /// Per-call override for response body capture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_response_body: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capture_request_body(mut self, capture: bool) -> Self {
        self.capture_request_body = Some(capture);
        self
    }

    pub fn with_capture_response_body(mut self, capture: bool) -> Self {
        self.capture_response_body = Some(capture);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Combine an outer scope with a nested one
    ///
    /// Scalar values from `inner` win; tags are unioned and metadata keys
    /// from `inner` overwrite those of `self`.
    pub fn merged_with(&self, inner: &RequestScope) -> RequestScope {
        let mut merged = self.clone();
        if inner.capture_request_body.is_some() {
            merged.capture_request_body = inner.capture_request_body;
        }
        if inner.capture_response_body.is_some() {
            merged.capture_response_body = inner.capture_response_body;
        }
        if inner.user_id.is_some() {
            merged.user_id = inner.user_id.clone();
        }
        if inner.session_id.is_some() {
            merged.session_id = inner.session_id.clone();
        }
        for tag in &inner.tags {
            if !merged.tags.contains(tag) {
                merged.tags.push(tag.clone());
            }
        }
        for (key, value) in &inner.metadata {
            merged.metadata.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Attributes this scope contributes to an exported record
    pub fn to_attributes(&self) -> Vec<(String, AttributeValue)> {
        let mut attrs = Vec::new();
        if let Some(user_id) = &self.user_id {
            attrs.push((attributes::ENDUSER_ID.to_string(), user_id.clone().into()));
        }
        if let Some(session_id) = &self.session_id {
            attrs.push((attributes::SESSION_ID.to_string(), session_id.clone().into()));
        }
        if !self.tags.is_empty() {
            attrs.push((attributes::CALLSCOPE_TAGS.to_string(), self.tags.clone().into()));
        }
        for (key, value) in &self.metadata {
            attrs.push((
                format!("{}{}", attributes::CALLSCOPE_METADATA_PREFIX, key),
                value.clone().into(),
            ));
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let scope = RequestScope::new()
            .with_capture_request_body(true)
            .with_user_id("u-1")
            .with_tag("checkout")
            .with_tag("checkout")
            .with_metadata("tenant", "acme");

        assert_eq!(scope.capture_request_body, Some(true));
        assert_eq!(scope.capture_response_body, None);
        assert_eq!(scope.tags, vec!["checkout".to_string()]);
        assert!(!scope.is_empty());
        assert!(RequestScope::new().is_empty());
    }

    #[test]
    fn test_merge_inner_wins() {
        let outer = RequestScope::new()
            .with_capture_request_body(true)
            .with_capture_response_body(true)
            .with_user_id("outer")
            .with_tag("a")
            .with_metadata("k", "outer");
        let inner = RequestScope::new()
            .with_capture_request_body(false)
            .with_tag("b")
            .with_metadata("k", "inner");

        let merged = outer.merged_with(&inner);
        assert_eq!(merged.capture_request_body, Some(false));
        assert_eq!(merged.capture_response_body, Some(true));
        assert_eq!(merged.user_id.as_deref(), Some("outer"));
        assert_eq!(merged.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(merged.metadata.get("k").map(String::as_str), Some("inner"));
    }

    #[test]
    fn test_to_attributes() {
        let scope = RequestScope::new()
            .with_user_id("u-1")
            .with_session_id("s-1")
            .with_tag("t")
            .with_metadata("plan", "pro");

        let attrs: BTreeMap<_, _> = scope.to_attributes().into_iter().collect();
        assert_eq!(attrs.get("enduser.id"), Some(&AttributeValue::from("u-1")));
        assert_eq!(attrs.get("session.id"), Some(&AttributeValue::from("s-1")));
        assert_eq!(
            attrs.get("callscope.tags"),
            Some(&AttributeValue::from(vec!["t".to_string()]))
        );
        assert_eq!(
            attrs.get("callscope.metadata.plan"),
            Some(&AttributeValue::from("pro"))
        );
    }

    #[test]
    fn test_capture_flags_do_not_become_attributes() {
        let scope = RequestScope::new().with_capture_request_body(true);
        assert!(scope.to_attributes().is_empty());
    }
}
