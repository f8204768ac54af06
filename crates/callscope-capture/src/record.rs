//! Outbound call data model

use crate::body::BodyContent;
use callscope_core::{CallId, HeaderMap, NetworkTimings, RequestScope};
use callscope_filter::{CapturePolicy, TargetUrl, parse_target};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The call as the application issued it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HeaderMap,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn target(&self) -> TargetUrl {
        parse_target(&self.url)
    }
}

/// Lifecycle position of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Created,
    HeadersSent,
    AwaitingResponse,
    ResponseHeadersReceived,
    StreamingBody,
    Completed,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Completed | CallState::Failed)
    }

    /// Whether any part of a response has arrived
    pub fn has_response(&self) -> bool {
        matches!(
            self,
            CallState::ResponseHeadersReceived | CallState::StreamingBody | CallState::Completed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success { status: u16 },
    Error { message: String, status: Option<u16> },
}

impl CallOutcome {
    pub fn status(&self) -> Option<u16> {
        match self {
            CallOutcome::Success { status } => Some(*status),
            CallOutcome::Error { status, .. } => *status,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CallOutcome::Error { .. })
    }
}

/// Immutable record of a finalized call
///
/// Headers are already filtered and redacted; bodies are already rendered
/// under the call's capture policy.
#[derive(Debug, Clone)]
pub struct FinishedCall {
    pub call_id: CallId,
    pub method: String,
    pub url: String,
    pub target: TargetUrl,
    pub scope: RequestScope,
    pub policy: CapturePolicy,
    pub request_headers: HeaderMap,
    pub response_headers: HeaderMap,
    pub request_body: Option<BodyContent>,
    pub response_body: Option<BodyContent>,
    pub request_body_size: u64,
    pub response_body_size: u64,
    pub timings: NetworkTimings,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub state: CallState,
    pub outcome: CallOutcome,
}

impl FinishedCall {
    pub fn request_truncated(&self) -> bool {
        self.request_body.as_ref().is_some_and(BodyContent::is_truncated)
    }

    pub fn response_truncated(&self) -> bool {
        self.response_body.as_ref().is_some_and(BodyContent::is_truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = OutboundRequest::new("post", "https://api.example.com/v1/items")
            .with_header("Content-Type", "application/json")
            .with_header("content-type", "text/plain");

        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.target().host, "api.example.com");
        assert_eq!(request.target().path, "/v1/items");
    }

    #[test]
    fn test_state_predicates() {
        assert!(!CallState::AwaitingResponse.has_response());
        assert!(CallState::StreamingBody.has_response());
        assert!(CallState::Failed.is_terminal());
        assert!(!CallState::HeadersSent.is_terminal());
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(CallOutcome::Success { status: 204 }.status(), Some(204));
        let failed = CallOutcome::Error {
            message: "reset".to_string(),
            status: None,
        };
        assert!(failed.is_error());
        assert_eq!(failed.status(), None);
    }
}
