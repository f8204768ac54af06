//! Conversion of finished calls into export payloads

use crate::body::BodyContent;
use crate::record::{CallOutcome, FinishedCall};
use callscope_core::attributes::{self, AttributeValue};
use callscope_core::{ExportPayload, PayloadStatus, SpanKind};
use std::collections::BTreeMap;

/// Method reported when the call did not carry one
const UNKNOWN_METHOD: &str = "_OTHER";

/// `error.type` for failures without a more specific classification
const OTHER_ERROR_TYPE: &str = "_OTHER";

/// Builds [`ExportPayload`]s from [`FinishedCall`]s
///
/// Extraction has no side effects: extracting the same record twice yields
/// equal payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordExtractor {
    legacy_attributes: bool,
}

impl RecordExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also emit the older `http.method` / `http.url` / `net.peer.name` names
    pub fn with_legacy_attributes(mut self, enabled: bool) -> Self {
        self.legacy_attributes = enabled;
        self
    }

    pub fn extract(&self, call: &FinishedCall) -> ExportPayload {
        let method = normalize_method(&call.method);
        let mut attrs: BTreeMap<String, AttributeValue> = BTreeMap::new();
        let mut put = |key: &str, value: AttributeValue| {
            attrs.insert(key.to_string(), value);
        };

        put(attributes::HTTP_REQUEST_METHOD, method.as_str().into());
        put(attributes::URL_FULL, call.url.as_str().into());
        put(attributes::URL_PATH, call.target.path.as_str().into());
        if let Some(scheme) = &call.target.scheme {
            put(attributes::URL_SCHEME, scheme.as_str().into());
        }
        if !call.target.host.is_empty() {
            put(attributes::SERVER_ADDRESS, call.target.host.as_str().into());
        }
        if let Some(port) = effective_port(call) {
            put(attributes::SERVER_PORT, port.into());
        }
        if let Some(status) = call.outcome.status() {
            put(attributes::HTTP_RESPONSE_STATUS_CODE, status.into());
        }
        put(attributes::HTTP_REQUEST_BODY_SIZE, call.request_body_size.into());
        put(attributes::HTTP_RESPONSE_BODY_SIZE, call.response_body_size.into());

        if call.policy.capture_request_body {
            body_attributes(
                &mut put,
                call.request_body.as_ref(),
                attributes::HTTP_REQUEST_BODY,
                attributes::HTTP_REQUEST_BODY_TRUNCATED,
                attributes::HTTP_REQUEST_BODY_ENCODING,
            );
        }
        if call.policy.capture_response_body {
            body_attributes(
                &mut put,
                call.response_body.as_ref(),
                attributes::HTTP_RESPONSE_BODY,
                attributes::HTTP_RESPONSE_BODY_TRUNCATED,
                attributes::HTTP_RESPONSE_BODY_ENCODING,
            );
        }

        match &call.outcome {
            CallOutcome::Error { message, .. } => {
                put(attributes::ERROR_TYPE, OTHER_ERROR_TYPE.into());
                put(attributes::ERROR_MESSAGE, message.as_str().into());
            }
            CallOutcome::Success { status } if *status >= 400 => {
                put(attributes::ERROR_TYPE, status.to_string().into());
            }
            CallOutcome::Success { .. } => {}
        }

        if self.legacy_attributes {
            put(attributes::HTTP_METHOD, method.as_str().into());
            put(attributes::HTTP_URL, call.url.as_str().into());
            put(attributes::HTTP_TARGET, call.target.path.as_str().into());
            if !call.target.host.is_empty() {
                put(attributes::NET_PEER_NAME, call.target.host.as_str().into());
            }
            if let Some(status) = call.outcome.status() {
                put(attributes::HTTP_STATUS_CODE, status.into());
            }
        }

        for (key, value) in call.scope.to_attributes() {
            put(&key, value);
        }

        let status = match &call.outcome {
            CallOutcome::Success { status } => PayloadStatus::Ok {
                status_code: *status,
            },
            CallOutcome::Error { message, status } => PayloadStatus::Error {
                message: message.clone(),
                status_code: *status,
            },
        };

        ExportPayload {
            call_id: call.call_id,
            name: method,
            kind: SpanKind::Client,
            start_time: call.start_time,
            end_time: call.end_time,
            timings: call.timings.breakdown(),
            status,
            request_headers: call.request_headers.clone(),
            response_headers: call.response_headers.clone(),
            attributes: attrs,
        }
    }
}

fn normalize_method(method: &str) -> String {
    let method = method.trim();
    if method.is_empty() {
        UNKNOWN_METHOD.to_string()
    } else {
        method.to_ascii_uppercase()
    }
}

fn effective_port(call: &FinishedCall) -> Option<u16> {
    call.target.port.or(match call.target.scheme.as_deref() {
        Some("https") | Some("wss") => Some(443),
        Some("http") | Some("ws") => Some(80),
        _ => None,
    })
}

fn body_attributes(
    put: &mut impl FnMut(&str, AttributeValue),
    body: Option<&BodyContent>,
    value_key: &str,
    truncated_key: &str,
    encoding_key: &str,
) {
    let Some(body) = body else {
        return;
    };
    put(value_key, body.render().into());
    if body.is_truncated() {
        put(truncated_key, true.into());
    }
    if let Some(encoding) = body.encoding() {
        put(encoding_key, encoding.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::OutboundRequest;
    use crate::tracker::CallHandle;
    use callscope_core::{BodyLimits, CallId, HeaderMap, RequestScope};
    use callscope_filter::CapturePolicy;
    use std::time::{Duration, Instant};

    fn finished(policy: CapturePolicy, scope: RequestScope) -> FinishedCall {
        let request = OutboundRequest::new("post", "https://api.example.com/v1/items?page=2")
            .with_header("Content-Type", "application/json");
        let mut call = CallHandle::new(CallId::new(), request, policy, BodyLimits::default())
            .with_scope(scope);
        let t0 = call.started_at();
        call.request_headers_sent(HeaderMap::new());
        call.request_body_chunk(br#"{"name":"widget"}"#);
        call.request_body_done();
        call.response_headers_received_at(201, HeaderMap::new(), t0 + Duration::from_millis(40));
        call.response_body_chunk(br#"{"id":7}"#);
        call.complete(t0 + Duration::from_millis(50)).unwrap()
    }

    #[test]
    fn test_extract_modern_attributes() {
        let call = finished(CapturePolicy::everything(), RequestScope::new());
        let payload = RecordExtractor::new().extract(&call);

        assert_eq!(payload.name, "POST");
        assert_eq!(payload.kind, SpanKind::Client);
        assert_eq!(payload.status, PayloadStatus::Ok { status_code: 201 });
        assert_eq!(payload.attribute_str("http.request.method"), Some("POST"));
        assert_eq!(
            payload.attribute_str("url.full"),
            Some("https://api.example.com/v1/items?page=2")
        );
        assert_eq!(payload.attribute_str("url.path"), Some("/v1/items"));
        assert_eq!(payload.attribute_str("url.scheme"), Some("https"));
        assert_eq!(payload.attribute_str("server.address"), Some("api.example.com"));
        assert_eq!(
            payload.attribute("server.port").and_then(AttributeValue::as_i64),
            Some(443)
        );
        assert_eq!(
            payload
                .attribute("http.response.status_code")
                .and_then(AttributeValue::as_i64),
            Some(201)
        );
        assert_eq!(
            payload.attribute_str("http.request.body"),
            Some(r#"{"name":"widget"}"#)
        );
        assert_eq!(payload.attribute_str("http.response.body"), Some(r#"{"id":7}"#));
        assert!(payload.attribute("http.method").is_none());
        assert!(payload.attribute("error.type").is_none());
        assert_eq!(payload.timings.total_ms, Some(50.0));
    }

    #[test]
    fn test_extract_is_idempotent() {
        let call = finished(
            CapturePolicy::everything(),
            RequestScope::new().with_user_id("u-1").with_tag("checkout"),
        );
        let extractor = RecordExtractor::new();
        assert_eq!(extractor.extract(&call), extractor.extract(&call));
    }

    #[test]
    fn test_bodies_absent_when_policy_disables_them() {
        let call = finished(CapturePolicy::nothing(), RequestScope::new());
        let payload = RecordExtractor::new().extract(&call);
        assert!(payload.attribute("http.request.body").is_none());
        assert!(payload.attribute("http.response.body").is_none());
        assert_eq!(
            payload
                .attribute("http.request.body.size")
                .and_then(AttributeValue::as_i64),
            Some(17)
        );
    }

    #[test]
    fn test_scope_attributes() {
        let scope = RequestScope::new()
            .with_user_id("u-1")
            .with_session_id("s-9")
            .with_metadata("tenant", "acme");
        let payload = RecordExtractor::new().extract(&finished(CapturePolicy::nothing(), scope));
        assert_eq!(payload.attribute_str("enduser.id"), Some("u-1"));
        assert_eq!(payload.attribute_str("session.id"), Some("s-9"));
        assert_eq!(payload.attribute_str("callscope.metadata.tenant"), Some("acme"));
    }

    #[test]
    fn test_legacy_attributes_opt_in() {
        let call = finished(CapturePolicy::nothing(), RequestScope::new());
        let payload = RecordExtractor::new()
            .with_legacy_attributes(true)
            .extract(&call);
        assert_eq!(payload.attribute_str("http.method"), Some("POST"));
        assert_eq!(payload.attribute_str("net.peer.name"), Some("api.example.com"));
        assert_eq!(payload.attribute_str("http.target"), Some("/v1/items"));
    }

    #[test]
    fn test_failed_call_attributes() {
        let mut call = CallHandle::new(
            CallId::new(),
            OutboundRequest::new("GET", "http://internal.example.com:8080/health"),
            CapturePolicy::nothing(),
            BodyLimits::default(),
        );
        call.request_headers_sent(HeaderMap::new());
        let record = call.fail("connection refused", Instant::now()).unwrap();
        let payload = RecordExtractor::new().extract(&record);

        assert!(payload.is_error());
        assert_eq!(payload.attribute_str("error.message"), Some("connection refused"));
        assert_eq!(payload.attribute_str("error.type"), Some("_OTHER"));
        assert_eq!(
            payload.attribute("server.port").and_then(AttributeValue::as_i64),
            Some(8080)
        );
        assert!(payload.attribute("http.response.status_code").is_none());
    }

    #[test]
    fn test_server_error_sets_error_type() {
        let mut call = CallHandle::new(
            CallId::new(),
            OutboundRequest::new("GET", "https://api.example.com/"),
            CapturePolicy::nothing(),
            BodyLimits::default(),
        );
        call.response_headers_received(503, HeaderMap::new());
        let payload = RecordExtractor::new().extract(&call.complete(Instant::now()).unwrap());
        assert!(!payload.is_error());
        assert_eq!(payload.attribute_str("error.type"), Some("503"));
    }

    #[test]
    fn test_body_without_status_exports_no_status_code() {
        let mut call = CallHandle::new(
            CallId::new(),
            OutboundRequest::new("GET", "https://api.example.com/stream"),
            CapturePolicy::nothing(),
            BodyLimits::default(),
        );
        call.request_headers_sent(HeaderMap::new());
        call.response_body_chunk(b"data");
        let payload = RecordExtractor::new().extract(&call.complete(Instant::now()).unwrap());

        assert!(payload.is_error());
        assert!(payload.attribute("http.response.status_code").is_none());
    }
}
