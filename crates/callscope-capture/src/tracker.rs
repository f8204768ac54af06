//! Request lifecycle tracking
//!
//! A [`CallHandle`] is created when a call starts and is passed through every
//! event callback for that call. Finalizing consumes the handle, so a call can
//! be finalized at most once.

use crate::body::BodyBuffer;
use crate::record::{CallOutcome, CallState, FinishedCall, OutboundRequest};
use bytes::Bytes;
use callscope_core::{BodyLimits, CallId, HeaderMap, NetworkTimings, RequestScope};
use callscope_filter::{CapturePolicy, HeaderFilter, TargetUrl};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

const NO_RESPONSE_MESSAGE: &str = "call completed without a response";
const NO_STATUS_MESSAGE: &str = "call completed without a response status";

/// Events delivered by transports that correlate by call id
#[derive(Debug, Clone)]
pub enum CallEvent {
    DnsResolved(Instant),
    TcpConnected(Instant),
    TlsEstablished(Instant),
    RequestHeadersSent(HeaderMap),
    RequestBodyChunk(Bytes),
    RequestBodyDone,
    ResponseHeaders { status: u16, headers: HeaderMap },
    ResponseBodyChunk(Bytes),
    DisableCapture,
    Complete(Instant),
    Error { message: String, at: Instant },
}

impl CallEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallEvent::Complete(_) | CallEvent::Error { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::DnsResolved(_) => "dns_resolved",
            CallEvent::TcpConnected(_) => "tcp_connected",
            CallEvent::TlsEstablished(_) => "tls_established",
            CallEvent::RequestHeadersSent(_) => "request_headers_sent",
            CallEvent::RequestBodyChunk(_) => "request_body_chunk",
            CallEvent::RequestBodyDone => "request_body_done",
            CallEvent::ResponseHeaders { .. } => "response_headers",
            CallEvent::ResponseBodyChunk(_) => "response_body_chunk",
            CallEvent::DisableCapture => "disable_capture",
            CallEvent::Complete(_) => "complete",
            CallEvent::Error { .. } => "error",
        }
    }
}

/// Live state of one in-flight outbound call
#[derive(Debug)]
pub struct CallHandle {
    call_id: CallId,
    request: OutboundRequest,
    target: TargetUrl,
    scope: RequestScope,
    policy: CapturePolicy,
    header_filter: Arc<HeaderFilter>,
    state: CallState,
    timings: NetworkTimings,
    start_time: DateTime<Utc>,
    response_headers: HeaderMap,
    status: Option<u16>,
    request_body: BodyBuffer,
    response_body: BodyBuffer,
    request_bytes: u64,
    response_bytes: u64,
    capture_disabled: bool,
}

impl CallHandle {
    pub fn new(
        call_id: CallId,
        request: OutboundRequest,
        policy: CapturePolicy,
        limits: BodyLimits,
    ) -> Self {
        let target = request.target();
        Self {
            call_id,
            request,
            target,
            scope: RequestScope::default(),
            policy,
            header_filter: Arc::new(HeaderFilter::default()),
            state: CallState::Created,
            timings: NetworkTimings::start(Instant::now()),
            start_time: Utc::now(),
            response_headers: HeaderMap::new(),
            status: None,
            request_body: BodyBuffer::new(limits.request_max_bytes),
            response_body: BodyBuffer::new(limits.response_max_bytes),
            request_bytes: 0,
            response_bytes: 0,
            capture_disabled: false,
        }
    }

    /// Scope whose identity attributes are attached to the record
    pub fn with_scope(mut self, scope: RequestScope) -> Self {
        self.scope = scope;
        self
    }

    /// Filter applied to both header sets on finalization
    pub fn with_header_filter(mut self, filter: Arc<HeaderFilter>) -> Self {
        self.header_filter = filter;
        self
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn policy(&self) -> CapturePolicy {
        self.policy
    }

    pub fn target(&self) -> &TargetUrl {
        &self.target
    }

    pub fn started_at(&self) -> Instant {
        self.timings.start_at
    }

    pub fn timings(&self) -> &NetworkTimings {
        &self.timings
    }

    pub fn is_capture_disabled(&self) -> bool {
        self.capture_disabled
    }

    pub fn mark_dns_resolved(&mut self, at: Instant) {
        self.timings.mark_dns_lookup(at);
    }

    pub fn mark_tcp_connected(&mut self, at: Instant) {
        self.timings.mark_tcp_connection(at);
    }

    pub fn mark_tls_established(&mut self, at: Instant) {
        self.timings.mark_tls_handshake(at);
    }

    pub fn mark_first_byte(&mut self, at: Instant) {
        self.timings.mark_first_byte(at);
    }

    /// Record the headers actually put on the wire
    ///
    /// An empty set keeps the headers the request was created with.
    pub fn request_headers_sent(&mut self, headers: HeaderMap) {
        if !headers.is_empty() {
            self.request.headers = headers;
        }
        match self.state {
            CallState::Created => self.state = CallState::HeadersSent,
            state => tracing::debug!(
                call_id = %self.call_id,
                state = ?state,
                "Request headers reported after the call advanced"
            ),
        }
    }

    pub fn request_body_chunk(&mut self, chunk: &[u8]) {
        self.request_bytes += chunk.len() as u64;
        if self.policy.capture_request_body && !self.capture_disabled {
            let was_truncated = self.request_body.is_truncated();
            if !self.request_body.push(chunk) && !was_truncated {
                tracing::debug!(
                    call_id = %self.call_id,
                    limit = self.request_body.limit(),
                    "Request body exceeded capture limit, discarding buffer"
                );
            }
        }
    }

    /// The request finished streaming
    ///
    /// No state change if the response already started.
    pub fn request_body_done(&mut self) {
        if matches!(self.state, CallState::Created | CallState::HeadersSent) {
            self.state = CallState::AwaitingResponse;
        }
    }

    pub fn response_headers_received(&mut self, status: u16, headers: HeaderMap) {
        self.response_headers_received_at(status, headers, Instant::now());
    }

    pub fn response_headers_received_at(&mut self, status: u16, headers: HeaderMap, at: Instant) {
        if self.state == CallState::StreamingBody {
            tracing::debug!(
                call_id = %self.call_id,
                "Response headers reported after body streaming began"
            );
        } else {
            self.state = CallState::ResponseHeadersReceived;
        }
        self.status = Some(status);
        self.response_headers = headers;
        self.timings.mark_first_byte(at);
    }

    pub fn response_body_chunk(&mut self, chunk: &[u8]) {
        self.response_body_chunk_at(chunk, Instant::now());
    }

    pub fn response_body_chunk_at(&mut self, chunk: &[u8], at: Instant) {
        self.state = CallState::StreamingBody;
        self.timings.mark_first_byte(at);
        self.response_bytes += chunk.len() as u64;
        if self.policy.capture_response_body && !self.capture_disabled {
            let was_truncated = self.response_body.is_truncated();
            if !self.response_body.push(chunk) && !was_truncated {
                tracing::debug!(
                    call_id = %self.call_id,
                    limit = self.response_body.limit(),
                    "Response body exceeded capture limit, discarding buffer"
                );
            }
        }
    }

    /// Stop capturing this call
    ///
    /// If nothing has been buffered yet, finalizing yields no record.
    pub fn disable_capture(&mut self) {
        self.capture_disabled = true;
    }

    /// Apply a non-terminal event
    pub fn apply(&mut self, event: CallEvent) {
        match event {
            CallEvent::DnsResolved(at) => self.mark_dns_resolved(at),
            CallEvent::TcpConnected(at) => self.mark_tcp_connected(at),
            CallEvent::TlsEstablished(at) => self.mark_tls_established(at),
            CallEvent::RequestHeadersSent(headers) => self.request_headers_sent(headers),
            CallEvent::RequestBodyChunk(chunk) => self.request_body_chunk(&chunk),
            CallEvent::RequestBodyDone => self.request_body_done(),
            CallEvent::ResponseHeaders { status, headers } => {
                self.response_headers_received(status, headers)
            }
            CallEvent::ResponseBodyChunk(chunk) => self.response_body_chunk(&chunk),
            CallEvent::DisableCapture => self.disable_capture(),
            CallEvent::Complete(_) | CallEvent::Error { .. } => tracing::debug!(
                call_id = %self.call_id,
                event = event.name(),
                "Terminal event must consume the handle, ignoring"
            ),
        }
    }

    /// Finalize with a terminal event; `None` for non-terminal events
    pub fn finish_with(self, event: CallEvent) -> Option<FinishedCall> {
        match event {
            CallEvent::Complete(at) => self.complete(at),
            CallEvent::Error { message, at } => self.fail(message, at),
            other => {
                tracing::debug!(
                    call_id = %self.call_id,
                    event = other.name(),
                    "Non-terminal event cannot finalize a call, dropping it"
                );
                None
            }
        }
    }

    /// Finalize as completed
    ///
    /// A call that never saw any part of a response, or saw body bytes
    /// without a status line, is recorded as failed.
    pub fn complete(self, at: Instant) -> Option<FinishedCall> {
        let failure = match (self.state.has_response(), self.status) {
            (true, Some(status)) => {
                return self.finalize(CallState::Completed, CallOutcome::Success { status }, at);
            }
            (true, None) => NO_STATUS_MESSAGE,
            (false, _) => NO_RESPONSE_MESSAGE,
        };
        let outcome = CallOutcome::Error {
            message: failure.to_string(),
            status: None,
        };
        self.finalize(CallState::Failed, outcome, at)
    }

    pub fn fail(self, message: impl Into<String>, at: Instant) -> Option<FinishedCall> {
        let outcome = CallOutcome::Error {
            message: message.into(),
            status: self.status,
        };
        self.finalize(CallState::Failed, outcome, at)
    }

    /// Finalize a call that was cut short
    ///
    /// A call that never got past creation has nothing worth exporting.
    pub fn abort(self, reason: impl Into<String>, at: Instant) -> Option<FinishedCall> {
        if self.state == CallState::Created {
            tracing::debug!(call_id = %self.call_id, "Aborted before any activity, discarding");
            return None;
        }
        self.fail(reason, at)
    }

    fn has_buffered_body(&self) -> bool {
        !self.request_body.is_empty()
            || self.request_body.is_truncated()
            || !self.response_body.is_empty()
            || self.response_body.is_truncated()
    }

    fn finalize(mut self, state: CallState, outcome: CallOutcome, at: Instant) -> Option<FinishedCall> {
        if self.capture_disabled && !self.has_buffered_body() {
            tracing::debug!(call_id = %self.call_id, "Capture disabled, discarding call");
            return None;
        }

        self.timings.mark_end(at);
        let elapsed = self
            .timings
            .end_at
            .and_then(|end| end.checked_duration_since(self.timings.start_at))
            .unwrap_or(Duration::ZERO);
        let end_time = self.start_time
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());

        let request_encoding = self.request.headers.first_value("content-encoding");
        let response_encoding = self.response_headers.first_value("content-encoding");
        let request_body = if self.policy.capture_request_body {
            self.request_body.render(request_encoding)
        } else {
            None
        };
        let response_body = if self.policy.capture_response_body {
            self.response_body.render(response_encoding)
        } else {
            None
        };

        Some(FinishedCall {
            call_id: self.call_id,
            request_headers: self.header_filter.apply(&self.request.headers),
            response_headers: self.header_filter.apply(&self.response_headers),
            method: self.request.method,
            url: self.request.url,
            target: self.target,
            scope: self.scope,
            policy: self.policy,
            request_body,
            response_body,
            request_body_size: self.request_bytes,
            response_body_size: self.response_bytes,
            timings: self.timings,
            start_time: self.start_time,
            end_time,
            state,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyContent;

    fn handle(policy: CapturePolicy) -> CallHandle {
        let request = OutboundRequest::new("GET", "https://api.example.com/v1/items")
            .with_header("Authorization", "Bearer secret")
            .with_header("Accept", "application/json");
        CallHandle::new(CallId::new(), request, policy, BodyLimits::default())
    }

    fn json_headers() -> HeaderMap {
        [("Content-Type", "application/json")].into_iter().collect()
    }

    #[test]
    fn test_full_lifecycle() {
        let mut call = handle(CapturePolicy::everything());
        let t0 = call.started_at();
        assert_eq!(call.state(), CallState::Created);

        call.mark_dns_resolved(t0 + Duration::from_millis(5));
        call.mark_tcp_connected(t0 + Duration::from_millis(15));
        call.mark_tls_established(t0 + Duration::from_millis(30));
        call.request_headers_sent(HeaderMap::new());
        assert_eq!(call.state(), CallState::HeadersSent);
        call.request_body_done();
        assert_eq!(call.state(), CallState::AwaitingResponse);

        call.response_headers_received_at(200, json_headers(), t0 + Duration::from_millis(80));
        assert_eq!(call.state(), CallState::ResponseHeadersReceived);
        call.response_body_chunk(br#"{"items":[]}"#);
        assert_eq!(call.state(), CallState::StreamingBody);

        let finished = call.complete(t0 + Duration::from_millis(100)).unwrap();
        assert_eq!(finished.state, CallState::Completed);
        assert_eq!(finished.outcome, CallOutcome::Success { status: 200 });
        assert_eq!(
            finished.response_body,
            Some(BodyContent::Text(r#"{"items":[]}"#.to_string()))
        );
        assert_eq!(finished.response_body_size, 12);

        let breakdown = finished.timings.breakdown();
        assert_eq!(breakdown.dns_lookup_ms, Some(5.0));
        assert_eq!(breakdown.tcp_connect_ms, Some(10.0));
        assert_eq!(breakdown.tls_handshake_ms, Some(15.0));
        assert_eq!(breakdown.ttfb_ms, Some(50.0));
        assert_eq!(breakdown.content_transfer_ms, Some(20.0));
        assert_eq!(breakdown.total_ms, Some(100.0));
        assert_eq!(
            (finished.end_time - finished.start_time).num_milliseconds(),
            100
        );
    }

    #[test]
    fn test_headers_are_filtered_on_finalize() {
        let mut call = handle(CapturePolicy::nothing());
        call.response_headers_received(200, json_headers());
        let finished = call.complete(Instant::now()).unwrap();

        assert_eq!(
            finished.request_headers.first_value("authorization"),
            Some("[REDACTED]")
        );
        assert_eq!(
            finished.request_headers.first_value("accept"),
            Some("application/json")
        );
    }

    #[test]
    fn test_complete_without_response_is_failure() {
        let mut call = handle(CapturePolicy::nothing());
        call.request_headers_sent(HeaderMap::new());
        let finished = call.complete(Instant::now()).unwrap();
        assert_eq!(finished.state, CallState::Failed);
        assert_eq!(
            finished.outcome,
            CallOutcome::Error {
                message: NO_RESPONSE_MESSAGE.to_string(),
                status: None
            }
        );
    }

    #[test]
    fn test_body_before_response_headers_has_no_status() {
        let mut call = handle(CapturePolicy::everything());
        call.request_headers_sent(HeaderMap::new());
        call.response_body_chunk(b"data");
        let finished = call.complete(Instant::now()).unwrap();

        assert_eq!(finished.state, CallState::Failed);
        assert_eq!(
            finished.outcome,
            CallOutcome::Error {
                message: NO_STATUS_MESSAGE.to_string(),
                status: None
            }
        );
        assert_eq!(finished.outcome.status(), None);
    }

    #[test]
    fn test_fail_keeps_status() {
        let mut call = handle(CapturePolicy::nothing());
        call.response_headers_received(502, HeaderMap::new());
        let finished = call.fail("stream reset", Instant::now()).unwrap();
        assert_eq!(finished.outcome.status(), Some(502));
        assert!(finished.outcome.is_error());
    }

    #[test]
    fn test_body_not_captured_when_policy_off() {
        let mut call = handle(CapturePolicy {
            capture_request_body: false,
            capture_response_body: true,
        });
        call.request_body_chunk(b"secret payload");
        call.response_headers_received(200, HeaderMap::new());
        call.response_body_chunk(b"ok");
        let finished = call.complete(Instant::now()).unwrap();

        assert_eq!(finished.request_body, None);
        assert_eq!(finished.request_body_size, 14);
        assert_eq!(finished.response_body, Some(BodyContent::Text("ok".to_string())));
    }

    #[test]
    fn test_request_chunks_accepted_after_response_started() {
        let mut call = handle(CapturePolicy::everything());
        call.request_headers_sent(HeaderMap::new());
        call.response_headers_received(200, HeaderMap::new());
        call.request_body_chunk(b"late");
        call.request_body_done();
        assert_eq!(call.state(), CallState::ResponseHeadersReceived);

        let finished = call.complete(Instant::now()).unwrap();
        assert_eq!(finished.request_body, Some(BodyContent::Text("late".to_string())));
    }

    #[test]
    fn test_truncated_response() {
        let limits = BodyLimits {
            request_max_bytes: 4096,
            response_max_bytes: 4096,
        };
        let mut call = CallHandle::new(
            CallId::new(),
            OutboundRequest::new("GET", "https://api.example.com/"),
            CapturePolicy::everything(),
            limits,
        );
        call.response_headers_received(200, HeaderMap::new());
        call.response_body_chunk(&[b'x'; 3000]);
        call.response_body_chunk(&[b'x'; 2000]);

        let finished = call.complete(Instant::now()).unwrap();
        assert!(finished.response_truncated());
        assert_eq!(finished.response_body_size, 5000);
        assert_eq!(
            finished.response_body.unwrap().render(),
            "[body truncated: exceeded 4096 byte limit]"
        );
    }

    #[test]
    fn test_disable_capture_before_buffering_yields_nothing() {
        let mut call = handle(CapturePolicy::everything());
        call.disable_capture();
        call.response_headers_received(200, HeaderMap::new());
        call.response_body_chunk(b"ignored");
        assert!(call.complete(Instant::now()).is_none());
    }

    #[test]
    fn test_disable_capture_after_buffering_keeps_partial() {
        let mut call = handle(CapturePolicy::everything());
        call.request_body_chunk(b"kept");
        call.apply(CallEvent::DisableCapture);
        call.request_body_chunk(b" dropped");
        let finished = call.fail("cancelled", Instant::now()).unwrap();
        assert_eq!(finished.request_body, Some(BodyContent::Text("kept".to_string())));
    }

    #[test]
    fn test_marks_before_start_are_ignored() {
        let mut call = handle(CapturePolicy::nothing());
        let before = call
            .started_at()
            .checked_sub(Duration::from_millis(10))
            .unwrap_or(call.started_at());
        call.mark_dns_resolved(before);
        if before < call.started_at() {
            assert!(call.timings().dns_lookup_at.is_none());
        }
    }

    #[test]
    fn test_abort_before_activity_discards() {
        let call = handle(CapturePolicy::everything());
        assert!(call.abort("shutdown", Instant::now()).is_none());
    }

    #[test]
    fn test_finish_with_routes_terminal_events() {
        let mut call = handle(CapturePolicy::nothing());
        call.apply(CallEvent::ResponseHeaders {
            status: 404,
            headers: HeaderMap::new(),
        });
        let finished = call
            .finish_with(CallEvent::Error {
                message: "boom".to_string(),
                at: Instant::now(),
            })
            .unwrap();
        assert_eq!(finished.outcome.status(), Some(404));
    }
}
