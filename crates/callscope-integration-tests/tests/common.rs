//! Common test utilities for integration tests

use async_trait::async_trait;
use callscope_agent::Instrumentor;
use callscope_capture::{CallHandle, OutboundRequest};
use callscope_core::{CaptureConfig, ExportMode, ExportPayload, HeaderMap, RequestScope};
use callscope_export::{ExportError, ExportResult, MemorySink, PayloadSink};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Sink that rejects every batch
#[derive(Default)]
#[allow(dead_code)]
pub struct FailingSink {
    attempts: AtomicUsize,
}

#[allow(dead_code)]
impl FailingSink {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayloadSink for FailingSink {
    async fn export(&self, _batch: &[ExportPayload]) -> ExportResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ExportError::HttpStatus {
            status: 500,
            body: "collector down".to_string(),
        })
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Instrumentor delivering each payload straight into a memory sink
#[allow(dead_code)]
pub fn memory_instrumentor(mut config: CaptureConfig) -> (Instrumentor, Arc<MemorySink>) {
    config.export.mode = ExportMode::Immediate;
    let sink = Arc::new(MemorySink::new());
    let instrumentor = Instrumentor::new(config, sink.clone()).expect("valid config");
    (instrumentor, sink)
}

#[allow(dead_code)]
pub fn request(method: &str, url: &str, headers: &[(&str, &str)]) -> OutboundRequest {
    let headers: HeaderMap = headers.iter().copied().collect();
    OutboundRequest::new(method, url).with_headers(headers)
}

/// Drive a started call through a full exchange and finish it
#[allow(dead_code)]
pub fn complete_exchange(
    instrumentor: &Instrumentor,
    mut handle: CallHandle,
    request_body: &[u8],
    status: u16,
    response_headers: &[(&str, &str)],
    response_body: &[u8],
) {
    handle.request_headers_sent(HeaderMap::new());
    if !request_body.is_empty() {
        handle.request_body_chunk(request_body);
    }
    handle.request_body_done();
    handle.response_headers_received(status, response_headers.iter().copied().collect());
    if !response_body.is_empty() {
        handle.response_body_chunk(response_body);
    }
    instrumentor.finish(handle, Instant::now());
}

/// Start and complete a call in one step; returns whether it was captured
#[allow(dead_code)]
pub fn run_call(
    instrumentor: &Instrumentor,
    url: &str,
    scope: &RequestScope,
    request_body: &[u8],
    response_body: &[u8],
) -> bool {
    match instrumentor.start_call(request("POST", url, &[]), scope) {
        Some(handle) => {
            complete_exchange(instrumentor, handle, request_body, 200, &[], response_body);
            true
        }
        None => false,
    }
}

/// Find the payload whose `url.full` matches
#[allow(dead_code)]
pub fn payload_for<'a>(payloads: &'a [ExportPayload], url: &str) -> &'a ExportPayload {
    payloads
        .iter()
        .find(|p| p.attribute_str("url.full") == Some(url))
        .unwrap_or_else(|| panic!("No payload for {}", url))
}
