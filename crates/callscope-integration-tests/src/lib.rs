//! End-to-end integration tests for Callscope
//!
//! `instrumented_send` reports a real HTTP exchange to an `Instrumentor` the
//! way a client integration would, so these tests exercise capture against
//! actual sockets and streamed bodies.

use callscope_agent::Instrumentor;
use callscope_capture::OutboundRequest;
use callscope_core::{HeaderMap, RequestScope};
use callscope_filter::headers::from_http;
use std::time::Instant;

/// Send `request` with `client`, reporting its lifecycle to `instrumentor`
///
/// Returns the status and raw body exactly as the caller would see them;
/// capture never alters the exchange.
pub async fn instrumented_send(
    instrumentor: &Instrumentor,
    client: &reqwest::Client,
    request: reqwest::Request,
    scope: &RequestScope,
) -> reqwest::Result<(u16, Vec<u8>)> {
    let outbound = OutboundRequest::new(request.method().as_str(), request.url().as_str())
        .with_headers(from_http(request.headers()));
    let request_body = request
        .body()
        .and_then(|body| body.as_bytes())
        .map(|bytes| bytes.to_vec());

    let mut handle = instrumentor.start_call(outbound, scope);
    if let Some(handle) = handle.as_mut() {
        handle.request_headers_sent(HeaderMap::new());
        if let Some(body) = &request_body {
            handle.request_body_chunk(body);
        }
        handle.request_body_done();
    }

    let mut response = match client.execute(request).await {
        Ok(response) => response,
        Err(e) => {
            if let Some(handle) = handle {
                instrumentor.fail(handle, e.to_string(), Instant::now());
            }
            return Err(e);
        }
    };

    let status = response.status().as_u16();
    if let Some(handle) = handle.as_mut() {
        handle.response_headers_received(status, from_http(response.headers()));
    }

    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if let Some(handle) = handle.as_mut() {
                    handle.response_body_chunk(&chunk);
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => {
                if let Some(handle) = handle {
                    instrumentor.fail(handle, e.to_string(), Instant::now());
                }
                return Err(e);
            }
        }
    }

    if let Some(handle) = handle {
        instrumentor.finish(handle, Instant::now());
    }
    Ok((status, body))
}
