//! Replay recorded call events through the capture pipeline
//!
//! A script lists calls, each with the events its transport produced. Event
//! times are offsets in milliseconds from the call's start, so a replay
//! reproduces the original timing breakdown.
//!
//! ```yaml
//! calls:
//!   - method: POST
//!     url: https://api.example.com/v1/orders
//!     headers: { Content-Type: application/json }
//!     scope: { capture_request_body: true, user_id: u-1 }
//!     events:
//!       - { type: dns_resolved, at_ms: 3 }
//!       - { type: request_headers_sent }
//!       - { type: request_body, text: '{"qty":1}' }
//!       - { type: request_body_done }
//!       - { type: response_headers, status: 201, at_ms: 40 }
//!       - { type: complete, at_ms: 45 }
//! ```

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use callscope_agent::Instrumentor;
use callscope_capture::{CallHandle, OutboundRequest};
use callscope_core::{HeaderMap, RequestScope};
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub calls: Vec<ScriptedCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedCall {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub scope: RequestScope,
    #[serde(default)]
    pub events: Vec<ScriptedEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptedEvent {
    DnsResolved {
        at_ms: u64,
    },
    TcpConnected {
        at_ms: u64,
    },
    TlsEstablished {
        at_ms: u64,
    },
    RequestHeadersSent {
        #[serde(default)]
        headers: HeaderMap,
    },
    RequestBody {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        base64: Option<String>,
    },
    RequestBodyDone,
    ResponseHeaders {
        status: u16,
        #[serde(default)]
        headers: HeaderMap,
        #[serde(default)]
        at_ms: Option<u64>,
    },
    ResponseBody {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        base64: Option<String>,
        #[serde(default)]
        at_ms: Option<u64>,
    },
    DisableCapture,
    Complete {
        #[serde(default)]
        at_ms: Option<u64>,
    },
    Error {
        message: String,
        #[serde(default)]
        at_ms: Option<u64>,
    },
    Abort {
        reason: String,
        #[serde(default)]
        at_ms: Option<u64>,
    },
}

/// What happened to each scripted call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub started: usize,
    pub rejected: usize,
    /// Calls whose script ended without a terminal event
    pub unfinished: usize,
}

impl ReplayScript {
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        let script = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(contents).context("Invalid JSON replay script")?
        } else {
            serde_yaml::from_str(contents).context("Invalid YAML replay script")?
        };
        Ok(script)
    }

    pub fn load(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path);
        let path = Path::new(expanded.as_ref());
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&contents, path)
    }
}

fn chunk_bytes(text: &Option<String>, base64: &Option<String>) -> Result<Vec<u8>> {
    match (text, base64) {
        (Some(text), None) => Ok(text.as_bytes().to_vec()),
        (None, Some(encoded)) => STANDARD
            .decode(encoded)
            .context("Body chunk is not valid base64"),
        (None, None) => Ok(Vec::new()),
        (Some(_), Some(_)) => bail!("Body chunk sets both 'text' and 'base64'"),
    }
}

fn offset(base: Instant, at_ms: Option<u64>) -> Instant {
    at_ms
        .map(|ms| base + Duration::from_millis(ms))
        .unwrap_or_else(Instant::now)
}

/// Feed every scripted call through the instrumentor
pub fn replay(instrumentor: &Instrumentor, script: &ReplayScript) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (index, call) in script.calls.iter().enumerate() {
        let request =
            OutboundRequest::new(&call.method, &call.url).with_headers(call.headers.clone());
        let Some(handle) = instrumentor.start_call(request, &call.scope) else {
            tracing::info!(index, url = %call.url, "Call rejected by domain rules");
            summary.rejected += 1;
            continue;
        };
        summary.started += 1;

        let finished = drive(instrumentor, handle, &call.events)
            .with_context(|| format!("Call #{} ({})", index, call.url))?;
        if !finished {
            summary.unfinished += 1;
        }
    }

    Ok(summary)
}

/// Returns whether a terminal event consumed the handle
fn drive(
    instrumentor: &Instrumentor,
    mut handle: CallHandle,
    events: &[ScriptedEvent],
) -> Result<bool> {
    let base = handle.started_at();

    for event in events {
        match event {
            ScriptedEvent::DnsResolved { at_ms } => {
                handle.mark_dns_resolved(offset(base, Some(*at_ms)))
            }
            ScriptedEvent::TcpConnected { at_ms } => {
                handle.mark_tcp_connected(offset(base, Some(*at_ms)))
            }
            ScriptedEvent::TlsEstablished { at_ms } => {
                handle.mark_tls_established(offset(base, Some(*at_ms)))
            }
            ScriptedEvent::RequestHeadersSent { headers } => {
                handle.request_headers_sent(headers.clone())
            }
            ScriptedEvent::RequestBody { text, base64 } => {
                handle.request_body_chunk(&chunk_bytes(text, base64)?)
            }
            ScriptedEvent::RequestBodyDone => handle.request_body_done(),
            ScriptedEvent::ResponseHeaders {
                status,
                headers,
                at_ms,
            } => {
                handle.response_headers_received_at(*status, headers.clone(), offset(base, *at_ms))
            }
            ScriptedEvent::ResponseBody {
                text,
                base64,
                at_ms,
            } => {
                let chunk = chunk_bytes(text, base64)?;
                handle.response_body_chunk_at(&chunk, offset(base, *at_ms))
            }
            ScriptedEvent::DisableCapture => handle.disable_capture(),
            ScriptedEvent::Complete { at_ms } => {
                instrumentor.finish(handle, offset(base, *at_ms));
                return Ok(true);
            }
            ScriptedEvent::Error { message, at_ms } => {
                instrumentor.fail(handle, message.clone(), offset(base, *at_ms));
                return Ok(true);
            }
            ScriptedEvent::Abort { reason, at_ms } => {
                instrumentor.abort(handle, reason.clone(), offset(base, *at_ms));
                return Ok(true);
            }
        }
    }

    tracing::warn!(
        call_id = %handle.call_id(),
        "Script ended without a terminal event, aborting call"
    );
    instrumentor.abort(handle, "replay script ended", Instant::now());
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use callscope_core::{CaptureConfig, DomainRule, ExportMode, PayloadStatus};
    use callscope_export::MemorySink;
    use std::sync::Arc;

    const SCRIPT: &str = r#"
calls:
  - method: post
    url: https://api.example.com/v1/orders
    headers: { Content-Type: application/json }
    scope: { capture_request_body: true, user_id: u-1 }
    events:
      - { type: dns_resolved, at_ms: 3 }
      - { type: tcp_connected, at_ms: 10 }
      - { type: request_headers_sent }
      - { type: request_body, text: '{"qty":1}' }
      - { type: request_body_done }
      - { type: response_headers, status: 201, at_ms: 40 }
      - { type: response_body, base64: 'eyJpZCI6N30=', at_ms: 42 }
      - { type: complete, at_ms: 45 }
  - method: GET
    url: https://tracker.io/pixel
    events:
      - { type: complete }
  - method: GET
    url: https://api.example.com/health
    events:
      - { type: request_headers_sent }
      - { type: error, message: connection reset, at_ms: 5 }
"#;

    fn instrumentor(sink: Arc<MemorySink>) -> Instrumentor {
        let mut config = CaptureConfig::default();
        config.export.mode = ExportMode::Immediate;
        config.domains.deny = vec![DomainRule::new("tracker.io")];
        Instrumentor::new(config, sink).unwrap()
    }

    #[test]
    fn test_parse_yaml_script() {
        let script = ReplayScript::parse(SCRIPT, Path::new("calls.yaml")).unwrap();
        assert_eq!(script.calls.len(), 3);
        assert_eq!(script.calls[0].events.len(), 8);
        assert_eq!(script.calls[0].scope.capture_request_body, Some(true));
    }

    #[test]
    fn test_chunk_bytes() {
        assert_eq!(chunk_bytes(&Some("hi".into()), &None).unwrap(), b"hi");
        assert_eq!(chunk_bytes(&None, &Some("aGk=".into())).unwrap(), b"hi");
        assert!(chunk_bytes(&Some("hi".into()), &Some("aGk=".into())).is_err());
        assert!(chunk_bytes(&None, &Some("%%%".into())).is_err());
    }

    #[tokio::test]
    async fn test_replay_script() {
        let sink = Arc::new(MemorySink::new());
        let instrumentor = instrumentor(sink.clone());
        let script = ReplayScript::parse(SCRIPT, Path::new("calls.yaml")).unwrap();

        let summary = replay(&instrumentor, &script).unwrap();
        assert_eq!(
            summary,
            ReplaySummary {
                started: 2,
                rejected: 1,
                unfinished: 0,
            }
        );

        instrumentor.force_flush().await;
        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 2);

        let order = &payloads[0];
        assert_eq!(order.name, "POST");
        assert_eq!(order.status, PayloadStatus::Ok { status_code: 201 });
        assert_eq!(order.attribute_str("http.request.body"), Some(r#"{"qty":1}"#));
        assert_eq!(order.attribute_str("enduser.id"), Some("u-1"));
        assert_eq!(order.timings.dns_lookup_ms, Some(3.0));
        assert_eq!(order.timings.total_ms, Some(45.0));

        assert!(payloads[1].is_error());
        instrumentor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unfinished_call_is_aborted() {
        let sink = Arc::new(MemorySink::new());
        let instrumentor = instrumentor(sink.clone());
        let script = ReplayScript::parse(
            r#"{"calls":[{"method":"GET","url":"https://api.example.com/","events":[{"type":"request_headers_sent"}]}]}"#,
            Path::new("calls.json"),
        )
        .unwrap();

        let summary = replay(&instrumentor, &script).unwrap();
        assert_eq!(summary.unfinished, 1);

        instrumentor.force_flush().await;
        assert!(sink.payloads()[0].is_error());
        instrumentor.shutdown().await;
    }
}
