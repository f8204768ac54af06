//! OpenTelemetry attribute bridging
//!
//! Maps finished payloads onto spans owned by the host's tracing setup.
//! Span creation and delivery stay with that setup.

use callscope_core::{AttributeValue, ExportPayload, HeaderMap, PayloadStatus};
use opentelemetry::{
    Array, KeyValue, StringValue, Value,
    trace::{Span, Status},
};

pub fn attribute_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Bool(v) => Value::Bool(*v),
        AttributeValue::Int(v) => Value::I64(*v),
        AttributeValue::Float(v) => Value::F64(*v),
        AttributeValue::String(v) => Value::from(v.clone()),
        AttributeValue::StringArray(values) => Value::Array(Array::String(
            values.iter().cloned().map(StringValue::from).collect(),
        )),
    }
}

fn header_key_values(prefix: &str, headers: &HeaderMap, out: &mut Vec<KeyValue>) {
    for (name, value) in headers.iter() {
        let values: Vec<StringValue> = value
            .iter()
            .map(|v| StringValue::from(v.to_string()))
            .collect();
        out.push(KeyValue::new(
            format!("{}.{}", prefix, name.to_ascii_lowercase()),
            Value::Array(Array::String(values)),
        ));
    }
}

/// Convert a payload into span attributes
///
/// Headers become `http.{request,response}.header.<name>` string arrays and
/// timing phases become `callscope.timing.<phase>` values in milliseconds.
pub fn payload_key_values(payload: &ExportPayload) -> Vec<KeyValue> {
    let mut kvs: Vec<KeyValue> = payload
        .attributes
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), attribute_value(value)))
        .collect();

    header_key_values("http.request.header", &payload.request_headers, &mut kvs);
    header_key_values("http.response.header", &payload.response_headers, &mut kvs);

    let timings = &payload.timings;
    let phases = [
        ("dns_lookup_ms", timings.dns_lookup_ms),
        ("tcp_connect_ms", timings.tcp_connect_ms),
        ("tls_handshake_ms", timings.tls_handshake_ms),
        ("ttfb_ms", timings.ttfb_ms),
        ("content_transfer_ms", timings.content_transfer_ms),
        ("total_ms", timings.total_ms),
    ];
    for (phase, value) in phases {
        if let Some(ms) = value {
            kvs.push(KeyValue::new(format!("callscope.timing.{}", phase), ms));
        }
    }

    kvs.push(KeyValue::new("callscope.call_id", payload.call_id.to_string()));
    kvs
}

/// Apply a payload's attributes and status to a span
pub fn record_payload(span: &mut impl Span, payload: &ExportPayload) {
    span.set_attributes(payload_key_values(payload));
    match &payload.status {
        PayloadStatus::Ok { .. } => record_success(span),
        PayloadStatus::Error { message, .. } => record_error(span, message),
    }
}

/// Mark a span as failed with an error
pub fn record_error(span: &mut impl Span, error: &str) {
    span.set_status(Status::error(error.to_string()));
    span.set_attribute(KeyValue::new("error.message", error.to_string()));
}

/// Mark a span as successful
pub fn record_success(span: &mut impl Span) {
    span.set_status(Status::Ok);
}
