//! Exportable payload produced for each finished outbound call

use crate::attributes::AttributeValue;
use crate::headers::HeaderMap;
use crate::id::CallId;
use crate::timing::TimingBreakdown;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Role of the recorded operation, as reported by the tracing substrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Client,
    Server,
    Internal,
    Producer,
    Consumer,
}

/// Terminal outcome of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PayloadStatus {
    Ok {
        status_code: u16,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },
}

/// Canonical, filtered, size-bounded record ready for transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPayload {
    pub call_id: CallId,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub timings: TimingBreakdown,
    pub status: PayloadStatus,
    #[serde(default, skip_serializing_if = "HeaderMap::is_empty")]
    pub request_headers: HeaderMap,
    #[serde(default, skip_serializing_if = "HeaderMap::is_empty")]
    pub response_headers: HeaderMap,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl ExportPayload {
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attribute(key).and_then(AttributeValue::as_str)
    }

    /// First present string attribute among `keys`
    pub fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.attribute_str(key))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, PayloadStatus::Error { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.status {
            PayloadStatus::Ok { status_code } => Some(*status_code),
            PayloadStatus::Error { status_code, .. } => *status_code,
        }
    }

    /// Build a new payload with the given overrides applied
    ///
    /// The receiver is left untouched.
    pub fn with_overrides(&self, overrides: &PayloadOverrides) -> ExportPayload {
        let mut payload = self.clone();
        if let Some(name) = &overrides.name {
            payload.name = name.clone();
        }
        for key in &overrides.removed {
            payload.attributes.remove(key);
        }
        for (key, value) in &overrides.attributes {
            payload.attributes.insert(key.clone(), value.clone());
        }
        payload
    }
}

/// Attribute overrides applied by [`ExportPayload::with_overrides`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadOverrides {
    name: Option<String>,
    attributes: BTreeMap<String, AttributeValue>,
    removed: Vec<String>,
}

impl PayloadOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.removed.push(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.attributes.is_empty() && self.removed.is_empty()
    }
}
