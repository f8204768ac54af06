//! Attribute values and naming conventions
//!
//! Upstream producers emit network attributes under two naming generations:
//! the legacy HTTP conventions (`http.method`, `http.url`, `net.peer.name`)
//! and the modern ones (`http.request.method`, `url.full`, `server.address`).
//! Records built here use the modern names; consumers accept both.

use serde::{Deserialize, Serialize};

// Modern conventions
pub const HTTP_REQUEST_METHOD: &str = "http.request.method";
pub const URL_FULL: &str = "url.full";
pub const URL_SCHEME: &str = "url.scheme";
pub const URL_PATH: &str = "url.path";
pub const SERVER_ADDRESS: &str = "server.address";
pub const SERVER_PORT: &str = "server.port";
pub const HTTP_RESPONSE_STATUS_CODE: &str = "http.response.status_code";
pub const HTTP_REQUEST_BODY_SIZE: &str = "http.request.body.size";
pub const HTTP_RESPONSE_BODY_SIZE: &str = "http.response.body.size";
pub const ERROR_TYPE: &str = "error.type";

// Legacy conventions
pub const HTTP_METHOD: &str = "http.method";
pub const HTTP_URL: &str = "http.url";
pub const NET_PEER_NAME: &str = "net.peer.name";
pub const HTTP_HOST: &str = "http.host";
pub const HTTP_TARGET: &str = "http.target";
pub const HTTP_STATUS_CODE: &str = "http.status_code";

// Captured content
pub const HTTP_REQUEST_BODY: &str = "http.request.body";
pub const HTTP_RESPONSE_BODY: &str = "http.response.body";
pub const HTTP_REQUEST_BODY_TRUNCATED: &str = "http.request.body.truncated";
pub const HTTP_RESPONSE_BODY_TRUNCATED: &str = "http.response.body.truncated";
pub const HTTP_REQUEST_BODY_ENCODING: &str = "http.request.body.encoding";
pub const HTTP_RESPONSE_BODY_ENCODING: &str = "http.response.body.encoding";
pub const ERROR_MESSAGE: &str = "error.message";

// Request-scoped attributes
pub const ENDUSER_ID: &str = "enduser.id";
pub const SESSION_ID: &str = "session.id";
pub const CALLSCOPE_TAGS: &str = "callscope.tags";
pub const CALLSCOPE_METADATA_PREFIX: &str = "callscope.metadata.";

/// Network-identifying attributes in the legacy generation
pub const LEGACY_NETWORK_KEYS: &[&str] =
    &[HTTP_METHOD, HTTP_URL, NET_PEER_NAME, HTTP_HOST, HTTP_TARGET];

/// Network-identifying attributes in the modern generation
pub const MODERN_NETWORK_KEYS: &[&str] = &[HTTP_REQUEST_METHOD, URL_FULL, SERVER_ADDRESS];

/// Keys that may carry a full URL, modern first
pub const URL_KEYS: &[&str] = &[URL_FULL, HTTP_URL];

/// Keys that may carry a bare host, modern first
pub const HOST_KEYS: &[&str] = &[SERVER_ADDRESS, NET_PEER_NAME, HTTP_HOST];

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringArray(Vec<String>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        Self::StringArray(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_serialization() {
        assert_eq!(serde_json::to_string(&AttributeValue::from(200u16)).unwrap(), "200");
        assert_eq!(serde_json::to_string(&AttributeValue::from("GET")).unwrap(), "\"GET\"");
        assert_eq!(serde_json::to_string(&AttributeValue::from(true)).unwrap(), "true");
        assert_eq!(
            serde_json::to_string(&AttributeValue::from(vec!["a".to_string()])).unwrap(),
            "[\"a\"]"
        );
    }

    #[test]
    fn test_untagged_deserialization_prefers_int() {
        let value: AttributeValue = serde_json::from_str("42").unwrap();
        assert_eq!(value, AttributeValue::Int(42));
        let value: AttributeValue = serde_json::from_str("1.5").unwrap();
        assert_eq!(value, AttributeValue::Float(1.5));
    }

    #[test]
    fn test_u64_saturates() {
        assert_eq!(AttributeValue::from(u64::MAX), AttributeValue::Int(i64::MAX));
    }

    #[test]
    fn test_generations_are_disjoint() {
        for key in LEGACY_NETWORK_KEYS {
            assert!(!MODERN_NETWORK_KEYS.contains(key));
        }
    }
}
