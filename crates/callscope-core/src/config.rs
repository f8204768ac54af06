//! Capture configuration
//!
//! Operator-facing settings consumed by the filters, the body buffers and the
//! export pipeline. Every section has serde defaults so a partial file is
//! always valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Master switch for outbound capture
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Global default for request body capture (unset = fall through to false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_request_body: Option<bool>,

    /// Global default for response body capture (unset = fall through to false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_response_body: Option<bool>,

    #[serde(default)]
    pub body_limits: BodyLimits,

    #[serde(default)]
    pub domains: DomainFilterConfig,

    #[serde(default)]
    pub headers: HeaderRules,

    #[serde(default)]
    pub redaction: HeaderRedactionConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capture_request_body: None,
            capture_response_body: None,
            body_limits: BodyLimits::default(),
            domains: DomainFilterConfig::default(),
            headers: HeaderRules::default(),
            redaction: HeaderRedactionConfig::default(),
            export: ExportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.body_limits.request_max_bytes == 0 {
            return Err(Error::ConfigValidation(
                "body_limits.request_max_bytes must be at least 1".to_string(),
            ));
        }
        if self.body_limits.response_max_bytes == 0 {
            return Err(Error::ConfigValidation(
                "body_limits.response_max_bytes must be at least 1".to_string(),
            ));
        }

        for rule in self.domains.allow.iter().chain(&self.domains.deny) {
            let domain = rule.domain.trim();
            if domain.is_empty() || domain == "." {
                return Err(Error::ConfigValidation(
                    "domain rules must name a domain".to_string(),
                ));
            }
        }

        self.export.validate()?;
        Ok(())
    }
}

/// Per-side body capture ceilings in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyLimits {
    #[serde(default = "default_body_limit")]
    pub request_max_bytes: usize,

    #[serde(default = "default_body_limit")]
    pub response_max_bytes: usize,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            request_max_bytes: default_body_limit(),
            response_max_bytes: default_body_limit(),
        }
    }
}

/// Domain allow/deny lists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainFilterConfig {
    /// When non-empty, only matching calls are captured
    #[serde(default)]
    pub allow: Vec<DomainRule>,

    /// Matching calls are never captured, regardless of `allow`
    #[serde(default)]
    pub deny: Vec<DomainRule>,
}

/// A domain rule with optional path and per-domain overrides
///
/// A bare string deserializes into a rule with only `domain` set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DomainRuleRepr")]
pub struct DomainRule {
    /// Exact host, or `.suffix` to match the domain and all its subdomains
    pub domain: String,

    /// Path prefixes the rule is restricted to (empty = all paths)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,

    /// Header lists replacing the global ones for matching calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderRules>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_request_body: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_response_body: Option<bool>,
}

impl DomainRule {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_headers(mut self, headers: HeaderRules) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_capture_request_body(mut self, capture: bool) -> Self {
        self.capture_request_body = Some(capture);
        self
    }

    pub fn with_capture_response_body(mut self, capture: bool) -> Self {
        self.capture_response_body = Some(capture);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DomainRuleRepr {
    Domain(String),
    Rule {
        domain: String,
        #[serde(default)]
        paths: Vec<String>,
        #[serde(default)]
        headers: Option<HeaderRules>,
        #[serde(default)]
        capture_request_body: Option<bool>,
        #[serde(default)]
        capture_response_body: Option<bool>,
    },
}

impl From<DomainRuleRepr> for DomainRule {
    fn from(repr: DomainRuleRepr) -> Self {
        match repr {
            DomainRuleRepr::Domain(domain) => DomainRule::new(domain),
            DomainRuleRepr::Rule {
                domain,
                paths,
                headers,
                capture_request_body,
                capture_response_body,
            } => DomainRule {
                domain,
                paths,
                headers,
                capture_request_body,
                capture_response_body,
            },
        }
    }
}

/// Header allow/deny lists (names compared case-insensitively)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRules {
    /// When set, only these headers are kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,

    /// Headers that are always dropped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<Vec<String>>,
}

impl HeaderRules {
    pub fn allow<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn deny<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Overlay domain-specific lists: each list that is set replaces the
    /// corresponding list of `self`
    pub fn overlaid_with(&self, domain: &HeaderRules) -> HeaderRules {
        HeaderRules {
            allow: domain.allow.clone().or_else(|| self.allow.clone()),
            deny: domain.deny.clone().or_else(|| self.deny.clone()),
        }
    }
}

/// How sensitive header values are masked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionStrategy {
    /// Replace the whole value
    Replace,
    /// Keep the first `visible_chars` characters
    ShowPrefix,
    /// Keep the last `visible_chars` characters
    ShowSuffix,
    /// Drop the header entirely
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRedactionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sensitive header name patterns
    #[serde(default = "default_sensitive_patterns")]
    pub patterns: Vec<String>,

    #[serde(default = "default_strategy")]
    pub strategy: RedactionStrategy,

    #[serde(default = "default_replacement")]
    pub replacement: String,

    /// Characters left visible by the prefix/suffix strategies
    #[serde(default = "default_visible_chars")]
    pub visible_chars: usize,
}

impl Default for HeaderRedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: default_sensitive_patterns(),
            strategy: default_strategy(),
            replacement: default_replacement(),
            visible_chars: default_visible_chars(),
        }
    }
}

/// Delivery discipline of the export pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportMode {
    /// Flush after `max_batch_size` payloads or `batch_timeout_ms`, whichever first
    Batched {
        #[serde(default = "default_batch_size")]
        max_batch_size: usize,
        #[serde(default = "default_batch_timeout_ms")]
        batch_timeout_ms: u64,
    },
    /// Deliver each payload as soon as it is produced
    Immediate,
}

impl Default for ExportMode {
    fn default() -> Self {
        ExportMode::Batched {
            max_batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub mode: ExportMode,

    /// Bounded queue between producers and the export worker
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Upper bound for a single sink call
    #[serde(default = "default_export_timeout_ms")]
    pub export_timeout_ms: u64,

    /// Where payloads are delivered
    #[serde(default)]
    pub sink: SinkConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            mode: ExportMode::default(),
            max_queue_size: default_max_queue_size(),
            export_timeout_ms: default_export_timeout_ms(),
            sink: SinkConfig::default(),
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> Result<()> {
        if let ExportMode::Batched {
            max_batch_size,
            batch_timeout_ms,
        } = self.mode
        {
            if max_batch_size == 0 {
                return Err(Error::ConfigValidation(
                    "export.mode.max_batch_size must be at least 1".to_string(),
                ));
            }
            if batch_timeout_ms == 0 {
                return Err(Error::ConfigValidation(
                    "export.mode.batch_timeout_ms must be at least 1".to_string(),
                ));
            }
        }
        if self.max_queue_size == 0 {
            return Err(Error::ConfigValidation(
                "export.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.export_timeout_ms == 0 {
            return Err(Error::ConfigValidation(
                "export.export_timeout_ms must be at least 1".to_string(),
            ));
        }
        self.sink.validate()
    }
}

/// Delivery target for exported payloads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Drop payloads after completion callbacks have seen them
    #[default]
    Discard,
    /// Append one JSON payload per line to a file
    Jsonl { path: String },
    /// POST each batch as a JSON array
    Http {
        endpoint: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
}

impl SinkConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            SinkConfig::Discard => Ok(()),
            SinkConfig::Jsonl { path } if path.trim().is_empty() => Err(Error::ConfigValidation(
                "export.sink.path must not be empty".to_string(),
            )),
            SinkConfig::Jsonl { .. } => Ok(()),
            SinkConfig::Http { endpoint, .. }
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) =>
            {
                Err(Error::ConfigValidation(format!(
                    "export.sink.endpoint must be an http(s) URL, got '{}'",
                    endpoint
                )))
            }
            SinkConfig::Http { timeout_ms: 0, .. } => Err(Error::ConfigValidation(
                "export.sink.timeout_ms must be at least 1".to_string(),
            )),
            SinkConfig::Http { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_body_limit() -> usize {
    4096
}

fn default_sensitive_patterns() -> Vec<String> {
    [
        "authorization",
        "proxy-authorization",
        "cookie",
        "set-cookie",
        "x-api-key",
        "api-key",
        "x-auth-token",
        "x-access-token",
        "x-csrf-token",
        "password",
        "secret",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_strategy() -> RedactionStrategy {
    RedactionStrategy::Replace
}

fn default_replacement() -> String {
    "[REDACTED]".to_string()
}

fn default_visible_chars() -> usize {
    4
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    1000
}

fn default_max_queue_size() -> usize {
    2048
}

fn default_export_timeout_ms() -> u64 {
    10_000
}

fn default_http_timeout_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}
