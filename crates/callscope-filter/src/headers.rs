//! Header normalization and filtering
//!
//! Transports hand headers over in different shapes. Each shape has exactly
//! one adapter here that produces the canonical [`HeaderMap`]; filtering then
//! works on that single representation.

use crate::redaction::HeaderRedactor;
use callscope_core::{DomainRule, HeaderMap, HeaderRedactionConfig, HeaderRules, HeaderValue};
use std::collections::{HashMap, HashSet};

/// Adapter for `(name, value)` pairs
pub fn from_pairs<I, N, V>(pairs: I) -> HeaderMap
where
    I: IntoIterator<Item = (N, V)>,
    N: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().collect()
}

/// Adapter for `(name, values)` pairs where each name carries a list
pub fn from_multi<I, N>(entries: I) -> HeaderMap
where
    I: IntoIterator<Item = (N, Vec<String>)>,
    N: Into<String>,
{
    let mut map = HeaderMap::new();
    for (name, values) in entries {
        let value = match values.len() {
            1 => HeaderValue::Single(values.into_iter().next().unwrap_or_default()),
            _ => HeaderValue::Multiple(values),
        };
        map.append_value(name, value);
    }
    map
}

/// Adapter for `http::HeaderMap`
///
/// Values that are not valid UTF-8 are decoded lossily.
pub fn from_http(headers: &http::HeaderMap) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    map
}

/// Adapter for an unordered string map
///
/// Entries are sorted by name so the result is deterministic.
pub fn from_string_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut entries: Vec<_> = headers.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Adapter for flat raw header arrays: `[name, value, name, value, ...]`
///
/// A trailing name without a value is ignored.
pub fn from_raw<T: AsRef<[u8]>>(raw: &[T]) -> HeaderMap {
    if raw.len() % 2 != 0 {
        tracing::debug!(
            entries = raw.len(),
            "Raw header list has an odd number of entries, ignoring the last one"
        );
    }
    raw.chunks_exact(2)
        .map(|pair| {
            (
                String::from_utf8_lossy(pair[0].as_ref()).into_owned(),
                String::from_utf8_lossy(pair[1].as_ref()).into_owned(),
            )
        })
        .collect()
}

fn lowercase_set(names: &[String]) -> HashSet<String> {
    names
        .iter()
        .map(|n| n.trim().to_ascii_lowercase())
        .filter(|n| !n.is_empty())
        .collect()
}

/// Applies allow/deny lists and redaction to a header set
#[derive(Debug, Clone)]
pub struct HeaderFilter {
    allow: Option<HashSet<String>>,
    deny: HashSet<String>,
    redactor: HeaderRedactor,
}

impl HeaderFilter {
    pub fn new(rules: &HeaderRules, redaction: &HeaderRedactionConfig) -> Self {
        Self::with_redactor(rules, HeaderRedactor::new(redaction))
    }

    pub fn with_redactor(rules: &HeaderRules, redactor: HeaderRedactor) -> Self {
        Self {
            allow: rules.allow.as_deref().map(lowercase_set),
            deny: rules.deny.as_deref().map(lowercase_set).unwrap_or_default(),
            redactor,
        }
    }

    /// Build the filter that applies to calls matched by `rule`
    ///
    /// Lists set on the domain rule replace the global list of the same kind.
    pub fn for_rule(
        global: &HeaderRules,
        rule: Option<&DomainRule>,
        redactor: &HeaderRedactor,
    ) -> Self {
        match rule.and_then(|r| r.headers.as_ref()) {
            Some(domain_rules) => {
                Self::with_redactor(&global.overlaid_with(domain_rules), redactor.clone())
            }
            None => Self::with_redactor(global, redactor.clone()),
        }
    }

    pub fn redactor(&self) -> &HeaderRedactor {
        &self.redactor
    }

    /// Whether a header name survives the allow/deny lists
    ///
    /// The deny list always wins over the allow list.
    pub fn is_allowed(&self, name: &str) -> bool {
        let name = name.trim().to_ascii_lowercase();
        if self.deny.contains(&name) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.contains(&name),
            None => true,
        }
    }

    /// Filter and redact a header set
    ///
    /// Order: deny list, then allow list, then redaction. Headers redacted
    /// with the `remove` strategy are dropped rather than emitted with a
    /// placeholder.
    pub fn apply(&self, headers: &HeaderMap) -> HeaderMap {
        let mut result = HeaderMap::new();
        for (name, value) in headers.iter() {
            if !self.is_allowed(name) {
                continue;
            }
            if let Some(value) = self.redactor.redact(name, value) {
                result.append_value(name, value);
            }
        }
        result
    }
}

impl Default for HeaderFilter {
    /// No allow/deny lists, default redaction
    fn default() -> Self {
        Self::with_redactor(&HeaderRules::default(), HeaderRedactor::default())
    }
}
