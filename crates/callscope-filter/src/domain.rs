//! Domain/path allow/deny matching
//!
//! Rule domains are either exact hosts (`api.example.com`) or suffix rules
//! starting with a dot (`.example.com`), which match the bare domain and all
//! of its subdomains. Deny rules are evaluated first and always win.

use callscope_core::{DomainFilterConfig, DomainRule};
use once_cell::sync::Lazy;
use regex::Regex;

/// Permissive extraction used when a URL does not parse
static URL_FALLBACK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:([A-Za-z][A-Za-z0-9+.\-]*)://)?(?:[^@/?#\s]*@)?(\[[^\]]*\]|[^/:?#\s]*)(?::(\d+))?([^?#\s]*)",
    )
    .unwrap()
});

/// Host and path of an outbound call target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    pub scheme: Option<String>,
    /// Lowercased host without port or trailing dot
    pub host: String,
    pub port: Option<u16>,
    /// Path component, always starting with `/`
    pub path: String,
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Parse a call target, never failing
///
/// Well-formed absolute URLs go through `http::Uri`. Anything else falls back
/// to a permissive regex so malformed input still yields a best-effort
/// host and path instead of being rejected.
pub fn parse_target(url: &str) -> TargetUrl {
    let url = url.trim();
    if let Ok(uri) = url.parse::<http::Uri>()
        && let Some(host) = uri.host()
    {
        return TargetUrl {
            scheme: uri.scheme_str().map(str::to_ascii_lowercase),
            host: normalize_host(host),
            port: uri.port_u16(),
            path: normalize_path(uri.path()),
        };
    }

    tracing::debug!(url = %url, "URL did not parse, using fallback extraction");

    match URL_FALLBACK_REGEX.captures(url) {
        Some(caps) => TargetUrl {
            scheme: caps.get(1).map(|m| m.as_str().to_ascii_lowercase()),
            host: caps
                .get(2)
                .map(|m| normalize_host(m.as_str()))
                .unwrap_or_default(),
            port: caps.get(3).and_then(|m| m.as_str().parse().ok()),
            path: normalize_path(caps.get(4).map(|m| m.as_str()).unwrap_or_default()),
        },
        None => TargetUrl {
            scheme: None,
            host: normalize_host(url),
            port: None,
            path: "/".to_string(),
        },
    }
}

/// Whether `domain` matches a rule domain
///
/// Exact (case-insensitive) equality, or a leading-dot rule matching either
/// the literal suffix or the bare domain itself.
pub fn domain_matches(domain: &str, rule_domain: &str) -> bool {
    let domain = normalize_host(domain);
    let rule = normalize_host(rule_domain);
    if rule.is_empty() {
        return false;
    }
    if domain == rule {
        return true;
    }
    match rule.strip_prefix('.') {
        Some(bare) => !bare.is_empty() && (domain.ends_with(&rule) || domain == bare),
        None => false,
    }
}

/// Whether a rule applies to a target (domain and, if restricted, path prefix)
pub fn rule_matches(rule: &DomainRule, target: &TargetUrl) -> bool {
    if !domain_matches(&target.host, &rule.domain) {
        return false;
    }
    rule.paths.is_empty()
        || rule
            .paths
            .iter()
            .any(|prefix| target.path.starts_with(prefix.as_str()))
}

/// Outcome of evaluating a target against the domain lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainVerdict<'a> {
    /// Captured; carries the allow rule that matched, if an allow list exists
    Captured(Option<&'a DomainRule>),
    /// Rejected by a deny rule
    Denied(&'a DomainRule),
    /// Rejected because an allow list exists and nothing in it matched
    NotAllowed,
}

impl DomainVerdict<'_> {
    pub fn is_captured(&self) -> bool {
        matches!(self, Self::Captured(_))
    }
}

/// Resolves targets to allow/deny verdicts and to their matching rule
#[derive(Debug, Clone, Default)]
pub struct DomainMatcher {
    allow: Vec<DomainRule>,
    deny: Vec<DomainRule>,
}

impl DomainMatcher {
    pub fn new(config: &DomainFilterConfig) -> Self {
        Self {
            allow: config.allow.clone(),
            deny: config.deny.clone(),
        }
    }

    pub fn from_rules(allow: Vec<DomainRule>, deny: Vec<DomainRule>) -> Self {
        Self { allow, deny }
    }

    /// Evaluate a parsed target
    pub fn evaluate<'a>(&'a self, target: &TargetUrl) -> DomainVerdict<'a> {
        if let Some(rule) = self.deny.iter().find(|rule| rule_matches(rule, target)) {
            return DomainVerdict::Denied(rule);
        }
        if self.allow.is_empty() {
            return DomainVerdict::Captured(None);
        }
        match self.allow.iter().find(|rule| rule_matches(rule, target)) {
            Some(rule) => DomainVerdict::Captured(Some(rule)),
            None => DomainVerdict::NotAllowed,
        }
    }

    /// Evaluate a raw URL
    pub fn verdict(&self, url: &str) -> DomainVerdict<'_> {
        self.evaluate(&parse_target(url))
    }

    pub fn should_capture(&self, url: &str) -> bool {
        self.verdict(url).is_captured()
    }

    pub fn should_capture_target(&self, target: &TargetUrl) -> bool {
        self.evaluate(target).is_captured()
    }

    /// First allow rule matching the target's domain and path
    ///
    /// Used to look up per-domain overrides; deny rules are not consulted.
    pub fn matching_rule(&self, target: &TargetUrl) -> Option<&DomainRule> {
        self.matching_index(target).map(|index| &self.allow[index])
    }

    /// Position of the first matching allow rule in the allow list
    pub fn matching_index(&self, target: &TargetUrl) -> Option<usize> {
        self.allow.iter().position(|rule| rule_matches(rule, target))
    }

    pub fn allow_rules(&self) -> &[DomainRule] {
        &self.allow
    }

    pub fn deny_rules(&self) -> &[DomainRule] {
        &self.deny
    }
}
