//! Sensitive header detection and value masking

use callscope_core::{HeaderRedactionConfig, HeaderValue, RedactionStrategy};

/// Classifies header names as sensitive and masks their values
#[derive(Debug, Clone)]
pub struct HeaderRedactor {
    enabled: bool,
    patterns: Vec<String>,
    strategy: RedactionStrategy,
    replacement: String,
    visible_chars: usize,
}

impl HeaderRedactor {
    /// Create a redactor from configuration
    pub fn new(config: &HeaderRedactionConfig) -> Self {
        let patterns = config
            .patterns
            .iter()
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        Self {
            enabled: config.enabled,
            patterns,
            strategy: config.strategy,
            replacement: config.replacement.clone(),
            visible_chars: config.visible_chars,
        }
    }

    /// A redactor that never touches any header
    pub fn disabled() -> Self {
        Self::new(&HeaderRedactionConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn strategy(&self) -> RedactionStrategy {
        self.strategy
    }

    /// Whether a header name matches a sensitive pattern
    ///
    /// Matching is case-insensitive and succeeds on equality, when the name
    /// contains the pattern, or when the pattern contains the name.
    pub fn is_sensitive(&self, name: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return false;
        }
        self.patterns
            .iter()
            .any(|pattern| name == *pattern || name.contains(pattern) || pattern.contains(&name))
    }

    /// Mask a single value with the configured strategy
    ///
    /// Returns `None` for the `Remove` strategy.
    pub fn mask(&self, value: &str) -> Option<String> {
        mask_value(value, self.strategy, &self.replacement, self.visible_chars)
    }

    /// Apply redaction to one header
    ///
    /// Returns `None` when the header must be dropped, the masked value when
    /// it is sensitive, and an unchanged copy otherwise.
    pub fn redact(&self, name: &str, value: &HeaderValue) -> Option<HeaderValue> {
        if !self.is_sensitive(name) {
            return Some(value.clone());
        }
        if self.strategy == RedactionStrategy::Remove {
            return None;
        }
        Some(value.map(|v| self.mask(v).unwrap_or_else(|| self.replacement.clone())))
    }
}

impl Default for HeaderRedactor {
    fn default() -> Self {
        Self::new(&HeaderRedactionConfig::default())
    }
}

/// Mask `value` according to `strategy`
///
/// Values no longer than `visible_chars` characters are always fully
/// replaced, never partially shown.
pub fn mask_value(
    value: &str,
    strategy: RedactionStrategy,
    replacement: &str,
    visible_chars: usize,
) -> Option<String> {
    let len = value.chars().count();
    match strategy {
        RedactionStrategy::Remove => None,
        RedactionStrategy::Replace => Some(replacement.to_string()),
        _ if len <= visible_chars || visible_chars == 0 => Some(replacement.to_string()),
        RedactionStrategy::ShowPrefix => {
            let prefix: String = value.chars().take(visible_chars).collect();
            Some(format!("{}{}", prefix, replacement))
        }
        RedactionStrategy::ShowSuffix => {
            let suffix: String = value.chars().skip(len - visible_chars).collect();
            Some(format!("{}{}", replacement, suffix))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redactor(strategy: RedactionStrategy, visible_chars: usize) -> HeaderRedactor {
        HeaderRedactor::new(&HeaderRedactionConfig {
            enabled: true,
            patterns: vec!["authorization".to_string(), "api-key".to_string()],
            strategy,
            replacement: "***".to_string(),
            visible_chars,
        })
    }

    #[test]
    fn test_sensitive_exact_and_case_insensitive() {
        let r = redactor(RedactionStrategy::Replace, 4);
        assert!(r.is_sensitive("authorization"));
        assert!(r.is_sensitive("Authorization"));
        assert!(r.is_sensitive("AUTHORIZATION"));
        assert!(!r.is_sensitive("content-type"));
    }

    #[test]
    fn test_sensitive_substring_match() {
        let r = redactor(RedactionStrategy::Replace, 4);
        // Name contains the pattern
        assert!(r.is_sensitive("Proxy-Authorization"));
        assert!(r.is_sensitive("x-api-key"));
        // Pattern contains the name
        assert!(r.is_sensitive("Author"));
    }

    #[test]
    fn test_disabled_redactor_never_sensitive() {
        let r = HeaderRedactor::disabled();
        assert!(!r.is_enabled());
        assert!(!r.is_sensitive("authorization"));
        let value = HeaderValue::from("Bearer abc");
        assert_eq!(r.redact("authorization", &value), Some(value));
    }

    #[test]
    fn test_empty_patterns_are_ignored() {
        let r = HeaderRedactor::new(&HeaderRedactionConfig {
            patterns: vec!["".to_string(), "  ".to_string()],
            ..Default::default()
        });
        assert!(!r.is_sensitive("content-type"));
    }

    #[test]
    fn test_replace_strategy() {
        let r = redactor(RedactionStrategy::Replace, 4);
        assert_eq!(r.mask("Bearer secret-token").as_deref(), Some("***"));
    }

    #[test]
    fn test_show_prefix_strategy() {
        let r = redactor(RedactionStrategy::ShowPrefix, 4);
        assert_eq!(r.mask("Bearer secret-token").as_deref(), Some("Bear***"));
    }

    #[test]
    fn test_show_suffix_strategy() {
        let r = redactor(RedactionStrategy::ShowSuffix, 4);
        assert_eq!(r.mask("Bearer secret-token").as_deref(), Some("***oken"));
    }

    #[test]
    fn test_remove_strategy_drops_header() {
        let r = redactor(RedactionStrategy::Remove, 4);
        assert_eq!(r.mask("anything"), None);
        assert_eq!(r.redact("authorization", &HeaderValue::from("x")), None);
        assert_eq!(
            r.redact("accept", &HeaderValue::from("x")),
            Some(HeaderValue::from("x"))
        );
    }

    #[test]
    fn test_short_values_fully_redacted_for_every_strategy() {
        for strategy in [
            RedactionStrategy::Replace,
            RedactionStrategy::ShowPrefix,
            RedactionStrategy::ShowSuffix,
        ] {
            for v in 0..6 {
                for len in 0..=v {
                    let value = "x".repeat(len);
                    assert_eq!(
                        mask_value(&value, strategy, "[R]", v).as_deref(),
                        Some("[R]"),
                        "strategy {:?}, visible {}, len {}",
                        strategy,
                        v,
                        len
                    );
                }
            }
        }
    }

    #[test]
    fn test_multibyte_values_are_char_safe() {
        let r = redactor(RedactionStrategy::ShowSuffix, 2);
        assert_eq!(r.mask("clé-été").as_deref(), Some("***té"));
        let r = redactor(RedactionStrategy::ShowPrefix, 2);
        assert_eq!(r.mask("été-clé").as_deref(), Some("ét***"));
    }

    #[test]
    fn test_redact_multiple_values_keeps_shape() {
        let r = redactor(RedactionStrategy::Replace, 4);
        let value = HeaderValue::from(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            r.redact("authorization", &value),
            Some(HeaderValue::from(vec!["***".to_string(), "***".to_string()]))
        );
    }

    #[test]
    fn test_default_patterns_cover_common_credentials() {
        let r = HeaderRedactor::default();
        for name in ["Authorization", "Cookie", "Set-Cookie", "X-API-Key", "X-Auth-Token"] {
            assert!(r.is_sensitive(name), "{} should be sensitive", name);
        }
        assert!(!r.is_sensitive("Content-Type"));
        assert!(!r.is_sensitive("Accept"));
    }
}
