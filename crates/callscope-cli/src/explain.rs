//! Capture verdict for a single URL

use callscope_core::{CaptureConfig, DomainRule, HeaderMap, RequestScope};
use callscope_filter::{
    CapturePolicyResolver, DomainMatcher, DomainVerdict, HeaderFilter, HeaderRedactor,
    ResolvedFlag, TargetUrl, parse_target,
};
use std::fmt;

/// Everything the pipeline would decide about one call before it starts
#[derive(Debug, Clone)]
pub struct Explanation {
    pub target: TargetUrl,
    pub captured: bool,
    /// Human-readable reason for the domain verdict
    pub reason: String,
    pub rule: Option<DomainRule>,
    pub request_body: Option<ResolvedFlag>,
    pub response_body: Option<ResolvedFlag>,
    pub kept_headers: HeaderMap,
    pub dropped_headers: Vec<String>,
}

pub fn explain(
    config: &CaptureConfig,
    url: &str,
    headers: &HeaderMap,
    scope: &RequestScope,
) -> Explanation {
    let target = parse_target(url);
    let matcher = DomainMatcher::new(&config.domains);

    let (captured, reason) = if !config.enabled {
        (false, "capture is disabled".to_string())
    } else {
        match matcher.evaluate(&target) {
            DomainVerdict::Captured(Some(rule)) => {
                (true, format!("matched allow rule '{}'", rule.domain))
            }
            DomainVerdict::Captured(None) => (true, "no allow list configured".to_string()),
            DomainVerdict::Denied(rule) => (false, format!("matched deny rule '{}'", rule.domain)),
            DomainVerdict::NotAllowed => (false, "no allow rule matched".to_string()),
        }
    };

    let mut explanation = Explanation {
        target,
        captured,
        reason,
        rule: None,
        request_body: None,
        response_body: None,
        kept_headers: HeaderMap::new(),
        dropped_headers: Vec::new(),
    };
    if !captured {
        return explanation;
    }

    let rule = matcher.matching_rule(&explanation.target);
    let resolver = CapturePolicyResolver::new(config);
    explanation.request_body = Some(resolver.resolve_request(scope, rule));
    explanation.response_body = Some(resolver.resolve_response(scope, rule));

    let filter = HeaderFilter::for_rule(
        &config.headers,
        rule,
        &HeaderRedactor::new(&config.redaction),
    );
    explanation.kept_headers = filter.apply(headers);
    explanation.dropped_headers = headers
        .names()
        .filter(|name| !explanation.kept_headers.contains(name))
        .map(str::to_string)
        .collect();
    explanation.rule = rule.cloned();
    explanation
}

fn describe_flag(flag: &Option<ResolvedFlag>) -> String {
    match flag {
        Some(flag) => format!(
            "{} ({})",
            if flag.value { "captured" } else { "not captured" },
            flag.source.as_str()
        ),
        None => "-".to_string(),
    }
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = self
            .target
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            f,
            "Target:        {} (port {}, path {})",
            self.target.host, port, self.target.path
        )?;
        writeln!(
            f,
            "Verdict:       {} ({})",
            if self.captured { "captured" } else { "rejected" },
            self.reason
        )?;
        if !self.captured {
            return Ok(());
        }

        writeln!(f, "Request body:  {}", describe_flag(&self.request_body))?;
        writeln!(f, "Response body: {}", describe_flag(&self.response_body))?;
        if !self.kept_headers.is_empty() || !self.dropped_headers.is_empty() {
            writeln!(f, "Headers:")?;
            for (name, value) in self.kept_headers.iter() {
                writeln!(f, "  {}: {}", name, value.joined())?;
            }
            for name in &self.dropped_headers {
                writeln!(f, "  {} (dropped)", name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callscope_core::HeaderRules;
    use callscope_filter::PolicySource;

    fn headers() -> HeaderMap {
        [
            ("Authorization", "Bearer t"),
            ("Content-Type", "json"),
            ("X-Trace", "1"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_rejected_target() {
        let mut config = CaptureConfig::default();
        config.domains.allow = vec![DomainRule::new(".example.com")];

        let explanation = explain(
            &config,
            "https://notexample.com/x",
            &HeaderMap::new(),
            &RequestScope::default(),
        );
        assert!(!explanation.captured);
        assert_eq!(explanation.reason, "no allow rule matched");
        assert!(explanation.request_body.is_none());
        assert!(explanation.to_string().contains("rejected"));
    }

    #[test]
    fn test_captured_with_rule_and_headers() {
        let mut config = CaptureConfig {
            capture_response_body: Some(true),
            headers: HeaderRules::default()
                .allow(["authorization", "content-type"])
                .deny(["authorization"]),
            ..Default::default()
        };
        config.domains.allow =
            vec![DomainRule::new(".example.com").with_capture_request_body(true)];

        let explanation = explain(
            &config,
            "https://api.example.com/v1",
            &headers(),
            &RequestScope::new().with_capture_response_body(false),
        );

        assert!(explanation.captured);
        assert_eq!(
            explanation.request_body.map(|f| (f.value, f.source)),
            Some((true, PolicySource::DomainRule))
        );
        assert_eq!(
            explanation.response_body.map(|f| (f.value, f.source)),
            Some((false, PolicySource::CallScope))
        );
        assert_eq!(explanation.kept_headers.len(), 1);
        assert_eq!(
            explanation.kept_headers.first_value("content-type"),
            Some("json")
        );
        assert_eq!(
            explanation.dropped_headers,
            vec!["Authorization".to_string(), "X-Trace".to_string()]
        );

        let rendered = explanation.to_string();
        assert!(rendered.contains("matched allow rule '.example.com'"));
        assert!(rendered.contains("Request body:  captured (domain rule)"));
    }

    #[test]
    fn test_disabled_config() {
        let config = CaptureConfig {
            enabled: false,
            ..Default::default()
        };
        let explanation = explain(
            &config,
            "https://api.example.com/",
            &HeaderMap::new(),
            &RequestScope::default(),
        );
        assert!(!explanation.captured);
        assert_eq!(explanation.reason, "capture is disabled");
    }
}
