//! Request-scoped instrumentation
//!
//! A `ScopedInstrumentor` carries a `RequestScope` explicitly. Only calls
//! started through it see the scope's overrides, so two scopes used
//! concurrently never leak into each other.

use crate::instrumentor::Instrumentor;
use callscope_capture::{CallHandle, OutboundRequest};
use callscope_core::{ExportPayload, RequestScope};
use std::future::Future;
use tracing::Instrument;

#[derive(Clone)]
pub struct ScopedInstrumentor {
    instrumentor: Instrumentor,
    scope: RequestScope,
}

impl ScopedInstrumentor {
    pub(crate) fn new(instrumentor: Instrumentor, scope: RequestScope) -> Self {
        Self {
            instrumentor,
            scope,
        }
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    pub fn instrumentor(&self) -> &Instrumentor {
        &self.instrumentor
    }

    /// Nested scope; values from `inner` win over this one
    pub fn scoped(&self, inner: RequestScope) -> ScopedInstrumentor {
        Self::new(self.instrumentor.clone(), self.scope.merged_with(&inner))
    }

    /// Begin tracking a call under this scope
    pub fn start_call(&self, request: OutboundRequest) -> Option<CallHandle> {
        self.instrumentor.start_call(request, &self.scope)
    }

    /// Apply this scope's attributes to a substrate-produced payload
    pub fn enrich(&self, payload: &ExportPayload) -> ExportPayload {
        self.instrumentor.enrich(payload, &self.scope)
    }

    /// Run a closure that issues calls through this scope
    pub fn run<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ScopedInstrumentor) -> R,
    {
        let _span = self.span().entered();
        f(self)
    }

    /// Run a future that issues calls through this scope
    pub async fn run_async<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce(ScopedInstrumentor) -> Fut,
        Fut: Future<Output = R>,
    {
        let span = self.span();
        f(self.clone()).instrument(span).await
    }

    fn span(&self) -> tracing::Span {
        tracing::debug_span!(
            "callscope_scope",
            user_id = self.scope.user_id.as_deref(),
            session_id = self.scope.session_id.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callscope_core::CaptureConfig;
    use callscope_export::MemorySink;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scope_applies_only_to_its_calls() {
        let instrumentor =
            Instrumentor::new(CaptureConfig::default(), Arc::new(MemorySink::new())).unwrap();

        let with_bodies = instrumentor.scoped(RequestScope::new().with_capture_request_body(true));
        let scoped_call = with_bodies
            .start_call(OutboundRequest::new("POST", "https://api.example.com/a"))
            .unwrap();
        let plain_call = instrumentor
            .start_call(
                OutboundRequest::new("POST", "https://api.example.com/b"),
                &RequestScope::default(),
            )
            .unwrap();

        assert!(scoped_call.policy().capture_request_body);
        assert!(!plain_call.policy().capture_request_body);
        instrumentor.shutdown().await;
    }

    #[tokio::test]
    async fn test_nested_scope_merges() {
        let instrumentor =
            Instrumentor::new(CaptureConfig::default(), Arc::new(MemorySink::new())).unwrap();

        let outer = instrumentor.scoped(
            RequestScope::new()
                .with_user_id("u-1")
                .with_capture_response_body(true),
        );
        let inner = outer.scoped(RequestScope::new().with_capture_response_body(false));

        assert_eq!(inner.scope().user_id.as_deref(), Some("u-1"));
        assert_eq!(inner.scope().capture_response_body, Some(false));
        assert_eq!(outer.scope().capture_response_body, Some(true));
        instrumentor.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_and_run_async() {
        let instrumentor =
            Instrumentor::new(CaptureConfig::default(), Arc::new(MemorySink::new())).unwrap();
        let scoped = instrumentor.scoped(RequestScope::new().with_session_id("s-9"));

        let sync_policy = scoped.run(|s| {
            s.start_call(OutboundRequest::new("GET", "https://api.example.com/"))
                .map(|handle| handle.policy())
        });
        assert!(sync_policy.is_some());

        let session = scoped
            .run_async(|s| async move { s.scope().session_id.clone() })
            .await;
        assert_eq!(session.as_deref(), Some("s-9"));
        instrumentor.shutdown().await;
    }
}
