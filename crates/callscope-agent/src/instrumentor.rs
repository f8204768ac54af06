//! Instrumentor: the composition root of the capture pipeline
//!
//! Calls flow through here in three steps:
//! 1. `start_call` decides whether a call is captured at all and fixes its
//!    body policy and header filter
//! 2. the caller drives the returned `CallHandle` (or routes events by id
//!    through the registry)
//! 3. `finish`/`fail`/`abort` turn the handle into a payload, check
//!    eligibility, run completion callbacks and hand it to the export
//!    pipeline
//!
//! None of these steps block on I/O or return errors to the caller.

use crate::scoped::ScopedInstrumentor;
use callscope_capture::{
    CallEvent, CallHandle, CallRegistry, FinishedCall, OutboundRequest, RecordExtractor,
};
use callscope_core::{
    CallId, CaptureConfig, Error, ExportPayload, PayloadOverrides, RequestScope, Result,
};
use callscope_export::{
    EligibilityFilter, ExportPipeline, PayloadSink, PipelineBuilder, resolve_target,
    sink_from_config,
};
use callscope_filter::{
    CapturePolicyResolver, DomainMatcher, DomainVerdict, HeaderFilter, HeaderRedactor,
};
use callscope_observability::metrics::{DropReason, PipelineMetrics};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Record-completion callback
pub type PayloadCallback = Arc<dyn Fn(&ExportPayload) + Send + Sync>;

struct Inner {
    config: CaptureConfig,
    matcher: Arc<DomainMatcher>,
    resolver: CapturePolicyResolver,
    global_headers: Arc<HeaderFilter>,
    /// One filter per allow rule, indexed like the allow list
    rule_headers: Vec<Arc<HeaderFilter>>,
    extractor: RecordExtractor,
    eligibility: EligibilityFilter,
    registry: CallRegistry,
    callbacks: RwLock<Vec<PayloadCallback>>,
    pipeline: ExportPipeline,
    metrics: Arc<PipelineMetrics>,
}

/// Cheap to clone; all clones share one pipeline
#[derive(Clone)]
pub struct Instrumentor {
    inner: Arc<Inner>,
}

impl Instrumentor {
    /// Create an instrumentor delivering to `sink`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: CaptureConfig, sink: Arc<dyn PayloadSink>) -> Result<Self> {
        InstrumentorBuilder::new(config).add_sink(sink).build()
    }

    /// Create an instrumentor delivering to the sink named in `config.export.sink`
    pub fn from_config(config: CaptureConfig) -> Result<Self> {
        InstrumentorBuilder::new(config).build()
    }

    pub fn builder(config: CaptureConfig) -> InstrumentorBuilder {
        InstrumentorBuilder::new(config)
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.inner.metrics
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.inner.registry
    }

    /// Begin tracking an outbound call
    ///
    /// Returns `None` when capture is disabled or the domain lists reject
    /// the target; the caller should then skip all further tracking.
    pub fn start_call(&self, request: OutboundRequest, scope: &RequestScope) -> Option<CallHandle> {
        let inner = &self.inner;
        if !inner.config.enabled {
            return None;
        }

        let target = request.target();
        match inner.matcher.evaluate(&target) {
            DomainVerdict::Captured(_) => {}
            DomainVerdict::Denied(rule) => {
                tracing::trace!(host = %target.host, rule = %rule.domain, "Call denied by domain rule");
                return None;
            }
            DomainVerdict::NotAllowed => {
                tracing::trace!(host = %target.host, "Call not in domain allow list");
                return None;
            }
        }

        let rule_index = inner.matcher.matching_index(&target);
        let rule = rule_index.map(|i| &inner.matcher.allow_rules()[i]);
        let policy = inner.resolver.resolve(scope, rule);
        let headers = rule_index
            .and_then(|i| inner.rule_headers.get(i))
            .unwrap_or(&inner.global_headers)
            .clone();

        let handle = CallHandle::new(CallId::new(), request, policy, inner.config.body_limits)
            .with_scope(scope.clone())
            .with_header_filter(headers);

        tracing::trace!(
            call_id = %handle.call_id(),
            host = %target.host,
            capture_request_body = policy.capture_request_body,
            capture_response_body = policy.capture_response_body,
            "Started outbound call"
        );
        Some(handle)
    }

    /// Start a call and park it in the registry for id-keyed event dispatch
    pub fn begin_call(&self, request: OutboundRequest, scope: &RequestScope) -> Option<CallId> {
        self.start_call(request, scope)
            .map(|handle| self.inner.registry.begin(handle))
    }

    /// Route an event to a registered call; terminal events complete it
    pub fn dispatch(&self, call_id: CallId, event: CallEvent) {
        if let Some(call) = self.inner.registry.dispatch(call_id, event) {
            self.record_finished(call);
        }
    }

    /// Complete a call after its response finished
    pub fn finish(&self, handle: CallHandle, at: Instant) {
        if let Some(call) = handle.complete(at) {
            self.record_finished(call);
        }
    }

    /// Complete a call that ended in a transport or protocol error
    pub fn fail(&self, handle: CallHandle, message: impl Into<String>, at: Instant) {
        if let Some(call) = handle.fail(message, at) {
            self.record_finished(call);
        }
    }

    /// Complete a call that was cancelled before it finished
    pub fn abort(&self, handle: CallHandle, reason: impl Into<String>, at: Instant) {
        if let Some(call) = handle.abort(reason, at) {
            self.record_finished(call);
        }
    }

    /// Register a callback invoked with every exported payload
    pub fn on_payload<F>(&self, callback: F)
    where
        F: Fn(&ExportPayload) + Send + Sync + 'static,
    {
        if let Ok(mut callbacks) = self.inner.callbacks.write() {
            callbacks.push(Arc::new(callback));
        }
    }

    /// Handle whose calls all carry `scope`
    pub fn scoped(&self, scope: RequestScope) -> ScopedInstrumentor {
        ScopedInstrumentor::new(self.clone(), scope)
    }

    /// Copy of a substrate-produced payload with the scope's attributes applied
    pub fn enrich(&self, payload: &ExportPayload, scope: &RequestScope) -> ExportPayload {
        let overrides = scope
            .to_attributes()
            .into_iter()
            .fold(PayloadOverrides::new(), |overrides, (key, value)| {
                overrides.set(key, value)
            });
        payload.with_overrides(&overrides)
    }

    /// Send a payload produced outside the capture path through the export path
    ///
    /// Header allow/deny lists and redaction apply as they do to captured calls.
    /// Returns false if the payload was ineligible or dropped.
    pub fn record_payload(&self, payload: ExportPayload) -> bool {
        let payload = self.filter_headers(payload);
        self.export_payload(payload)
    }

    /// Apply the header filter of the domain rule matching the payload's target
    fn filter_headers(&self, mut payload: ExportPayload) -> ExportPayload {
        let inner = &self.inner;
        let filter = resolve_target(&payload)
            .and_then(|target| inner.matcher.matching_index(&target))
            .and_then(|i| inner.rule_headers.get(i))
            .unwrap_or(&inner.global_headers);
        payload.request_headers = filter.apply(&payload.request_headers);
        payload.response_headers = filter.apply(&payload.response_headers);
        payload
    }

    fn export_payload(&self, payload: ExportPayload) -> bool {
        let inner = &self.inner;
        let verdict = inner.eligibility.check(&payload);
        if !verdict.is_eligible() {
            tracing::debug!(call_id = %payload.call_id, ?verdict, "Payload not eligible for export");
            inner.metrics.record_dropped(DropReason::Ineligible);
            return false;
        }

        self.run_callbacks(&payload);
        inner.pipeline.submit(payload)
    }

    /// Deliver everything recorded so far
    pub async fn force_flush(&self) -> bool {
        self.inner.pipeline.force_flush().await
    }

    /// Abort in-flight registered calls, drain the pipeline and stop the worker
    pub async fn shutdown(&self) {
        let pending = self.inner.registry.abort_all("instrumentor shut down");
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Aborted in-flight calls on shutdown");
        }
        for call in pending {
            self.record_finished(call);
        }
        self.inner.pipeline.shutdown().await;
    }

    fn record_finished(&self, call: FinishedCall) {
        let inner = &self.inner;
        let call_id = call.call_id;

        if call.request_truncated() {
            inner.metrics.record_truncated("request");
        }
        if call.response_truncated() {
            inner.metrics.record_truncated("response");
        }

        let payload = match catch_unwind(AssertUnwindSafe(|| inner.extractor.extract(&call))) {
            Ok(payload) => payload,
            Err(_) => {
                tracing::error!(call_id = %call_id, "Record extraction panicked, dropping call");
                return;
            }
        };

        // Headers were filtered when the call finalized
        self.export_payload(payload);
    }

    fn run_callbacks(&self, payload: &ExportPayload) {
        let callbacks = match self.inner.callbacks.read() {
            Ok(callbacks) => callbacks.clone(),
            Err(_) => return,
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                tracing::warn!(call_id = %payload.call_id, "Payload callback panicked");
            }
        }
    }
}

/// Builder for Instrumentor
pub struct InstrumentorBuilder {
    config: CaptureConfig,
    sinks: Vec<Arc<dyn PayloadSink>>,
    callbacks: Vec<PayloadCallback>,
    legacy_attributes: bool,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl InstrumentorBuilder {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
            callbacks: Vec::new(),
            legacy_attributes: false,
            metrics: None,
        }
    }

    /// Deliver to this sink instead of the configured one (may be repeated)
    pub fn add_sink(mut self, sink: Arc<dyn PayloadSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn on_payload<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ExportPayload) + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// Also emit pre-1.0 semantic convention attribute names
    pub fn legacy_attributes(mut self, enabled: bool) -> Self {
        self.legacy_attributes = enabled;
        self
    }

    /// Share a metrics registry with the host
    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Instrumentor> {
        let config = self.config;
        config.validate()?;

        let sinks = if self.sinks.is_empty() {
            vec![sink_from_config(&config.export.sink).map_err(|e| Error::Config(e.to_string()))?]
        } else {
            self.sinks
        };

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(
                PipelineMetrics::new()
                    .map_err(|e| Error::Internal(format!("Failed to create metrics: {}", e)))?,
            ),
        };

        let matcher = Arc::new(DomainMatcher::new(&config.domains));
        let redactor = HeaderRedactor::new(&config.redaction);
        let global_headers = Arc::new(HeaderFilter::with_redactor(&config.headers, redactor.clone()));
        let rule_headers = matcher
            .allow_rules()
            .iter()
            .map(|rule| match rule.headers {
                Some(_) => Arc::new(HeaderFilter::for_rule(&config.headers, Some(rule), &redactor)),
                None => global_headers.clone(),
            })
            .collect();

        let pipeline = sinks
            .into_iter()
            .fold(PipelineBuilder::new().config(&config.export), |builder, sink| {
                builder.add_sink(sink)
            })
            .metrics(metrics.clone())
            .build();

        tracing::info!(
            enabled = config.enabled,
            allow_rules = config.domains.allow.len(),
            deny_rules = config.domains.deny.len(),
            "Instrumentor initialized"
        );

        Ok(Instrumentor {
            inner: Arc::new(Inner {
                resolver: CapturePolicyResolver::new(&config),
                eligibility: EligibilityFilter::new(matcher.clone()),
                extractor: RecordExtractor::new().with_legacy_attributes(self.legacy_attributes),
                registry: CallRegistry::new(),
                callbacks: RwLock::new(self.callbacks),
                matcher,
                global_headers,
                rule_headers,
                pipeline,
                metrics,
                config,
            }),
        })
    }
}
