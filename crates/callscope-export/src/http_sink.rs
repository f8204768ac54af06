//! HTTP collector sink

use crate::sink::{ExportError, ExportResult, PayloadSink};
use async_trait::async_trait;
use callscope_core::ExportPayload;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder};
use std::collections::BTreeMap;
use std::time::Duration;

/// Longest error body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 256;

#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    pub endpoint: String,
    /// Extra headers sent with every request, e.g. collector credentials
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl HttpSinkConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// POSTs each batch to a collector as a JSON array
pub struct HttpSink {
    client: Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> ExportResult<Self> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ExportError::Config(format!("Invalid header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ExportError::Config(format!(
                    "Invalid value for header '{}': {}",
                    name.as_str(),
                    e
                ))
            })?;
            default_headers.insert(name, value);
        }

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .user_agent(format!("callscope/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(default_headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PayloadSink for HttpSink {
    async fn export(&self, batch: &[ExportPayload]) -> ExportResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(batch)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                endpoint = %self.endpoint,
                count = batch.len(),
                "Delivered batch to collector"
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ExportError::HttpStatus {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
