//! Span exporters.
//!
//! - `HttpExporter`: POSTs JSON batches to a trace collector
//! - `LogExporter`: writes each span as a structured log event
//! - `MemoryExporter`: keeps spans in memory for inspection

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::error::MeshError;
use crate::trace::context::TraceId;
use crate::trace::span::{SpanRecord, SpanStatus};

/// Path appended to the collector endpoint, as OTLP/HTTP collectors expect.
const TRACES_PATH: &str = "v1/traces";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("collector request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("collector rejected batch with status {0}")]
    Rejected(u16),
}

/// Destination for finished spans.
#[async_trait]
pub trait SpanExporter: Send + Sync + 'static {
    async fn export(&self, batch: Vec<SpanRecord>) -> Result<(), ExportError>;

    /// Release exporter resources. Called once, after the final export.
    async fn shutdown(&self) {}
}

/// Sends span batches to a collector over HTTP.
pub struct HttpExporter {
    client: reqwest::Client,
    url: Url,
}

#[derive(Serialize)]
struct ExportBody<'a> {
    spans: &'a [SpanRecord],
}

impl HttpExporter {
    /// `endpoint` may omit the scheme (`jaeger:4318`), in which case plain HTTP is used.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, MeshError> {
        let url = collector_url(endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MeshError::ConfigInvalid(format!("trace exporter client: {}", e)))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Resolve the collector endpoint into the URL batches are posted to.
pub fn collector_url(endpoint: &str) -> Result<Url, MeshError> {
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };
    let base = Url::parse(&with_scheme)
        .map_err(|e| MeshError::ConfigInvalid(format!("collector endpoint {:?}: {}", endpoint, e)))?;
    if base.path() == "/" {
        base.join(TRACES_PATH)
            .map_err(|e| MeshError::ConfigInvalid(format!("collector endpoint {:?}: {}", endpoint, e)))
    } else {
        Ok(base)
    }
}

#[async_trait]
impl SpanExporter for HttpExporter {
    async fn export(&self, batch: Vec<SpanRecord>) -> Result<(), ExportError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&ExportBody { spans: &batch })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::Rejected(status.as_u16()));
        }
        tracing::trace!(spans = batch.len(), url = %self.url, "Span batch exported");
        Ok(())
    }
}

/// Emits spans as `tracing` events. Used when no collector is configured.
#[derive(Debug, Default)]
pub struct LogExporter;

#[async_trait]
impl SpanExporter for LogExporter {
    async fn export(&self, batch: Vec<SpanRecord>) -> Result<(), ExportError> {
        for span in batch {
            let error = match &span.status {
                SpanStatus::Ok => None,
                SpanStatus::Error(message) => Some(message.as_str()),
            };
            tracing::info!(
                target: "svc_mesh::spans",
                service = %span.service,
                span_name = span.name,
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                parent_span_id = ?span.parent_span_id.map(|id| id.to_string()),
                duration_us = span.duration.as_micros() as u64,
                error,
                "span finished"
            );
        }
        Ok(())
    }
}

/// Keeps every exported span in memory.
#[derive(Debug, Default)]
pub struct MemoryExporter {
    spans: Mutex<Vec<SpanRecord>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<SpanRecord> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn spans_named(&self, name: &str) -> Vec<SpanRecord> {
        self.spans().into_iter().filter(|s| s.name == name).collect()
    }

    pub fn spans_in_trace(&self, trace_id: TraceId) -> Vec<SpanRecord> {
        self.spans()
            .into_iter()
            .filter(|s| s.trace_id == trace_id)
            .collect()
    }

    pub fn clear(&self) {
        match self.spans.lock() {
            Ok(mut spans) => spans.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

#[async_trait]
impl SpanExporter for MemoryExporter {
    async fn export(&self, batch: Vec<SpanRecord>) -> Result<(), ExportError> {
        match self.spans.lock() {
            Ok(mut spans) => spans.extend(batch),
            Err(poisoned) => poisoned.into_inner().extend(batch),
        }
        Ok(())
    }
}
