//! Spans and their scoped release.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

use crate::trace::context::{SpanId, TraceContext, TraceId};
use crate::trace::tracer::TracerShared;

/// Final status of a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error(String),
}

/// A finished span as handed to exporters.
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub service: String,
    pub name: &'static str,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub start_time: SystemTime,
    pub duration: Duration,
    pub status: SpanStatus,
    pub baggage: BTreeMap<String, String>,
}

struct ActiveSpan {
    tracer: Arc<TracerShared>,
    name: &'static str,
    context: TraceContext,
    parent_span_id: Option<SpanId>,
    start_time: SystemTime,
    started: Instant,
    error: Option<String>,
}

/// Handle to an open span. Ending it is idempotent and dropping it ends it,
/// so the span closes on every exit path of the code holding it.
#[must_use = "dropping the guard immediately ends the span"]
pub struct SpanGuard {
    active: Option<ActiveSpan>,
    context: TraceContext,
}

impl SpanGuard {
    pub(crate) fn open(
        tracer: Arc<TracerShared>,
        name: &'static str,
        context: TraceContext,
        parent_span_id: Option<SpanId>,
    ) -> Self {
        tracer.span_opened();
        Self {
            active: Some(ActiveSpan {
                tracer,
                name,
                context: context.clone(),
                parent_span_id,
                start_time: SystemTime::now(),
                started: Instant::now(),
                error: None,
            }),
            context,
        }
    }

    /// Context of this span; children derive from it.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn is_ended(&self) -> bool {
        self.active.is_none()
    }

    /// Mark the span as failed. The last recorded error wins.
    pub fn record_error(&mut self, error: &impl fmt::Display) {
        if let Some(active) = self.active.as_mut() {
            active.error = Some(error.to_string());
        }
    }

    /// Close the span. Later calls do nothing.
    pub fn end(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let record = SpanRecord {
            service: active.tracer.service().to_string(),
            name: active.name,
            trace_id: active.context.trace_id(),
            span_id: active.context.span_id(),
            parent_span_id: active.parent_span_id,
            start_time: active.start_time,
            duration: active.started.elapsed(),
            status: match active.error {
                Some(message) => SpanStatus::Error(message),
                None => SpanStatus::Ok,
            },
            baggage: active.context.baggage_entries().clone(),
        };
        active
            .tracer
            .span_closed(record, active.context.is_sampled());
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.end();
    }
}

impl fmt::Debug for SpanGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanGuard")
            .field("name", &self.active.as_ref().map(|a| a.name))
            .field("trace_id", &self.context.trace_id())
            .field("span_id", &self.context.span_id())
            .field("ended", &self.is_ended())
            .finish()
    }
}
