//! The process-wide tracer and its batching export pipeline.
//!
//! # Data Flow
//! ```text
//! SpanGuard::end()
//!     → span_closed() (counters, sampling)
//!     → unbounded queue
//!     → batch task (size / interval / flush triggers)
//!     → SpanExporter::export()
//! ```
//!
//! # Design Decisions
//! - Ending a span never blocks on the exporter
//! - Export failures are logged and the batch is dropped
//! - `shutdown` is bounded by a deadline and reports `FlushTimeout` instead of hanging

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::MeshError;
use crate::trace::context::TraceContext;
use crate::trace::exporter::SpanExporter;
use crate::trace::span::{SpanGuard, SpanRecord};

/// Batching parameters for the export pipeline.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub max_batch_size: usize,
    pub export_interval: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 512,
            export_interval: Duration::from_secs(5),
        }
    }
}

/// Snapshot of span bookkeeping, used to detect leaked spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpanStats {
    pub opened: u64,
    pub closed: u64,
}

impl SpanStats {
    pub fn open_now(&self) -> u64 {
        self.opened.saturating_sub(self.closed)
    }
}

enum Command {
    Export(SpanRecord),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) struct TracerShared {
    service: String,
    sample_roots: bool,
    queue: mpsc::UnboundedSender<Command>,
    opened: AtomicU64,
    closed: AtomicU64,
    shut_down: AtomicBool,
}

impl TracerShared {
    pub(crate) fn service(&self) -> &str {
        &self.service
    }

    pub(crate) fn span_opened(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn span_closed(&self, record: SpanRecord, sampled: bool) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if sampled && self.queue.send(Command::Export(record)).is_err() {
            tracing::debug!("Span finished after tracer shutdown, dropping it");
        }
    }
}

/// Starts spans and owns the exporter pipeline.
///
/// Cheap to clone; every clone feeds the same pipeline. One tracer is built
/// per process during startup and handed to calls through their context.
#[derive(Clone)]
pub struct Tracer {
    shared: Arc<TracerShared>,
}

impl Tracer {
    /// Create the tracer and spawn its batch task on the current runtime.
    pub fn new(
        service: impl Into<String>,
        sample_roots: bool,
        exporter: Arc<dyn SpanExporter>,
        settings: BatchSettings,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_batcher(rx, exporter, settings));

        Self {
            shared: Arc::new(TracerShared {
                service: service.into(),
                sample_roots,
                queue,
                opened: AtomicU64::new(0),
                closed: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn service(&self) -> &str {
        self.shared.service()
    }

    /// Open a span named `name`.
    ///
    /// With a parent the span joins the parent's trace and inherits its baggage;
    /// without one a new root trace is started.
    pub fn start_span(
        &self,
        parent: Option<&TraceContext>,
        name: &'static str,
    ) -> (TraceContext, SpanGuard) {
        let (context, parent_span_id) = match parent {
            Some(parent) => (parent.child(), Some(parent.span_id())),
            None => (TraceContext::new_root(self.shared.sample_roots), None),
        };
        let guard = SpanGuard::open(
            Arc::clone(&self.shared),
            name,
            context.clone(),
            parent_span_id,
        );
        (context, guard)
    }

    pub fn stats(&self) -> SpanStats {
        SpanStats {
            opened: self.shared.opened.load(Ordering::SeqCst),
            closed: self.shared.closed.load(Ordering::SeqCst),
        }
    }

    /// Export everything queued so far, waiting at most `timeout`.
    pub async fn force_flush(&self, timeout: Duration) -> Result<(), MeshError> {
        let (ack, done) = oneshot::channel();
        if self.shared.queue.send(Command::Flush(ack)).is_err() {
            return Ok(());
        }
        wait_for_ack(done, timeout).await
    }

    /// Flush buffered spans and stop the pipeline.
    ///
    /// Fails with `FlushTimeout` when the exporter does not finish before the
    /// deadline. Calling it again is a no-op.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), MeshError> {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (ack, done) = oneshot::channel();
        if self.shared.queue.send(Command::Shutdown(ack)).is_err() {
            return Ok(());
        }
        wait_for_ack(done, timeout).await
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("service", &self.shared.service)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn wait_for_ack(done: oneshot::Receiver<()>, timeout: Duration) -> Result<(), MeshError> {
    match tokio::time::timeout(timeout, done).await {
        // A dropped ack means the batch task is already gone; nothing left to flush.
        Ok(_) => Ok(()),
        Err(_) => Err(MeshError::FlushTimeout(timeout)),
    }
}

async fn run_batcher(
    mut rx: mpsc::UnboundedReceiver<Command>,
    exporter: Arc<dyn SpanExporter>,
    settings: BatchSettings,
) {
    let max_batch = settings.max_batch_size.max(1);
    let mut buffer: Vec<SpanRecord> = Vec::with_capacity(max_batch);
    let mut ticker = tokio::time::interval(settings.export_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Export(record)) => {
                    buffer.push(record);
                    if buffer.len() >= max_batch {
                        export_batch(exporter.as_ref(), &mut buffer).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    export_batch(exporter.as_ref(), &mut buffer).await;
                    let _ = ack.send(());
                }
                Some(Command::Shutdown(ack)) => {
                    // Spans queued ahead of the shutdown command are already buffered.
                    export_batch(exporter.as_ref(), &mut buffer).await;
                    exporter.shutdown().await;
                    let _ = ack.send(());
                    break;
                }
                None => {
                    export_batch(exporter.as_ref(), &mut buffer).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    export_batch(exporter.as_ref(), &mut buffer).await;
                }
            }
        }
    }

    tracing::debug!("Span batch task stopped");
}

async fn export_batch(exporter: &dyn SpanExporter, buffer: &mut Vec<SpanRecord>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    let count = batch.len();
    if let Err(e) = exporter.export(batch).await {
        tracing::warn!(error = %e, spans = count, "Span export failed, batch dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::exporter::{ExportError, MemoryExporter};
    use crate::trace::span::SpanStatus;

    fn memory_tracer(batch: usize) -> (Tracer, Arc<MemoryExporter>) {
        let exporter = Arc::new(MemoryExporter::new());
        let tracer = Tracer::new(
            "test-service",
            true,
            exporter.clone(),
            BatchSettings {
                max_batch_size: batch,
                export_interval: Duration::from_secs(60),
            },
        );
        (tracer, exporter)
    }

    #[tokio::test]
    async fn root_span_without_parent() {
        let (tracer, _) = memory_tracer(16);
        let (ctx, guard) = tracer.start_span(None, "root");
        assert_eq!(guard.context(), &ctx);
        assert_eq!(tracer.stats(), SpanStats { opened: 1, closed: 0 });
        drop(guard);
        assert_eq!(tracer.stats(), SpanStats { opened: 1, closed: 1 });
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let (tracer, exporter) = memory_tracer(16);
        let (_, mut guard) = tracer.start_span(None, "twice");
        guard.end();
        guard.end();
        drop(guard);

        assert_eq!(tracer.stats().closed, 1);
        tracer.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(exporter.spans().len(), 1);
    }

    #[tokio::test]
    async fn child_span_links_to_parent() {
        let (tracer, exporter) = memory_tracer(16);
        let (root_ctx, root) = tracer.start_span(None, "parent");
        let (child_ctx, child) = tracer.start_span(Some(&root_ctx), "child");
        assert_eq!(child_ctx.trace_id(), root_ctx.trace_id());
        drop(child);
        drop(root);

        tracer.shutdown(Duration::from_secs(1)).await.unwrap();
        let child = exporter.spans_named("child").pop().unwrap();
        assert_eq!(child.parent_span_id, Some(root_ctx.span_id()));
        assert_eq!(child.trace_id, root_ctx.trace_id());
    }

    #[tokio::test]
    async fn span_closed_on_error_path() {
        let (tracer, exporter) = memory_tracer(16);

        fn fallible(tracer: &Tracer) -> Result<(), MeshError> {
            let (_, mut span) = tracer.start_span(None, "fallible");
            let err = MeshError::NotFound("user".into());
            span.record_error(&err);
            Err(err)
        }

        assert!(fallible(&tracer).is_err());
        assert_eq!(tracer.stats().open_now(), 0);

        tracer.shutdown(Duration::from_secs(1)).await.unwrap();
        let span = exporter.spans_named("fallible").pop().unwrap();
        assert!(matches!(span.status, SpanStatus::Error(ref m) if m.contains("user")));
    }

    #[tokio::test]
    async fn full_batch_is_exported_without_flush() {
        let (tracer, exporter) = memory_tracer(2);
        for _ in 0..2 {
            let (_, span) = tracer.start_span(None, "batched");
            drop(span);
        }
        for _ in 0..50 {
            if exporter.spans().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(exporter.spans().len(), 2);
    }

    #[tokio::test]
    async fn force_flush_exports_partial_batch() {
        let (tracer, exporter) = memory_tracer(100);
        let (_, span) = tracer.start_span(None, "partial");
        drop(span);
        tracer.force_flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(exporter.spans().len(), 1);
    }

    struct StuckExporter;

    #[async_trait::async_trait]
    impl SpanExporter for StuckExporter {
        async fn export(&self, _batch: Vec<SpanRecord>) -> Result<(), ExportError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_reports_flush_timeout() {
        let tracer = Tracer::new("stuck", true, Arc::new(StuckExporter), BatchSettings::default());
        let (_, span) = tracer.start_span(None, "never-exported");
        drop(span);

        let err = tracer.shutdown(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, MeshError::FlushTimeout(_)));
        // Second shutdown does not wait again.
        tracer.shutdown(Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn unsampled_spans_are_counted_but_not_exported() {
        let exporter = Arc::new(MemoryExporter::new());
        let tracer = Tracer::new("quiet", false, exporter.clone(), BatchSettings::default());
        let (_, span) = tracer.start_span(None, "unsampled");
        drop(span);

        tracer.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(tracer.stats().closed, 1);
        assert!(exporter.spans().is_empty());
    }
}
