//! Distributed tracing support.
//!
//! # Data Flow
//! ```text
//! Inbound call (RPC metadata / HTTP headers)
//!     → propagation.rs (extract traceparent + baggage)
//!     → tracer.rs (start child span per capability)
//!     → propagation.rs (inject into downstream call metadata)
//!     → span.rs (guard closes span on every exit path)
//!     → exporter.rs (batched export to collector / logs / memory)
//! ```
//!
//! # Design Decisions
//! - Supports W3C Trace Context and Baggage headers
//! - The tracer is an explicit value carried in each call's context, never a global
//! - Export is best-effort: failures are logged, shutdown flush is deadline-bound

pub mod context;
pub mod exporter;
pub mod propagation;
pub mod span;
pub mod tracer;

pub use context::{SpanId, TraceContext, TraceId};
pub use exporter::{HttpExporter, LogExporter, MemoryExporter, SpanExporter};
pub use span::{SpanGuard, SpanRecord, SpanStatus};
pub use tracer::{BatchSettings, SpanStats, Tracer};
