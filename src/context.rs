//! Per-call context: trace position, tracer, cancellation and deadline.
//!
//! Every capability invocation receives a `CallContext`. It is cloned into
//! child spans and downstream calls; nothing in it is mutated in place.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::MeshError;
use crate::trace::{SpanGuard, TraceContext, Tracer};

#[derive(Clone, Debug)]
pub struct CallContext {
    trace: Option<TraceContext>,
    tracer: Tracer,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Context for an inbound call. `trace` is the remote parent, if the caller sent one.
    pub fn new(tracer: Tracer, trace: Option<TraceContext>, cancel: CancellationToken) -> Self {
        Self {
            trace,
            tracer,
            cancel,
            deadline: None,
        }
    }

    /// Tighten the deadline. A later deadline than the current one is ignored.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Open a child span and return the context the work inside it should use.
    pub fn start_span(&self, name: &'static str) -> (CallContext, SpanGuard) {
        let (trace, guard) = self.tracer.start_span(self.trace.as_ref(), name);
        let child = CallContext {
            trace: Some(trace),
            tracer: self.tracer.clone(),
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        };
        (child, guard)
    }

    /// Fail fast if the call is already cancelled or out of time.
    pub fn check(&self) -> Result<(), MeshError> {
        if self.cancel.is_cancelled() {
            return Err(MeshError::Cancelled);
        }
        if matches!(self.deadline, Some(d) if Instant::now() >= d) {
            return Err(MeshError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the call is cancelled or the deadline passes.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, MeshError>
    where
        F: Future<Output = Result<T, MeshError>>,
    {
        self.check()?;
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MeshError::Cancelled),
            _ = expired => Err(MeshError::DeadlineExceeded),
            result = fut => result,
        }
    }
}
