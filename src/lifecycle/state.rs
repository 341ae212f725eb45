//! Process lifecycle state.
//!
//! State machine: Initializing -> Serving -> Draining -> Stopped
//!
//! Transitions only move forward. A step may be skipped (a process that
//! fails to bind goes from Initializing straight to Draining), but a state
//! is never re-entered.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    /// Building the tracer, downstream clients and capabilities.
    Initializing,
    /// Listeners are bound and accepting calls.
    Serving,
    /// Shutdown was requested; no new calls, in-flight calls are cancelled.
    Draining,
    /// Everything released.
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Initializing => "initializing",
            LifecycleState::Serving => "serving",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable lifecycle state.
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Initializing);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move to `next`. Returns `false` and leaves the state alone when `next`
    /// is not ahead of the current state.
    pub fn advance(&self, next: LifecycleState) -> bool {
        let mut from = None;
        let moved = self.tx.send_if_modified(|state| {
            if next > *state {
                from = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });
        match from {
            Some(from) => tracing::info!(from = %from, to = %next, "Lifecycle transition"),
            None => tracing::debug!(current = %self.current(), rejected = %next, "Lifecycle transition ignored"),
        }
        moved
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Wait until the state reaches `target` or moves past it.
    pub async fn wait_for(&self, target: LifecycleState) -> LifecycleState {
        let mut rx = self.subscribe();
        let reached = match rx.wait_for(|state| *state >= target).await {
            Ok(state) => *state,
            Err(_) => self.current(),
        };
        reached
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
