//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (controller.rs):
//!     Validate config → Tracer → Downstream clients → Capabilities → Listener set
//!
//! Serving (listeners.rs):
//!     RPC listener + HTTP gateway run as supervised tasks
//!
//! Shutdown (controller.rs):
//!     Signal received → Stop accepting → Cancel in-flight calls → Drain
//!     → Flush spans → Close downstream connections → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, flush, close
//! - Every shutdown step has a timeout: nothing waits forever

pub mod controller;
pub mod listeners;
pub mod signals;
pub mod state;

pub use controller::{Controller, ControllerBuilder, ControllerHandle};
pub use listeners::{BoundAddrs, ListenerSet, RunningListeners};
pub use signals::shutdown_signal;
pub use state::{LifecycleState, StateCell};
