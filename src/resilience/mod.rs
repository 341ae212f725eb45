//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dialing a downstream service:
//!     → backoff.rs (spacing between connection attempts)
//!     → rpc::client (gives up with Unreachable after the last attempt)
//! ```
//!
//! # Design Decisions
//! - Only connection establishment is retried
//! - Calls themselves are never retried; a failed call is reported to the caller
//! - Timeouts live on the call context, not here

pub mod backoff;

pub use backoff::Backoff;
