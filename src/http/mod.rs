//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → middleware.rs (request ID, tracing, timeout, CORS)
//!     → gateway.rs (route → capability, JSON in/out, status mapping)
//!     → capability::Registry (same handlers the RPC listener uses)
//!
//! Static routes:
//!     /health                 lifecycle state
//!     /{role}/swagger.json    docs.rs
//! ```

pub mod docs;
pub mod gateway;
pub mod middleware;

pub use gateway::Gateway;
pub use middleware::X_REQUEST_ID;
