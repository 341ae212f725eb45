//! Traced three-service mesh: auth → user → product.
//!
//! Each process plays one role, serves its capabilities over RPC and an
//! HTTP/JSON gateway, and calls its downstream over RPC with trace context.

// Core subsystems
pub mod capability;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod net;
pub mod rpc;
pub mod trace;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::{MeshConfig, Role};
pub use context::CallContext;
pub use error::{ErrorKind, MeshError};
pub use lifecycle::{Controller, ControllerBuilder, ControllerHandle, LifecycleState};
