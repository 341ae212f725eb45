//! Business capabilities served by each role.
//!
//! # Data Flow
//! ```text
//! RPC frame / HTTP request
//!     → registry.rs (decode, open span, run under the call's deadline)
//!     → auth.rs / user.rs / product.rs (validate, call downstream, answer)
//!     → clients.rs (typed calls through rpc::Transport)
//! ```
//!
//! # Design Decisions
//! - Validation runs before any downstream call
//! - A failed downstream call aborts the capability; nothing is retried
//! - "Not found" is an ordinary answer, not an error

pub mod auth;
pub mod clients;
pub mod messages;
pub mod product;
pub mod registry;
pub mod store;
pub mod user;

use std::sync::Arc;

pub use auth::AuthService;
pub use clients::{ProductClient, UserClient};
pub use product::ProductService;
pub use registry::{Capability, HttpRule, MethodDescriptor, Registry, Verb};
pub use store::{ProductCatalog, UserRepository};
pub use user::UserService;

use crate::config::{Role, ServiceIdentity};
use crate::error::MeshError;
use crate::rpc::DownstreamTable;

/// Build the capability table for `identity`'s role, wired to its downstreams.
pub fn build_registry(
    identity: &ServiceIdentity,
    downstream: &DownstreamTable,
) -> Result<Registry, MeshError> {
    let mut registry = Registry::new();

    match identity.role {
        Role::Auth => {
            let users = UserClient::new(downstream.get(Role::User.as_str())?);
            Arc::new(AuthService::new(&identity.name, users)).register(&mut registry);
        }
        Role::User => {
            let products = ProductClient::new(downstream.get(Role::Product.as_str())?);
            Arc::new(UserService::new(&identity.name, UserRepository::new(), products))
                .register(&mut registry);
        }
        Role::Product => {
            Arc::new(ProductService::new(&identity.name, ProductCatalog::seeded()))
                .register(&mut registry);
        }
    }

    tracing::debug!(
        service = %identity.name,
        role = %identity.role,
        capabilities = ?registry,
        "Capabilities registered"
    );
    Ok(registry)
}
