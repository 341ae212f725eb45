//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), optional
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (MESH_* environment overrides)
//!     → command-line overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → MeshConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, from_toml_str, load_config, ConfigError};
pub use schema::{
    DownstreamConfig, LogFormat, MeshConfig, ObservabilityConfig, Role, ServiceConfig,
    ServiceIdentity, ShutdownConfig, TimeoutConfig, TracingConfig,
};
pub use validation::{validate_config, ValidationError};
