//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a mesh service.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for one mesh service process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MeshConfig {
    /// Who this process is and where it listens.
    pub service: ServiceConfig,

    /// Services this process calls, by logical name.
    pub downstream: BTreeMap<String, DownstreamConfig>,

    /// Span export settings.
    pub tracing: TracingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl MeshConfig {
    /// Defaults for `role`, with the conventional local ports of that role.
    pub fn for_role(role: Role) -> Self {
        let (rpc, http) = role.default_ports();
        let mut downstream = BTreeMap::new();
        for dependency in role.downstream_dependencies() {
            let (dep_rpc, _) = dependency.default_ports();
            downstream.insert(
                dependency.to_string(),
                DownstreamConfig {
                    address: format!("127.0.0.1:{}", dep_rpc),
                },
            );
        }

        Self {
            service: ServiceConfig {
                name: format!("{}-service", role),
                role,
                rpc_address: format!("0.0.0.0:{}", rpc),
                http_address: format!("0.0.0.0:{}", http),
                ..ServiceConfig::default()
            },
            downstream,
            ..Self::default()
        }
    }

    pub fn identity(&self) -> ServiceIdentity {
        ServiceIdentity {
            name: self.service.name.clone(),
            role: self.service.role,
            rpc_address: self.service.rpc_address.clone(),
            http_address: self.service.http_address.clone(),
        }
    }
}

/// The three positions a service can take in the call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Edge: authenticates and calls `user`.
    Auth,
    /// Middle: owns accounts and calls `product`.
    User,
    /// Leaf: owns the catalog.
    Product,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Auth => "auth",
            Role::User => "user",
            Role::Product => "product",
        }
    }

    /// Roles this role must be able to call.
    pub fn downstream_dependencies(&self) -> &'static [Role] {
        match self {
            Role::Auth => &[Role::User],
            Role::User => &[Role::Product],
            Role::Product => &[],
        }
    }

    /// (rpc, http) ports used when nothing is configured.
    pub fn default_ports(&self) -> (u16, u16) {
        match self {
            Role::Auth => (50051, 8081),
            Role::User => (50052, 8082),
            Role::Product => (50053, 8083),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auth" => Ok(Role::Auth),
            "user" => Ok(Role::User),
            "product" => Ok(Role::Product),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Identity of the running process. Fixed once startup begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub name: String,
    pub role: Role,
    pub rpc_address: String,
    pub http_address: String,
}

/// Service identity and listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name, used in logs, span records and ping hops.
    pub name: String,

    /// Which capabilities this process serves.
    pub role: Role,

    /// RPC bind address (e.g., "0.0.0.0:50053").
    pub rpc_address: String,

    /// HTTP gateway bind address (e.g., "0.0.0.0:8083").
    pub http_address: String,

    /// Maximum concurrent RPC connections (backpressure).
    pub max_connections: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "product-service".to_string(),
            role: Role::Product,
            rpc_address: "0.0.0.0:50053".to_string(),
            http_address: "0.0.0.0:8083".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Address of one downstream service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DownstreamConfig {
    /// RPC address (e.g., "127.0.0.1:50052").
    pub address: String,
}

/// Span export configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Collector base URL; spans go to `<endpoint>/v1/traces`.
    /// Spans are written to the log when unset.
    pub collector_endpoint: Option<String>,

    /// Record spans of traces started here.
    pub sampled: bool,

    /// Spans per export batch.
    pub batch_size: usize,

    /// Maximum time a finished span waits before export, in milliseconds.
    pub export_interval_ms: u64,

    /// Timeout of one export request, in milliseconds.
    pub export_timeout_ms: u64,

    /// How long shutdown waits for the final flush, in milliseconds.
    pub flush_timeout_ms: u64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            collector_endpoint: None,
            sampled: true,
            batch_size: 512,
            export_interval_ms: 5_000,
            export_timeout_ms: 3_000,
            flush_timeout_ms: 5_000,
        }
    }
}

impl TracingConfig {
    pub fn export_interval(&self) -> Duration {
        Duration::from_millis(self.export_interval_ms)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline of one inbound call, including its downstream calls, in seconds.
    pub call_secs: u64,

    /// Timeout of one connection attempt to a downstream, in milliseconds.
    pub connect_ms: u64,

    /// Connection attempts per downstream before startup fails.
    pub connect_attempts: u32,

    /// Initial backoff between connection attempts, in milliseconds.
    pub backoff_base_ms: u64,

    /// Maximum backoff between connection attempts, in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_secs: 30,
            connect_ms: 2_000,
            connect_attempts: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    pub fn call(&self) -> Duration {
        Duration::from_secs(self.call_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long listeners get to finish in-flight calls, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 10_000,
        }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
