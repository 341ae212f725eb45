//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the downstream table covers the role's dependencies
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MeshConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::MeshConfig;
use crate::trace::exporter::collector_url;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &MeshConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::new("service.name", "must not be empty"));
    }

    let rpc = check_address(&mut errors, "service.rpc_address", &config.service.rpc_address);
    let http = check_address(&mut errors, "service.http_address", &config.service.http_address);
    if let (Some(rpc), Some(http)) = (rpc, http) {
        if rpc == http && rpc.port() != 0 {
            errors.push(ValidationError::new(
                "service.http_address",
                "must differ from service.rpc_address",
            ));
        }
    }

    if config.service.max_connections == 0 {
        errors.push(ValidationError::new("service.max_connections", "must be greater than 0"));
    }

    for dependency in config.service.role.downstream_dependencies() {
        if !config.downstream.contains_key(dependency.as_str()) {
            errors.push(ValidationError::new(
                format!("downstream.{}", dependency),
                format!("required by the {} role", config.service.role),
            ));
        }
    }
    for (name, downstream) in &config.downstream {
        if downstream.address.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("downstream.{}.address", name),
                "must not be empty",
            ));
        }
    }

    if let Some(endpoint) = &config.tracing.collector_endpoint {
        if let Err(e) = collector_url(endpoint) {
            errors.push(ValidationError::new("tracing.collector_endpoint", e.to_string()));
        }
    }
    if config.tracing.batch_size == 0 {
        errors.push(ValidationError::new("tracing.batch_size", "must be greater than 0"));
    }
    if config.tracing.export_interval_ms == 0 {
        errors.push(ValidationError::new("tracing.export_interval_ms", "must be greater than 0"));
    }
    if config.tracing.flush_timeout_ms == 0 {
        errors.push(ValidationError::new("tracing.flush_timeout_ms", "must be greater than 0"));
    }

    if config.timeouts.call_secs == 0 {
        errors.push(ValidationError::new("timeouts.call_secs", "must be greater than 0"));
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_ms", "must be greater than 0"));
    }
    if config.timeouts.connect_attempts == 0 {
        errors.push(ValidationError::new("timeouts.connect_attempts", "must be at least 1"));
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) -> Option<SocketAddr> {
    match value.parse::<SocketAddr>() {
        Ok(addr) => Some(addr),
        Err(e) => {
            errors.push(ValidationError::new(field, format!("'{}' is not a socket address: {}", value, e)));
            None
        }
    }
}
