//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{DownstreamConfig, MeshConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "MESH_";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { key: String, message: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { key, message } => write!(f, "Invalid {}: {}", key, message),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse a TOML document. Missing sections take their defaults.
pub fn from_toml_str(content: &str) -> Result<MeshConfig, ConfigError> {
    toml::from_str(content).map_err(ConfigError::Parse)
}

/// Load configuration from a TOML file, apply `MESH_*` overrides from the
/// process environment and validate the result.
pub fn load_config(path: &Path) -> Result<MeshConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config = from_toml_str(&content)?;

    apply_env_overrides(&mut config, std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `MESH_*` overrides from `vars`.
///
/// Recognised keys: `MESH_SERVICE_NAME`, `MESH_SERVICE_ROLE`, `MESH_RPC_ADDRESS`,
/// `MESH_HTTP_ADDRESS`, `MESH_COLLECTOR_ENDPOINT` and `MESH_DOWNSTREAM_<NAME>`.
/// Other keys are ignored.
pub fn apply_env_overrides<I>(config: &mut MeshConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match name {
            "SERVICE_NAME" => config.service.name = value,
            "SERVICE_ROLE" => {
                config.service.role = value.parse().map_err(|message| ConfigError::Env {
                    key: key.clone(),
                    message,
                })?;
            }
            "RPC_ADDRESS" => config.service.rpc_address = value,
            "HTTP_ADDRESS" => config.service.http_address = value,
            "COLLECTOR_ENDPOINT" => {
                config.tracing.collector_endpoint = Some(value).filter(|v| !v.is_empty());
            }
            _ => {
                if let Some(target) = name.strip_prefix("DOWNSTREAM_") {
                    if target.is_empty() {
                        return Err(ConfigError::Env {
                            key,
                            message: "missing downstream name".to_string(),
                        });
                    }
                    config
                        .downstream
                        .insert(target.to_ascii_lowercase(), DownstreamConfig { address: value });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Role;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_partial_document() {
        let config = from_toml_str(
            r#"
            [service]
            name = "user-a"
            role = "user"
            rpc_address = "127.0.0.1:6000"

            [downstream.product]
            address = "127.0.0.1:6001"
            "#,
        )
        .unwrap();

        assert_eq!(config.service.role, Role::User);
        assert_eq!(config.service.http_address, "0.0.0.0:8083");
        assert_eq!(config.downstream["product"].address, "127.0.0.1:6001");
        assert_eq!(config.timeouts.call_secs, 30);
    }

    #[test]
    fn unknown_role_is_parse_error() {
        let err = from_toml_str("[service]\nrole = \"gateway\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = MeshConfig::default();
        apply_env_overrides(
            &mut config,
            vars(&[
                ("MESH_SERVICE_NAME", "edge"),
                ("MESH_SERVICE_ROLE", "auth"),
                ("MESH_HTTP_ADDRESS", "127.0.0.1:9000"),
                ("MESH_DOWNSTREAM_USER", "10.0.0.2:50052"),
                ("MESH_COLLECTOR_ENDPOINT", "http://collector:4318"),
                ("HOME", "/root"),
            ]),
        )
        .unwrap();

        assert_eq!(config.service.name, "edge");
        assert_eq!(config.service.role, Role::Auth);
        assert_eq!(config.service.http_address, "127.0.0.1:9000");
        assert_eq!(config.downstream["user"].address, "10.0.0.2:50052");
        assert_eq!(
            config.tracing.collector_endpoint.as_deref(),
            Some("http://collector:4318")
        );
    }

    #[test]
    fn bad_role_override_is_reported() {
        let mut config = MeshConfig::default();
        let err = apply_env_overrides(&mut config, vars(&[("MESH_SERVICE_ROLE", "edge")])).unwrap_err();
        assert!(err.to_string().contains("MESH_SERVICE_ROLE"));
    }
}
