//! svc-mesh service process.
//!
//! # Architecture Overview
//!
//! ```text
//!   HTTP client ──▶ auth-service ──RPC──▶ user-service ──RPC──▶ product-service
//!                   :8081 / :50051        :8082 / :50052        :8083 / :50053
//!
//!   every hop: traceparent + baggage in, one span per call, spans → collector
//! ```
//!
//! One binary, one role per process. The role comes from `--role`, the
//! config file or `MESH_SERVICE_ROLE`, in that order of precedence.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use svc_mesh::config::{apply_env_overrides, load_config, MeshConfig, Role};
use svc_mesh::lifecycle::{shutdown_signal, ControllerBuilder};
use svc_mesh::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "svc-mesh")]
#[command(about = "Run one service of the auth → user → product mesh", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "MESH_CONFIG")]
    config: Option<PathBuf>,

    /// Role to play; overrides the config file.
    #[arg(short, long, value_enum)]
    role: Option<Role>,

    /// Service name reported in spans and logs.
    #[arg(short, long)]
    name: Option<String>,
}

fn load(cli: &Cli) -> Result<MeshConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            // Role picks the defaults, so resolve it before the other overrides.
            let role = match (cli.role, std::env::var("MESH_SERVICE_ROLE")) {
                (Some(role), _) => role,
                (None, Ok(value)) => value.parse::<Role>()?,
                (None, Err(_)) => MeshConfig::default().service.role,
            };
            let mut config = MeshConfig::for_role(role);
            apply_env_overrides(&mut config, std::env::vars())?;
            config
        }
    };

    if let Some(role) = cli.role {
        if role != config.service.role {
            let defaults = MeshConfig::for_role(role);
            config.service.role = role;
            config.service.name = defaults.service.name;
            config.downstream = defaults.downstream;
        }
    }
    if let Some(name) = &cli.name {
        config.service.name = name.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("svc-mesh: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(
        service = %config.service.name,
        role = %config.service.role,
        rpc_address = %config.service.rpc_address,
        http_address = %config.service.http_address,
        downstream = config.downstream.len(),
        "svc-mesh v0.1.0 starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let controller = match ControllerBuilder::new(config).build().await {
        Ok(controller) => controller,
        Err(e) => {
            tracing::error!(error = %e, kind = ?e.kind(), "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    match controller.run(shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, kind = ?e.kind(), "Service stopped with error");
            ExitCode::FAILURE
        }
    }
}
