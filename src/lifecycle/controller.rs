//! Lifecycle controller: builds a service in order, serves it, tears it down.
//!
//! # Data Flow
//! ```text
//! ControllerBuilder::build()            Initializing
//!     config → tracer → downstream clients → capabilities → listener set
//!
//! Controller::run(signal)
//!     start_all ─────────────────────▶ Serving
//!     signal | handle.shutdown() | listener exit
//!     cancel token ──────────────────▶ Draining
//!     drain listeners → flush tracer → close downstreams
//!                    ────────────────▶ Stopped
//! ```
//!
//! # Design Decisions
//! - Any failure before Serving is fatal and returned from `build` or `run`
//! - One cancellation token per process; every inbound call holds a child of it
//! - A trace flush timeout is logged, never returned

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::capability::build_registry;
use crate::config::{validate_config, MeshConfig, ServiceIdentity};
use crate::error::MeshError;
use crate::http::Gateway;
use crate::lifecycle::listeners::{BoundAddrs, ListenerSet};
use crate::lifecycle::state::{LifecycleState, StateCell};
use crate::resilience::Backoff;
use crate::rpc::{ConnectPolicy, DownstreamTable, RpcClient, RpcServer, Transport};
use crate::trace::{BatchSettings, HttpExporter, LogExporter, SpanExporter, SpanStats, Tracer};

/// Assembles a [`Controller`]. Exporter and downstream transports can be
/// replaced before building, which is how tests inject stubs.
pub struct ControllerBuilder {
    config: MeshConfig,
    exporter: Option<Arc<dyn SpanExporter>>,
    downstream: DownstreamTable,
}

impl ControllerBuilder {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            config,
            exporter: None,
            downstream: DownstreamTable::new(),
        }
    }

    /// Export spans here instead of the configured collector.
    pub fn exporter(mut self, exporter: Arc<dyn SpanExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Use `transport` for downstream `name` instead of dialling its configured address.
    pub fn downstream(mut self, name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.downstream.insert(name, transport);
        self
    }

    /// Run the Initializing phase. Fails with `ConfigInvalid`, `Unreachable`
    /// or an exporter setup error; nothing is left running on failure.
    pub async fn build(self) -> Result<Controller, MeshError> {
        let ControllerBuilder {
            config,
            exporter,
            downstream: injected,
        } = self;

        validate_config(&config).map_err(|errors| {
            let problems: Vec<String> = errors.iter().map(ToString::to_string).collect();
            MeshError::ConfigInvalid(problems.join("; "))
        })?;

        let identity = config.identity();
        let state = StateCell::new();
        tracing::info!(
            service = %identity.name,
            role = %identity.role,
            state = %state.current(),
            "Initializing service"
        );

        let exporter: Arc<dyn SpanExporter> = match (exporter, &config.tracing.collector_endpoint) {
            (Some(exporter), _) => exporter,
            (None, Some(endpoint)) => {
                Arc::new(HttpExporter::new(endpoint, config.tracing.export_timeout())?)
            }
            (None, None) => Arc::new(LogExporter),
        };
        let tracer = Tracer::new(
            identity.name.clone(),
            config.tracing.sampled,
            exporter,
            BatchSettings {
                max_batch_size: config.tracing.batch_size,
                export_interval: config.tracing.export_interval(),
            },
        );

        let downstream = match connect_downstreams(&config, injected).await {
            Ok(downstream) => downstream,
            Err(e) => {
                abandon(&tracer, &DownstreamTable::new(), &config).await;
                return Err(e);
            }
        };

        let registry = match build_registry(&identity, &downstream) {
            Ok(registry) => Arc::new(registry),
            Err(e) => {
                abandon(&tracer, &downstream, &config).await;
                return Err(e);
            }
        };

        let rpc = RpcServer::new(
            Arc::clone(&registry),
            tracer.clone(),
            config.timeouts.call(),
            config.shutdown.drain_timeout(),
        );
        let gateway = Gateway::new(
            registry,
            tracer.clone(),
            state.clone(),
            identity.clone(),
            config.timeouts.call(),
        );
        let listeners = ListenerSet::new(
            identity.clone(),
            config.service.max_connections,
            rpc,
            gateway,
        );

        let (addrs, _) = watch::channel(None);
        Ok(Controller {
            config,
            identity,
            state,
            token: CancellationToken::new(),
            tracer,
            downstream,
            listeners,
            addrs,
        })
    }
}

/// Dial every configured downstream that was not injected.
async fn connect_downstreams(
    config: &MeshConfig,
    mut table: DownstreamTable,
) -> Result<DownstreamTable, MeshError> {
    let policy = ConnectPolicy {
        timeout: config.timeouts.connect(),
        attempts: config.timeouts.connect_attempts,
        backoff: Backoff::new(config.timeouts.backoff_base_ms, config.timeouts.backoff_max_ms),
    };

    for (name, downstream) in &config.downstream {
        if table.contains(name) {
            tracing::debug!(downstream = %name, "Using injected transport");
            continue;
        }
        match RpcClient::connect(name.clone(), downstream.address.clone(), policy).await {
            Ok(client) => table.insert(name.clone(), Arc::new(client)),
            Err(e) => {
                table.close_all().await;
                return Err(e);
            }
        }
    }
    Ok(table)
}

/// Release what a failed build already created.
async fn abandon(tracer: &Tracer, downstream: &DownstreamTable, config: &MeshConfig) {
    downstream.close_all().await;
    if let Err(e) = tracer.shutdown(config.tracing.flush_timeout()).await {
        tracing::warn!(error = %e, "Span flush did not complete");
    }
}

/// A fully initialised service, ready to serve.
pub struct Controller {
    config: MeshConfig,
    identity: ServiceIdentity,
    state: StateCell,
    token: CancellationToken,
    tracer: Tracer,
    downstream: DownstreamTable,
    listeners: ListenerSet,
    addrs: watch::Sender<Option<BoundAddrs>>,
}

impl Controller {
    pub fn builder(config: MeshConfig) -> ControllerBuilder {
        ControllerBuilder::new(config)
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            state: self.state.clone(),
            token: self.token.clone(),
            addrs: self.addrs.subscribe(),
            tracer: self.tracer.clone(),
        }
    }

    /// Serve until `signal` completes, a handle requests shutdown or a
    /// listener fails, then drain and release everything.
    ///
    /// Returns `Ok(())` after a requested shutdown and the fatal error otherwise.
    pub async fn run<S>(self, signal: S) -> Result<(), MeshError>
    where
        S: Future<Output = ()>,
    {
        let Controller {
            config,
            identity,
            state,
            token,
            tracer,
            downstream,
            listeners,
            addrs,
        } = self;

        let mut failure = None;

        match listeners.start_all(&token).await {
            Ok(mut running) => {
                let bound = running.addrs();
                addrs.send_replace(Some(bound));
                state.advance(LifecycleState::Serving);
                tracing::info!(
                    service = %identity.name,
                    rpc_address = %bound.rpc,
                    http_address = %bound.http,
                    "Service ready"
                );

                tokio::pin!(signal);
                let early_exit = tokio::select! {
                    _ = &mut signal => {
                        tracing::info!("Shutdown signal received");
                        None
                    }
                    _ = token.cancelled() => {
                        tracing::info!("Shutdown requested");
                        None
                    }
                    exit = running.next_exit() => Some(exit),
                };

                if let Some(exit) = early_exit {
                    let error = match exit {
                        Some((_, Err(e))) => e,
                        Some((listener, Ok(()))) => MeshError::ListenerFailed {
                            listener,
                            reason: "stopped before shutdown".to_string(),
                        },
                        None => MeshError::ListenerFailed {
                            listener: "listener",
                            reason: "no listener running".to_string(),
                        },
                    };
                    tracing::error!(error = %error, "Listener exited unexpectedly");
                    failure = Some(error);
                }

                state.advance(LifecycleState::Draining);
                token.cancel();
                if let Err(e) = running.drain(config.shutdown.drain_timeout()).await {
                    failure.get_or_insert(e);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start listeners");
                failure = Some(e);
                state.advance(LifecycleState::Draining);
                token.cancel();
            }
        }

        match tracer.shutdown(config.tracing.flush_timeout()).await {
            Ok(()) => tracing::debug!(stats = ?tracer.stats(), "Spans flushed"),
            Err(e) => tracing::warn!(error = %e, "Span flush did not complete"),
        }
        downstream.close_all().await;

        state.advance(LifecycleState::Stopped);
        match failure {
            Some(e) => Err(e),
            None => {
                tracing::info!(service = %identity.name, "Shutdown complete");
                Ok(())
            }
        }
    }
}

/// Cloneable view of a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    state: StateCell,
    token: CancellationToken,
    addrs: watch::Receiver<Option<BoundAddrs>>,
    tracer: Tracer,
}

impl ControllerHandle {
    pub fn state(&self) -> LifecycleState {
        self.state.current()
    }

    /// Trigger shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Wait until the controller is serving. `None` if it stopped without
    /// ever binding its listeners.
    pub async fn wait_serving(&self) -> Option<BoundAddrs> {
        self.state.wait_for(LifecycleState::Serving).await;
        *self.addrs.borrow()
    }

    pub async fn wait_stopped(&self) {
        self.state.wait_for(LifecycleState::Stopped).await;
    }

    pub fn addrs(&self) -> Option<BoundAddrs> {
        *self.addrs.borrow()
    }

    pub fn span_stats(&self) -> SpanStats {
        self.tracer.stats()
    }
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("state", &self.state())
            .field("addrs", &self.addrs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use crate::error::ErrorKind;
    use crate::trace::MemoryExporter;
    use std::time::Duration;

    fn product_config() -> MeshConfig {
        let mut config = MeshConfig::for_role(Role::Product);
        config.service.rpc_address = "127.0.0.1:0".to_string();
        config.service.http_address = "127.0.0.1:0".to_string();
        config
    }

    #[tokio::test]
    async fn invalid_config_never_builds() {
        let mut config = product_config();
        config.service.name.clear();
        let err = ControllerBuilder::new(config).build().await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[tokio::test]
    async fn serves_then_stops_on_signal() {
        let controller = ControllerBuilder::new(product_config())
            .exporter(Arc::new(MemoryExporter::new()))
            .build()
            .await
            .unwrap();
        let handle = controller.handle();
        assert_eq!(handle.state(), LifecycleState::Initializing);

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(controller.run(async move {
            let _ = stopped.await;
        }));

        let addrs = handle.wait_serving().await.unwrap();
        assert_ne!(addrs.rpc.port(), 0);
        assert_eq!(handle.state(), LifecycleState::Serving);

        stop.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(handle.state(), LifecycleState::Stopped);
    }
}
