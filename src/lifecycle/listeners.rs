//! The RPC and HTTP listeners of one process, started together.
//!
//! # Responsibilities
//! - Bind both listeners before anything is served
//! - Run each serve loop as a supervised task
//! - Report the first listener that exits and drain the rest within a deadline

use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceIdentity;
use crate::error::MeshError;
use crate::http::Gateway;
use crate::net::Listener;
use crate::rpc::RpcServer;

/// Addresses the listeners actually bound (port 0 resolved).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddrs {
    pub rpc: SocketAddr,
    pub http: SocketAddr,
}

type ListenerExit = (&'static str, Result<(), MeshError>);

/// Both listeners, not yet bound. Starting consumes the set.
pub struct ListenerSet {
    identity: ServiceIdentity,
    max_connections: usize,
    rpc: RpcServer,
    gateway: Gateway,
}

impl ListenerSet {
    pub fn new(
        identity: ServiceIdentity,
        max_connections: usize,
        rpc: RpcServer,
        gateway: Gateway,
    ) -> Self {
        Self {
            identity,
            max_connections,
            rpc,
            gateway,
        }
    }

    /// Bind the RPC then the HTTP listener and spawn both serve loops.
    ///
    /// Fails with `BindFailed` if either address cannot be bound; nothing is
    /// served in that case.
    pub async fn start_all(self, shutdown: &CancellationToken) -> Result<RunningListeners, MeshError> {
        let rpc_listener =
            Listener::bind("rpc", &self.identity.rpc_address, self.max_connections).await?;
        let http_listener =
            Listener::bind("http", &self.identity.http_address, self.max_connections).await?;

        let local = |listener: &Listener, address: &str| {
            listener.local_addr().map_err(|source| MeshError::BindFailed {
                listener: listener.kind(),
                address: address.to_string(),
                source,
            })
        };
        let addrs = BoundAddrs {
            rpc: local(&rpc_listener, &self.identity.rpc_address)?,
            http: local(&http_listener, &self.identity.http_address)?,
        };

        let mut tasks: JoinSet<ListenerExit> = JoinSet::new();

        let token = shutdown.clone();
        let rpc = self.rpc;
        tasks.spawn(async move { ("rpc", rpc.serve(rpc_listener, token).await) });

        let token = shutdown.clone();
        let router = self.gateway.router(addrs.http, shutdown.clone());
        tasks.spawn(async move {
            tracing::info!(address = %addrs.http, "HTTP gateway started");
            let result = axum::serve(http_listener.into_inner(), router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .map_err(|e| MeshError::ListenerFailed {
                    listener: "http",
                    reason: e.to_string(),
                });
            ("http", result)
        });

        Ok(RunningListeners { addrs, tasks })
    }
}

/// Serve loops in flight.
pub struct RunningListeners {
    addrs: BoundAddrs,
    tasks: JoinSet<ListenerExit>,
}

impl RunningListeners {
    pub fn addrs(&self) -> BoundAddrs {
        self.addrs
    }

    /// Wait for the next listener to exit. `None` once none are left.
    pub async fn next_exit(&mut self) -> Option<ListenerExit> {
        let joined = self.tasks.join_next().await?;
        Some(joined.unwrap_or_else(|e| {
            (
                "listener",
                Err(MeshError::ListenerFailed {
                    listener: "listener",
                    reason: e.to_string(),
                }),
            )
        }))
    }

    /// Wait for every listener to finish after shutdown was signalled.
    ///
    /// Listeners still running at the deadline are aborted. Returns the first
    /// serve error, if any.
    pub async fn drain(mut self, timeout: Duration) -> Result<(), MeshError> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut failure = None;

        loop {
            let next = tokio::select! {
                _ = &mut deadline => {
                    tracing::warn!(
                        remaining = self.tasks.len(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Listeners did not drain in time, aborting"
                    );
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    break;
                }
                next = self.next_exit() => next,
            };

            match next {
                None => break,
                Some((listener, Ok(()))) => tracing::info!(listener, "Listener stopped"),
                Some((listener, Err(e))) => {
                    tracing::error!(listener, error = %e, "Listener failed while draining");
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
