//! Inbound RPC listener.
//!
//! # Responsibilities
//! - Accept connections and read request frames
//! - Run each call on its own task with a fresh `CallContext`
//! - Stop reading on shutdown and let in-flight calls answer before closing
//!
//! # Data Flow
//! ```text
//! TcpStream ─▶ FramedRead ─▶ RequestFrame ─▶ task: Registry::dispatch
//!                                                  │
//! TcpStream ◀─ FramedWrite ◀─ writer task ◀─ ResponseFrame
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::capability::Registry;
use crate::context::CallContext;
use crate::error::MeshError;
use crate::net::{ConnectionGuard, ConnectionTracker, Listener};
use crate::observability::metrics;
use crate::rpc::status::{Code, Status};
use crate::rpc::wire::{self, Encoding, RequestFrame, ResponseFrame, TIMEOUT_KEY};
use crate::trace::{propagation, Tracer};

pub struct RpcServer {
    registry: Arc<Registry>,
    tracer: Tracer,
    call_timeout: Duration,
    drain_timeout: Duration,
    connections: ConnectionTracker,
}

impl RpcServer {
    pub fn new(
        registry: Arc<Registry>,
        tracer: Tracer,
        call_timeout: Duration,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            tracer,
            call_timeout,
            drain_timeout,
            connections: ConnectionTracker::new(),
        }
    }

    /// Live-connection counter shared with the serve loop.
    pub fn connections(&self) -> ConnectionTracker {
        self.connections.clone()
    }

    /// Serve until `shutdown` fires, then wait for open connections to finish.
    ///
    /// Connections still open when the drain timeout passes are aborted, so
    /// no connection task outlives this call.
    pub async fn serve(self, listener: Listener, shutdown: CancellationToken) -> Result<(), MeshError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, capabilities = self.registry.len(), "RPC server started");
        }
        let server = Arc::new(self);
        let mut connections = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => continue,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer, permit)) => {
                    let guard = server.connections.track();
                    let server = Arc::clone(&server);
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        let _permit = permit;
                        server.serve_connection(stream, peer, guard, shutdown).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept RPC connection");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }

        drop(listener);
        tracing::info!(
            active_connections = server.connections.active_count(),
            "RPC listener closed, draining connections"
        );
        if !server.connections.wait_idle(server.drain_timeout).await {
            tracing::warn!(
                active_connections = server.connections.active_count(),
                "RPC connections still open after drain timeout, aborting"
            );
            connections.abort_all();
        }
        while connections.join_next().await.is_some() {}
        Ok(())
    }

    async fn serve_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        guard: ConnectionGuard,
        shutdown: CancellationToken,
    ) {
        let connection_id = guard.id();
        tracing::debug!(%connection_id, peer_addr = %peer, "RPC connection opened");
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%connection_id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, wire::codec());
        let mut writer = FramedWrite::new(write_half, wire::codec());

        let (responses, mut outgoing) = mpsc::channel::<Bytes>(256);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outgoing.recv().await {
                if let Err(e) = writer.send(frame).await {
                    tracing::debug!(%connection_id, error = %e, "RPC write failed");
                    break;
                }
            }
        });

        let mut calls = JoinSet::new();
        let mut peer_gone = false;

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(_) = calls.join_next(), if !calls.is_empty() => continue,
                next = reader.next() => next,
            };

            match next {
                Some(Ok(bytes)) => match wire::decode_frame::<RequestFrame>(&bytes) {
                    Ok(request) => {
                        let server = Arc::clone(&self);
                        let responses = responses.clone();
                        let shutdown = shutdown.clone();
                        calls.spawn(async move {
                            let response = server.handle_call(request, &shutdown).await;
                            match wire::encode_frame(&response) {
                                Ok(frame) => {
                                    let _ = responses.send(frame).await;
                                }
                                Err(e) => {
                                    tracing::error!(request_id = response.id, error = %e, "Failed to encode response");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(%connection_id, error = %e, "Closing connection after bad frame");
                        peer_gone = true;
                        break;
                    }
                },
                Some(Err(e)) => {
                    tracing::debug!(%connection_id, error = %e, "RPC read failed");
                    peer_gone = true;
                    break;
                }
                None => {
                    peer_gone = true;
                    break;
                }
            }
        }

        // Nobody is left to read the answers.
        if peer_gone {
            calls.abort_all();
        }
        while calls.join_next().await.is_some() {}

        drop(responses);
        let _ = writer_task.await;
        tracing::debug!(%connection_id, "RPC connection finished");
    }

    async fn handle_call(&self, request: RequestFrame, shutdown: &CancellationToken) -> ResponseFrame {
        let start = Instant::now();
        let remote = propagation::extract(&request.metadata);

        let mut ctx = CallContext::new(self.tracer.clone(), remote, shutdown.child_token())
            .with_timeout(self.call_timeout);
        if let Some(millis) = request
            .metadata
            .get(TIMEOUT_KEY)
            .and_then(|v| v.parse::<u64>().ok())
        {
            ctx = ctx.with_timeout(Duration::from_millis(millis));
        }

        let result = self
            .registry
            .dispatch(ctx, &request.method, Encoding::MsgPack, Bytes::from(request.payload))
            .await;

        let (status, payload) = match result {
            Ok(payload) => (Status::ok(), payload.to_vec()),
            Err(e) => {
                let status = e.to_status();
                if matches!(status.code, Code::Internal | Code::Unknown) {
                    tracing::error!(method = %request.method, error = %e, "RPC call failed");
                } else {
                    tracing::debug!(method = %request.method, code = status.code.as_str(), error = %e, "RPC call failed");
                }
                (status, Vec::new())
            }
        };

        metrics::record_rpc_request(&request.method, status.code, start);
        ResponseFrame {
            id: request.id,
            status,
            payload,
        }
    }
}
