//! Outbound RPC transport.
//!
//! # Responsibilities
//! - Dial a downstream service once at startup, with bounded backoff
//! - Multiplex concurrent calls over one TCP connection
//! - Stamp every request with trace and deadline metadata
//!
//! # Data Flow
//! ```text
//! invoke(ctx, method, payload)
//!     → pending.insert(id, oneshot)
//!     → writer task ──frame──▶ downstream
//!     ← reader task ◀──frame── downstream
//!     → pending.remove(id).send(response)
//! ```
//!
//! # Design Decisions
//! - Responses are matched by request id, never by arrival order
//! - No per-call retry; a failed call is reported to the capability
//! - A dropped connection fails every pending call and is re-dialled on next use

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::context::CallContext;
use crate::error::MeshError;
use crate::observability::metrics;
use crate::resilience::Backoff;
use crate::rpc::status::Code;
use crate::rpc::wire::{self, Metadata, RequestFrame, ResponseFrame, TIMEOUT_KEY};
use crate::trace::propagation;

/// Anything a capability can send a call through.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Logical name of the service on the other side.
    fn target(&self) -> &str;

    /// Send one request and wait for its response.
    async fn invoke(
        &self,
        ctx: &CallContext,
        method: &str,
        payload: Bytes,
    ) -> Result<Bytes, MeshError>;

    /// Release the underlying connection.
    async fn close(&self) {}
}

/// How hard to try when establishing a connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectPolicy {
    pub timeout: Duration,
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            attempts: 5,
            backoff: Backoff::new(100, 2000),
        }
    }
}

type Pending = Arc<DashMap<u64, oneshot::Sender<ResponseFrame>>>;

/// One live TCP connection with its reader and writer tasks.
struct Connection {
    outbound: mpsc::Sender<Bytes>,
    pending: Pending,
    closed: CancellationToken,
}

impl Connection {
    async fn open(target: &str, address: &str, timeout: Duration) -> Result<Arc<Self>, String> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| format!("connect timed out after {:?}", timeout))?
            .map_err(|e| e.to_string())?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(downstream = target, error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, wire::codec());
        let mut writer = FramedWrite::new(write_half, wire::codec());
        let (outbound, mut queued) = mpsc::channel::<Bytes>(256);
        let pending: Pending = Arc::new(DashMap::new());
        let closed = CancellationToken::new();

        let writer_closed = closed.clone();
        let writer_target = target.to_string();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    frame = queued.recv() => frame,
                };
                let Some(frame) = frame else { break };
                if let Err(e) = writer.send(frame).await {
                    tracing::debug!(downstream = %writer_target, error = %e, "Write failed");
                    break;
                }
            }
            writer_closed.cancel();
        });

        let reader_closed = closed.clone();
        let reader_pending = Arc::clone(&pending);
        let reader_target = target.to_string();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = reader_closed.cancelled() => break,
                    next = reader.next() => next,
                };
                match next {
                    Some(Ok(bytes)) => match wire::decode_frame::<ResponseFrame>(&bytes) {
                        Ok(frame) => {
                            // The caller may have given up already.
                            if let Some((_, waiter)) = reader_pending.remove(&frame.id) {
                                let _ = waiter.send(frame);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(downstream = %reader_target, error = %e, "Dropping connection after bad frame");
                            break;
                        }
                    },
                    Some(Err(e)) => {
                        tracing::debug!(downstream = %reader_target, error = %e, "Read failed");
                        break;
                    }
                    None => break,
                }
            }
            reader_closed.cancel();
            reader_pending.clear();
            tracing::debug!(downstream = %reader_target, "Connection closed");
        });

        Ok(Arc::new(Self {
            outbound,
            pending,
            closed,
        }))
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Removes a pending entry when the call finishes or is abandoned.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// RPC client for one downstream service.
pub struct RpcClient {
    target: String,
    address: String,
    policy: ConnectPolicy,
    next_id: AtomicU64,
    connection: ArcSwapOption<Connection>,
    redial: Mutex<()>,
    shut: AtomicBool,
}

impl RpcClient {
    /// Dial `address` now. Fails with `Unreachable` once every attempt is spent.
    pub async fn connect(
        target: impl Into<String>,
        address: impl Into<String>,
        policy: ConnectPolicy,
    ) -> Result<Self, MeshError> {
        let target = target.into();
        let address = address.into();
        let connection = dial(&target, &address, &policy).await?;

        Ok(Self {
            target,
            address,
            policy,
            next_id: AtomicU64::new(1),
            connection: ArcSwapOption::from(Some(connection)),
            redial: Mutex::new(()),
            shut: AtomicBool::new(false),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Calls sent on the current connection and still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.connection
            .load_full()
            .map_or(0, |connection| connection.pending.len())
    }

    fn unreachable(&self, reason: impl Into<String>) -> MeshError {
        MeshError::Unreachable {
            target: self.target.clone(),
            address: self.address.clone(),
            reason: reason.into(),
        }
    }

    /// Current connection, re-dialling once if the previous one dropped.
    async fn connection(&self) -> Result<Arc<Connection>, MeshError> {
        if self.shut.load(Ordering::Acquire) {
            return Err(self.unreachable("client closed"));
        }
        if let Some(connection) = self.connection.load_full() {
            if connection.is_open() {
                return Ok(connection);
            }
        }

        let _redial = self.redial.lock().await;
        if let Some(connection) = self.connection.load_full() {
            if connection.is_open() {
                return Ok(connection);
            }
        }

        tracing::info!(downstream = %self.target, address = %self.address, "Re-dialling downstream");
        let policy = ConnectPolicy {
            attempts: 1,
            ..self.policy
        };
        let fresh = dial(&self.target, &self.address, &policy).await?;
        self.connection.store(Some(Arc::clone(&fresh)));
        Ok(fresh)
    }

    async fn round_trip(
        &self,
        ctx: &CallContext,
        method: &str,
        payload: Bytes,
    ) -> Result<Bytes, MeshError> {
        let connection = self.connection().await?;

        let mut metadata = Metadata::new();
        if let Some(trace) = ctx.trace() {
            propagation::inject(trace, &mut metadata);
        }
        if let Some(remaining) = ctx.remaining() {
            let millis = remaining.as_millis().max(1);
            metadata.insert(TIMEOUT_KEY.to_string(), millis.to_string());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = wire::encode_frame(&RequestFrame {
            id,
            method: method.to_string(),
            metadata,
            payload: payload.to_vec(),
        })?;

        let (waiter, reply) = oneshot::channel();
        connection.pending.insert(id, waiter);
        let _pending = PendingGuard {
            pending: &connection.pending,
            id,
        };
        if !connection.is_open() {
            return Err(self.unreachable("connection lost"));
        }

        connection
            .outbound
            .send(frame)
            .await
            .map_err(|_| self.unreachable("connection lost"))?;

        let response = tokio::select! {
            response = reply => response.map_err(|_| self.unreachable("connection lost"))?,
            _ = connection.closed.cancelled() => return Err(self.unreachable("connection lost")),
        };

        if response.status.is_ok() {
            Ok(Bytes::from(response.payload))
        } else {
            Err(MeshError::Downstream {
                method: method.to_string(),
                status: response.status,
            })
        }
    }
}

#[async_trait]
impl Transport for RpcClient {
    fn target(&self) -> &str {
        &self.target
    }

    async fn invoke(
        &self,
        ctx: &CallContext,
        method: &str,
        payload: Bytes,
    ) -> Result<Bytes, MeshError> {
        let start = Instant::now();
        let result = ctx.run(self.round_trip(ctx, method, payload)).await;

        let code = match &result {
            Ok(_) => Code::Ok,
            Err(e) => e.code(),
        };
        tracing::debug!(downstream = %self.target, method, code = code.as_str(), "Downstream call finished");
        metrics::record_downstream_call(&self.target, method, code, start);
        result
    }

    async fn close(&self) {
        self.shut.store(true, Ordering::Release);
        if let Some(connection) = self.connection.swap(None) {
            connection.closed.cancel();
        }
        tracing::debug!(downstream = %self.target, "Client closed");
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("target", &self.target)
            .field("address", &self.address)
            .finish()
    }
}

async fn dial(
    target: &str,
    address: &str,
    policy: &ConnectPolicy,
) -> Result<Arc<Connection>, MeshError> {
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        let delay = policy.backoff.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match Connection::open(target, address, policy.timeout).await {
            Ok(connection) => {
                tracing::info!(downstream = target, address, attempt, "Connected to downstream");
                return Ok(connection);
            }
            Err(e) => {
                tracing::warn!(
                    downstream = target,
                    address,
                    attempt,
                    attempts,
                    error = %e,
                    "Connection attempt failed"
                );
                last_error = e;
            }
        }
    }

    Err(MeshError::Unreachable {
        target: target.to_string(),
        address: address.to_string(),
        reason: last_error,
    })
}
