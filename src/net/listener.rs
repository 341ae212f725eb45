//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to configured address(es)
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Report bind failures as `BindFailed` so startup can abort

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::MeshError;

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    /// Listener role, for logs and errors ("rpc" / "http").
    kind: &'static str,
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    /// Bind to `address` with connection limits.
    pub async fn bind(
        kind: &'static str,
        address: &str,
        max_connections: usize,
    ) -> Result<Self, MeshError> {
        let bind_failed = |source| MeshError::BindFailed {
            listener: kind,
            address: address.to_string(),
            source,
        };

        let addr: SocketAddr = address.parse().map_err(|e| {
            bind_failed(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(bind_failed)?;
        let local_addr = listener.local_addr().map_err(bind_failed)?;

        tracing::info!(
            listener = kind,
            address = %local_addr,
            max_connections,
            "Listener bound"
        );

        Ok(Self {
            kind,
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections.max(1))),
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(
        &self,
    ) -> Result<(TcpStream, SocketAddr, ConnectionPermit), std::io::Error> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let (stream, addr) = self.inner.accept().await?;

        tracing::debug!(
            listener = self.kind,
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Hand the raw listener to a server that manages its own accept loop.
    pub fn into_inner(self) -> TcpListener {
        self.inner
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
