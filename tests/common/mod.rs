//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use svc_mesh::config::{DownstreamConfig, MeshConfig, Role};
use svc_mesh::lifecycle::{BoundAddrs, ControllerBuilder, ControllerHandle};
use svc_mesh::rpc::wire::{self, RequestFrame};
use svc_mesh::rpc::Transport;
use svc_mesh::trace::{MemoryExporter, SpanRecord};
use svc_mesh::MeshError;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

/// Config for `role` on ephemeral loopback ports with fast span export.
pub fn config_for(role: Role) -> MeshConfig {
    let mut config = MeshConfig::for_role(role);
    config.service.rpc_address = "127.0.0.1:0".to_string();
    config.service.http_address = "127.0.0.1:0".to_string();
    config.tracing.batch_size = 1;
    config.tracing.export_interval_ms = 10;
    config.timeouts.connect_ms = 500;
    config.timeouts.connect_attempts = 2;
    config.timeouts.backoff_base_ms = 10;
    config.timeouts.backoff_max_ms = 50;
    config.shutdown.drain_timeout_ms = 2000;
    config
}

pub struct RunningService {
    pub handle: ControllerHandle,
    pub addrs: BoundAddrs,
    pub task: JoinHandle<Result<(), MeshError>>,
}

impl RunningService {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addrs.http, path)
    }

    /// Request shutdown and wait for `run` to return.
    pub async fn stop(self) -> Result<(), MeshError> {
        self.handle.shutdown();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("service did not stop in time")
            .expect("service task panicked")
    }
}

/// Build and start one service, returning once it is serving.
pub async fn spawn_service(
    config: MeshConfig,
    exporter: Arc<MemoryExporter>,
    injected: Vec<(&str, Arc<dyn Transport>)>,
) -> RunningService {
    let mut builder = ControllerBuilder::new(config).exporter(exporter);
    for (name, transport) in injected {
        builder = builder.downstream(name, transport);
    }
    let controller = builder.build().await.expect("service failed to build");
    let handle = controller.handle();
    let task = tokio::spawn(controller.run(std::future::pending()));

    let addrs = tokio::time::timeout(Duration::from_secs(5), handle.wait_serving())
        .await
        .expect("service did not start in time")
        .expect("service stopped before serving");

    RunningService {
        handle,
        addrs,
        task,
    }
}

pub struct Chain {
    pub auth: RunningService,
    pub user: RunningService,
    pub product: RunningService,
    pub exporter: Arc<MemoryExporter>,
}

impl Chain {
    pub async fn stop(self) {
        self.auth.stop().await.unwrap();
        self.user.stop().await.unwrap();
        self.product.stop().await.unwrap();
    }
}

/// Start product, then user, then auth, each wired to the one before.
/// All three export into the same in-memory collector.
pub async fn start_chain() -> Chain {
    let exporter = Arc::new(MemoryExporter::new());

    let product = spawn_service(config_for(Role::Product), Arc::clone(&exporter), Vec::new()).await;

    let mut user_config = config_for(Role::User);
    user_config.downstream.insert(
        "product".to_string(),
        DownstreamConfig {
            address: product.addrs.rpc.to_string(),
        },
    );
    let user = spawn_service(user_config, Arc::clone(&exporter), Vec::new()).await;

    let mut auth_config = config_for(Role::Auth);
    auth_config.downstream.insert(
        "user".to_string(),
        DownstreamConfig {
            address: user.addrs.rpc.to_string(),
        },
    );
    let auth = spawn_service(auth_config, Arc::clone(&exporter), Vec::new()).await;

    Chain {
        auth,
        user,
        product,
        exporter,
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// Poll the exporter until `check` accepts its spans or `timeout` passes.
pub async fn wait_for_spans<F>(exporter: &MemoryExporter, timeout: Duration, check: F) -> Vec<SpanRecord>
where
    F: Fn(&[SpanRecord]) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let spans = exporter.spans();
        if check(&spans) || tokio::time::Instant::now() >= deadline {
            return spans;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// An RPC peer that reads request frames, reports each one and never answers.
pub async fn spawn_silent_peer() -> (std::net::SocketAddr, mpsc::UnboundedReceiver<RequestFrame>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen, requests) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut frames = FramedRead::new(socket, wire::codec());
                while let Some(Ok(bytes)) = frames.next().await {
                    if let Ok(frame) = wire::decode_frame::<RequestFrame>(&bytes) {
                        let _ = seen.send(frame);
                    }
                }
            });
        }
    });

    (addr, requests)
}
