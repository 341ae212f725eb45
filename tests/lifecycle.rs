//! Startup failures, health transitions and graceful shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use svc_mesh::config::{DownstreamConfig, Role};
use svc_mesh::context::CallContext;
use svc_mesh::lifecycle::{ControllerBuilder, LifecycleState};
use svc_mesh::rpc::Transport;
use svc_mesh::trace::MemoryExporter;
use svc_mesh::{ErrorKind, MeshError};

mod common;

/// A downstream that never answers.
struct Hanging {
    started: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for Hanging {
    fn target(&self) -> &str {
        "product"
    }

    async fn invoke(
        &self,
        _ctx: &CallContext,
        _method: &str,
        _payload: Bytes,
    ) -> Result<Bytes, MeshError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<Result<Bytes, MeshError>>().await
    }
}

fn closed_port() -> u16 {
    let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

#[tokio::test]
async fn health_is_ok_while_serving_then_refused() {
    let service = common::spawn_service(
        common::config_for(Role::Product),
        Arc::new(MemoryExporter::new()),
        Vec::new(),
    )
    .await;
    let url = service.url("/health");

    let res = common::http_client().get(&url).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "OK");

    let handle = service.handle.clone();
    service.stop().await.unwrap();
    assert_eq!(handle.state(), LifecycleState::Stopped);

    let refused = common::http_client().get(&url).send().await;
    assert!(refused.is_err(), "listener still accepting after stop");
}

#[tokio::test]
async fn occupied_port_is_bind_failed() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = common::config_for(Role::Product);
    config.service.rpc_address = occupied.local_addr().unwrap().to_string();

    let controller = ControllerBuilder::new(config)
        .exporter(Arc::new(MemoryExporter::new()))
        .build()
        .await
        .unwrap();
    let handle = controller.handle();

    let err = controller.run(std::future::pending()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BindFailed);
    assert_eq!(handle.state(), LifecycleState::Stopped);
    assert!(handle.addrs().is_none());
}

#[tokio::test]
async fn missing_downstream_is_unreachable() {
    let mut config = common::config_for(Role::User);
    config.downstream.insert(
        "product".to_string(),
        DownstreamConfig {
            address: format!("127.0.0.1:{}", closed_port()),
        },
    );

    let started = Instant::now();
    let err = ControllerBuilder::new(config)
        .exporter(Arc::new(MemoryExporter::new()))
        .build()
        .await
        .err()
        .expect("build should fail");
    assert_eq!(err.kind(), ErrorKind::Unreachable);
    assert!(err.to_string().contains("product"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn in_flight_call_is_cancelled_on_shutdown() {
    let started = Arc::new(AtomicUsize::new(0));
    let hanging: Arc<dyn Transport> = Arc::new(Hanging {
        started: Arc::clone(&started),
    });
    let service = common::spawn_service(
        common::config_for(Role::User),
        Arc::new(MemoryExporter::new()),
        vec![("product", hanging)],
    )
    .await;

    let url = service.url("/v1/users/email/stuck@example.com");
    let call = tokio::spawn(async move { common::http_client().get(url).send().await });

    let wait_start = Instant::now();
    while started.load(Ordering::SeqCst) == 0 {
        assert!(wait_start.elapsed() < Duration::from_secs(5), "call never reached downstream");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let health = service.url("/health");
    let shutdown_at = Instant::now();
    service.handle.shutdown();

    let res = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("in-flight call not released within 2s")
        .unwrap()
        .unwrap();
    assert!(shutdown_at.elapsed() < Duration::from_secs(2));
    assert_eq!(res.status().as_u16(), 499);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], 1);

    let result = tokio::time::timeout(Duration::from_secs(5), service.task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());

    assert!(common::http_client().get(&health).send().await.is_err());
}

#[tokio::test]
async fn graceful_stop_flushes_and_returns_ok() {
    let exporter = Arc::new(MemoryExporter::new());
    let mut config = common::config_for(Role::Product);
    // Nothing is exported until shutdown flushes.
    config.tracing.batch_size = 1000;
    config.tracing.export_interval_ms = 60_000;
    let service = common::spawn_service(config, Arc::clone(&exporter), Vec::new()).await;

    let res = common::http_client()
        .get(service.url("/v1/products/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let handle = service.handle.clone();
    service.stop().await.unwrap();

    assert_eq!(exporter.spans_named("ProductService.GetProduct").len(), 1);
    assert_eq!(handle.span_stats().open_now(), 0);
}
