//! JSON gateway onto the capability registry.
//!
//! # Responsibilities
//! - Expose every capability that declares an `HttpRule` as a REST route
//! - Merge path parameters, query string and JSON body into one request message
//! - Map call outcomes onto HTTP statuses with a `{code, message}` error body
//! - Answer `/health` from the lifecycle state
//!
//! # Design Decisions
//! - The gateway dispatches in-process; it does not loop back over RPC
//! - Calls are only accepted while the process is `Serving`
//! - Path parameters override body fields of the same name

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, on, MethodFilter, MethodRouter};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::capability::{MethodDescriptor, Registry, Verb};
use crate::config::ServiceIdentity;
use crate::context::CallContext;
use crate::error::MeshError;
use crate::http::{docs, middleware};
use crate::lifecycle::state::{LifecycleState, StateCell};
use crate::observability::metrics;
use crate::rpc::status::{Code, Status};
use crate::rpc::wire::Encoding;
use crate::trace::{propagation, Tracer};

/// Extra time the HTTP timeout backstop allows beyond the call deadline.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Application state injected into handlers.
#[derive(Clone)]
struct GatewayState {
    registry: Arc<Registry>,
    tracer: Tracer,
    lifecycle: StateCell,
    shutdown: CancellationToken,
    call_timeout: Duration,
    docs: Arc<Value>,
}

/// HTTP surface of one service, built once the listener address is known.
pub struct Gateway {
    registry: Arc<Registry>,
    tracer: Tracer,
    lifecycle: StateCell,
    identity: ServiceIdentity,
    call_timeout: Duration,
}

impl Gateway {
    pub fn new(
        registry: Arc<Registry>,
        tracer: Tracer,
        lifecycle: StateCell,
        identity: ServiceIdentity,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            tracer,
            lifecycle,
            identity,
            call_timeout,
        }
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(self, http_addr: SocketAddr, shutdown: CancellationToken) -> Router {
        let docs = docs::swagger_document(&self.identity, &self.registry, http_addr);
        let docs_path = format!("/{}/swagger.json", self.identity.role);

        let mut routes: BTreeMap<&'static str, MethodRouter<GatewayState>> = BTreeMap::new();
        for capability in self.registry.capabilities() {
            let descriptor = *capability.descriptor();
            let Some(rule) = descriptor.http else {
                continue;
            };
            let filter = match rule.verb {
                Verb::Get => MethodFilter::GET,
                Verb::Post => MethodFilter::POST,
            };

            let method_router = if rule.path.contains('{') {
                on(
                    filter,
                    move |State(state): State<GatewayState>,
                          Path(params): Path<HashMap<String, String>>,
                          Query(query): Query<HashMap<String, String>>,
                          headers: HeaderMap,
                          body: Bytes| async move {
                        dispatch(state, descriptor, params, query, headers, body).await
                    },
                )
            } else {
                on(
                    filter,
                    move |State(state): State<GatewayState>,
                          Query(query): Query<HashMap<String, String>>,
                          headers: HeaderMap,
                          body: Bytes| async move {
                        dispatch(state, descriptor, HashMap::new(), query, headers, body).await
                    },
                )
            };

            let merged = match routes.remove(rule.path) {
                Some(existing) => existing.merge(method_router),
                None => method_router,
            };
            routes.insert(rule.path, merged);
        }

        let state = GatewayState {
            registry: self.registry,
            tracer: self.tracer,
            lifecycle: self.lifecycle,
            shutdown,
            call_timeout: self.call_timeout,
            docs: Arc::new(docs),
        };

        let mut router = Router::new()
            .route("/health", get(health))
            .route(&docs_path, get(swagger));
        for (path, method_router) in routes {
            router = router.route(path, method_router);
        }

        let router = router.fallback(not_found).with_state(state);
        middleware::apply_layers(router, self.call_timeout + TIMEOUT_GRACE)
    }
}

async fn health(State(state): State<GatewayState>) -> Response {
    match state.lifecycle.current() {
        LifecycleState::Serving => (StatusCode::OK, "OK").into_response(),
        other => (StatusCode::SERVICE_UNAVAILABLE, other.as_str()).into_response(),
    }
}

async fn swagger(State(state): State<GatewayState>) -> Json<Value> {
    Json(state.docs.as_ref().clone())
}

async fn not_found(uri: Uri) -> Response {
    error_response(&Status::new(
        Code::NotFound,
        format!("no route for {}", uri.path()),
    ))
}

async fn dispatch(
    state: GatewayState,
    descriptor: MethodDescriptor,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    let result = match state.lifecycle.current() {
        LifecycleState::Serving => call(&state, &descriptor, params, query, &headers, &body).await,
        other => Err(MeshError::Unreachable {
            target: state.tracer.service().to_string(),
            address: "local".to_string(),
            reason: format!("service is {}", other),
        }),
    };

    let response = match result {
        Ok(payload) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            payload,
        )
            .into_response(),
        Err(e) => {
            let status = e.to_status();
            tracing::debug!(
                method = descriptor.path,
                code = status.code.as_str(),
                error = %e,
                "Gateway call failed"
            );
            error_response(&status)
        }
    };

    metrics::record_http_request(descriptor.path, response.status().as_u16(), start);
    response
}

async fn call(
    state: &GatewayState,
    descriptor: &MethodDescriptor,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Bytes, MeshError> {
    let payload = request_payload(params, query, body)?;
    let ctx = CallContext::new(
        state.tracer.clone(),
        propagation::extract(headers),
        state.shutdown.child_token(),
    )
    .with_timeout(state.call_timeout);

    state
        .registry
        .dispatch(ctx, descriptor.path, Encoding::Json, payload)
        .await
}

/// One JSON object holding body fields, then query parameters, then path parameters.
fn request_payload(
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: &Bytes,
) -> Result<Bytes, MeshError> {
    let mut object = if body.is_empty() {
        Map::new()
    } else {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                return Err(MeshError::InvalidArgument(
                    "request body must be a JSON object".to_string(),
                ))
            }
            Err(e) => {
                return Err(MeshError::InvalidArgument(format!(
                    "malformed JSON body: {}",
                    e
                )))
            }
        }
    };

    for (key, value) in query.into_iter().chain(params) {
        object.insert(key, Value::String(value));
    }

    serde_json::to_vec(&Value::Object(object))
        .map(Bytes::from)
        .map_err(|e| MeshError::Internal(format!("request encoding failed: {}", e)))
}

fn error_response(status: &Status) -> Response {
    let body = json!({
        "code": u8::from(status.code),
        "message": status.message,
    });
    (status.code.http_status(), Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ProductCatalog, ProductService};
    use crate::config::Role;
    use crate::trace::{BatchSettings, MemoryExporter};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn gateway(lifecycle: StateCell) -> Router {
        let mut registry = Registry::new();
        Arc::new(ProductService::new("product-gw", ProductCatalog::seeded())).register(&mut registry);
        let tracer = Tracer::new(
            "product-gw",
            true,
            Arc::new(MemoryExporter::new()),
            BatchSettings::default(),
        );
        let identity = ServiceIdentity {
            name: "product-gw".to_string(),
            role: Role::Product,
            rpc_address: "127.0.0.1:0".to_string(),
            http_address: "127.0.0.1:0".to_string(),
        };
        Gateway::new(Arc::new(registry), tracer, lifecycle, identity, Duration::from_secs(5))
            .router("127.0.0.1:8083".parse().unwrap(), CancellationToken::new())
    }

    fn serving() -> StateCell {
        let lifecycle = StateCell::new();
        lifecycle.advance(LifecycleState::Serving);
        lifecycle
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_follows_lifecycle() {
        let lifecycle = StateCell::new();
        let app = gateway(lifecycle.clone());

        let response = app.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        lifecycle.advance(LifecycleState::Serving);
        let response = app.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        lifecycle.advance(LifecycleState::Draining);
        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn path_parameter_reaches_capability() {
        let response = gateway(serving())
            .oneshot(get_request("/v1/products/1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["product"]["name"], "Product 1");
    }

    #[tokio::test]
    async fn missing_product_is_null_not_404() {
        let response = gateway(serving())
            .oneshot(get_request("/v1/products/404"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(json_body(response).await["product"].is_null());
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/products")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = gateway(serving()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], 3);
    }

    #[tokio::test]
    async fn duplicate_product_is_conflict() {
        let app = gateway(serving());
        let create = || {
            Request::builder()
                .method("POST")
                .uri("/v1/products")
                .body(Body::from(r#"{"id":"9","name":"Desk","price":80.0}"#))
                .unwrap()
        };

        let first = app.clone().oneshot(create()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app.oneshot(create()).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(second).await["code"], 6);
    }

    #[tokio::test]
    async fn calls_refused_unless_serving() {
        let response = gateway(StateCell::new())
            .oneshot(get_request("/v1/products/1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["code"], 14);
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let response = gateway(serving())
            .oneshot(get_request("/v2/nothing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["code"], 5);
    }

    #[tokio::test]
    async fn swagger_is_served_per_role() {
        let response = gateway(serving())
            .oneshot(get_request("/product/swagger.json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["swagger"], "2.0");
    }
}
