//! Method table shared by the RPC listener and the HTTP gateway.
//!
//! # Responsibilities
//! - Map `Service/Method` names to typed handlers
//! - Decode the request in the transport's encoding, encode the response
//! - Open exactly one span per inbound call and close it on every outcome
//!
//! # Design Decisions
//! - Handlers are type-erased once at registration; dispatch is a map lookup
//! - Every failure leaving a capability is tagged with the capability's name
//! - The handler future runs under the call's cancellation and deadline

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::CallContext;
use crate::error::MeshError;
use crate::rpc::wire::Encoding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Post => "post",
        }
    }
}

/// Where a capability is reachable on the HTTP gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRule {
    pub verb: Verb,
    /// axum path syntax, e.g. `/v1/products/{id}`.
    pub path: &'static str,
}

impl HttpRule {
    pub const fn get(path: &'static str) -> Self {
        Self { verb: Verb::Get, path }
    }

    pub const fn post(path: &'static str) -> Self {
        Self { verb: Verb::Post, path }
    }
}

/// Static description of one capability.
#[derive(Debug, Clone, Copy)]
pub struct MethodDescriptor {
    /// RPC method name, `Service/Method`.
    pub path: &'static str,
    /// Span name recorded for each invocation, `Service.Method`.
    pub span: &'static str,
    pub summary: &'static str,
    pub http: Option<HttpRule>,
}

type Handler =
    Arc<dyn Fn(CallContext, Encoding, Bytes) -> BoxFuture<'static, Result<Bytes, MeshError>> + Send + Sync>;

pub struct Capability {
    descriptor: MethodDescriptor,
    handler: Handler,
}

impl Capability {
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }
}

#[derive(Default)]
pub struct Registry {
    capabilities: BTreeMap<&'static str, Capability>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler. A second registration of the same path replaces the first.
    pub fn register<Req, Resp, F, Fut>(&mut self, descriptor: MethodDescriptor, handler: F) -> &mut Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, MeshError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: Handler = Arc::new(move |ctx: CallContext, encoding: Encoding, payload: Bytes| {
            let handler = Arc::clone(&handler);
            async move {
                let (ctx, mut span) = ctx.start_span(descriptor.span);

                let result = async {
                    let request: Req = encoding.decode(&payload)?;
                    let response = ctx.run(handler(ctx.clone(), request)).await?;
                    encoding.encode(&response)
                }
                .await
                .map_err(|e| e.within(descriptor.span));

                if let Err(e) = &result {
                    span.record_error(e);
                }
                span.end();
                result
            }
            .boxed()
        });

        self.capabilities.insert(
            descriptor.path,
            Capability {
                descriptor,
                handler: erased,
            },
        );
        self
    }

    /// Run the capability registered under `method`.
    pub async fn dispatch(
        &self,
        ctx: CallContext,
        method: &str,
        encoding: Encoding,
        payload: Bytes,
    ) -> Result<Bytes, MeshError> {
        let capability = self
            .capabilities
            .get(method)
            .ok_or_else(|| MeshError::Unimplemented(method.to_string()))?;
        (capability.handler)(ctx, encoding, payload).await
    }

    pub fn get(&self, method: &str) -> Option<&Capability> {
        self.capabilities.get(method)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.values()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.capabilities.keys()).finish()
    }
}
