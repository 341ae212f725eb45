//! Typed clients for the downstream capabilities.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::capability::messages::{
    GetProductRequest, GetProductResponse, GetUserByEmailRequest, GetUserByEmailResponse,
    PingRequest, PingResponse, Product,
};
use crate::capability::registry::MethodDescriptor;
use crate::capability::{product, user};
use crate::context::CallContext;
use crate::error::MeshError;
use crate::rpc::{Encoding, Transport};

async fn call<Req, Resp>(
    transport: &dyn Transport,
    ctx: &CallContext,
    method: &MethodDescriptor,
    request: &Req,
) -> Result<Resp, MeshError>
where
    Req: Serialize + Sync,
    Resp: DeserializeOwned,
{
    let payload = Encoding::MsgPack.encode(request)?;
    let response = transport.invoke(ctx, method.path, payload).await?;
    Encoding::MsgPack.decode(&response).map_err(|e| {
        MeshError::Internal(format!(
            "malformed {} response from {}: {}",
            method.path,
            transport.target(),
            e
        ))
    })
}

/// Client for the `user` role.
#[derive(Clone)]
pub struct UserClient {
    transport: Arc<dyn Transport>,
}

impl UserClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn get_user_by_email(
        &self,
        ctx: &CallContext,
        email: &str,
    ) -> Result<GetUserByEmailResponse, MeshError> {
        let request = GetUserByEmailRequest {
            email: email.to_string(),
        };
        call(self.transport.as_ref(), ctx, &user::GET_USER_BY_EMAIL, &request).await
    }

    pub async fn ping(&self, ctx: &CallContext) -> Result<PingResponse, MeshError> {
        call(self.transport.as_ref(), ctx, &user::PING, &PingRequest {}).await
    }
}

/// Client for the `product` role.
#[derive(Clone)]
pub struct ProductClient {
    transport: Arc<dyn Transport>,
}

impl ProductClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// `Ok(None)` when the catalog has no such product.
    pub async fn get_product(
        &self,
        ctx: &CallContext,
        id: &str,
    ) -> Result<Option<Product>, MeshError> {
        let request = GetProductRequest { id: id.to_string() };
        let response: GetProductResponse =
            call(self.transport.as_ref(), ctx, &product::GET_PRODUCT, &request).await?;
        Ok(response.product)
    }

    pub async fn ping(&self, ctx: &CallContext) -> Result<PingResponse, MeshError> {
        call(self.transport.as_ref(), ctx, &product::PING, &PingRequest {}).await
    }
}
