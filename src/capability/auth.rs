//! Edge capabilities of the `auth` role.

use std::sync::Arc;

use crate::capability::clients::UserClient;
use crate::capability::messages::{LoginRequest, LoginResponse, PingRequest, PingResponse};
use crate::capability::registry::{HttpRule, MethodDescriptor, Registry};
use crate::context::CallContext;
use crate::error::MeshError;

pub const LOGIN: MethodDescriptor = MethodDescriptor {
    path: "AuthService/Login",
    span: "AuthService.Login",
    summary: "Log a user in and issue a session token",
    http: Some(HttpRule::post("/v1/auth/login")),
};

pub const PING: MethodDescriptor = MethodDescriptor {
    path: "AuthService/Ping",
    span: "AuthService.Ping",
    summary: "Relay a ping through the whole chain",
    http: Some(HttpRule::get("/v1/ping")),
};

pub struct AuthService {
    name: String,
    users: UserClient,
}

impl AuthService {
    pub fn new(name: impl Into<String>, users: UserClient) -> Self {
        Self {
            name: name.into(),
            users,
        }
    }

    pub fn register(self: Arc<Self>, registry: &mut Registry) {
        let service = Arc::clone(&self);
        registry.register(LOGIN, move |ctx, request: LoginRequest| {
            let service = Arc::clone(&service);
            async move { service.login(&ctx, request).await }
        });

        let service = self;
        registry.register(PING, move |ctx, _request: PingRequest| {
            let service = Arc::clone(&service);
            async move { service.ping(&ctx).await }
        });
    }

    pub async fn login(
        &self,
        ctx: &CallContext,
        request: LoginRequest,
    ) -> Result<LoginResponse, MeshError> {
        let email = request.email.trim();
        if email.is_empty() {
            return Err(MeshError::InvalidArgument("email is required".to_string()));
        }

        let found = self.users.get_user_by_email(ctx, email).await?;
        tracing::info!(service = %self.name, user_id = %found.user.id, "User logged in");

        Ok(LoginResponse {
            token: uuid::Uuid::new_v4().simple().to_string(),
            user: found.user,
        })
    }

    pub async fn ping(&self, ctx: &CallContext) -> Result<PingResponse, MeshError> {
        let mut downstream = self.users.ping(ctx).await?;
        downstream.hops.insert(0, self.name.clone());
        Ok(downstream)
    }
}
