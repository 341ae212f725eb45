//! Capabilities of the `user` role.

use std::sync::Arc;

use crate::capability::clients::ProductClient;
use crate::capability::messages::{
    CreateUserRequest, CreateUserResponse, GetUserByEmailRequest, GetUserByEmailResponse,
    PingRequest, PingResponse, User,
};
use crate::capability::registry::{HttpRule, MethodDescriptor, Registry};
use crate::capability::store::{UserRepository, WELCOME_PRODUCT_ID};
use crate::context::CallContext;
use crate::error::MeshError;

pub const CREATE_USER: MethodDescriptor = MethodDescriptor {
    path: "UserService/CreateUser",
    span: "UserService.CreateUser",
    summary: "Register a user and attach the welcome product",
    http: Some(HttpRule::post("/v1/users")),
};

pub const GET_USER_BY_EMAIL: MethodDescriptor = MethodDescriptor {
    path: "UserService/GetUserByEmail",
    span: "UserService.GetUserByEmail",
    summary: "Fetch a user by email, provisioning the account on first use",
    http: Some(HttpRule::get("/v1/users/email/{email}")),
};

pub const PING: MethodDescriptor = MethodDescriptor {
    path: "UserService/Ping",
    span: "UserService.Ping",
    summary: "Relay a ping to the product service",
    http: Some(HttpRule::get("/v1/ping")),
};

pub struct UserService {
    name: String,
    users: UserRepository,
    products: ProductClient,
}

impl UserService {
    pub fn new(name: impl Into<String>, users: UserRepository, products: ProductClient) -> Self {
        Self {
            name: name.into(),
            users,
            products,
        }
    }

    pub fn register(self: Arc<Self>, registry: &mut Registry) {
        let service = Arc::clone(&self);
        registry.register(CREATE_USER, move |ctx, request: CreateUserRequest| {
            let service = Arc::clone(&service);
            async move { service.create_user(&ctx, request).await }
        });

        let service = Arc::clone(&self);
        registry.register(GET_USER_BY_EMAIL, move |ctx, request: GetUserByEmailRequest| {
            let service = Arc::clone(&service);
            async move { service.get_user_by_email(&ctx, request).await }
        });

        let service = self;
        registry.register(PING, move |ctx, _request: PingRequest| {
            let service = Arc::clone(&service);
            async move { service.ping(&ctx).await }
        });
    }

    pub async fn create_user(
        &self,
        ctx: &CallContext,
        request: CreateUserRequest,
    ) -> Result<CreateUserResponse, MeshError> {
        let email = validate_email(&request.email)?;
        if request.first_name.trim().is_empty() {
            return Err(MeshError::InvalidArgument("first_name is required".to_string()));
        }

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
        };
        // Rolled back on error and on cancellation of this future alike.
        let reservation = self.users.reserve(user.clone())?;
        let welcome_product = self.products.get_product(ctx, WELCOME_PRODUCT_ID).await?;
        reservation.commit();

        tracing::info!(service = %self.name, user_id = %user.id, "User created");
        Ok(CreateUserResponse {
            success: true,
            message: "User created successfully".to_string(),
            user,
            welcome_product,
        })
    }

    pub async fn get_user_by_email(
        &self,
        ctx: &CallContext,
        request: GetUserByEmailRequest,
    ) -> Result<GetUserByEmailResponse, MeshError> {
        let email = validate_email(&request.email)?;

        let welcome_product = self.products.get_product(ctx, WELCOME_PRODUCT_ID).await?;
        let user = self.users.provision(email);

        Ok(GetUserByEmailResponse {
            user,
            welcome_product,
        })
    }

    pub async fn ping(&self, ctx: &CallContext) -> Result<PingResponse, MeshError> {
        let mut downstream = self.products.ping(ctx).await?;
        downstream.hops.insert(0, self.name.clone());
        Ok(downstream)
    }
}

fn validate_email(email: &str) -> Result<&str, MeshError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(MeshError::InvalidArgument(format!(
            "'{}' is not a valid email address",
            email
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::messages::{GetProductResponse, Product};
    use crate::capability::store::ProductCatalog;
    use crate::rpc::status::{Code, Status};
    use crate::rpc::{Encoding, Transport};
    use crate::trace::{BatchSettings, MemoryExporter, Tracer};
    use async_trait::async_trait;
    use bytes::Bytes;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Product transport answering from a fixed outcome and counting calls.
    struct StubProducts {
        fail: bool,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for StubProducts {
        fn target(&self) -> &str {
            "product"
        }

        async fn invoke(&self, _ctx: &CallContext, method: &str, _payload: Bytes) -> Result<Bytes, MeshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(MeshError::Downstream {
                    method: method.to_string(),
                    status: Status::new(Code::Unavailable, "catalog offline"),
                });
            }
            let product: Option<Product> = Some(ProductCatalog::welcome_product());
            Encoding::MsgPack.encode(&GetProductResponse { product })
        }
    }

    fn service(fail: bool) -> (UserService, Arc<StubProducts>, UserRepository) {
        service_with_delay(fail, Duration::ZERO)
    }

    fn service_with_delay(fail: bool, delay: Duration) -> (UserService, Arc<StubProducts>, UserRepository) {
        let stub = Arc::new(StubProducts {
            fail,
            delay,
            calls: AtomicUsize::new(0),
        });
        let users = UserRepository::new();
        let svc = UserService::new("user-test", users.clone(), ProductClient::new(stub.clone()));
        (svc, stub, users)
    }

    fn ctx() -> CallContext {
        let tracer = Tracer::new("user-test", true, Arc::new(MemoryExporter::new()), BatchSettings::default());
        CallContext::new(tracer, None, CancellationToken::new())
    }

    fn create_request(email: &str) -> CreateUserRequest {
        CreateUserRequest {
            email: email.to_string(),
            password: "secret".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        }
    }

    #[tokio::test]
    async fn create_user_attaches_welcome_product() {
        let (svc, stub, users) = service(false);
        let response = svc.create_user(&ctx(), create_request("ada@example.com")).await.unwrap();
        assert!(response.success);
        assert_eq!(response.welcome_product.unwrap().id, WELCOME_PRODUCT_ID);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert!(users.find_by_email("ada@example.com").is_some());
    }

    #[tokio::test]
    async fn invalid_email_never_reaches_downstream() {
        let (svc, stub, users) = service(false);
        let err = svc.create_user(&ctx(), create_request("not-an-email")).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn downstream_failure_leaves_no_user_behind() {
        let (svc, _stub, users) = service(true);
        let err = svc.create_user(&ctx(), create_request("ada@example.com")).await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn lookup_provisions_account_once() {
        let (svc, stub, users) = service(false);
        let request = GetUserByEmailRequest {
            email: "grace@example.com".to_string(),
        };
        let first = svc.get_user_by_email(&ctx(), request.clone()).await.unwrap();
        let second = svc.get_user_by_email(&ctx(), request).await.unwrap();
        assert_eq!(first.user, second.user);
        assert_eq!(users.len(), 1);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }

    async fn dispatch_create(registry: &Registry, ctx: CallContext, email: &str) -> Result<Bytes, MeshError> {
        let payload = Encoding::Json.encode(&create_request(email)).unwrap();
        registry
            .dispatch(ctx, CREATE_USER.path, Encoding::Json, payload)
            .await
    }

    #[tokio::test]
    async fn deadline_during_product_call_leaves_no_user_behind() {
        let (svc, stub, users) = service_with_delay(false, Duration::from_secs(5));
        let mut registry = Registry::new();
        Arc::new(svc).register(&mut registry);

        let ctx = ctx().with_timeout(Duration::from_millis(50));
        let err = dispatch_create(&registry, ctx, "a@b.c").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert!(users.find_by_email("a@b.c").is_none());
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_product_call_leaves_no_user_behind() {
        let (svc, _stub, users) = service_with_delay(false, Duration::from_secs(5));
        let mut registry = Registry::new();
        Arc::new(svc).register(&mut registry);

        let token = CancellationToken::new();
        let tracer = Tracer::new("user-test", true, Arc::new(MemoryExporter::new()), BatchSettings::default());
        let ctx = CallContext::new(tracer, None, token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let err = dispatch_create(&registry, ctx, "a@b.c").await.unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn retry_after_timeout_succeeds() {
        let (slow, _, users) = service_with_delay(false, Duration::from_secs(5));
        let mut registry = Registry::new();
        Arc::new(slow).register(&mut registry);
        let timed_ctx = ctx().with_timeout(Duration::from_millis(50));
        dispatch_create(&registry, timed_ctx, "a@b.c").await.unwrap_err();

        let stub = Arc::new(StubProducts {
            fail: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let fast = UserService::new("user-test", users.clone(), ProductClient::new(stub));
        let response = fast.create_user(&ctx(), create_request("a@b.c")).await.unwrap();
        assert!(response.success);
        assert_eq!(users.len(), 1);
    }
}
