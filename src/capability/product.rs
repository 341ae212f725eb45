//! Leaf capabilities of the `product` role.

use std::sync::Arc;

use crate::capability::messages::{
    CreateProductRequest, CreateProductResponse, GetProductRequest, GetProductResponse,
    PingRequest, PingResponse, Product,
};
use crate::capability::registry::{HttpRule, MethodDescriptor, Registry};
use crate::capability::store::ProductCatalog;
use crate::context::CallContext;
use crate::error::MeshError;

pub const GET_PRODUCT: MethodDescriptor = MethodDescriptor {
    path: "ProductService/GetProduct",
    span: "ProductService.GetProduct",
    summary: "Look up a catalog item by id",
    http: Some(HttpRule::get("/v1/products/{id}")),
};

pub const CREATE_PRODUCT: MethodDescriptor = MethodDescriptor {
    path: "ProductService/CreateProduct",
    span: "ProductService.CreateProduct",
    summary: "Add an item to the catalog",
    http: Some(HttpRule::post("/v1/products")),
};

pub const PING: MethodDescriptor = MethodDescriptor {
    path: "ProductService/Ping",
    span: "ProductService.Ping",
    summary: "Answer a ping",
    http: Some(HttpRule::get("/v1/ping")),
};

pub struct ProductService {
    name: String,
    catalog: ProductCatalog,
}

impl ProductService {
    pub fn new(name: impl Into<String>, catalog: ProductCatalog) -> Self {
        Self {
            name: name.into(),
            catalog,
        }
    }

    pub fn register(self: Arc<Self>, registry: &mut Registry) {
        let service = Arc::clone(&self);
        registry.register(GET_PRODUCT, move |_ctx, request: GetProductRequest| {
            let service = Arc::clone(&service);
            async move { service.get_product(request) }
        });

        let service = Arc::clone(&self);
        registry.register(CREATE_PRODUCT, move |_ctx, request: CreateProductRequest| {
            let service = Arc::clone(&service);
            async move { service.create_product(request) }
        });

        let service = self;
        registry.register(PING, move |ctx: CallContext, _request: PingRequest| {
            let service = Arc::clone(&service);
            async move { service.ping(&ctx) }
        });
    }

    pub fn get_product(&self, request: GetProductRequest) -> Result<GetProductResponse, MeshError> {
        let id = request.id.trim();
        if id.is_empty() {
            return Err(MeshError::InvalidArgument("id is required".to_string()));
        }

        self.catalog.provision_welcome();
        Ok(GetProductResponse {
            product: self.catalog.get(id),
        })
    }

    pub fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<CreateProductResponse, MeshError> {
        if request.id.trim().is_empty() || request.name.trim().is_empty() {
            return Err(MeshError::InvalidArgument("id and name are required".to_string()));
        }
        if !request.price.is_finite() || request.price < 0.0 {
            return Err(MeshError::InvalidArgument(format!(
                "price must be a non-negative number, got {}",
                request.price
            )));
        }

        let product = Product {
            id: request.id.trim().to_string(),
            name: request.name.trim().to_string(),
            description: request.description,
            price: request.price,
            quantity: request.quantity,
        };
        self.catalog.insert(product.clone())?;
        tracing::info!(service = %self.name, product_id = %product.id, "Product created");
        Ok(CreateProductResponse { product })
    }

    pub fn ping(&self, ctx: &CallContext) -> Result<PingResponse, MeshError> {
        ctx.check()?;
        Ok(PingResponse {
            message: "pong".to_string(),
            hops: vec![self.name.clone()],
        })
    }
}
