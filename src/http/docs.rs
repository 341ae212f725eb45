//! Swagger 2.0 document describing a role's gateway routes.

use std::net::SocketAddr;

use serde_json::{json, Map, Value};

use crate::capability::{Registry, Verb};
use crate::config::ServiceIdentity;

pub fn swagger_document(identity: &ServiceIdentity, registry: &Registry, host: SocketAddr) -> Value {
    let mut paths = Map::new();

    for capability in registry.capabilities() {
        let descriptor = capability.descriptor();
        let Some(rule) = descriptor.http else {
            continue;
        };

        let mut parameters: Vec<Value> = path_params(rule.path)
            .map(|name| {
                json!({
                    "name": name,
                    "in": "path",
                    "required": true,
                    "type": "string",
                })
            })
            .collect();
        if rule.verb == Verb::Post {
            parameters.push(json!({
                "name": "body",
                "in": "body",
                "required": true,
                "schema": { "type": "object" },
            }));
        }

        let operation = json!({
            "operationId": descriptor.path.replace('/', "_"),
            "summary": descriptor.summary,
            "tags": [descriptor.path.split('/').next().unwrap_or(descriptor.path)],
            "parameters": parameters,
            "responses": {
                "200": { "description": "A successful response." },
                "default": {
                    "description": "An unexpected error response.",
                    "schema": { "$ref": "#/definitions/rpcStatus" },
                },
            },
        });

        let entry = paths
            .entry(rule.path.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(verbs) = entry {
            verbs.insert(rule.verb.as_str().to_string(), operation);
        }
    }

    json!({
        "swagger": "2.0",
        "info": {
            "title": format!("{} ({})", identity.name, identity.role),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "host": host.to_string(),
        "schemes": ["http"],
        "consumes": ["application/json"],
        "produces": ["application/json"],
        "paths": paths,
        "definitions": {
            "rpcStatus": {
                "type": "object",
                "properties": {
                    "code": { "type": "integer", "format": "int32" },
                    "message": { "type": "string" },
                },
            },
        },
    })
}

/// Names of the `{param}` segments of an axum path.
fn path_params(path: &str) -> impl Iterator<Item = &str> {
    path.split('/')
        .filter_map(|segment| segment.strip_prefix('{')?.strip_suffix('}'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ProductCatalog, ProductService};
    use crate::config::Role;
    use std::sync::Arc;

    #[test]
    fn documents_every_routed_capability() {
        let mut registry = Registry::new();
        Arc::new(ProductService::new("product-docs", ProductCatalog::seeded())).register(&mut registry);
        let identity = ServiceIdentity {
            name: "product-docs".to_string(),
            role: Role::Product,
            rpc_address: "127.0.0.1:0".to_string(),
            http_address: "127.0.0.1:8083".to_string(),
        };

        let doc = swagger_document(&identity, &registry, "127.0.0.1:8083".parse().unwrap());
        assert_eq!(doc["swagger"], "2.0");
        assert_eq!(doc["host"], "127.0.0.1:8083");

        let get = &doc["paths"]["/v1/products/{id}"]["get"];
        assert_eq!(get["parameters"][0]["name"], "id");
        assert_eq!(get["parameters"][0]["in"], "path");
        assert!(doc["paths"]["/v1/products"]["post"].is_object());
        assert!(doc["paths"]["/v1/ping"]["get"].is_object());
    }

    #[test]
    fn extracts_path_params() {
        let names: Vec<_> = path_params("/v1/users/email/{email}").collect();
        assert_eq!(names, vec!["email"]);
    }
}
