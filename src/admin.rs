//! `/__admin` HTTP surface over the registry.

use crate::config::StubDefinition;
use crate::error::StubError;
use crate::registry::{StubId, StubRegistry};
use crate::request::IncomingRequest;
use crate::server::{error_response, json_response, HttpResponse};
use hyper::{Method, StatusCode};
use serde_json::json;
use tracing::info;

const PREFIX: &str = "/__admin";

pub(crate) fn is_admin_path(path: &str) -> bool {
    path == PREFIX || path.starts_with("/__admin/")
}

pub(crate) async fn handle(registry: &StubRegistry, request: &IncomingRequest) -> HttpResponse {
    let route = request.path[PREFIX.len()..].trim_end_matches('/');

    match (&request.method, route) {
        (&Method::GET, "/mappings") => list(registry).await,
        (&Method::POST, "/mappings") => create(registry, request).await,
        (&Method::POST, "/reset") => {
            registry.reset().await;
            info!("Registry reset via admin API");
            json_response(StatusCode::OK, &json!({ "status": "reset" }))
        }
        (&Method::DELETE, route) => match route.strip_prefix("/mappings/") {
            Some(id) if !id.is_empty() && !id.contains('/') => remove(registry, id).await,
            _ => not_found(request),
        },
        _ => not_found(request),
    }
}

async fn list(registry: &StubRegistry) -> HttpResponse {
    let mappings: Vec<StubDefinition> = registry
        .list()
        .await
        .iter()
        .map(|stub| stub.definition())
        .collect();
    json_response(
        StatusCode::OK,
        &json!({ "total": mappings.len(), "mappings": mappings }),
    )
}

async fn create(registry: &StubRegistry, request: &IncomingRequest) -> HttpResponse {
    let definition: StubDefinition = match serde_json::from_slice(&request.body) {
        Ok(definition) => definition,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_stub", &e.to_string());
        }
    };

    match registry.register_definition(definition).await {
        Ok(id) => {
            info!(stub_id = %id, "Stub registered via admin API");
            json_response(StatusCode::CREATED, &json!({ "id": id }))
        }
        Err(e @ StubError::DuplicateId(_)) => {
            error_response(StatusCode::CONFLICT, "duplicate_id", &e.to_string())
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, "invalid_stub", &e.to_string()),
    }
}

async fn remove(registry: &StubRegistry, id: &str) -> HttpResponse {
    let id = StubId::from(id);
    match registry.remove(&id).await {
        Ok(_) => {
            info!(stub_id = %id, "Stub removed via admin API");
            json_response(StatusCode::OK, &json!({ "id": id }))
        }
        Err(e) => error_response(StatusCode::NOT_FOUND, "not_found", &e.to_string()),
    }
}

fn not_found(request: &IncomingRequest) -> HttpResponse {
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        &format!("No admin route for {} {}", request.method, request.path),
    )
}
