//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod modules;
mod schema;
mod tenants;

use crate::auth::auth_middleware;
use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(&state.settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    let api = Router::new()
        // Tenants
        .route("/tenants", post(tenants::create_tenant).get(tenants::list_tenants))
        .route("/tenants/provision", post(tenants::provision_all))
        .route("/tenants/migrate", post(tenants::migrate_all))
        .route("/tenants/seed", post(tenants::seed_all))
        .route("/tenants/{id}", get(tenants::get_tenant))
        .route("/tenants/{id}/status", put(tenants::update_status))
        .route("/tenants/{id}/provision", post(tenants::provision_tenant))
        .route("/tenants/{id}/migrate", post(tenants::migrate_tenant))
        .route("/tenants/{id}/seed", post(tenants::seed_tenant))

        // Modules
        .route("/modules", get(modules::list_available))
        .route("/tenants/{id}/modules", get(modules::tenant_modules))
        .route("/tenants/{id}/modules/enable", post(modules::enable_modules))
        .route("/tenants/{id}/modules/disable", post(modules::disable_modules))

        // Schema and connectivity
        .route("/tenants/{id}/schema/validate", get(schema::validate))
        .route("/tenants/{id}/schema/sync", post(schema::sync))
        .route("/tenants/{id}/connection/test", post(schema::test_connection))
        .route("/me/tenant", get(schema::current_tenant))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    // Build the router
    Router::new()
        // Health check
        .route("/health", get(health_check))
        .nest("/api", api)

        // Apply middleware and state
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let layer = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };

    layer
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
