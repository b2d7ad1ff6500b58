use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use hyper::StatusCode;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use super::{middleware, proxy_routes, testflow_routes, AppState};

pub fn build_router(state: AppState) -> Router {
    let health_routes = Router::new().route(
        "/",
        get(|| async {
            Json(json!({
                "status": "OK",
            }))
        }),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/health", health_routes)
        .merge(testflow_routes::testflow_router())
        .merge(proxy_routes::proxy_router())
        .fallback(not_found)
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::strip_trailing_slash))
        .layer(axum::middleware::from_fn(middleware::trace_request))
        .layer(cors)
}

async fn not_found(req: axum::extract::Request) -> impl IntoResponse {
    tracing::warn!("unhandled path: {}", req.uri());
    (StatusCode::NOT_FOUND, "Not Found")
}
