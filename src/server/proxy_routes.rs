use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use hyper::StatusCode;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::AppState;
use crate::proxy::graphql::{GraphqlRequest, GraphqlResponse};
use crate::proxy::{ExecutorError, ExecutorResponse, OutboundRequest};

pub fn proxy_router() -> Router<AppState> {
    Router::new()
        .route("/proxy/http-request", post(http_request))
        .route("/proxy/graphql-request", post(graphql_request))
}

fn bad_gateway(request: &OutboundRequest, e: ExecutorError) -> (StatusCode, Json<Value>) {
    tracing::warn!(method = %request.method, url = %request.url, error = %e, "proxied request failed");
    (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() })))
}

async fn http_request(
    State(state): State<AppState>,
    Json(request): Json<OutboundRequest>,
) -> Result<Json<ExecutorResponse>, (StatusCode, Json<Value>)> {
    let cancel = CancellationToken::new();
    let _disconnect_guard = cancel.clone().drop_guard();

    state
        .executor
        .execute(&request, &cancel)
        .await
        .map(Json)
        .map_err(|e| bad_gateway(&request, e))
}

async fn graphql_request(
    State(state): State<AppState>,
    Json(graphql): Json<GraphqlRequest>,
) -> Result<Json<GraphqlResponse>, (StatusCode, Json<Value>)> {
    let url = graphql.url.clone();
    let request = graphql.into_outbound().map_err(|e| {
        tracing::warn!(%url, error = %e, "rejected graphql request");
        (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() })))
    })?;

    let cancel = CancellationToken::new();
    let _disconnect_guard = cancel.clone().drop_guard();

    state
        .executor
        .execute(&request, &cancel)
        .await
        .map(|response| Json(GraphqlResponse::from(response)))
        .map_err(|e| bad_gateway(&request, e))
}
