use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use hyper::StatusCode;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::AppState;
use crate::testflow::runner::RunResult;
use crate::testflow::RunRequest;

pub fn testflow_router() -> Router<AppState> {
    Router::new()
        .route("/proxy/testflow/execute", post(execute_testflow))
        .route("/proxy/testflow/{run_id}/cancel", post(cancel_testflow))
}

/// Runs the testflow to completion. Dropping this future (client went away)
/// cancels the run so no further nodes are dispatched.
pub(crate) async fn execute_testflow(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResult>, (StatusCode, Json<Value>)> {
    let cancel = CancellationToken::new();
    let _disconnect_guard = cancel.clone().drop_guard();
    let _registration = request
        .run_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map(|id| state.registry.register(id, cancel.clone()));

    state.runner.run(request, cancel).await.map(Json).map_err(|e| {
        tracing::warn!(error = %e, "rejected testflow run");
        (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
    })
}

async fn cancel_testflow(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if state.registry.cancel(&run_id) {
        tracing::info!(run_id = %run_id, "🛑 Cancel requested");
        Ok(Json(json!({ "cancelled": true })))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "run not found" })),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::{ok_response, spawn_app, Behavior, StubExecutor};
    use std::sync::Arc;
    use std::time::Duration;

    fn run_body(run_id: Option<&str>) -> Value {
        let mut body = json!({
            "nodes": [
                {"id": "1", "type": "requestBlock", "data": {"requestData": {"method": "GET", "url": "http://example.com", "name": "Req1"}}},
                {"id": "2", "type": "requestBlock", "data": {"requestData": {"method": "GET", "url": "http://example.com/2", "name": "Req2"}}}
            ],
            "edges": [{"source": "1", "target": "2"}],
            "variables": [],
            "userId": "user-7"
        });
        if let Some(id) = run_id {
            body["runId"] = json!(id);
        }
        body
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_execute_returns_run_result() {
        let executor = StubExecutor::new(Behavior::Respond(ok_response("{}")));
        let base = spawn_app(AppState::new(executor.clone())).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/proxy/testflow/execute"))
            .json(&run_body(None))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["history"]["status"], "pass");
        assert_eq!(body["history"]["successRequests"], 2);
        assert_eq!(body["history"]["createdBy"], "user-7");
        assert!(body["requestChainResponse"]["$$Req2"].is_object());
        assert_eq!(executor.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_execute_without_nodes_is_bad_request() {
        let base = spawn_app(AppState::new(StubExecutor::new(Behavior::Hang))).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/proxy/testflow/execute"))
            .json(&json!({"edges": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "invalid run request: nodes is required");
    }

    #[tokio::test]
    async fn test_cancel_endpoint_stops_registered_run() {
        let executor = StubExecutor::new(Behavior::Hang);
        let state = AppState::new(executor.clone());
        let registry = state.registry.clone();
        let base = spawn_app(state).await;

        let client = reqwest::Client::new();
        let run = tokio::spawn({
            let client = client.clone();
            let url = format!("{base}/proxy/testflow/execute");
            async move { client.post(url).json(&run_body(Some("run-42"))).send().await }
        });
        wait_until(|| registry.contains("run-42")).await;

        let cancelled = client
            .post(format!("{base}/proxy/testflow/run-42/cancel"))
            .send()
            .await
            .unwrap();
        assert_eq!(cancelled.status(), 200);
        assert_eq!(cancelled.json::<Value>().await.unwrap(), json!({"cancelled": true}));

        let response = run.await.unwrap().unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["history"]["requests"], json!([]));
        assert!(executor.saw_cancel());
        assert_eq!(executor.calls().len(), 1);
        wait_until(|| registry.is_empty()).await;
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_is_not_found() {
        let base = spawn_app(AppState::new(StubExecutor::new(Behavior::Hang))).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/proxy/testflow/nope/cancel"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_dropped_request_cancels_run() {
        let executor = StubExecutor::new(Behavior::Hang);
        let state = AppState::new(executor.clone());
        let request: RunRequest = serde_json::from_value(run_body(Some("run-gone"))).unwrap();

        let handler = execute_testflow(State(state.clone()), Json(request));
        let timed_out = tokio::time::timeout(Duration::from_millis(50), handler).await;
        assert!(timed_out.is_err());

        let executor_ref: Arc<StubExecutor> = executor.clone();
        wait_until(|| executor_ref.saw_cancel()).await;
        assert!(!state.registry.contains("run-gone"));
        assert_eq!(executor.calls().len(), 1);
    }
}
