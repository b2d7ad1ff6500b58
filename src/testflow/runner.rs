use std::sync::Arc;
use std::time::Instant;

use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::proxy::{ExecutorError, ExecutorResponse, HttpExecutor, OutboundRequest};

use super::chain::{ChainNamespace, ChainSnapshot};
use super::graph::{self, START_VERTEX};
use super::history::{
    classify_content_type, humanize_duration, ExecutedNode, Header, HistoryRequest, HistoryResponse,
    ResponseContentType, RunHistory, RunStatus, FAILED_STATUS,
};
use super::{decoder, Node, RequestData, RunRequest, Variable};

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("invalid run request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub history: RunHistory,
    pub request_chain_response: ChainNamespace,
    pub nodes: Vec<ExecutedNode>,
}

/// Outcome of one request node.
enum NodeOutcome {
    Cancelled,
    Finished(NodeRecord),
}

struct NodeRecord {
    passed: bool,
    elapsed_ms: u64,
    request: HistoryRequest,
    response: HistoryResponse,
    snapshot: Option<ChainSnapshot>,
}

/// Executes testflow runs: resolves the reachable nodes, then decodes and
/// dispatches each request node in order, feeding every response into the
/// chain namespace that later nodes' expressions read from.
pub struct TestflowRunner {
    executor: Arc<dyn HttpExecutor>,
}

impl TestflowRunner {
    pub fn new(executor: Arc<dyn HttpExecutor>) -> Self {
        Self { executor }
    }

    /// Run to completion, or until `cancel` fires. A cancelled run still
    /// returns the history collected so far.
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> Result<RunResult, RunError> {
        let nodes = request
            .nodes
            .ok_or_else(|| RunError::InvalidRequest("nodes is required".into()))?;
        let edges = request
            .edges
            .ok_or_else(|| RunError::InvalidRequest("edges is required".into()))?;

        let run_id = request.run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let short_id: String = run_id.chars().take(8).collect();
        let span = tracing::info_span!("testflow_run", run = %short_id);
        tracing::info!(parent: &span, nodes = nodes.len(), edges = edges.len(), "▶ Started");

        let variables: Arc<[Variable]> = request
            .variables
            .into_iter()
            .filter(|v| !v.key.trim().is_empty() && !v.value.trim().is_empty())
            .collect();
        let plan: Vec<Node> = graph::resolve(&nodes, &edges, START_VERTEX).into_iter().cloned().collect();

        let start = Instant::now();
        let result = self
            .execute(plan, variables, request.user_id, cancel)
            .instrument(span.clone())
            .await;
        let elapsed = start.elapsed();

        let history = &result.history;
        match history.status {
            RunStatus::Pass => tracing::info!(
                parent: &span,
                elapsed = format_args!("{:.1}s", elapsed.as_secs_f64()),
                passed = history.success_requests,
                "✓ Completed"
            ),
            RunStatus::Fail => tracing::warn!(
                parent: &span,
                elapsed = format_args!("{:.1}s", elapsed.as_secs_f64()),
                passed = history.success_requests,
                failed = history.failed_requests,
                "✗ Completed with failures"
            ),
        }

        Ok(result)
    }

    async fn execute(
        &self,
        plan: Vec<Node>,
        variables: Arc<[Variable]>,
        user_id: Option<String>,
        cancel: CancellationToken,
    ) -> RunResult {
        let mut history = RunHistory::new(user_id);
        let mut chain = ChainNamespace::default();
        let mut executed = Vec::new();
        let mut total_ms = 0;

        for node in plan {
            let Some(request) = node.request().cloned() else {
                tracing::debug!(node = %node.id, node_type = %node.node_type, "skipping non-request node");
                continue;
            };
            if cancel.is_cancelled() {
                tracing::warn!(node = %request.name, "🛑 Run cancelled, stopping");
                break;
            }

            let handle = {
                let executor = Arc::clone(&self.executor);
                let request = request.clone();
                let variables = Arc::clone(&variables);
                let chain = chain.clone();
                let cancel = cancel.clone();
                tokio::spawn(
                    async move { process_node(executor.as_ref(), &request, &variables, &chain, &cancel).await }
                        .in_current_span(),
                )
            };

            match handle.await {
                Ok(NodeOutcome::Cancelled) => {
                    tracing::warn!(node = %request.name, "🛑 Request aborted, stopping");
                    break;
                }
                Ok(NodeOutcome::Finished(record)) => {
                    total_ms += record.elapsed_ms;
                    if let Some(snapshot) = record.snapshot {
                        chain.insert(&request.name, node.block_name(), snapshot);
                    }
                    history.record(record.passed, record.request, Some(record.response.clone()));
                    executed.push(ExecutedNode {
                        id: node.id.clone(),
                        request,
                        response: record.response,
                    });
                }
                Err(join_err) => {
                    let err_msg = format!("node processing failed: {join_err}");
                    tracing::error!(node = %request.name, error = %err_msg, "✗ Node panicked");
                    history.record(
                        false,
                        HistoryRequest {
                            method: non_empty_or(&request.method, "UNKNOWN"),
                            name: non_empty_or(&request.name, "Unknown Request"),
                            status: FAILED_STATUS.to_string(),
                            time: "0 ms".to_string(),
                            error_message: Some(err_msg.clone()),
                            error: None,
                        },
                        None,
                    );
                    executed.push(ExecutedNode {
                        id: node.id.clone(),
                        request,
                        response: HistoryResponse::failed(err_msg, 0),
                    });
                }
            }
        }

        history.finish(total_ms);
        RunResult {
            history,
            request_chain_response: chain,
            nodes: executed,
        }
    }
}

async fn process_node(
    executor: &dyn HttpExecutor,
    request: &RequestData,
    variables: &[Variable],
    chain: &ChainNamespace,
    cancel: &CancellationToken,
) -> NodeOutcome {
    let outbound = decoder::decode(request, variables, chain);
    tracing::debug!(node = %request.name, method = %outbound.method, url = %outbound.url, "dispatching");

    let start = Instant::now();
    let result = executor.execute(&outbound, cancel).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let record = match result {
        Err(ExecutorError::Cancelled) => return NodeOutcome::Cancelled,
        Err(e) => {
            let message = e.to_string();
            tracing::error!(node = %request.name, error = %message, "✗ Node failed");
            NodeRecord {
                passed: false,
                elapsed_ms,
                request: HistoryRequest {
                    method: request.method.clone(),
                    name: request.name.clone(),
                    status: FAILED_STATUS.to_string(),
                    time: humanize_duration(elapsed_ms),
                    error_message: Some(message.clone()),
                    error: None,
                },
                response: HistoryResponse::failed(message, elapsed_ms),
                snapshot: None,
            }
        }
        Ok(response) => {
            let passed = response.is_success();
            if passed {
                tracing::info!(node = %request.name, status = %response.status, elapsed_ms, "✓ Node completed");
            } else {
                tracing::warn!(node = %request.name, status = %response.status, elapsed_ms, "✗ Node failed");
            }
            record_response(request, &outbound, response, passed, elapsed_ms)
        }
    };

    NodeOutcome::Finished(record)
}

fn record_response(
    request: &RequestData,
    outbound: &OutboundRequest,
    response: ExecutorResponse,
    passed: bool,
    elapsed_ms: u64,
) -> NodeRecord {
    let size = serde_json::to_vec(&response).map_or(0, |bytes| bytes.len()) as f64 / 1024.0;
    let headers: Vec<Header> = response
        .headers
        .iter()
        .map(|(key, value)| Header {
            key: key.clone(),
            value: value.as_str().map_or_else(|| value.to_string(), str::to_string),
        })
        .collect();
    let content_type = classify_content_type(&headers);

    let (error_message, error) = if passed {
        (None, None)
    } else {
        error_details(&response.data)
    };

    let snapshot = chain_snapshot(outbound, &response, content_type);

    NodeRecord {
        passed,
        elapsed_ms,
        request: HistoryRequest {
            method: request.method.clone(),
            name: request.name.clone(),
            status: response.status.clone(),
            time: humanize_duration(elapsed_ms),
            error_message,
            error,
        },
        response: HistoryResponse {
            headers,
            status: response.status,
            body: response.data,
            time: elapsed_ms,
            size,
            response_content_type: Some(content_type),
        },
        snapshot: Some(snapshot),
    }
}

/// `message` and `error` fields of a JSON error body.
fn error_details(data: &str) -> (Option<String>, Option<Value>) {
    let Ok(Value::Object(body)) = serde_json::from_str::<Value>(data) else {
        return (None, None);
    };
    let message = body.get("message").filter(|v| !v.is_null()).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    let error = body
        .get("error")
        .filter(|v| !matches!(v, Value::Null | Value::Bool(false)) && v.as_str() != Some(""))
        .cloned();
    (message, error)
}

fn chain_snapshot(outbound: &OutboundRequest, response: &ExecutorResponse, content_type: ResponseContentType) -> ChainSnapshot {
    let response_body = match content_type {
        ResponseContentType::Json => {
            serde_json::from_str(&response.data).unwrap_or_else(|_| Value::String(response.data.clone()))
        }
        _ => Value::String(response.data.clone()),
    };

    let request_headers = key_value_object(&outbound.headers).unwrap_or_default();
    let request_body = match outbound.content_type.as_str() {
        "application/json" => serde_json::from_str(&outbound.body).unwrap_or_else(|_| Value::Object(Map::new())),
        "multipart/form-data" | "application/x-www-form-urlencoded" => {
            Value::Object(key_value_object(&outbound.body).unwrap_or_default())
        }
        _ => Value::String(outbound.body.clone()),
    };

    let parameters: Map<String, Value> = Url::parse(&outbound.url)
        .map(|url| {
            url.query_pairs()
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect()
        })
        .unwrap_or_default();

    ChainSnapshot::new(
        response_body,
        Value::Object(response.headers.clone()),
        Value::Object(request_headers),
        request_body,
        Value::Object(parameters),
    )
}

/// `[{key, value}, ...]` JSON text → `{key: value, ...}`; later keys win.
fn key_value_object(blob: &str) -> Option<Map<String, Value>> {
    let Value::Array(items) = serde_json::from_str(blob).ok()? else {
        return None;
    };
    let mut map = Map::new();
    for item in items {
        let key = match item.get("key")? {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        map.insert(key, item.get("value").cloned().unwrap_or(Value::Null));
    }
    Some(map)
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testflow::{Edge, KeyValue, NodeData, REQUEST_BLOCK};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Reply = Box<dyn FnOnce(&CancellationToken) -> Result<ExecutorResponse, ExecutorError> + Send>;

    /// Replays scripted replies in order and records every request it sees.
    #[derive(Default)]
    struct MockExecutor {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<OutboundRequest>>,
    }

    impl MockExecutor {
        fn with(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<OutboundRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpExecutor for MockExecutor {
        async fn execute(
            &self,
            request: &OutboundRequest,
            cancel: &CancellationToken,
        ) -> Result<ExecutorResponse, ExecutorError> {
            self.calls.lock().unwrap().push(request.clone());
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(reply) => reply(cancel),
                None => Ok(ok_response("{}")),
            }
        }
    }

    fn ok_response(data: &str) -> ExecutorResponse {
        response("200 OK", data, json!({"content-type": "application/json"}))
    }

    fn response(status: &str, data: &str, headers: Value) -> ExecutorResponse {
        ExecutorResponse {
            status: status.into(),
            data: data.into(),
            headers: headers.as_object().cloned().unwrap_or_default(),
        }
    }

    fn reply(result: Result<ExecutorResponse, ExecutorError>) -> Reply {
        Box::new(move |_| result)
    }

    fn reply_with(
        f: impl FnOnce(&CancellationToken) -> Result<ExecutorResponse, ExecutorError> + Send + 'static,
    ) -> Reply {
        Box::new(f)
    }

    fn request_node(id: &str, name: &str, url: &str) -> Node {
        Node {
            id: id.into(),
            node_type: REQUEST_BLOCK.into(),
            position: None,
            data: Some(NodeData {
                block_name: Some(format!("n{id}")),
                request_data: Some(RequestData {
                    name: name.into(),
                    method: "GET".into(),
                    url: url.into(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            id: None,
            source: source.into(),
            target: target.into(),
        }
    }

    fn run_request(nodes: Vec<Node>, edges: Vec<Edge>) -> RunRequest {
        RunRequest {
            nodes: Some(nodes),
            edges: Some(edges),
            ..Default::default()
        }
    }

    async fn run(executor: Arc<MockExecutor>, request: RunRequest) -> RunResult {
        TestflowRunner::new(executor)
            .run(request, CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_request_passes() {
        let executor = MockExecutor::with(vec![reply(Ok(response("200 OK", "{}", json!({}))))]);
        let request: RunRequest = serde_json::from_value(json!({
            "nodes": [{"id": "1", "type": "requestBlock", "data": {"requestData": {"method": "GET", "url": "http://example.com", "name": "Req1"}}}],
            "edges": []
        }))
        .unwrap();

        let result = run(executor.clone(), request).await;
        let history = &result.history;
        assert_eq!(history.success_requests, 1);
        assert_eq!(history.failed_requests, 0);
        assert_eq!(history.status, RunStatus::Pass);
        assert_eq!(executor.calls()[0].url, "http://example.com");
        assert_eq!(result.nodes.len(), 1);
        assert!(result.request_chain_response.get("$$Req1").is_some());
        assert!(result.request_chain_response.get("$$1").is_some());
    }

    #[tokio::test]
    async fn test_cancellation_during_second_node_keeps_partial_history() {
        let executor = MockExecutor::with(vec![
            reply(Ok(ok_response("{}"))),
            reply(Err(ExecutorError::Cancelled)),
        ]);
        let nodes = vec![
            request_node("1", "First", "http://a.test"),
            request_node("2", "Second", "http://b.test"),
        ];
        let result = run(executor.clone(), run_request(nodes, vec![edge("1", "2")])).await;

        assert_eq!(result.history.requests.len(), 1);
        assert_eq!(result.history.requests[0].name, "First");
        assert_eq!(result.history.status, RunStatus::Pass);
        assert_eq!(executor.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_next_node() {
        let executor = MockExecutor::with(vec![reply_with(|cancel| {
            cancel.cancel();
            Ok(ok_response("{}"))
        })]);
        let nodes = vec![
            request_node("1", "First", "http://a.test"),
            request_node("2", "Second", "http://b.test"),
        ];
        let result = run(executor.clone(), run_request(nodes, vec![edge("1", "2")])).await;

        assert_eq!(executor.calls().len(), 1);
        assert_eq!(result.history.success_requests, 1);
        assert_eq!(result.nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_non_success_status_fails_node_but_run_continues() {
        let executor = MockExecutor::with(vec![
            reply(Ok(response(
                "404 Not Found",
                r#"{"message": "user not found", "error": "Not Found"}"#,
                json!({"content-type": "application/json"}),
            ))),
            reply(Ok(ok_response("{}"))),
        ]);
        let nodes = vec![
            request_node("1", "Missing", "http://a.test"),
            request_node("2", "Next", "http://b.test"),
        ];
        let result = run(executor.clone(), run_request(nodes, vec![edge("1", "2")])).await;

        let history = &result.history;
        assert_eq!((history.success_requests, history.failed_requests), (1, 1));
        assert_eq!(history.status, RunStatus::Fail);
        assert_eq!(history.requests[0].status, "404 Not Found");
        assert_eq!(history.requests[0].error_message.as_deref(), Some("user not found"));
        assert_eq!(history.requests[0].error, Some(json!("Not Found")));
        assert!(history.requests[1].error_message.is_none());
        assert_eq!(history.responses[0].response_content_type, Some(ResponseContentType::Json));
        // error responses are still chainable
        assert!(result.request_chain_response.get("$$Missing").is_some());
    }

    #[tokio::test]
    async fn test_executor_error_is_failed_entry() {
        let executor = MockExecutor::with(vec![reply(Err(ExecutorError::Rejected(
            "Access to internal IP addresses is not allowed: 10.0.0.1".into(),
        )))]);
        let result = run(executor, run_request(vec![request_node("1", "Internal", "http://10.0.0.1")], vec![])).await;

        let history = &result.history;
        assert_eq!(history.failed_requests, 1);
        assert_eq!(history.status, RunStatus::Fail);
        assert_eq!(history.requests[0].status, FAILED_STATUS);
        assert!(history.requests[0].error_message.as_deref().unwrap().contains("10.0.0.1"));
        assert_eq!(history.responses[0].size, 0.0);
        assert!(history.responses[0].headers.is_empty());
        assert!(result.request_chain_response.is_empty());
        assert_eq!(result.nodes[0].response.status, FAILED_STATUS);
    }

    #[tokio::test]
    async fn test_later_node_reads_earlier_response() {
        let executor = MockExecutor::with(vec![
            reply(Ok(ok_response(r#"{"token": "abc", "id": 42}"#))),
            reply(Ok(ok_response("{}"))),
        ]);
        let mut second = request_node("2", "Profile", "http://api.test/users/[*$[$$Login.response.body.id]$*]");
        if let Some(data) = second.data.as_mut().and_then(|d| d.request_data.as_mut()) {
            data.headers = vec![KeyValue {
                key: "Authorization".into(),
                value: "Bearer [*$[$$n1.response.body.token]$*]".into(),
                checked: true,
            }];
        }
        let nodes = vec![request_node("1", "Login", "http://api.test/login"), second];
        run(executor.clone(), run_request(nodes, vec![edge("1", "2")])).await;

        let calls = executor.calls();
        assert_eq!(calls[1].url, "http://api.test/users/42");
        assert_eq!(calls[1].headers, r#"[{"key":"authorization","value":"Bearer abc"}]"#);
    }

    #[tokio::test]
    async fn test_snapshot_contents() {
        let executor = MockExecutor::with(vec![reply(Ok(ok_response(r#"{"ok": true}"#)))]);
        let mut node = request_node("1", "Search Users", "http://api.test/search?q=ada&page=2");
        if let Some(data) = node.data.as_mut().and_then(|d| d.request_data.as_mut()) {
            data.method = "POST".into();
            data.selected_request_body_type = Some("raw".into());
            data.body = Some(crate::testflow::RequestBody {
                raw: Some(r#"{"filter": "all"}"#.into()),
                ..Default::default()
            });
            data.headers = vec![KeyValue {
                key: "X-Api".into(),
                value: "1".into(),
                checked: true,
            }];
        }
        let result = run(executor, run_request(vec![node], vec![])).await;

        let snapshot = result.request_chain_response.get("$$Search_Users").unwrap();
        assert_eq!(
            snapshot.as_value(),
            &json!({
                "response": {"body": {"ok": true}, "headers": {"content-type": "application/json"}},
                "request": {
                    "headers": {"x-api": "1"},
                    "body": {"filter": "all"},
                    "parameters": {"q": "ada", "page": "2"}
                }
            })
        );
    }

    #[tokio::test]
    async fn test_non_request_and_unreachable_nodes_skipped() {
        let executor = MockExecutor::with(vec![]);
        let mut start = request_node("1", "Start", "http://a.test");
        start.node_type = "startBlock".into();
        let mut empty = request_node("2", "Empty", "http://b.test");
        if let Some(data) = empty.data.as_mut() {
            data.request_data = None;
        }
        let nodes = vec![
            start,
            empty,
            request_node("3", "Real", "http://c.test"),
            request_node("9", "Island", "http://d.test"),
        ];
        let result = run(executor.clone(), run_request(nodes, vec![edge("1", "2"), edge("2", "3")])).await;

        assert_eq!(executor.calls().len(), 1);
        assert_eq!(result.history.requests.len(), 1);
        assert_eq!(result.history.requests[0].name, "Real");
        assert_eq!(result.history.success_requests + result.history.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_empty_plan_passes() {
        let executor = MockExecutor::with(vec![]);
        let result = run(executor, run_request(vec![request_node("2", "Orphan", "http://a.test")], vec![])).await;
        assert_eq!(result.history.status, RunStatus::Pass);
        assert!(result.history.requests.is_empty());
        assert_eq!(result.history.total_time, "0 ms");
    }

    #[tokio::test]
    async fn test_invalid_variables_dropped() {
        let executor = MockExecutor::with(vec![]);
        let mut request = run_request(vec![request_node("1", "R", "http://h.test/{{a}}/{{b}}")], vec![]);
        request.variables = vec![
            Variable { key: "a".into(), value: "x".into(), checked: true },
            Variable { key: "b".into(), value: "  ".into(), checked: true },
        ];
        run(executor.clone(), request).await;
        assert_eq!(executor.calls()[0].url, "http://h.test/x/{{b}}");
    }

    #[tokio::test]
    async fn test_missing_nodes_or_edges_rejected() {
        let runner = TestflowRunner::new(MockExecutor::with(vec![]));
        let missing_nodes = RunRequest {
            edges: Some(vec![]),
            ..Default::default()
        };
        let err = runner.run(missing_nodes, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid run request: nodes is required");

        let missing_edges = RunRequest {
            nodes: Some(vec![]),
            ..Default::default()
        };
        assert!(matches!(
            runner.run(missing_edges, CancellationToken::new()).await,
            Err(RunError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_panicking_node_recorded_and_run_continues() {
        let executor = MockExecutor::with(vec![
            reply_with(|_| panic!("executor blew up")),
            reply(Ok(ok_response("{}"))),
        ]);
        let nodes = vec![
            request_node("1", "Broken", "http://a.test"),
            request_node("2", "Fine", "http://b.test"),
        ];
        let result = run(executor, run_request(nodes, vec![edge("1", "2")])).await;

        let history = &result.history;
        assert_eq!((history.success_requests, history.failed_requests), (1, 1));
        assert_eq!(history.requests[0].time, "0 ms");
        assert_eq!(history.requests[0].status, FAILED_STATUS);
        assert_eq!(history.responses.len(), 1);
        assert_eq!(result.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_result_serializes_with_client_field_names() {
        let executor = MockExecutor::with(vec![]);
        let result = run(executor, run_request(vec![request_node("1", "R", "http://a.test")], vec![])).await;
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("requestChainResponse").is_some());
        assert_eq!(value["history"]["status"], "pass");
        assert_eq!(value["nodes"][0]["id"], "1");
        assert_eq!(value["nodes"][0]["request"]["name"], "R");
    }
}
