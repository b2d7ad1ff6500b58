use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, PROXY_AUTHORIZATION,
};
use reqwest::multipart::{Form, Part};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::guard::{self, ValidatedTarget};
use super::{ExecutorError, ExecutorResponse, HttpExecutor, OutboundRequest};

pub const DEFAULT_USER_AGENT: &str = "SparrowRuntime/1.0.0";

/// Redirect hops followed before a request fails.
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub user_agent: String,
    /// Overall per-request timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Skip address validation. Only for local development and tests.
    pub allow_private_networks: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: None,
            allow_private_networks: false,
        }
    }
}

/// HTTP executor backed by reqwest.
///
/// Certificate errors are ignored (targets are often self-signed test
/// servers). Unless disabled, the target host is resolved and validated first
/// and the connection is pinned to the validated addresses. Redirects are
/// followed here rather than by reqwest, so every hop is validated the same way.
pub struct ReqwestExecutor {
    config: ExecutorConfig,
    client: Client,
}

impl ReqwestExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        let client = client_builder(&config).build().map_err(build_error)?;
        Ok(Self { config, client })
    }

    /// The shared client, or a one-off client pinned to the addresses a
    /// hostname resolved to.
    fn client_for(&self, target: Option<&ValidatedTarget>) -> Result<Client, ExecutorError> {
        match target {
            Some(ValidatedTarget::Resolved { domain, addrs }) => client_builder(&self.config)
                .resolve_to_addrs(domain, addrs)
                .build()
                .map_err(build_error),
            _ => Ok(self.client.clone()),
        }
    }

    async fn dispatch(&self, request: &OutboundRequest) -> Result<ExecutorResponse, ExecutorError> {
        let mut method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ExecutorError::InvalidRequest(format!("Invalid HTTP method: {}", request.method)))?;
        let mut headers = parse_headers(&request.headers)?;
        let mut url = request.url.clone();
        let mut with_body = true;

        for _ in 0..=MAX_REDIRECTS {
            let response = self.send(&url, &method, headers.clone(), with_body.then_some(request)).await?;
            let Some(next) = redirect_location(&response, &url) else {
                return read_response(response).await;
            };
            tracing::debug!(from = %url, to = %next, status = %response.status(), "following redirect");

            if changes_to_get(response.status(), &method) {
                method = Method::GET;
                with_body = false;
                headers.remove(CONTENT_TYPE);
            }
            if !same_origin(&url, &next) {
                for name in [AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION] {
                    headers.remove(name);
                }
            }
            url = next.to_string();
        }

        Err(ExecutorError::Transport(format!("Too many redirects (max {MAX_REDIRECTS})")))
    }

    /// One hop: validate the target, then send without following redirects.
    async fn send(
        &self,
        url: &str,
        method: &Method,
        headers: HeaderMap,
        body: Option<&OutboundRequest>,
    ) -> Result<Response, ExecutorError> {
        let target = if self.config.allow_private_networks {
            None
        } else {
            Some(guard::validate(url).await?)
        };

        let client = self.client_for(target.as_ref())?;
        let builder = client.request(method.clone(), url);
        let builder = match body {
            Some(request) if !matches!(*method, Method::GET | Method::HEAD) => {
                attach_body(builder, headers, request)?
            }
            _ => builder.headers(headers),
        };

        builder.send().await.map_err(|e| ExecutorError::Transport(describe(&e)))
    }
}

fn client_builder(config: &ExecutorConfig) -> ClientBuilder {
    let builder = Client::builder()
        .danger_accept_invalid_certs(true)
        .user_agent(config.user_agent.clone())
        .redirect(Policy::none());
    match config.timeout {
        Some(timeout) => builder.timeout(timeout),
        None => builder,
    }
}

fn build_error(e: reqwest::Error) -> ExecutorError {
    ExecutorError::Transport(format!("failed to build HTTP client: {e}"))
}

/// Absolute http(s) target of a redirect response, if it is one.
fn redirect_location(response: &Response, current: &str) -> Option<Url> {
    if !response.status().is_redirection() || response.status() == StatusCode::NOT_MODIFIED {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    let next = Url::parse(current).ok()?.join(location).ok()?;
    matches!(next.scheme(), "http" | "https").then_some(next)
}

/// 303 always becomes a GET; 301 and 302 do so for POST, as browsers do.
fn changes_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => *method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => *method == Method::POST,
        _ => false,
    }
}

fn same_origin(current: &str, next: &Url) -> bool {
    Url::parse(current).is_ok_and(|url| url.origin() == next.origin())
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(
        &self,
        request: &OutboundRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutorResponse, ExecutorError> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        tokio::select! {
            result = self.dispatch(request) => result,
            _ = cancel.cancelled() => {
                tracing::debug!(url = %request.url, "request cancelled");
                Err(ExecutorError::Cancelled)
            }
        }
    }
}

#[derive(Deserialize)]
struct Field {
    #[serde(default)]
    key: Value,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    base: Option<String>,
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Headers arrive as a JSON array of `{key, value}`; a valid non-array means none.
fn parse_headers(blob: &str) -> Result<HeaderMap, ExecutorError> {
    let invalid = || ExecutorError::InvalidRequest("Invalid headers format".into());
    let value: Value = if blob.trim().is_empty() {
        Value::Array(Vec::new())
    } else {
        serde_json::from_str(blob).map_err(|_| invalid())?
    };

    let mut headers = HeaderMap::new();
    let Value::Array(items) = value else {
        return Ok(headers);
    };
    for item in items {
        let field: Field = serde_json::from_value(item).map_err(|_| invalid())?;
        let key = text_of(&field.key);
        if key.is_empty() {
            continue;
        }
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| ExecutorError::InvalidRequest(format!("Invalid header name `{key}`: {e}")))?;
        let value = HeaderValue::from_str(&text_of(&field.value))
            .map_err(|e| ExecutorError::InvalidRequest(format!("Invalid header value for `{key}`: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn parse_fields(body: &str) -> Result<Vec<Field>, ExecutorError> {
    serde_json::from_str(body).map_err(|_| ExecutorError::InvalidRequest("Invalid request body format".into()))
}

fn attach_body(
    builder: RequestBuilder,
    mut headers: HeaderMap,
    request: &OutboundRequest,
) -> Result<RequestBuilder, ExecutorError> {
    let content_type = request.content_type.as_str();
    match content_type {
        "application/x-www-form-urlencoded" => {
            let pairs: Vec<(String, String)> = parse_fields(&request.body)?
                .iter()
                .map(|f| (text_of(&f.key), text_of(&f.value)))
                .collect();
            headers.remove(CONTENT_TYPE);
            Ok(builder.headers(headers).form(&pairs))
        }
        "multipart/form-data" => {
            let mut form = Form::new();
            for field in parse_fields(&request.body)? {
                let key = text_of(&field.key);
                let value = text_of(&field.value);
                form = match field.base.as_deref().filter(|b| !b.is_empty()).and_then(decode_data_uri) {
                    Some((bytes, mime)) => form.part(key, file_part(bytes, value, mime)),
                    None => form.text(key, value),
                };
            }
            headers.remove(CONTENT_TYPE);
            Ok(builder.headers(headers).multipart(form))
        }
        "text/plain" => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            Ok(builder.headers(headers).body(request.body.clone()))
        }
        "" => Ok(builder.headers(headers).body(request.body.clone())),
        other => {
            if !headers.contains_key(CONTENT_TYPE) {
                let value = HeaderValue::from_str(other)
                    .map_err(|_| ExecutorError::InvalidRequest(format!("Invalid content type: {other}")))?;
                headers.insert(CONTENT_TYPE, value);
            }
            Ok(builder.headers(headers).body(request.body.clone()))
        }
    }
}

fn file_part(bytes: Vec<u8>, file_name: String, mime: Option<String>) -> Part {
    let Some(mime) = mime else {
        return Part::bytes(bytes).file_name(file_name);
    };
    Part::bytes(bytes.clone())
        .file_name(file_name.clone())
        .mime_str(&mime)
        .unwrap_or_else(|_| Part::bytes(bytes).file_name(file_name))
}

/// `data:<mime>;base64,<payload>` → payload bytes and mime.
fn decode_data_uri(uri: &str) -> Option<(Vec<u8>, Option<String>)> {
    let (meta, payload) = uri.split_once(',')?;
    let bytes = BASE64.decode(payload.trim()).ok()?;
    let mime = meta
        .split_once(':')
        .and_then(|(_, rest)| rest.split(';').next())
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    Some((bytes, mime))
}

async fn read_response(response: Response) -> Result<ExecutorResponse, ExecutorError> {
    let status = response.status();
    let reason = status.canonical_reason().unwrap_or("Unknown Status");

    let mut headers = Map::new();
    for (name, value) in response.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match headers.get_mut(name.as_str()) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                headers.insert(name.as_str().to_string(), Value::String(value));
            }
        }
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ExecutorError::Transport(format!("Failed to read response: {e}")))?;

    let data = if content_type.starts_with("image/") {
        format!("data:{content_type};base64,{}", BASE64.encode(&bytes))
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    };

    Ok(ExecutorResponse {
        status: format!("{} {reason}", status.as_u16()),
        data,
        headers,
    })
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "Request timed out".to_string()
    } else if err.is_connect() {
        format!("Connection failed: {err}")
    } else {
        format!("Request failed: {err}")
    }
}
