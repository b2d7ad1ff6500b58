use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::Instrument;

/// Wraps each request in a span carrying method and path, and logs the
/// response status once the handler returns.
pub async fn trace_request(req: Request<Body>, next: Next) -> Response {
    let span = tracing::info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
        status = tracing::field::Empty,
    );

    async move {
        let response = next.run(req).await;
        let status = response.status();
        tracing::Span::current().record("status", status.as_u16());
        if status.is_server_error() {
            tracing::warn!(%status, "request failed");
        } else {
            tracing::debug!(%status, "request handled");
        }
        response
    }
    .instrument(span)
    .await
}

/// Permanently redirects `/path/` to `/path`, keeping the query string.
pub async fn strip_trailing_slash(req: Request<Body>, next: Next) -> Response {
    let uri = req.uri();

    match uri.path().strip_suffix('/').filter(|path| !path.is_empty()) {
        Some(path) => {
            let target = match uri.query() {
                Some(query) => format!("{path}?{query}"),
                None => path.to_string(),
            };
            Redirect::permanent(&target).into_response()
        }
        None => next.run(req).await,
    }
}
