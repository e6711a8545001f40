//! Cross-cutting middleware for the data routes: structured access logging
//! and Prometheus collection.

use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use log::{error, info};
use tokio::time::Instant;

use crate::server::routes::{error_response, AppState};

/// Largest request body the data routes accept.
const MAX_BODY_BYTES: usize = 1 << 20;

/// Log every incoming request with its method, URI, and parsed JSON body
/// when one is present. The body is buffered and re-injected so the
/// handlers downstream can still extract it; a body that is not valid JSON
/// is rejected here. Failed requests are logged again at error level with
/// their response status.
pub(crate) async fn access_log(request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let method = parts.method.clone();
    let uri = parts.uri.clone();

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("failed to read request body: {}", err);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to read request body",
            );
        }
    };

    if bytes.is_empty() {
        info!("incoming request: method={} uri={}", method, uri);
    } else {
        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(parsed) => info!(
                "incoming request: method={} uri={} body={}",
                method, uri, parsed
            ),
            Err(err) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("invalid JSON body: {}", err),
                )
            }
        }
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(request).await;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        error!(
            "request failed: method={} uri={} status={}",
            method, uri, status
        );
    }

    response
}

/// Record the request counter and latency histogram, labeled by method, the
/// matched route, and the response status. Also counts published messages;
/// the subscription gauge is maintained by the subscribe handler, whose
/// stream outlives this middleware.
pub(crate) async fn track_metrics(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let start = Instant::now();
    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    state
        .metrics
        .http_requests
        .with_label_values(&[&method, &route, &status])
        .inc();
    state
        .metrics
        .latency
        .with_label_values(&[&method, &route, &status])
        .observe(start.elapsed().as_secs_f64());

    if route.starts_with("/v1/publish") && response.status().is_success() {
        state.metrics.published_messages.inc();
    }

    response
}
