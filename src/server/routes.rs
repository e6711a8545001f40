//! The HTTP surface: routing, JSON codec, SSE streaming, and the error
//! envelope.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::broker::Broker;
use crate::server::metrics::Metrics;
use crate::server::middleware::{access_log, track_metrics};
use crate::storage::db::Db;
use crate::storage::traits::KvStore;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) db: Db,
    pub(crate) broker: Broker,
    pub(crate) metrics: Arc<Metrics>,
}

/// Build the application router. The data routes sit behind the access-log
/// and metrics middleware; `/metrics` is mounted outside them so scrapes do
/// not count themselves.
pub(crate) fn router(state: AppState) -> Router {
    let data_routes = Router::new()
        .route("/v1/keys", post(create_key))
        .route(
            "/v1/keys/:key",
            get(get_key).put(put_key).delete(delete_key),
        )
        .route("/v1/ttl/:key", get(get_ttl))
        .route("/v1/subscribe/:channel", get(subscribe))
        .route("/v1/publish/:channel", post(publish))
        .layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .layer(middleware::from_fn(access_log));

    Router::new()
        .merge(data_routes)
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WriteBody {
    value: String,
    ttl: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PublishBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct CreatedBody {
    key: String,
}

#[derive(Debug, Serialize)]
struct GetBody {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct TtlBody {
    key: String,
    ttl: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub(crate) error: String,
}

/// The JSON error envelope used by every failing data route.
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn empty_object() -> Json<serde_json::Value> {
    Json(serde_json::json!({}))
}

/// Unwrap and validate a POST/PUT body: well-formed JSON, non-empty `value`,
/// nonnegative `ttl`.
fn parse_write_body(body: Result<Json<WriteBody>, JsonRejection>) -> Result<WriteBody, Response> {
    let Json(body) =
        body.map_err(|rejection| error_response(StatusCode::BAD_REQUEST, &rejection.body_text()))?;

    if body.value.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "value is required"));
    }
    if body.ttl.is_some_and(|ttl| ttl < 0) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "ttl must be a nonnegative number of seconds",
        ));
    }

    Ok(body)
}

/// POST /v1/keys: store the value under a freshly generated key.
async fn create_key(
    State(state): State<AppState>,
    body: Result<Json<WriteBody>, JsonRejection>,
) -> Response {
    let body = match parse_write_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    let (created, key) = state.db.create(body.value, body.ttl);
    if !created {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to add key-value pair to store",
        );
    }

    (StatusCode::CREATED, Json(CreatedBody { key })).into_response()
}

/// GET /v1/keys/{key}
async fn get_key(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.db.get(&key) {
        Some(value) => (StatusCode::OK, Json(GetBody { key, value })).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "key not found"),
    }
}

/// PUT /v1/keys/{key}: 200 when the key existed, 201 when it was created.
async fn put_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Result<Json<WriteBody>, JsonRejection>,
) -> Response {
    let body = match parse_write_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    let existed = state.db.put(key, body.value, body.ttl);
    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    (status, empty_object()).into_response()
}

/// DELETE /v1/keys/{key}
async fn delete_key(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    if state.db.delete(&key) {
        (StatusCode::OK, empty_object()).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "key not found")
    }
}

/// GET /v1/ttl/{key}: the remaining seconds before expiry, or null for a
/// non-expiring key.
async fn get_ttl(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let (ttl, present) = state.db.get_ttl(&key);
    if !present {
        return error_response(StatusCode::NOT_FOUND, "key not found");
    }

    (StatusCode::OK, Json(TtlBody { key, ttl })).into_response()
}

/// POST /v1/publish/{channel}: fan the message out to current subscribers.
/// Succeeds with 200 even when nobody is listening.
async fn publish(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    body: Result<Json<PublishBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    if body.message.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "message is required");
    }

    let delivered = state.broker.publish(&channel, Bytes::from(body.message));
    debug!("published to channel {} ({} delivered)", channel, delivered);

    (StatusCode::OK, empty_object()).into_response()
}

/// GET /v1/subscribe/{channel}: hold the request open and stream published
/// messages as server-sent events until the client disconnects.
///
/// The mailbox and the subscription gauge are both released by drop when the
/// response stream ends, whichever way it ends.
async fn subscribe(State(state): State<AppState>, Path(channel): Path<String>) -> Response {
    let mut subscription = state.broker.subscribe(&channel);

    state.metrics.subscriptions.inc();
    let gauge = SubscriptionGauge(state.metrics.clone());

    let stream = async_stream::stream! {
        let _gauge = gauge;
        while let Some(message) = subscription.recv().await {
            yield Ok::<Event, Infallible>(Event::default().data(String::from_utf8_lossy(&message)));
        }
    };

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream),
    )
        .into_response()
}

/// GET /metrics
async fn render_metrics(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

struct SubscriptionGauge(Arc<Metrics>);

impl Drop for SubscriptionGauge {
    fn drop(&mut self) {
        self.0.subscriptions.dec();
    }
}
