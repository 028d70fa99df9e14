use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use boxsync_core::protocol::ErrorResponse;

use crate::WorkerPool;

/// Matches the worker API's body ceiling plus multipart framing slack.
const PROXY_BODY_LIMIT: usize = 101 * 1024 * 1024;
/// One retry on the next healthy worker after a transport-level failure.
const DISPATCH_ATTEMPTS: usize = 2;

#[derive(Clone)]
struct ProxyState {
    pool: Arc<WorkerPool>,
    http: reqwest::Client,
    worker_host: String,
}

/// Public listener: `/supervisor/status` for observability, everything else
/// round-robin-forwarded to a healthy worker.
pub fn proxy_router(pool: Arc<WorkerPool>, worker_host: String) -> Router {
    let state = ProxyState {
        pool,
        http: reqwest::Client::new(),
        worker_host,
    };
    Router::new()
        .route("/supervisor/status", get(status))
        .fallback(forward)
        .with_state(state)
}

async fn status(State(state): State<ProxyState>) -> Response {
    Json(state.pool.status().await).into_response()
}

async fn forward(State(state): State<ProxyState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, PROXY_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
    };
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| "/".to_owned());

    for attempt in 0..DISPATCH_ATTEMPTS {
        let port = match state.pool.pick_worker().await {
            Ok(port) => port,
            Err(_) => {
                return error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "no healthy workers available",
                );
            }
        };

        let url = format!("http://{}:{}{}", state.worker_host, port, path_and_query);
        let mut upstream = state.http.request(parts.method.clone(), &url);
        for (name, value) in &parts.headers {
            if name == header::HOST || name == header::CONTENT_LENGTH {
                continue;
            }
            upstream = upstream.header(name, value);
        }

        match upstream.body(bytes.clone()).send().await {
            Ok(response) => return relay(response).await,
            Err(transport_error) => {
                tracing::warn!(
                    port,
                    attempt,
                    error = %transport_error,
                    "worker request failed at transport level"
                );
                state.pool.mark_unhealthy(port).await;
            }
        }
    }

    error(
        StatusCode::SERVICE_UNAVAILABLE,
        "no healthy workers available",
    )
}

async fn relay(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = upstream.headers().clone();
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(_) => return error(StatusCode::BAD_GATEWAY, "worker response could not be read"),
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    for (name, value) in &headers {
        if name == header::TRANSFER_ENCODING
            || name == header::CONTENT_LENGTH
            || name == header::CONNECTION
        {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }
    response
}

fn error(status: StatusCode, message: &str) -> Response {
    let kind = match status {
        StatusCode::SERVICE_UNAVAILABLE => "service_unavailable",
        StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
        _ => "bad_gateway",
    };
    (
        status,
        Json(ErrorResponse::new(kind).with_message(message)),
    )
        .into_response()
}
