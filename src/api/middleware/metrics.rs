use super::request_id::REQUEST_ID_HEADER;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Emits one `request_completed` event per request under the `metrics` target.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = req
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let response = next.run(req).await;
    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis();

    if response.status().is_server_error() {
        tracing::warn!(
            target: "metrics",
            method = %method,
            path = %path,
            status,
            latency_ms = %latency_ms,
            request_id = %request_id,
            "request_completed"
        );
    } else {
        tracing::info!(
            target: "metrics",
            method = %method,
            path = %path,
            status,
            latency_ms = %latency_ms,
            request_id = %request_id,
            "request_completed"
        );
    }

    response
}
