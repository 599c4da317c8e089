//! HTTP request metrics.
//!
//! Wraps every route, so responses produced by the framework before a
//! handler runs (404 on unknown paths, 405, 415, JSON rejections) are
//! counted too. Websocket upgrades are recorded when the 101 is returned.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Record method, route template, status and latency for one request.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}
