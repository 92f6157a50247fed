//! 请求上下文中间件
//!
//! 每个请求一个 request_id（上游已带 `x-request-id` 时沿用）和新的 trace_id，
//! 注入请求扩展与日志 span，并回写到响应头。

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use plcmon_telemetry::new_request_ids;
use tokio::time::Instant;
use tracing::{Instrument, info, info_span};

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const TRACE_ID: HeaderName = HeaderName::from_static("x-trace-id");

pub async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let mut ids = new_request_ids();
    if let Some(upstream) = req
        .headers()
        .get(&REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
    {
        ids.request_id = upstream.to_string();
    }
    let span = info_span!(
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    req.extensions_mut().insert(ids.clone());

    let started = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| {
        info!(
            target: "plcmon.api",
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "http_request_completed"
        );
    });

    for (name, value) in [(REQUEST_ID, &ids.request_id), (TRACE_ID, &ids.trace_id)] {
        if let Ok(value) = HeaderValue::from_str(value) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}
