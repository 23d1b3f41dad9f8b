// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request middleware: trace propagation, request logging and metrics, and
//! panic recovery.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::header::HeaderName;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use futures::FutureExt;
use uuid::Uuid;

use crate::http::response::{res_error, ErrorInfo};
use crate::metrics::Metrics;
use crate::replicator::TRACE_ID_HEADER;

/// Trace id of the current request, available to handlers via extensions.
#[derive(Debug, Clone)]
pub struct TraceId(pub String);

/// Honor an inbound `TraceId` header or mint one, expose it to handlers,
/// echo it on the response, and emit the per-request log line.
pub async fn trace_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    request.extensions_mut().insert(TraceId(trace_id.clone()));

    let start = Instant::now();
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("traceid"), value);
    }
    tracing::info!(
        %trace_id,
        %method,
        %path,
        status = response.status().as_u16(),
        latency_us = start.elapsed().as_micros() as u64,
        "request completed"
    );
    response
}

/// Record duration and status-code metrics for every route except the
/// exporter itself and the root path.
pub async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    if path != "/metrics" && path != "/" {
        metrics
            .http_request_duration_us
            .with_label_values(&[&method, &path])
            .observe(start.elapsed().as_micros() as f64);
        metrics
            .http_request_status_code_total
            .with_label_values(&[&path, &method, response.status().as_str()])
            .inc();
    }
    response
}

/// Convert handler panics into the server-error envelope instead of a torn
/// connection.
pub async fn recovery_middleware(request: Request, next: Next) -> Response {
    let trace_id = request
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default();

    match std::panic::AssertUnwindSafe(next.run(request))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(panic) => {
            let detail = crate::panic_message(panic.as_ref());
            tracing::error!(%trace_id, detail, "handler panicked");
            res_error(
                &trace_id,
                ErrorInfo::server_error(format!("server error: {detail}")),
            )
        }
    }
}
