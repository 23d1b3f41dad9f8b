// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP handlers: load statistics CRUD, replica ingress, metrics export,
//! and the log-level admin endpoint.
//!
//! Mutating handlers apply the local store operation first, then fan the
//! event out to peers; the caller sees success before replication settles.

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use validator::Validate;

use crate::http::middleware::TraceId;
use crate::http::response::{parse_json, res_error, res_ok, res_success, ErrorInfo};
use crate::http::AppState;
use crate::load::{
    DeletionInferenceRequest, InferenceRequest, ModelQueryRequest, LOAD_PROMPT_DELETE,
    LOAD_STATS_DELETE, LOAD_STATS_SET,
};
use crate::replicator::EVENT_TYPE_HEADER;

/// `GET /v1/load/stats?cluster=X`
pub async fn query_stats(
    State(state): State<AppState>,
    Extension(trace): Extension<TraceId>,
    query: Result<Query<ModelQueryRequest>, QueryRejection>,
) -> Response {
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            tracing::error!(trace_id = %trace.0, %rejection, "query model request error");
            return res_error(
                &trace.0,
                ErrorInfo::invalid_input(format!("Parse request query failed: {rejection}")),
            );
        }
    };
    if let Err(errors) = params.validate() {
        return res_error(
            &trace.0,
            ErrorInfo::invalid_input(format!("Parse request query failed: {errors}")),
        );
    }

    res_success(&trace.0, state.store.query(&params.cluster))
}

/// `POST /v1/load/stats`
pub async fn set_stats(
    State(state): State<AppState>,
    Extension(trace): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let req: InferenceRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(err) => {
            tracing::error!(trace_id = %trace.0, reason = %err.reason, "set request error");
            return res_error(&trace.0, err);
        }
    };

    state.store.set(&req);
    state.replicator.replicate(LOAD_STATS_SET, &trace.0, &req);

    res_ok(&trace.0)
}

/// `DELETE /v1/load/stats`
pub async fn delete_stats(
    State(state): State<AppState>,
    Extension(trace): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let req: DeletionInferenceRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(err) => {
            tracing::error!(trace_id = %trace.0, reason = %err.reason, "delete request error");
            return res_error(&trace.0, err);
        }
    };

    state.store.delete_request(&req);
    state.replicator.replicate(LOAD_STATS_DELETE, &trace.0, &req);

    res_ok(&trace.0)
}

/// `DELETE /v1/load/prompt`
pub async fn delete_prompt(
    State(state): State<AppState>,
    Extension(trace): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let req: DeletionInferenceRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(err) => {
            tracing::error!(trace_id = %trace.0, reason = %err.reason, "delete prompt length request error");
            return res_error(&trace.0, err);
        }
    };

    state.store.delete_prompt_length(&req);
    state.replicator.replicate(LOAD_PROMPT_DELETE, &trace.0, &req);

    res_ok(&trace.0)
}

/// `POST /v1/replica/event` — peer-to-peer ingress.
pub async fn replica_event(
    State(state): State<AppState>,
    Extension(trace): Extension<TraceId>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let event_type = match headers
        .get(EVENT_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
    {
        Some(event_type) => event_type,
        None => {
            tracing::error!(trace_id = %trace.0, "missing Event-Type header");
            return res_error(&trace.0, ErrorInfo::invalid_input("missing Event-Type header"));
        }
    };

    let Some(handler) = state.registry.get(event_type) else {
        tracing::error!(trace_id = %trace.0, event_type, "no handler found for event type");
        return res_error(&trace.0, ErrorInfo::invalid_input("Unsupported event type"));
    };

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::error!(trace_id = %trace.0, %rejection, "replica event body read error");
            return res_error(&trace.0, ErrorInfo::invalid_input("invalid body"));
        }
    };

    if let Err(err) = handler(body) {
        // Details stay in the logs; the peer only learns the call failed.
        tracing::error!(trace_id = %trace.0, event_type, %err, "replica event handler error");
        return res_error(&trace.0, ErrorInfo::invalid_input("handler execute error"));
    }

    res_ok(&trace.0)
}

/// `GET /metrics`
pub async fn export_metrics(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&state.prom_registry.gather(), &mut buffer) {
        tracing::error!(%err, "metrics encoding failed");
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding failed",
        )
            .into_response();
    }
    ([(CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

/// Body of `POST /log/level`.
#[derive(Debug, Deserialize, Validate)]
pub struct LevelParam {
    #[serde(rename = "LevelParam")]
    #[validate(length(min = 1, message = "is required"))]
    pub level: String,
}

/// `POST /log/level` — hot-update the log level.
pub async fn update_log_level(
    State(state): State<AppState>,
    Extension(trace): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let param: LevelParam = match parse_json(&body) {
        Ok(param) => param,
        Err(err) => return res_error(&trace.0, err),
    };

    let Some(handle) = &state.log_handle else {
        return res_error(
            &trace.0,
            ErrorInfo::server_error("log level reload not configured"),
        );
    };

    match handle.set_level(&param.level) {
        Ok(()) => {
            tracing::info!(level = %param.level, "log level updated");
            res_success(&trace.0, "log level updated successfully")
        }
        Err(err) => res_error(&trace.0, ErrorInfo::invalid_input(err.to_string())),
    }
}
