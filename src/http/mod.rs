// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface: application state and router assembly.
//!
//! Collaborators are explicit dependencies bound at server construction, so
//! tests build fresh instances instead of sharing process-wide singletons.

pub mod load_api;
pub mod middleware;
pub mod response;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::load::store::LoadStore;
use crate::logging::LogLevelHandle;
use crate::metrics::Metrics;
use crate::replicator::receiver::HandlerRegistry;
use crate::replicator::sender::Replicator;

/// Shared dependencies of every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LoadStore>,
    pub replicator: Arc<Replicator>,
    pub registry: Arc<HandlerRegistry>,
    pub metrics: Arc<Metrics>,
    pub prom_registry: prometheus::Registry,
    /// Absent in tests that never touch `/log/level`.
    pub log_handle: Option<LogLevelHandle>,
}

/// Assemble the router with the full middleware stack. Layer order (outer to
/// inner): trace, metrics, recovery.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/load/stats",
            get(load_api::query_stats)
                .post(load_api::set_stats)
                .delete(load_api::delete_stats),
        )
        .route("/v1/load/prompt", delete(load_api::delete_prompt))
        .route("/v1/replica/event", post(load_api::replica_event))
        .route("/metrics", get(load_api::export_metrics))
        .route("/log/level", post(load_api::update_log_level))
        .layer(axum::middleware::from_fn(middleware::recovery_middleware))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state.metrics),
            middleware::metrics_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::trace_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoadConfig, ReplicaClientConfig};
    use crate::discovery::StaticDiscovery;
    use crate::load::register_load_handlers;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let metrics = Arc::new(Metrics::new());
        let prom_registry = prometheus::Registry::new();
        metrics.register(&prom_registry).unwrap();

        let store = LoadStore::new(LoadConfig::default(), Arc::clone(&metrics));
        let replicator = Arc::new(
            Replicator::new(
                &ReplicaClientConfig::default(),
                StaticDiscovery::new(Vec::new()),
            )
            .unwrap(),
        );
        let registry = Arc::new(HandlerRegistry::new());
        register_load_handlers(&registry, Arc::clone(&store)).unwrap();

        AppState {
            store,
            replicator,
            registry,
            metrics,
            prom_registry,
            log_handle: None,
        }
    }

    fn test_router() -> Router {
        build_router(test_state())
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_json_with_header(path: &str, body: &str, name: &str, value: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .header(name, value)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_then_query_roundtrip() {
        let state = test_state();
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/load/stats",
                r#"{"cluster":"A","request_id":"1","prompt_length":512,"ip":"1.1.1.1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let envelope = body_json(response).await;
        assert_eq!(envelope["status"], "OK");
        assert_eq!(envelope["code"], 200);
        assert!(envelope["trace_id"].as_str().is_some_and(|t| !t.is_empty()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/load/stats?cluster=A")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let envelope = body_json(response).await;
        let engines = envelope["data"].as_array().unwrap();
        assert_eq!(engines.len(), 1);
        assert_eq!(engines[0]["ip"], "1.1.1.1");
        assert_eq!(engines[0]["queued_req_num"], 1);
        assert_eq!(engines[0]["prompt_length"], 512);
    }

    #[tokio::test]
    async fn test_query_unknown_cluster_returns_empty_array() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/load/stats?cluster=missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let envelope = body_json(response).await;
        assert_eq!(envelope["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_query_without_cluster_is_rejected() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/load/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_set_invalid_ip_rejected() {
        let response = test_router()
            .oneshot(post_json(
                "/v1/load/stats",
                r#"{"cluster":"A","request_id":"1","prompt_length":1,"ip":"not-an-ip"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let envelope = body_json(response).await;
        assert_eq!(envelope["status"], "ERROR");
        assert_eq!(envelope["code"], 400);
        assert_eq!(envelope["error"]["code"], 40001400);
        assert!(envelope["error"]["message"]
            .as_str()
            .unwrap()
            .contains("invalid IP address"));
    }

    #[tokio::test]
    async fn test_set_negative_prompt_rejected() {
        let response = test_router()
            .oneshot(post_json(
                "/v1/load/stats",
                r#"{"cluster":"A","request_id":"1","prompt_length":-5,"ip":"1.1.1.1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_set_invalid_json_rejected() {
        let response = test_router()
            .oneshot(post_json("/v1/load/stats", "invalid-json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let envelope = body_json(response).await;
        assert_eq!(envelope["error"]["code"], 40001400);
        assert!(envelope["error"]["message"]
            .as_str()
            .unwrap()
            .contains("invalid JSON format"));
    }

    #[tokio::test]
    async fn test_delete_flow_via_http() {
        let app = test_router();

        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/load/stats",
                r#"{"cluster":"A","request_id":"1","prompt_length":512,"ip":"1.1.1.1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/load/prompt")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"request_id":"1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/load/stats")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"request_id":"1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/load/stats?cluster=A")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let envelope = body_json(response).await;
        let engines = envelope["data"].as_array().unwrap();
        assert_eq!(engines[0]["queued_req_num"], 0);
        assert_eq!(engines[0]["prompt_length"], 0);
    }

    #[tokio::test]
    async fn test_replica_event_unknown_type() {
        let request = post_json_with_header("/v1/replica/event", "{}", "Event-Type", "e2");
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let envelope = body_json(response).await;
        assert!(envelope["error"]["reason"]
            .as_str()
            .unwrap()
            .contains("Unsupported event type"));
    }

    #[tokio::test]
    async fn test_replica_event_missing_header() {
        let response = test_router()
            .oneshot(post_json("/v1/replica/event", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let envelope = body_json(response).await;
        assert!(envelope["error"]["reason"]
            .as_str()
            .unwrap()
            .contains("missing Event-Type header"));
    }

    #[tokio::test]
    async fn test_replica_event_handler_error_is_generic() {
        let request = post_json_with_header(
            "/v1/replica/event",
            "{not json",
            "Event-Type",
            "load.stats.set",
        );
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let envelope = body_json(response).await;
        // The specific cause stays in the logs.
        assert_eq!(envelope["error"]["reason"], "handler execute error");
    }

    #[tokio::test]
    async fn test_replica_event_applies_set() {
        let state = test_state();
        let app = build_router(state.clone());

        let request = post_json_with_header(
            "/v1/replica/event",
            r#"{"cluster":"B","request_id":"r9","prompt_length":64,"ip":"2.2.2.2"}"#,
            "Event-Type",
            "load.stats.set",
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let engines = state.store.query("B");
        assert_eq!(engines.len(), 1);
        assert_eq!(engines[0].prompt_length, 64);
    }

    #[tokio::test]
    async fn test_trace_id_echoed_on_response() {
        let request = post_json_with_header(
            "/v1/load/stats",
            r#"{"cluster":"A","request_id":"1","prompt_length":1,"ip":"1.1.1.1"}"#,
            "TraceId",
            "trace-abc",
        );
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get("traceid").unwrap().to_str().unwrap(),
            "trace-abc"
        );
        let envelope = body_json(response).await;
        assert_eq!(envelope["trace_id"], "trace-abc");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exports_series() {
        let app = test_router();

        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/load/stats",
                r#"{"cluster":"A","request_id":"1","prompt_length":512,"ip":"1.1.1.1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("queued_num"));
        assert!(text.contains("http_request_status_code_total"));
    }

    #[tokio::test]
    async fn test_log_level_without_handle_is_server_error() {
        let response = test_router()
            .oneshot(post_json("/log/level", r#"{"LevelParam":"INFO"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = body_json(response).await;
        assert_eq!(envelope["error"]["code"], 50001500);
    }
}
