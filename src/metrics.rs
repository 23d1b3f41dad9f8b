// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for the load-metadata node.
//!
//! This module centralizes all metric family definitions:
//! - Per-(model, engine) load gauges published on every counter change.
//! - Replication latency histogram with clock-skew filtering.
//! - HTTP request duration/status families used by the middleware.
//! - Service-discovery and node-liveness gauges.

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
};

use crate::unix_now_ns;

/// All metric families owned by one node, registered into an injected
/// [`prometheus::Registry`] at startup. Tests construct fresh instances with
/// their own registries.
pub struct Metrics {
    /// Queued request count per (model, engine).
    pub queued_num: IntGaugeVec,
    /// Aggregate prompt length per (model, engine).
    pub prompt_length: IntGaugeVec,
    /// Cached engine count per model.
    pub model_engine_count: IntGaugeVec,
    /// End-to-end replication latency in milliseconds.
    pub replication_latency_ms: Histogram,
    /// HTTP request duration in microseconds.
    pub http_request_duration_us: HistogramVec,
    /// HTTP request count by status code.
    pub http_request_status_code_total: IntCounterVec,
    /// Hosts currently resolved for the discovery domain.
    pub dns_lookup_hosts: IntGaugeVec,
    /// 1 while the node is serving.
    pub node_alive: IntGauge,
    /// Application version as a labeled constant gauge.
    pub app_version_info: IntGaugeVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            queued_num: IntGaugeVec::new(
                Opts::new(
                    "queued_num",
                    "The queued request count for each model and engine combination",
                ),
                &["model_name", "engine_ip"],
            )
            .expect("queued_num gauge"),
            prompt_length: IntGaugeVec::new(
                Opts::new(
                    "prompt_length",
                    "The aggregate prompt length for each model and engine combination",
                ),
                &["model_name", "engine_ip"],
            )
            .expect("prompt_length gauge"),
            model_engine_count: IntGaugeVec::new(
                Opts::new("model_engine_count", "Number of engines for each model"),
                &["model_name"],
            )
            .expect("model_engine_count gauge"),
            replication_latency_ms: Histogram::with_opts(
                HistogramOpts::new(
                    "replication_latency_ms",
                    "Histogram of data replication event latency in milliseconds",
                )
                .buckets(
                    prometheus::exponential_buckets(1.0, 2.0, 8)
                        .expect("replication latency buckets"),
                ),
            )
            .expect("replication_latency_ms histogram"),
            http_request_duration_us: HistogramVec::new(
                HistogramOpts::new(
                    "http_request_duration_us",
                    "Histogram of HTTP request durations in microseconds",
                )
                .buckets(
                    prometheus::exponential_buckets(500.0, 2.0, 3).expect("http duration buckets"),
                ),
                &["method", "url"],
            )
            .expect("http_request_duration_us histogram"),
            http_request_status_code_total: IntCounterVec::new(
                Opts::new(
                    "http_request_status_code_total",
                    "Count of HTTP requests by status code",
                ),
                &["url", "method", "status_code"],
            )
            .expect("http_request_status_code_total counter"),
            dns_lookup_hosts: IntGaugeVec::new(
                Opts::new("dns_lookup_hosts", "Hosts resolved by DNS lookup for domain"),
                &["domain", "host"],
            )
            .expect("dns_lookup_hosts gauge"),
            node_alive: IntGauge::new(
                "metahub_node_alive",
                "Indicates if the metadata node is alive",
            )
            .expect("metahub_node_alive gauge"),
            app_version_info: IntGaugeVec::new(
                Opts::new("app_version_info", "Version information about the application"),
                &["version"],
            )
            .expect("app_version_info gauge"),
        }
    }

    /// Register every family with the given registry.
    pub fn register(&self, registry: &prometheus::Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.queued_num.clone()))?;
        registry.register(Box::new(self.prompt_length.clone()))?;
        registry.register(Box::new(self.model_engine_count.clone()))?;
        registry.register(Box::new(self.replication_latency_ms.clone()))?;
        registry.register(Box::new(self.http_request_duration_us.clone()))?;
        registry.register(Box::new(self.http_request_status_code_total.clone()))?;
        registry.register(Box::new(self.dns_lookup_hosts.clone()))?;
        registry.register(Box::new(self.node_alive.clone()))?;
        registry.register(Box::new(self.app_version_info.clone()))?;
        Ok(())
    }

    /// Publish the load gauges for one (model, engine) pair.
    pub fn set_load_metric(&self, model: &str, ip: &str, queued: i32, prompt: i32) {
        self.queued_num
            .with_label_values(&[model, ip])
            .set(queued as i64);
        self.prompt_length
            .with_label_values(&[model, ip])
            .set(prompt as i64);
    }

    /// Remove the load gauge series for one (model, engine) pair.
    pub fn delete_engine_metric(&self, model: &str, ip: &str) {
        let _ = self.queued_num.remove_label_values(&[model, ip]);
        let _ = self.prompt_length.remove_label_values(&[model, ip]);
    }

    /// Remove every series belonging to a model: its engine-count gauge and
    /// the load gauges of every engine it still holds. The caller supplies
    /// the engine list because the prometheus crate removes series only by
    /// full label set.
    pub fn delete_model_metric(&self, model: &str, engine_ips: &[String]) {
        let _ = self.model_engine_count.remove_label_values(&[model]);
        for ip in engine_ips {
            self.delete_engine_metric(model, ip);
        }
    }

    /// Observe replication latency for an event stamped by the originating
    /// node. Negative latencies (receiver clock behind sender) are logged and
    /// excluded from the histogram so skew does not distort the metric.
    pub fn observe_replication_latency(&self, origin_ts_ns: i64, request_id: &str) {
        if origin_ts_ns <= 0 {
            return;
        }
        let now_ns = unix_now_ns();
        let latency_ms = (now_ns - origin_ts_ns) as f64 / 1_000_000.0;
        if latency_ms >= 0.0 {
            self.replication_latency_ms.observe(latency_ms);
            tracing::debug!(
                request_id,
                latency_ms,
                origin_ts_ns,
                now_ns,
                "replication latency observed"
            );
        } else {
            tracing::debug!(
                request_id,
                latency_ms,
                origin_ts_ns,
                now_ns,
                "negative replication latency, clock skew suspected, not recorded"
            );
        }
    }
}
