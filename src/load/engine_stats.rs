// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-engine load counters.
//!
//! Counters are plain atomics mutated from many request handlers, inbound
//! replication callbacks, and the GC sweeper at once. The prompt-length
//! decrement is made at-most-once per request by compare-and-swapping the
//! request-owned field, not the engine aggregate: two concurrent deleters
//! race on the request, and the loser becomes a no-op.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use serde::Serialize;

use crate::load::TrackedRequest;
use crate::metrics::Metrics;
use crate::unix_now_ns;

/// Load counters for one engine within one model.
pub struct EngineStats {
    pub ip: String,
    queued_req_num: AtomicI32,
    prompt_length: AtomicI32,
    updated_at_ns: AtomicI64,
}

/// Point-in-time copy of an engine's counters, returned by queries.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub ip: String,
    pub queued_req_num: i32,
    pub prompt_length: i32,
    pub updated_time: i64,
}

impl EngineStats {
    pub fn new(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            queued_req_num: AtomicI32::new(0),
            prompt_length: AtomicI32::new(0),
            updated_at_ns: AtomicI64::new(unix_now_ns()),
        }
    }

    /// Account one newly queued request and its prompt contribution.
    pub fn increment(&self, metrics: &Metrics, cluster: &str, prompt_length: i32) {
        self.queued_req_num.fetch_add(1, Ordering::Relaxed);
        self.prompt_length.fetch_add(prompt_length, Ordering::Relaxed);
        self.touch();
        metrics.set_load_metric(cluster, &self.ip, self.queued_req_num(), self.prompt_length());
    }

    /// Remove one request from the queue count.
    pub fn decrement_queue(&self, metrics: &Metrics, cluster: &str) {
        self.queued_req_num.fetch_sub(1, Ordering::Relaxed);
        self.touch();
        metrics.set_load_metric(cluster, &self.ip, self.queued_req_num(), self.prompt_length());
    }

    /// Remove the request's prompt contribution, at most once per request.
    ///
    /// The request's own `prompt_length` is swapped to zero first; only the
    /// winner of that swap subtracts from the engine aggregate. A zero or
    /// negative request length means another deleter already won.
    pub fn decrement_prompt(&self, metrics: &Metrics, req: &TrackedRequest) {
        let length = req.prompt_length.load(Ordering::Acquire);
        if length <= 0 {
            tracing::debug!(
                request_id = %req.request_id,
                length,
                "prompt decrement skipped, nothing left to subtract"
            );
            return;
        }
        if req
            .prompt_length
            .compare_exchange(length, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(
                request_id = %req.request_id,
                expected = length,
                "prompt decrement lost the swap, already taken by a concurrent delete"
            );
            return;
        }
        self.prompt_length.fetch_sub(length, Ordering::Relaxed);
        self.touch();
        metrics.set_load_metric(
            &req.cluster,
            &self.ip,
            self.queued_req_num(),
            self.prompt_length(),
        );
    }

    pub fn queued_req_num(&self) -> i32 {
        self.queued_req_num.load(Ordering::Relaxed)
    }

    pub fn prompt_length(&self) -> i32 {
        self.prompt_length.load(Ordering::Relaxed)
    }

    pub fn updated_at_ns(&self) -> i64 {
        self.updated_at_ns.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            ip: self.ip.clone(),
            queued_req_num: self.queued_req_num(),
            prompt_length: self.prompt_length(),
            updated_time: self.updated_at_ns(),
        }
    }

    /// Remove this engine's metric series under the given model.
    pub fn metric_clean(&self, metrics: &Metrics, cluster: &str) {
        metrics.delete_engine_metric(cluster, &self.ip);
    }

    fn touch(&self) {
        self.updated_at_ns.store(unix_now_ns(), Ordering::Relaxed);
    }
}
