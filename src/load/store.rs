// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The process-wide load store.
//!
//! Requests and models live in concurrent maps touched by HTTP handlers,
//! inbound replication callbacks, and the GC sweeper at the same time.
//! Creation goes through atomic load-or-store so racing writers cannot
//! double-count, deletion is idempotent per request id, and a single-shot
//! delayed retry absorbs deletes that arrive before their set under
//! out-of-order replication. TTL expiry is what ultimately reconciles peers
//! after lost messages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::config::LoadConfig;
use crate::load::engine_stats::EngineSnapshot;
use crate::load::model_stats::ModelStats;
use crate::load::{DeletionInferenceRequest, InferenceRequest, TrackedRequest};
use crate::metrics::Metrics;
use crate::unix_now_ns;

/// How long a delete for an unknown request id waits for its set to arrive
/// before giving up. Longer than normal cross-node replication latency,
/// short enough not to stall resources.
const DELETE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Concurrent store of all in-flight request and model statistics.
pub struct LoadStore {
    requests: DashMap<String, Arc<TrackedRequest>>,
    models: DashMap<String, Arc<ModelStats>>,
    config: LoadConfig,
    metrics: Arc<Metrics>,
}

impl LoadStore {
    pub fn new(config: LoadConfig, metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new(Self {
            requests: DashMap::new(),
            models: DashMap::new(),
            config,
            metrics,
        })
    }

    /// Insert a request and account it against its engine. Idempotent on
    /// `request_id`: replayed sets are dropped without touching counters.
    pub fn set(&self, req: &InferenceRequest) {
        self.metrics
            .observe_replication_latency(req.timestamp, &req.request_id);

        let tracked = Arc::new(TrackedRequest::new(
            &req.cluster,
            &req.request_id,
            &req.ip,
            req.prompt_length,
        ));
        match self.requests.entry(req.request_id.clone()) {
            Entry::Occupied(_) => {
                tracing::info!(
                    request_id = %req.request_id,
                    "request id already exists, ignoring set"
                );
                return;
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&tracked));
            }
        }

        let model = match self.models.entry(req.cluster.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let model = Arc::new(ModelStats::new(&req.cluster));
                entry.insert(Arc::clone(&model));
                tracing::info!(request_id = %req.request_id, model = %req.cluster, "added new model stats");
                model
            }
        };
        let engine = model.load_or_store(&self.metrics, &req.ip);
        engine.increment(&self.metrics, &req.cluster, req.prompt_length);
    }

    /// Remove a request and reverse its contribution. If the request is
    /// unknown (its set may still be in flight from a peer), the same
    /// deletion is retried once after [`DELETE_RETRY_DELAY`] and then
    /// dropped with a warning.
    pub fn delete_request(self: &Arc<Self>, req: &DeletionInferenceRequest) {
        self.metrics
            .observe_replication_latency(req.timestamp, &req.request_id);

        if self.try_delete_request(&req.request_id) {
            return;
        }

        tracing::info!(request_id = %req.request_id, "request id not found, delaying request deletion");
        let store = Arc::clone(self);
        let request_id = req.request_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DELETE_RETRY_DELAY).await;
            if store.try_delete_request(&request_id) {
                tracing::info!(%request_id, "delayed request deletion completed");
            } else {
                tracing::warn!(
                    %request_id,
                    "request id still not found after delay, statistics may be inaccurate"
                );
            }
        });
    }

    /// Zero a request's prompt contribution without dequeuing it. Unknown
    /// ids get the same single delayed retry as [`Self::delete_request`].
    pub fn delete_prompt_length(self: &Arc<Self>, req: &DeletionInferenceRequest) {
        self.metrics
            .observe_replication_latency(req.timestamp, &req.request_id);

        if self.try_dec_prompt_length(&req.request_id) {
            return;
        }

        tracing::info!(request_id = %req.request_id, "request id not found, delaying prompt length deletion");
        let store = Arc::clone(self);
        let request_id = req.request_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DELETE_RETRY_DELAY).await;
            if store.try_dec_prompt_length(&request_id) {
                tracing::info!(%request_id, "delayed prompt length deletion completed");
            } else {
                tracing::warn!(
                    %request_id,
                    "request id still not found after delay, may already be removed"
                );
            }
        });
    }

    /// Snapshot the engines of one model. Counters of different engines may
    /// belong to different instants, which is acceptable for load balancing.
    pub fn query(&self, cluster: &str) -> Vec<EngineSnapshot> {
        self.models
            .get(cluster)
            .map(|model| model.to_engines())
            .unwrap_or_default()
    }

    /// Look up the stats container of one model.
    pub fn get_model(&self, cluster: &str) -> Option<Arc<ModelStats>> {
        self.models.get(cluster).map(|m| Arc::clone(m.value()))
    }

    fn try_delete_request(&self, request_id: &str) -> bool {
        match self.requests.remove(request_id) {
            Some((_, req)) => {
                self.dec_engine_stats(&req);
                true
            }
            None => false,
        }
    }

    fn try_dec_prompt_length(&self, request_id: &str) -> bool {
        match self.requests.get(request_id).map(|e| Arc::clone(e.value())) {
            Some(req) => {
                self.dec_engine_prompt_length(&req);
                true
            }
            None => false,
        }
    }

    fn dec_engine_stats(&self, req: &TrackedRequest) {
        let Some(model) = self.get_model(&req.cluster) else {
            tracing::debug!(request_id = %req.request_id, model = %req.cluster, "model not found for decrement");
            return;
        };
        let Some(engine) = model.load(&req.ip) else {
            tracing::debug!(request_id = %req.request_id, ip = %req.ip, "engine not found for decrement");
            return;
        };
        engine.decrement_queue(&self.metrics, &req.cluster);
        // No-op if the prompt contribution was already zeroed via the
        // prompt-delete path.
        engine.decrement_prompt(&self.metrics, req);
    }

    fn dec_engine_prompt_length(&self, req: &TrackedRequest) {
        let Some(model) = self.get_model(&req.cluster) else {
            tracing::debug!(request_id = %req.request_id, model = %req.cluster, "model not found for prompt decrement");
            return;
        };
        let Some(engine) = model.load(&req.ip) else {
            tracing::debug!(request_id = %req.request_id, ip = %req.ip, "engine not found for prompt decrement");
            return;
        };
        engine.decrement_prompt(&self.metrics, req);
        // Prompt deletes are mutations: keep the model alive for the sweeper
        // even when no sets or engine churn are arriving.
        model.touch();
    }

    /// One garbage-collection sweep: expire requests past their TTL (with
    /// the same counter reversal as a delete), then drop idle engines and
    /// models and purge their metric series.
    pub fn gc(&self) {
        let now = unix_now_ns();
        let expire = self.config.request_expire.as_nanos() as i64;

        let expired: Vec<String> = self
            .requests
            .iter()
            .filter(|entry| entry.value().created_at_ns + expire < now)
            .map(|entry| entry.key().clone())
            .collect();
        for request_id in expired {
            if let Some((_, req)) = self.requests.remove(&request_id) {
                self.dec_engine_stats(&req);
                tracing::info!(%request_id, "removed expired request");
            }
        }

        let models: Vec<(String, Arc<ModelStats>)> = self
            .models
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        for (name, model) in models {
            if now >= model.updated_at_ns() + expire {
                if self.models.remove(&name).is_some() {
                    model.metric_clean(&self.metrics);
                    tracing::info!(model = %name, "removed expired model");
                }
                continue;
            }
            model.for_each_engine(|ip, engine| {
                if now >= engine.updated_at_ns() + expire {
                    model.delete(&self.metrics, ip);
                    engine.metric_clean(&self.metrics, &name);
                    tracing::info!(model = %name, ip, "removed expired engine");
                }
            });
        }
    }

    /// Spawn the periodic GC sweeper. A panic in a sweep is caught and
    /// logged, the task terminates, and the operator is expected to restart
    /// the node.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(interval = ?store.config.gc_interval, "load stats sweeper started");
            let result = std::panic::AssertUnwindSafe(async {
                let mut ticker = tokio::time::interval(store.config.gc_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let start = Instant::now();
                    store.gc();
                    tracing::info!(elapsed = ?start.elapsed(), "completed load stats garbage collection");
                }
            })
            .catch_unwind()
            .await;
            if let Err(panic) = result {
                tracing::error!(
                    panic = crate::panic_message(panic.as_ref()),
                    "load stats sweeper panicked, sweeper exited"
                );
            }
        })
    }

    #[cfg(test)]
    fn request_count(&self) -> usize {
        self.requests.len()
    }
}
