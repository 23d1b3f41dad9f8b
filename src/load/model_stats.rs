// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-model container of engine counters.
//!
//! The engine map is created and destroyed lazily; `engine_count` caches the
//! map size with compensating updates on the winning branch of each
//! insert/remove so `size()` is a single atomic load on the query path.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::load::engine_stats::{EngineSnapshot, EngineStats};
use crate::metrics::Metrics;
use crate::unix_now_ns;

/// Load statistics for a single model: one [`EngineStats`] per engine IP.
pub struct ModelStats {
    pub name: String,
    engines: DashMap<String, Arc<EngineStats>>,
    engine_count: AtomicI32,
    updated_at_ns: AtomicI64,
}

impl ModelStats {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            engines: DashMap::new(),
            engine_count: AtomicI32::new(0),
            updated_at_ns: AtomicI64::new(unix_now_ns()),
        }
    }

    /// Get or create the engine entry for the given IP.
    /// The count and the engine-count gauge are updated only when this call
    /// actually inserts, so racing creators cannot double-count.
    pub fn load_or_store(&self, metrics: &Metrics, ip: &str) -> Arc<EngineStats> {
        let engine = match self.engines.entry(ip.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let engine = Arc::new(EngineStats::new(ip));
                entry.insert(Arc::clone(&engine));
                self.engine_count.fetch_add(1, Ordering::Relaxed);
                metrics
                    .model_engine_count
                    .with_label_values(&[&self.name])
                    .set(self.size() as i64);
                tracing::info!(model = %self.name, ip, "added new engine load stats");
                engine
            }
        };
        self.touch();
        engine
    }

    /// Look up an engine without creating it.
    pub fn load(&self, ip: &str) -> Option<Arc<EngineStats>> {
        self.engines.get(ip).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove an engine entry, keeping the cached count and gauge in step.
    pub fn delete(&self, metrics: &Metrics, ip: &str) {
        if self.engines.remove(ip).is_some() {
            self.engine_count.fetch_sub(1, Ordering::Relaxed);
            metrics
                .model_engine_count
                .with_label_values(&[&self.name])
                .set(self.size() as i64);
            tracing::info!(model = %self.name, ip, "deleted engine load stats");
        }
        self.touch();
    }

    /// Cached engine count; may briefly trail an in-flight insert.
    pub fn size(&self) -> i32 {
        self.engine_count.load(Ordering::Relaxed)
    }

    pub fn updated_at_ns(&self) -> i64 {
        self.updated_at_ns.load(Ordering::Relaxed)
    }

    /// Iterate engines for the GC sweep; the closure may call [`Self::delete`].
    pub fn for_each_engine(&self, mut f: impl FnMut(&str, &Arc<EngineStats>)) {
        let engines: Vec<(String, Arc<EngineStats>)> = self
            .engines
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        for (ip, engine) in &engines {
            f(ip, engine);
        }
    }

    /// Snapshot every engine for a query response.
    pub fn to_engines(&self) -> Vec<EngineSnapshot> {
        self.engines
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    /// Remove every metric series belonging to this model.
    pub fn metric_clean(&self, metrics: &Metrics) {
        let ips: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();
        metrics.delete_model_metric(&self.name, &ips);
    }

    /// Refresh the liveness timestamp the GC sweep checks against. Mutation
    /// paths that bypass [`Self::load_or_store`]/[`Self::delete`] call this
    /// so ongoing traffic keeps the model from expiring.
    pub fn touch(&self) {
        self.updated_at_ns.store(unix_now_ns(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_store_counts_once() {
        let metrics = Metrics::new();
        let model = ModelStats::new("test_model");

        let first = model.load_or_store(&metrics, "192.168.1.1");
        let second = model.load_or_store(&metrics, "192.168.1.1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(model.size(), 1);

        model.load_or_store(&metrics, "192.168.1.2");
        assert_eq!(model.size(), 2);
    }

    #[test]
    fn test_delete_updates_count() {
        let metrics = Metrics::new();
        let model = ModelStats::new("test_model");

        model.load_or_store(&metrics, "192.168.1.1");
        model.load_or_store(&metrics, "192.168.1.2");
        model.delete(&metrics, "192.168.1.1");
        assert_eq!(model.size(), 1);

        // Deleting an absent engine is a no-op for the count.
        model.delete(&metrics, "192.168.1.1");
        assert_eq!(model.size(), 1);
    }

    #[test]
    fn test_concurrent_load_or_store_single_count() {
        let metrics = Arc::new(Metrics::new());
        let model = Arc::new(ModelStats::new("test_model"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let model = Arc::clone(&model);
            let metrics = Arc::clone(&metrics);
            handles.push(std::thread::spawn(move || {
                model.load_or_store(&metrics, "192.168.1.1");
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(model.size(), 1);
    }

    #[test]
    fn test_to_engines_snapshots_all() {
        let metrics = Metrics::new();
        let model = ModelStats::new("test_model");
        model
            .load_or_store(&metrics, "192.168.1.1")
            .increment(&metrics, "test_model", 100);
        model
            .load_or_store(&metrics, "192.168.1.2")
            .increment(&metrics, "test_model", 200);

        let mut engines = model.to_engines();
        engines.sort_by(|a, b| a.ip.cmp(&b.ip));
        assert_eq!(engines.len(), 2);
        assert_eq!(engines[0].prompt_length, 100);
        assert_eq!(engines[1].prompt_length, 200);
    }
}
