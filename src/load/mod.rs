// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Load statistics subsystem: wire types, the concurrent store, and the
//! replica event handlers that feed peer mutations back into it.

pub mod engine_stats;
pub mod model_stats;
pub mod store;

use std::net::Ipv4Addr;
use std::sync::atomic::AtomicI32;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::replicator::receiver::{HandlerRegistry, RegistryError};
use crate::unix_now_ns;
use store::LoadStore;

/// Replica event type for inserting load statistics.
pub const LOAD_STATS_SET: &str = "load.stats.set";
/// Replica event type for deleting a request's statistics.
pub const LOAD_STATS_DELETE: &str = "load.stats.delete";
/// Replica event type for zeroing a request's prompt contribution.
pub const LOAD_PROMPT_DELETE: &str = "load.prompt.delete";

fn validate_ipv4(ip: &str) -> Result<(), ValidationError> {
    ip.parse::<Ipv4Addr>().map(|_| ()).map_err(|_| {
        let mut error = ValidationError::new("ipv4");
        error.message = Some("invalid IP address".into());
        error
    })
}

/// An inference request entering an engine's queue.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InferenceRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub cluster: String,
    #[validate(length(min = 1, message = "is required"))]
    pub request_id: String,
    #[serde(default)]
    #[validate(range(min = 0, message = "below minimum value"))]
    pub prompt_length: i32,
    #[validate(custom(function = validate_ipv4))]
    pub ip: String,
    /// Wall-clock nanoseconds stamped by the originating node; only used for
    /// replication latency metrics. Zero means unset.
    #[serde(default)]
    pub timestamp: i64,
}

/// Deletion message: the request id is all a peer needs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeletionInferenceRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub request_id: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// Query parameters for `GET /v1/load/stats`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ModelQueryRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub cluster: String,
}

/// A request as owned by the store. `prompt_length` is atomic because it is
/// the CAS target that makes the prompt decrement at-most-once.
pub struct TrackedRequest {
    pub cluster: String,
    pub request_id: String,
    pub ip: String,
    pub prompt_length: AtomicI32,
    pub created_at_ns: i64,
}

impl TrackedRequest {
    pub fn new(cluster: &str, request_id: &str, ip: &str, prompt_length: i32) -> Self {
        Self {
            cluster: cluster.to_string(),
            request_id: request_id.to_string(),
            ip: ip.to_string(),
            prompt_length: AtomicI32::new(prompt_length),
            created_at_ns: unix_now_ns(),
        }
    }
}

/// Wire the three load event handlers into the replica registry.
/// Called exactly once at startup, before the server accepts traffic.
pub fn register_load_handlers(
    registry: &HandlerRegistry,
    store: Arc<LoadStore>,
) -> Result<(), RegistryError> {
    let set_store = Arc::clone(&store);
    registry.register(LOAD_STATS_SET, move |payload| {
        let req: InferenceRequest = serde_json::from_slice(&payload)
            .context("unmarshal payload for load stats set")?;
        set_store.set(&req);
        Ok(())
    })?;

    let delete_store = Arc::clone(&store);
    registry.register(LOAD_STATS_DELETE, move |payload| {
        let req: DeletionInferenceRequest = serde_json::from_slice(&payload)
            .context("unmarshal payload for load stats delete")?;
        delete_store.delete_request(&req);
        Ok(())
    })?;

    registry.register(LOAD_PROMPT_DELETE, move |payload| {
        let req: DeletionInferenceRequest = serde_json::from_slice(&payload)
            .context("unmarshal payload for load prompt delete")?;
        store.delete_prompt_length(&req);
        Ok(())
    })?;

    Ok(())
}
