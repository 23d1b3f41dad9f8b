// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Outbound replication fan-out.
//!
//! Every local mutation is marshaled once and POSTed to each discovered
//! peer from an independent task, so one slow peer never blocks another or
//! the originating request. Each peer gets two total attempts; after that
//! the event is dropped and TTL convergence in the store takes over.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;

use crate::config::ReplicaClientConfig;
use crate::discovery::ServiceDiscovery;
use crate::replicator::{EVENT_TYPE_HEADER, REPLICA_EVENT_PATH, TRACE_ID_HEADER};

/// Total attempts per peer: one initial send plus one retry.
const MAX_ATTEMPTS: u32 = 2;

/// Replication client shared by all HTTP handlers.
pub struct Replicator {
    client: reqwest::Client,
    discovery: Arc<dyn ServiceDiscovery>,
    port: u16,
}

impl Replicator {
    pub fn new(
        config: &ReplicaClientConfig,
        discovery: Arc<dyn ServiceDiscovery>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.dial_timeout)
            .timeout(config.request_timeout)
            .tcp_keepalive(config.keepalive)
            .pool_idle_timeout(config.idle_conn_timeout)
            .pool_max_idle_per_host(config.max_idle_conns)
            .build()?;
        Ok(Self {
            client,
            discovery,
            port: config.target_port,
        })
    }

    /// Fan an event out to every peer. Returns as soon as the per-host
    /// tasks are spawned; the tasks outlive the originating request.
    pub fn replicate<T: Serialize>(&self, event_type: &str, trace_id: &str, payload: &T) {
        let hosts = self.discovery.get_peer_hosts();
        if hosts.is_empty() {
            tracing::warn!(event_type, "no available hosts to replicate to");
            return;
        }

        let body = match serde_json::to_vec(payload) {
            Ok(raw) => Bytes::from(raw),
            Err(err) => {
                tracing::error!(event_type, %err, "marshal replication payload failed");
                return;
            }
        };

        tracing::debug!(event_type, ?hosts, "replicating event");
        for host in hosts.iter() {
            let url = format!("http://{host}:{}{REPLICA_EVENT_PATH}", self.port);
            tokio::spawn(send_with_retry(
                self.client.clone(),
                url,
                host.clone(),
                trace_id.to_string(),
                event_type.to_string(),
                body.clone(),
            ));
        }
    }
}

async fn send_with_retry(
    client: reqwest::Client,
    url: String,
    host: String,
    trace_id: String,
    event_type: String,
    body: Bytes,
) {
    let mut last_err = String::new();
    for attempt in 1..=MAX_ATTEMPTS {
        let result = client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(TRACE_ID_HEADER, &trace_id)
            .header(EVENT_TYPE_HEADER, &event_type)
            .body(body.clone())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                // Drain the body so the connection goes back to the pool.
                let response_body = response.bytes().await.unwrap_or_default();
                if status == StatusCode::OK {
                    tracing::debug!(%host, %event_type, attempt, "replication event delivered");
                    return;
                }
                last_err = format!(
                    "peer returned non-200 status {status}, body: {:?}",
                    String::from_utf8_lossy(&response_body)
                );
                tracing::warn!(
                    %host,
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    error = %last_err,
                    "replication attempt failed, retrying"
                );
            }
            Err(err) => {
                last_err = err.to_string();
                tracing::warn!(
                    %host,
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    %err,
                    "replication send failed, retrying"
                );
            }
        }
    }
    tracing::error!(
        %host,
        %event_type,
        attempts = MAX_ATTEMPTS,
        error = %last_err,
        "replication event dropped after final attempt"
    );
}
