// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment-based configuration.
//!
//! Every knob has a sensible default; malformed values fall back to the
//! default with a log line rather than failing startup.

use std::time::Duration;

/// Configuration for the load store and its GC sweeper.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Period of the garbage-collection sweeper.
    pub gc_interval: Duration,
    /// TTL after which requests, engines, and models expire.
    pub request_expire: Duration,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            gc_interval: Duration::from_secs(60),
            request_expire: Duration::from_secs(660),
        }
    }
}

impl LoadConfig {
    /// Create config from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `METAHUB_GC_INTERVAL_SECS`: sweeper period (default: 60)
    /// - `METAHUB_REQUEST_EXPIRE_SECS`: request TTL (default: 660)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gc_interval: duration_secs_env("METAHUB_GC_INTERVAL_SECS", defaults.gc_interval),
            request_expire: duration_secs_env(
                "METAHUB_REQUEST_EXPIRE_SECS",
                defaults.request_expire,
            ),
        }
    }
}

/// Tuning for the replication HTTP client. The defaults bound resource use
/// on a fan-out path that runs for every mutation.
#[derive(Debug, Clone)]
pub struct ReplicaClientConfig {
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
    pub keepalive: Duration,
    pub idle_conn_timeout: Duration,
    pub max_idle_conns: usize,
    /// Port peers listen on for `/v1/replica/event`.
    pub target_port: u16,
}

impl Default for ReplicaClientConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_secs(1),
            keepalive: Duration::from_secs(10),
            idle_conn_timeout: Duration::from_secs(300),
            max_idle_conns: 1024,
            target_port: 80,
        }
    }
}

impl ReplicaClientConfig {
    /// Create config from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `METAHUB_REPLICA_DIAL_TIMEOUT_MS` (default: 500)
    /// - `METAHUB_REPLICA_REQUEST_TIMEOUT_MS` (default: 1000)
    /// - `METAHUB_REPLICA_KEEPALIVE_SECS` (default: 10)
    /// - `METAHUB_REPLICA_IDLE_CONN_TIMEOUT_SECS` (default: 300)
    /// - `METAHUB_REPLICA_MAX_IDLE_CONNS` (default: 1024)
    /// - `METAHUB_REPLICA_TARGET_PORT` (default: 80)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dial_timeout: duration_millis_env(
                "METAHUB_REPLICA_DIAL_TIMEOUT_MS",
                defaults.dial_timeout,
            ),
            request_timeout: duration_millis_env(
                "METAHUB_REPLICA_REQUEST_TIMEOUT_MS",
                defaults.request_timeout,
            ),
            keepalive: duration_secs_env("METAHUB_REPLICA_KEEPALIVE_SECS", defaults.keepalive),
            idle_conn_timeout: duration_secs_env(
                "METAHUB_REPLICA_IDLE_CONN_TIMEOUT_SECS",
                defaults.idle_conn_timeout,
            ),
            max_idle_conns: parsed_env("METAHUB_REPLICA_MAX_IDLE_CONNS", defaults.max_idle_conns),
            target_port: parsed_env("METAHUB_REPLICA_TARGET_PORT", defaults.target_port),
        }
    }
}

/// DNS service-discovery settings.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    /// Domain whose A records list the peer nodes (including self).
    pub domain: String,
    /// Period between lookups.
    pub lookup_interval: Duration,
    /// This node's own IP, excluded from the peer list.
    pub local_ip: String,
}

impl DiscoveryConfig {
    /// Create config from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `METAHUB_DISCOVERY_DOMAIN`: peer DNS name (default: empty, discovery idle)
    /// - `METAHUB_DNS_LOOKUP_INTERVAL_SECS` (default: 5)
    /// - `METAHUB_POD_IP`: local IP excluded from peers (default: empty)
    pub fn from_env() -> Self {
        Self {
            domain: std::env::var("METAHUB_DISCOVERY_DOMAIN").unwrap_or_default(),
            lookup_interval: duration_secs_env(
                "METAHUB_DNS_LOOKUP_INTERVAL_SECS",
                Duration::from_secs(5),
            ),
            local_ip: std::env::var("METAHUB_POD_IP").unwrap_or_default(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub load: LoadConfig,
    pub replica_client: ReplicaClientConfig,
    pub discovery: DiscoveryConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            load: LoadConfig::from_env(),
            replica_client: ReplicaClientConfig::from_env(),
            discovery: DiscoveryConfig::from_env(),
        }
    }
}

fn duration_secs_env(name: &str, default: Duration) -> Duration {
    Duration::from_secs(parsed_env(name, default.as_secs()))
}

fn duration_millis_env(name: &str, default: Duration) -> Duration {
    Duration::from_millis(parsed_env(name, default.as_millis() as u64))
}

fn parsed_env<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(env = name, value = %raw, "invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
