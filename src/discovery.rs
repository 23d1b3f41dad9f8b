// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! DNS-based peer discovery.
//!
//! A configured domain resolves to the set of live nodes (including this
//! one). A background loop re-resolves on a fixed interval, maintains the
//! per-host discovery gauges, and exposes the latest set minus the local IP
//! as an immutable snapshot for the replication sender.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::config::DiscoveryConfig;
use crate::metrics::Metrics;

/// Read side of peer discovery, consumed by the replication sender.
pub trait ServiceDiscovery: Send + Sync {
    /// The most recently resolved peer set, excluding the local host.
    /// Returns a snapshot; callers must not cache it across ticks.
    fn get_peer_hosts(&self) -> Arc<Vec<String>>;
}

/// Name resolution seam, injectable for tests.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, domain: &str) -> anyhow::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system resolver via tokio.
pub struct TokioResolver;

#[async_trait]
impl Resolve for TokioResolver {
    async fn resolve(&self, domain: &str) -> anyhow::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((domain, 0u16)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

struct DiscoveryState {
    /// Every host currently resolved for the domain, local host included.
    node_list: HashSet<String>,
    /// Snapshot handed to callers: node_list minus the local host.
    hosts: Arc<Vec<String>>,
}

/// Periodic DNS discovery with gauge bookkeeping.
pub struct DnsDiscovery {
    config: DiscoveryConfig,
    resolver: Arc<dyn Resolve>,
    metrics: Arc<Metrics>,
    state: RwLock<DiscoveryState>,
}

impl DnsDiscovery {
    pub fn new(
        config: DiscoveryConfig,
        resolver: Arc<dyn Resolve>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        tracing::info!(local_ip = %config.local_ip, domain = %config.domain, "dns discovery created");
        Arc::new(Self {
            config,
            resolver,
            metrics,
            state: RwLock::new(DiscoveryState {
                node_list: HashSet::new(),
                hosts: Arc::new(Vec::new()),
            }),
        })
    }

    /// Spawn the background lookup loop. A panic in a lookup pass is caught
    /// and logged, the loop terminates, and the operator is expected to
    /// restart the node.
    pub fn spawn_lookup_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let discovery = Arc::clone(self);
        tokio::spawn(async move {
            if discovery.config.domain.is_empty() {
                tracing::warn!("discovery domain not configured, lookup loop idle");
                return;
            }
            tracing::info!(
                interval = ?discovery.config.lookup_interval,
                domain = %discovery.config.domain,
                "dns lookup loop started"
            );
            let result = std::panic::AssertUnwindSafe(async {
                let mut ticker = tokio::time::interval(discovery.config.lookup_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    discovery.lookup_once().await;
                }
            })
            .catch_unwind()
            .await;
            if let Err(panic) = result {
                tracing::error!(
                    domain = %discovery.config.domain,
                    panic = crate::panic_message(panic.as_ref()),
                    "dns lookup loop panicked, loop exited"
                );
            }
        })
    }

    /// One resolution pass: diff against the cached node list, update the
    /// per-host gauges, and republish the peer snapshot.
    pub async fn lookup_once(&self) {
        let domain = &self.config.domain;
        let resolved = match self.resolver.resolve(domain).await {
            Ok(addrs) => addrs,
            Err(err) => {
                tracing::error!(%domain, %err, "dns lookup failed, keeping cached hosts");
                return;
            }
        };

        if resolved.is_empty() {
            tracing::error!(%domain, "dns lookup returned empty result, keeping cached hosts");
            return;
        }
        tracing::debug!(%domain, ?resolved, "dns lookup completed");

        let new_hosts: HashSet<String> = resolved.iter().map(|ip| ip.to_string()).collect();

        let mut state = self.state.write();
        let removed: Vec<String> = state
            .node_list
            .iter()
            .filter(|host| !new_hosts.contains(*host))
            .cloned()
            .collect();
        for host in removed {
            state.node_list.remove(&host);
            let _ = self
                .metrics
                .dns_lookup_hosts
                .remove_label_values(&[domain, &host]);
            tracing::info!(%domain, %host, "host removed, metrics deleted");
        }
        for host in &new_hosts {
            if state.node_list.insert(host.clone()) {
                self.metrics
                    .dns_lookup_hosts
                    .with_label_values(&[domain, host])
                    .set(1);
                tracing::info!(%domain, %host, "new host found, metrics added");
            }
        }

        let mut peers: Vec<String> = state
            .node_list
            .iter()
            .filter(|host| **host != self.config.local_ip)
            .cloned()
            .collect();
        peers.sort();
        state.hosts = Arc::new(peers);
    }
}

impl ServiceDiscovery for DnsDiscovery {
    fn get_peer_hosts(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.state.read().hosts)
    }
}

/// Discovery backed by a fixed host list, for deployments with a known peer
/// set and for tests.
pub struct StaticDiscovery {
    hosts: Arc<Vec<String>>,
}

impl StaticDiscovery {
    pub fn new(hosts: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            hosts: Arc::new(hosts),
        })
    }
}

impl ServiceDiscovery for StaticDiscovery {
    fn get_peer_hosts(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Resolver that replays a scripted sequence of results.
    struct ScriptedResolver {
        script: Mutex<Vec<anyhow::Result<Vec<IpAddr>>>>,
    }

    impl ScriptedResolver {
        fn new(script: Vec<anyhow::Result<Vec<IpAddr>>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
            })
        }
    }

    #[async_trait]
    impl Resolve for ScriptedResolver {
        async fn resolve(&self, _domain: &str) -> anyhow::Result<Vec<IpAddr>> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Ok(Vec::new());
            }
            script.remove(0)
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn config(local: &str) -> DiscoveryConfig {
        DiscoveryConfig {
            domain: "metahub.test.local".to_string(),
            lookup_interval: Duration::from_secs(5),
            local_ip: local.to_string(),
        }
    }

    #[tokio::test]
    async fn test_peers_exclude_local_ip() {
        let resolver = ScriptedResolver::new(vec![Ok(vec![ip(1), ip(2), ip(3)])]);
        let discovery = DnsDiscovery::new(config("10.0.0.1"), resolver, Arc::new(Metrics::new()));

        discovery.lookup_once().await;

        let hosts = discovery.get_peer_hosts();
        assert_eq!(*hosts, vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()]);
        assert!(!hosts.contains(&"10.0.0.1".to_string()));
    }

    #[tokio::test]
    async fn test_resolver_error_keeps_cached_hosts() {
        let resolver = ScriptedResolver::new(vec![
            Ok(vec![ip(1), ip(2)]),
            Err(anyhow::anyhow!("SERVFAIL")),
        ]);
        let discovery = DnsDiscovery::new(config("10.0.0.1"), resolver, Arc::new(Metrics::new()));

        discovery.lookup_once().await;
        discovery.lookup_once().await;

        assert_eq!(*discovery.get_peer_hosts(), vec!["10.0.0.2".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_result_keeps_cached_hosts() {
        let resolver = ScriptedResolver::new(vec![Ok(vec![ip(1), ip(2)]), Ok(vec![])]);
        let discovery = DnsDiscovery::new(config("10.0.0.1"), resolver, Arc::new(Metrics::new()));

        discovery.lookup_once().await;
        discovery.lookup_once().await;

        assert_eq!(*discovery.get_peer_hosts(), vec!["10.0.0.2".to_string()]);
    }

    #[tokio::test]
    async fn test_host_churn_updates_gauges() {
        let metrics = Arc::new(Metrics::new());
        let registry = prometheus::Registry::new();
        metrics.register(&registry).unwrap();

        let resolver = ScriptedResolver::new(vec![
            Ok(vec![ip(1), ip(2)]),
            Ok(vec![ip(1), ip(3)]),
        ]);
        let discovery = DnsDiscovery::new(config("10.0.0.1"), resolver, Arc::clone(&metrics));

        discovery.lookup_once().await;
        discovery.lookup_once().await;

        let families = registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "dns_lookup_hosts")
            .unwrap();
        let hosts: Vec<&str> = family
            .get_metric()
            .iter()
            .flat_map(|m| m.get_label())
            .filter(|l| l.get_name() == "host")
            .map(|l| l.get_value())
            .collect();
        assert!(hosts.contains(&"10.0.0.1"));
        assert!(hosts.contains(&"10.0.0.3"));
        assert!(!hosts.contains(&"10.0.0.2"), "removed host still has a gauge");

        assert_eq!(*discovery.get_peer_hosts(), vec!["10.0.0.3".to_string()]);
    }
}
