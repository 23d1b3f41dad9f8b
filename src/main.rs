// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use clap::Parser;

use metahub::config::AppConfig;
use metahub::discovery::{DnsDiscovery, ServiceDiscovery, TokioResolver};
use metahub::http::{build_router, AppState};
use metahub::load::store::LoadStore;
use metahub::load::register_load_handlers;
use metahub::logging;
use metahub::metrics::Metrics;
use metahub::replicator::receiver::HandlerRegistry;
use metahub::replicator::sender::Replicator;

#[derive(Parser)]
#[command(name = "metahub", version, about = "Load-metadata aggregator node")]
struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the HTTP server to.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Initial log level (overridable at runtime via POST /log/level).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_handle = logging::init(&cli.log_level)?;

    let config = AppConfig::from_env();
    tracing::info!(?config, "configuration loaded");

    let prom_registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::new());
    metrics.register(&prom_registry)?;
    metrics
        .app_version_info
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1);

    let store = LoadStore::new(config.load.clone(), Arc::clone(&metrics));
    store.spawn_sweeper();

    let discovery = DnsDiscovery::new(
        config.discovery.clone(),
        Arc::new(TokioResolver),
        Arc::clone(&metrics),
    );
    discovery.spawn_lookup_loop();

    let replicator = Arc::new(Replicator::new(
        &config.replica_client,
        Arc::clone(&discovery) as Arc<dyn ServiceDiscovery>,
    )?);

    let registry = Arc::new(HandlerRegistry::new());
    register_load_handlers(&registry, Arc::clone(&store))?;

    let app = build_router(AppState {
        store,
        replicator,
        registry,
        metrics: Arc::clone(&metrics),
        prom_registry,
        log_handle: Some(log_handle),
    });

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    metrics.node_alive.set(1);
    tracing::info!(%addr, "metahub listening");
    axum::serve(listener, app).await?;
    Ok(())
}
