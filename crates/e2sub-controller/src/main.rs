// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! e2sub Controller - standalone process
//!
//! Runs the subscription controller against the configured stores until
//! interrupted. Pod-backed endpoint garbage collection needs a pod
//! inventory and is only available when embedding [`E2SubRuntime`].

use tracing::{info, warn};

use e2sub_controller::config::Config;
use e2sub_controller::runtime::E2SubRuntime;
use e2sub_store::Stores;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "e2sub_controller=info,e2sub_store=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        pod_namespace = %config.pod_namespace,
        workers = config.workers,
        reconcile_timeout_secs = config.reconcile_timeout.as_secs(),
        "Starting e2sub controller"
    );

    let stores = match &config.database_url {
        Some(url) => Stores::connect(url).await?,
        None => {
            info!("E2SUB_DATABASE_URL not set; using in-memory stores");
            Stores::in_memory()
        }
    };

    let runtime = E2SubRuntime::builder()
        .stores(stores.clone())
        .pod_namespace(&config.pod_namespace)
        .controller_config(config.controller_config())
        .build()?
        .start()
        .await?;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;
    stores.close().await;

    info!("e2sub controller shut down");

    Ok(())
}
