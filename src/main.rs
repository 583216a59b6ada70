//! stocksync - Group stock synchronization for size-letter variants on Shopify
//!
//! Main entry point: a manual-trigger runner for the synchronization engine.
//!
//! # Overview
//!
//! Each line on stdin is one JSON notification, for example
//! `{"variant_id": 1001, "new_quantity": 5}`. Lines are fed through [`Ingress`]
//! as manual triggers; the engine synchronizes the variant's group on Shopify.
//! The HTTP webhook receiver and the operator dashboard live outside this binary.
//!
//! # Execution Flow
//!
//! 1. Initialize logging → logs/stocksync.<date>
//! 2. Create tokio runtime with 4 named worker threads
//! 3. Load `stocksync.yaml` and the persisted activity log
//! 4. Build ShopifyApi → InventoryClient → SyncEngine
//! 5. Spawn the dispatcher over the event channel
//! 6. Feed stdin notifications until EOF
//! 7. Drain in-flight syncs, log a metrics summary, flush the activity log,
//!    shut down with a 5s timeout
//!
//! # Environment
//!
//! - `STOCKSYNC_CONFIG_DIR`, `STOCKSYNC_LOG_DIR`, `STOCKSYNC_DEBUG`
//! - `STOCKSYNC_SHOPIFY__STORE`, `STOCKSYNC_SHOPIFY__ACCESS_TOKEN`, `STOCKSYNC_ENABLED`, ...
//! - `RUST_LOG` overrides the log level

use anyhow::{Context, Result};
use stocksync::services::{RetryPolicy, ShopifyApi};
use stocksync::{
    APP_NAME, ActivityLog, ConfigStore, EnvOverrides, EventSource, Ingress, InventoryClient,
    Metrics, SyncEngine, SyncStateManager, VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_CONFIG_DIR: &str = "stocksync-data";
const DEFAULT_LOG_DIR: &str = "logs";

fn main() -> Result<()> {
    let overrides = EnvOverrides::from_env()?;
    let config_dir = overrides
        .config_dir
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string());
    let log_dir = overrides
        .log_dir
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());
    let debug = overrides.debug.unwrap_or(false);

    let _log_guard =
        stocksync::logging::setup_logging_with_console(&log_dir, "stocksync", debug, true)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("stocksync-worker")
        .build()?;

    tracing::info!("Tokio runtime initialized with {} worker threads", 4);

    let store = Arc::new(ConfigStore::open(&config_dir, overrides)?);
    let config = store.snapshot();
    if !config.has_credentials() {
        tracing::warn!("Shopify store or access token not configured; syncs will fail until set");
    }
    if !config.enabled {
        tracing::warn!("Synchronization is disabled; events will be skipped");
    }

    let activity = Arc::new(ActivityLog::persistent(
        store.clone(),
        config.sync.log_capacity,
    )?);
    let metrics = Arc::new(Metrics::new());
    let state = SyncStateManager::new();

    let api = ShopifyApi::new(store.clone()).context("Failed to build Shopify client")?;
    let client = InventoryClient::new(
        Arc::new(api),
        RetryPolicy::from_tuning(&config.sync),
        metrics.clone(),
    );
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        client,
        activity.clone(),
        state,
        metrics.clone(),
    ));

    let (ingress, events) =
        Ingress::channel(config.sync.channel_capacity, activity.clone(), metrics.clone());

    let result = runtime.block_on(async {
        let dispatcher = Arc::clone(&engine).spawn_dispatcher(events);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let ack = ingress.submit_json(line, EventSource::Manual);
            tracing::debug!("Notification acknowledged: {:?}", ack);
        }

        tracing::info!("Input closed, draining pending syncs");
        drop(ingress);
        dispatcher.await.context("Dispatcher task failed")?;
        Ok::<(), anyhow::Error>(())
    });

    metrics.log_summary();
    activity.flush();
    tracing::info!("{} activity entries kept", activity.len());

    runtime.shutdown_timeout(Duration::from_secs(5));

    tracing::info!("Application shutdown complete");

    result
}
