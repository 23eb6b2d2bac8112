//! Zenoh bridge for HDMI-CEC.
//!
//! Tracks the active source and the power state of every device on the bus
//! and publishes them to Zenoh, accepting power commands in return.

use std::sync::Arc;

use anyhow::{Context, Result};
use cecsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};

use zenoh_bridge_cec::config::CecBridgeConfig;
use zenoh_bridge_cec::device::{DEVICE_STORE_FILE, DeviceStore};
use zenoh_bridge_cec::{CecBridge, Settings, open_bus};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = BridgeArgs::parse_with_default("cec.json5");

    // Load configuration using the framework's BridgeConfig trait
    let config = CecBridgeConfig::load(&args.config).map_err(|e| anyhow::anyhow!("{}", e))?;

    // Logging, Zenoh session and liveliness token
    let runner = BridgeRunner::new_with_args("cec", config, Some(&args))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    // Bridge status plus the optional plain-text availability topic
    let availability = runner.config().status.availability();
    let mut runner = runner.with_status_publishing(availability);

    // Device identities
    let store_path = runner.config().cec.data_dir.join(DEVICE_STORE_FILE);
    let store = DeviceStore::load(&store_path)
        .with_context(|| format!("Failed to load device store {}", store_path.display()))?;
    tracing::info!(
        path = %store_path.display(),
        records = store.len(),
        "Device store loaded"
    );

    // Bus adapter
    let (bus, messages) =
        open_bus(&runner.config().cec.adapter).context("Failed to open CEC bus")?;

    // Registry, discovery, active source and power bridges, in that order
    let settings = Settings::from_config(runner.config());
    let cancel = runner.cancellation_token();
    let bridge = Arc::new(CecBridge::build(
        bus,
        runner.sink(),
        store,
        settings,
        &cancel,
    ));

    let resolved = bridge.scan();
    tracing::info!(
        "CEC bridge running (base: {}, devices: {})",
        runner.config().cec.base_topic,
        resolved
    );

    // Frames from the bus
    runner.spawn(bridge.clone().pump(messages, cancel.clone()));

    if let Some(interval) = runner.config().cec.rescan_interval() {
        runner.spawn(bridge.clone().rescan(interval, cancel.clone()));
    }

    let saver = bridge.clone();
    runner.on_shutdown("save device store", move || {
        if let Err(e) = saver.save() {
            tracing::error!(error = %e, "Failed to save device store");
        }
    });

    // Build status metadata
    let metadata = serde_json::json!({
        "base_topic": runner.config().cec.base_topic,
        "devices": resolved,
        "records": bridge.registry().record_count(),
        "home_assistant": runner.config().home_assistant.enable,
    });

    // Run until Ctrl+C or SIGTERM (handles shutdown gracefully)
    runner
        .run_with_metadata(Some(metadata))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}
