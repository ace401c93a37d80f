//! Spacewatch - office space analytics from person detections
//!
//! Consumes per-frame detection batches over MQTT, maintains zone residency
//! for every detected person, and publishes hours, utilization, heatmap and
//! anomaly snapshots.
//!
//! Module structure:
//! - `domain/` - Core types (detections, intervals, anomalies, snapshots)
//! - `io/` - External interfaces (MQTT ingest, publishers, HTTP API)
//! - `services/` - Analytics (ZoneMap, ResidencyTracker, MetricsAggregator, AnomalyDetector, engine)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use anyhow::Context;
use clap::Parser;
use spacewatch::infra::{Config, Metrics};
use spacewatch::io::{
    create_snapshot_channel, start_api_server, ApiState, MqttPublisher, SnapshotEgress,
    SnapshotPublisher,
};
use spacewatch::services::{AnalyticsEngine, ZoneMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Spacewatch - office space analytics
#[derive(Parser, Debug)]
#[command(name = "spacewatch", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-cycle visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("spacewatch starting");

    let args = Args::parse();

    // Zones and thresholds are mandatory; a bad file is fatal
    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;
    let zone_map = Arc::new(ZoneMap::from_config(config.zones())?);

    spacewatch::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        zones = %zone_map.len(),
        idle_threshold_seconds = %config.idle_threshold_seconds(),
        movement = ?config.movement_policy(),
        unauthorized_policy = ?config.unauthorized_policy(),
        api_port = %config.api_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Bounded for backpressure; ingest drops batches when the engine falls behind
    let (batch_tx, batch_rx) = mpsc::channel(config.queue_capacity());
    let (snapshot_tx, snapshot_rx) = create_snapshot_channel(config.site_id());

    // Start MQTT ingest
    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            spacewatch::io::mqtt::start_mqtt_client(&mqtt_config, batch_tx, mqtt_metrics, mqtt_shutdown)
                .await
        {
            tracing::error!(error = %e, "mqtt_client_error");
        }
    });

    // Start snapshot publisher
    let mut publisher = SnapshotPublisher::new(
        snapshot_rx.clone(),
        Duration::from_secs(config.publish_interval_secs().max(1)),
    );
    if !config.publish_file().is_empty() {
        publisher = publisher.with_egress(SnapshotEgress::new(config.publish_file()));
    }
    if config.publish_mqtt_enabled() {
        publisher = publisher.with_mqtt(MqttPublisher::new(&config));
    }
    let publisher_handle = tokio::spawn(publisher.run(shutdown_rx.clone()));

    // Start HTTP API (if port > 0)
    let api_port = config.api_port();
    if api_port > 0 {
        let state = ApiState {
            site_id: config.site_id().to_string(),
            snapshots: snapshot_rx,
            zone_map: zone_map.clone(),
            metrics: metrics.clone(),
        };
        let api_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_api_server(api_port, state, api_shutdown).await {
                tracing::error!(error = %e, "api_server_error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run engine - consumes batches until shutdown or ingest exits
    let engine = AnalyticsEngine::new(&config, zone_map, metrics);
    engine.run(batch_rx, snapshot_tx, shutdown_rx).await;

    // Let the publisher flush its final snapshot
    let _ = tokio::time::timeout(Duration::from_secs(2), publisher_handle).await;

    info!("spacewatch shutdown complete");
    Ok(())
}
