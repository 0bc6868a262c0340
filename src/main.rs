//! tour-guide - geofenced audio tour controller
//!
//! Loads one route from the catalog and runs a tour session over it:
//! position fixes arrive on a TCP feed, user intents on MQTT, and render
//! events go back out on MQTT (or the log when MQTT is disabled).
//!
//! Module structure:
//! - `domain/` - Route, point, fix and session types
//! - `io/` - External interfaces (catalog, media, position feed, MQTT, Prometheus)
//! - `services/` - Tour logic (geofence, navigation, playback, position watch, loop)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tour_guide::domain::RouteId;
use tour_guide::infra::{CatalogMode, Config, MediaMode, Metrics};
use tour_guide::io::mqtt_egress::run_log_sink;
use tour_guide::io::{
    create_ui_channel, start_position_feed, Catalog, FileCatalog, HttpCatalog, HttpMediaBackend, MediaBackend,
    MqttPublisher, OfflineMediaBackend, PositionFeedConfig, StatusPayload,
};
use tour_guide::services::position_tracker::{PositionProvider, SourceItem};
use tour_guide::services::{TourRunner, TourSettings};
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofenced audio tour controller
#[derive(Parser, Debug)]
#[command(name = "tour-guide", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Route to load, overriding `[tour] route_id`
    #[arg(short, long)]
    route: Option<String>,
}

const POSITION_FEED_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides; default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git = %env!("GIT_HASH"), "tour-guide starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let mut config = Config::load_from_path(&config_path);
    if let Some(route) = args.route {
        config = config.with_route_id(route);
    }

    info!(
        config_file = %config.config_file(),
        route_id = %config.route_id(),
        catalog_mode = ?config.catalog_mode(),
        media_mode = ?config.media_mode(),
        mqtt_enabled = %config.mqtt_enabled(),
        mqtt_host = %config.mqtt_host(),
        topic_prefix = %config.topic_prefix(),
        feed_port = %config.position_feed_port(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // UI events: MQTT publisher, or the log when MQTT is off
    let (ui, ui_rx) = create_ui_channel(config.ui_buffer(), metrics.clone());
    let ui_task = if config.mqtt_enabled() {
        let publisher = MqttPublisher::new(&config, ui_rx, metrics.clone());
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        })
    } else {
        let sink_metrics = metrics.clone();
        tokio::spawn(async move {
            run_log_sink(ui_rx, sink_metrics).await;
        })
    };

    let route_id = RouteId(config.route_id().to_string());
    let route = match fetch_route(&config, &route_id).await {
        Ok(route) => route,
        Err(e) => {
            error!(route_id = %route_id, error = %format!("{e:#}"), "route_fetch_failed");
            ui.send_status(StatusPayload::catalog_unavailable(format!("{e:#}")));
            return finish(shutdown_tx, ui, ui_task, Err(e)).await;
        }
    };

    let media: Arc<dyn MediaBackend> = match config.media_mode() {
        MediaMode::Http => Arc::new(
            HttpMediaBackend::new(config.media_base_url(), Duration::from_millis(config.media_load_timeout_ms()))
                .context("Failed to build media client")?,
        ),
        MediaMode::Offline => Arc::new(OfflineMediaBackend),
    };

    // Position feed: every watch subscribes to the broadcast
    let (feed_tx, _) = broadcast::channel::<SourceItem>(POSITION_FEED_CAPACITY);
    let feed_config = PositionFeedConfig {
        port: config.position_feed_port(),
        enabled: config.position_feed_enabled(),
    };
    let positions: Option<Arc<dyn PositionProvider>> =
        if feed_config.enabled { Some(Arc::new(feed_tx.clone())) } else { None };
    let feed_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_position_feed(feed_config, feed_tx, feed_shutdown).await {
            error!(error = %e, "position_feed_error");
        }
    });

    // Control commands (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(config.command_buffer());

    if config.mqtt_enabled() {
        let control_config = config.clone();
        let control_tx = event_tx.clone();
        let control_metrics = metrics.clone();
        let control_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = tour_guide::io::mqtt::start_control_client(
                &control_config,
                control_tx,
                control_metrics,
                control_shutdown,
            )
            .await
            {
                error!(error = %e, "control_client_error");
            }
        });
    }

    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_route = route_id.0.clone();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                tour_guide::io::prometheus::start_metrics_server(prometheus_port, prom_metrics, prom_route, prom_shutdown)
                    .await
            {
                error!(error = %e, "prometheus_server_error");
            }
        });
    }

    // Periodic report to the log
    let report_metrics = metrics.clone();
    let report_interval = Duration::from_secs(config.metrics_interval_secs());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(report_interval);
        loop {
            interval.tick().await;
            report_metrics.report().log();
        }
    });

    // Queue depth sampler; holds a weak sender so it never keeps the loop alive
    let depth_metrics = metrics.clone();
    let depth_tx = event_tx.downgrade();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(500));
        loop {
            interval.tick().await;
            let Some(tx) = depth_tx.upgrade() else {
                break;
            };
            let depth = tx.max_capacity() - tx.capacity();
            depth_metrics.set_event_queue_depth(depth as u64);
        }
    });

    let settings = TourSettings::from_config(&config);
    let mut runner = match TourRunner::new(route, settings, media, positions, ui.clone(), metrics) {
        Ok(runner) => runner,
        Err(e) => {
            error!(route_id = %route_id, error = %e, "tour_rejected");
            return finish(shutdown_tx, ui, ui_task, Err(e.into())).await;
        }
    };
    info!(route_id = %route_id, "tour_started");

    let runner_task = tokio::spawn(async move {
        runner.run(event_rx).await;
    });

    // Ctrl+C: stop the inputs, then let the runner see its channel close
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);
    drop(event_tx);
    if let Err(e) = runner_task.await {
        error!(error = %e, "tour_runner_panicked");
    }

    finish(shutdown_tx, ui, ui_task, Ok(())).await
}

async fn fetch_route(config: &Config, route_id: &RouteId) -> anyhow::Result<tour_guide::domain::Route> {
    let timeout = Duration::from_millis(config.catalog_timeout_ms());
    let catalog: Box<dyn Catalog> = match config.catalog_mode() {
        CatalogMode::File => Box::new(FileCatalog::new(config.catalog_file())),
        CatalogMode::Http => Box::new(
            HttpCatalog::new(config.catalog_endpoints().to_vec(), timeout).context("Failed to build catalog client")?,
        ),
    };

    let route = catalog
        .fetch_route(route_id)
        .await
        .with_context(|| format!("Failed to fetch route {route_id}"))?;
    info!(route_id = %route.id, points = %route.points.len(), "route_fetched");
    Ok(route)
}

/// Signal shutdown and let the UI publisher drain before exiting
async fn finish(
    shutdown_tx: watch::Sender<bool>,
    ui: tour_guide::io::UiSender,
    ui_task: tokio::task::JoinHandle<()>,
    result: anyhow::Result<()>,
) -> anyhow::Result<()> {
    let _ = shutdown_tx.send(true);
    drop(ui);
    let _ = tokio::time::timeout(Duration::from_secs(2), ui_task).await;
    info!("tour-guide shutdown complete");
    result
}
