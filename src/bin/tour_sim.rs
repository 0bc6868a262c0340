//! Tour walker - drives the position feed along a route
//!
//! Loads the same route the controller loads, walks it point to point at a
//! fixed speed and writes one JSON fix per tick to the position feed.
//!
//! Usage:
//!   cargo run --bin tour-sim -- --config config/dev.toml
//!   cargo run --bin tour-sim -- --speed 5 --dwell-secs 20
//!   cargo run --bin tour-sim -- --error permission_denied

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tour_guide::domain::session::epoch_ms;
use tour_guide::domain::{Coordinate, RouteId};
use tour_guide::infra::{CatalogMode, Config};
use tour_guide::io::{Catalog, FileCatalog, HttpCatalog};
use tour_guide::services::geofence::distance_m;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tour-sim")]
#[command(about = "Walk a tour route and feed positions to tour-guide")]
struct Args {
    /// Config file path (for the catalog and feed port)
    #[arg(short, long)]
    config: Option<String>,

    /// Route to walk, overriding `[tour] route_id`
    #[arg(short, long)]
    route: Option<String>,

    /// Position feed host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Walking speed in m/s
    #[arg(long, default_value = "1.4")]
    speed: f64,

    /// Time between fixes in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Time spent standing at each point
    #[arg(long, default_value = "0")]
    dwell_secs: u64,

    /// Reported accuracy radius in meters
    #[arg(long, default_value = "8.0")]
    accuracy: f64,

    /// Send a single position error (permission_denied, unavailable, timeout) and exit
    #[arg(long)]
    error: Option<String>,
}

/// Points along the polyline through `stops`, at most `step_m` apart.
/// Every stop is included exactly once.
fn walk_path(stops: &[Coordinate], step_m: f64) -> Vec<Coordinate> {
    let Some(first) = stops.first() else {
        return Vec::new();
    };
    let mut path = vec![*first];

    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let steps = if step_m > 0.0 { (distance_m(a, b) / step_m).ceil().max(1.0) as usize } else { 1 };
        for i in 1..steps {
            let t = i as f64 / steps as f64;
            path.push(Coordinate::new(a.lat + (b.lat - a.lat) * t, a.lng + (b.lng - a.lng) * t));
        }
        path.push(b);
    }
    path
}

async fn send_line(stream: &mut TcpStream, line: serde_json::Value) -> anyhow::Result<()> {
    let mut bytes = serde_json::to_vec(&line)?;
    bytes.push(b'\n');
    stream.write_all(&bytes).await.context("Position feed write failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_timer(UtcTime::rfc_3339()).with_target(false).init();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let mut config = Config::load_from_path(&config_path);
    if let Some(route) = args.route {
        config = config.with_route_id(route);
    }

    let addr = format!("{}:{}", args.host, config.position_feed_port());
    let mut stream = TcpStream::connect(&addr).await.with_context(|| format!("Failed to connect to {addr}"))?;
    info!(addr = %addr, "feed_connected");

    if let Some(error) = args.error {
        send_line(&mut stream, json!({ "error": error })).await?;
        info!(error = %error, "position_error_sent");
        return Ok(());
    }

    let route_id = RouteId(config.route_id().to_string());
    let catalog: Box<dyn Catalog> = match config.catalog_mode() {
        CatalogMode::File => Box::new(FileCatalog::new(config.catalog_file())),
        CatalogMode::Http => Box::new(HttpCatalog::new(
            config.catalog_endpoints().to_vec(),
            Duration::from_millis(config.catalog_timeout_ms()),
        )?),
    };
    let route = catalog.fetch_route(&route_id).await?;

    let stops: Vec<Coordinate> = route.points.iter().map(|p| p.coordinates).collect();
    let interval = Duration::from_millis(args.interval_ms.max(1));
    let step_m = args.speed * interval.as_secs_f64();
    let dwell_ticks = (args.dwell_secs * 1000 / interval.as_millis().max(1) as u64) as usize;

    info!(route_id = %route.id, points = %stops.len(), step_m = format!("{step_m:.1}"), "walk_started");

    let mut ticker = tokio::time::interval(interval);
    for coord in walk_path(&stops, step_m) {
        let at_stop = stops.iter().position(|s| *s == coord);
        let repeats = if at_stop.is_some() { 1 + dwell_ticks } else { 1 };

        for _ in 0..repeats {
            ticker.tick().await;
            let fix = json!({
                "lat": coord.lat,
                "lng": coord.lng,
                "accuracy_m": args.accuracy,
                "ts": epoch_ms(),
            });
            send_line(&mut stream, fix).await?;
        }

        if let Some(index) = at_stop {
            info!(index = %index, point = %route.points[index].name, "stop_reached");
        }
    }

    info!("walk_finished");
    Ok(())
}
