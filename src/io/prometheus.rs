//! Prometheus metrics HTTP endpoint
//!
//! Exposes tour metrics in Prometheus text format at /metrics, plus /health.
//! Uses hyper for the HTTP server. Values come from `Metrics::snapshot`, so
//! scraping never resets the periodic log report.

use crate::infra::metrics::{Metrics, MetricsSnapshot, METRICS_MEDIA_LOAD_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with route label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, route: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{route=\"{route}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    route: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{route=\"{route}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{route=\"{route}\",le=\"+Inf\"}} {cumulative}");

    let _ = writeln!(output, "{name}_sum{{route=\"{route}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{route=\"{route}\"}} {cumulative}");
}

/// Transitions carry a reason label, so they get one family with three series
fn write_transitions(output: &mut String, route: &str, s: &MetricsSnapshot) {
    let name = "tour_transitions_total";
    let _ = writeln!(output, "# HELP {name} Accepted point transitions by reason");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (reason, val) in [
        ("manual", s.transitions_manual),
        ("geofence", s.transitions_geofence),
        ("auto-advance", s.transitions_auto_advance),
    ] {
        let _ = writeln!(output, "{name}{{route=\"{route}\",reason=\"{reason}\"}} {val}");
    }
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, route: &str) -> String {
    let s = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_metric(&mut output, "tour_events_total", "Events processed by the tour loop", MetricType::Counter, route, s.events_total);
    write_metric(&mut output, "tour_event_queue_depth", "Pending tour events", MetricType::Gauge, route, s.event_queue_depth);

    write_metric(&mut output, "tour_fixes_received_total", "Position fixes received", MetricType::Counter, route, s.fixes_received);
    write_metric(&mut output, "tour_fixes_filtered_total", "Position fixes dropped as stale or invalid", MetricType::Counter, route, s.fixes_filtered);
    write_metric(&mut output, "tour_position_errors_total", "Position source errors", MetricType::Counter, route, s.position_errors);

    write_transitions(&mut output, route, &s);
    write_metric(&mut output, "tour_geofence_suppressed_total", "Geofence candidates refused", MetricType::Counter, route, s.geofence_suppressed);
    write_metric(&mut output, "tour_navigation_ignored_total", "Navigation requests that changed nothing", MetricType::Counter, route, s.navigation_ignored);
    write_metric(&mut output, "tour_completed_total", "Tours played to the last point", MetricType::Counter, route, s.tours_completed);

    write_metric(&mut output, "tour_media_loads_total", "Narration loads resolved", MetricType::Counter, route, s.media_loads);
    write_metric(&mut output, "tour_media_errors_total", "Narration loads that failed", MetricType::Counter, route, s.media_errors);
    write_metric(&mut output, "tour_media_stale_total", "Narration results for superseded transitions", MetricType::Counter, route, s.media_stale);
    write_metric(&mut output, "tour_simulated_playbacks_total", "Points played with simulated narration", MetricType::Counter, route, s.simulated_playbacks);
    write_histogram(
        &mut output,
        "tour_media_load_ms",
        "Narration load time in milliseconds",
        route,
        &s.media_load_buckets,
        &METRICS_MEDIA_LOAD_BOUNDS,
        s.media_load_sum_ms,
    );

    write_metric(&mut output, "tour_ui_events_published_total", "UI events delivered to the transport", MetricType::Counter, route, s.ui_events_published);
    write_metric(&mut output, "tour_ui_events_dropped_total", "UI events dropped on a full channel", MetricType::Counter, route, s.ui_events_dropped);
    write_metric(&mut output, "tour_commands_received_total", "Control commands received", MetricType::Counter, route, s.commands_received);
    write_metric(&mut output, "tour_commands_dropped_total", "Control commands dropped on a full queue", MetricType::Counter, route, s.commands_dropped);

    output
}

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    route: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let reply = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &route),
        ),
        (&Method::GET, "/health") => response(StatusCode::OK, "text/plain", "ok"),
        _ => response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };
    Ok(reply)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    route: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let route = Arc::new(route);

    info!(port = %port, route = %route, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let route = route.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let route = route.clone();
                                async move { handle_request(req, metrics, route).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
