//! TCP position feed
//!
//! Accepts connections from a location provider (a phone bridge, a GPS
//! daemon, `tour-sim`) and reads one JSON object per line:
//!
//! ```text
//! {"lat": 48.137, "lng": 11.575, "accuracy_m": 8.0, "ts": 1718000000000}
//! {"error": "permission_denied"}
//! ```
//!
//! `ts` is epoch milliseconds or an RFC 3339 string (as gpsd reports it).
//! `ts` and `accuracy_m` are optional; a missing `ts` is stamped on receipt.
//! Parsed items are broadcast to every open position watch.

use crate::domain::error::PositionError;
use crate::domain::session::epoch_ms;
use crate::domain::types::PositionFix;
use crate::services::position_tracker::SourceItem;
use serde::Deserialize;
use std::net::SocketAddr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Position feed configuration
#[derive(Debug, Clone)]
pub struct PositionFeedConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for PositionFeedConfig {
    fn default() -> Self {
        Self { port: 7878, enabled: true }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedTs {
    Millis(u64),
    Rfc3339(String),
}

impl FeedTs {
    fn to_epoch_ms(&self) -> Option<u64> {
        match self {
            FeedTs::Millis(ms) => Some(*ms),
            FeedTs::Rfc3339(text) => {
                let parsed = OffsetDateTime::parse(text, &Rfc3339).ok()?;
                u64::try_from(parsed.unix_timestamp_nanos() / 1_000_000).ok()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedLine {
    Error {
        error: PositionError,
    },
    Fix {
        lat: f64,
        lng: f64,
        #[serde(default)]
        accuracy_m: f64,
        #[serde(default)]
        ts: Option<FeedTs>,
    },
}

/// Parse one feed line. `None` for blank or malformed lines.
pub fn parse_feed_line(line: &str, now_ms: u64) -> Option<SourceItem> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<FeedLine>(line) {
        Ok(FeedLine::Error { error }) => Some(Err(error)),
        Ok(FeedLine::Fix { lat, lng, accuracy_m, ts }) => {
            let ts = match ts {
                None => now_ms,
                Some(ts) => match ts.to_epoch_ms() {
                    Some(ms) => ms,
                    None => {
                        debug!(line = %line, "position_feed_bad_timestamp");
                        return None;
                    }
                },
            };
            Some(Ok(PositionFix::new(lat, lng, accuracy_m, ts)))
        }
        Err(e) => {
            debug!(line = %line, error = %e, "position_feed_bad_line");
            None
        }
    }
}

/// Start the position feed listener
///
/// Items are broadcast without blocking; with no watch open they are discarded.
pub async fn start_position_feed(
    config: PositionFeedConfig,
    feed_tx: broadcast::Sender<SourceItem>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.enabled {
        info!("position_feed_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(port = %config.port, "position_feed_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("position_feed_shutdown");
                    return Ok(());
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let tx = feed_tx.clone();
                        tokio::spawn(async move {
                            handle_feed_connection(socket, addr, tx).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "position_feed_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_feed_connection(
    socket: tokio::net::TcpStream,
    addr: SocketAddr,
    feed_tx: broadcast::Sender<SourceItem>,
) {
    let peer = addr.to_string();
    info!(peer = %peer, "position_feed_connected");

    let mut lines = BufReader::new(socket).lines();
    let mut delivered = 0u64;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(item) = parse_feed_line(&line, epoch_ms()) else {
                    continue;
                };
                if feed_tx.send(item).is_ok() {
                    delivered += 1;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(peer = %peer, error = %e, "position_feed_read_error");
                break;
            }
        }
    }

    info!(peer = %peer, delivered = %delivered, "position_feed_disconnected");
}
