//! MQTT client for receiving tour commands
//!
//! Subscribes to `<prefix>/control`. Each publish carries one JSON command:
//!
//! ```text
//! {"cmd": "navigate", "index": 2}
//! {"cmd": "rewind"}
//! ```

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::tour::{TourCommand, TourEvent};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Parse one control payload
pub fn parse_command(payload: &[u8]) -> Option<TourCommand> {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "control_payload_not_utf8");
            return None;
        }
    };

    match serde_json::from_str::<TourCommand>(text) {
        Ok(cmd) => Some(cmd),
        Err(e) => {
            debug!(payload = %text, error = %e, "control_payload_invalid");
            None
        }
    }
}

/// Start the MQTT control client and forward commands to the tour loop
///
/// Commands are sent via try_send so a stalled loop never blocks the MQTT
/// eventloop. Dropped commands are counted and logged (rate-limited).
pub async fn start_control_client(
    config: &Config,
    event_tx: mpsc::Sender<TourEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("tour-guide-control-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let topic = config.topic("control");
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(&topic, QoS::AtLeastOnce).await?;

    info!(topic = %topic, host = %config.mqtt_host(), port = %config.mqtt_port(), "control_subscribed");

    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("control_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(cmd) = parse_command(&publish.payload) else {
                            continue;
                        };
                        metrics.record_command_received();
                        debug!(cmd = %cmd.as_str(), "control_command");

                        match event_tx.try_send(TourEvent::Command(cmd)) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                metrics.record_command_dropped();
                                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                    warn!(cmd = %cmd.as_str(), "control_command_dropped");
                                    last_drop_warn = Instant::now();
                                }
                            }
                            Err(TrySendError::Closed(_)) => {
                                warn!("tour_event_channel_closed");
                                return Ok(());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("control_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "control_mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
