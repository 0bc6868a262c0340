//! MQTT publisher for UI events
//!
//! Publishes every `UiMessage` to `<prefix>/<topic>`:
//! - map, cards, playback - render state (QoS 0, superseded by the next one)
//! - navigation, status - transitions, completion and errors (QoS 1)

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::ui_channel::{UiEvent, UiMessage, UiReceiver};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Delivery guarantee for an event
pub fn qos_for(event: &UiEvent) -> QoS {
    if event.is_priority() {
        QoS::AtLeastOnce
    } else {
        QoS::AtMostOnce
    }
}

/// MQTT publisher actor
///
/// Receives messages from the UI channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: UiReceiver,
    topic_prefix: String,
    metrics: Arc<Metrics>,
}

impl MqttPublisher {
    /// Connects to the broker at the configured MQTT host/port
    pub fn new(config: &Config, rx: UiReceiver, metrics: Arc<Metrics>) -> Self {
        let client_id = format!("tour-guide-ui-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("ui_publisher_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("ui_publisher_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "ui_publisher_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, rx, topic_prefix: config.topic_prefix().to_string(), metrics }
    }

    /// Run until shutdown, then drain what is still queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(prefix = %self.topic_prefix, "ui_publisher_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ui_publisher_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.publish_message(msg).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn publish_message(&self, msg: UiMessage) {
        let topic = format!("{}/{}", self.topic_prefix, msg.topic());
        let qos = qos_for(&msg.event);

        let json = match serde_json::to_vec(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!(topic = %topic, error = %e, "ui_event_serialize_failed");
                return;
            }
        };

        match self.client.publish(&topic, qos, false, json).await {
            Ok(()) => self.metrics.record_ui_event_published(),
            Err(e) => debug!(topic = %topic, error = %e, "ui_event_publish_failed"),
        }
    }
}

/// Stand-in for the publisher when MQTT is disabled: log every event
pub async fn run_log_sink(mut rx: UiReceiver, metrics: Arc<Metrics>) {
    while let Some(msg) = rx.recv().await {
        match serde_json::to_string(&msg) {
            Ok(json) => info!(topic = %msg.topic(), event = %json, "ui_event"),
            Err(e) => error!(error = %e, "ui_event_serialize_failed"),
        }
        metrics.record_ui_event_published();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ui_channel::{create_ui_channel, CardPayload, StatusPayload};

    #[test]
    fn test_qos_by_event() {
        assert_eq!(qos_for(&UiEvent::Cards(CardPayload::show())), QoS::AtMostOnce);
        assert_eq!(qos_for(&UiEvent::Status(StatusPayload::position_acquired())), QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_log_sink_counts_events() {
        let metrics = Arc::new(Metrics::new());
        let (ui, rx) = create_ui_channel(4, metrics.clone());
        ui.send(UiEvent::Cards(CardPayload::hide()));
        ui.send_status(StatusPayload::position_acquired());
        drop(ui);

        run_log_sink(rx, metrics.clone()).await;
        assert_eq!(metrics.snapshot().ui_events_published, 2);
    }
}
