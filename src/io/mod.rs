//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `catalog` - Route catalog (HTTP endpoint list or JSON file)
//! - `media` - Narration loading and playback handles
//! - `position_feed` - TCP JSON-lines listener for location fixes
//! - `ui_channel` - Typed channel for render and status events
//! - `mqtt` - MQTT client receiving tour commands
//! - `mqtt_egress` - MQTT publisher for UI events
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod catalog;
pub mod media;
pub mod mqtt;
pub mod mqtt_egress;
pub mod position_feed;
pub mod prometheus;
pub mod ui_channel;

// Re-export commonly used types
pub use catalog::{Catalog, FileCatalog, HttpCatalog};
pub use media::{HttpMediaBackend, MediaBackend, MediaHandle, OfflineMediaBackend};
pub use mqtt_egress::MqttPublisher;
pub use position_feed::{start_position_feed, PositionFeedConfig};
pub use ui_channel::{create_ui_channel, StatusPayload, UiEvent, UiMessage, UiReceiver, UiSender};
