//! Typed channel for render and status events
//!
//! The tour loop never blocks on its outputs: events go through bounded mpsc
//! channels with `try_send` and are dropped (and counted) when full.
//! Route, navigation, completion and status events travel on a separate
//! priority lane, so a burst of render updates cannot crowd them out. The
//! receiver drains the priority lane first; order is kept within a lane only.
//! Every event is stamped with the session id and a timestamp on the way out.

use crate::domain::error::{MediaError, PositionError, SessionError};
use crate::domain::session::epoch_ms;
use crate::domain::types::{format_mmss, Point, PointId, PositionFix, Route, RouteId};
use crate::infra::metrics::Metrics;
use crate::services::navigator::{Direction, NavReason, Transition};
use crate::services::playback::{PlaybackState, Progress};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::debug;

/// Capacity of the priority lane
pub const PRIORITY_LANE_SIZE: usize = 128;

/// One event for the map, card, playback or status surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum UiEvent {
    /// Full route for the initial map draw
    Route(RoutePayload),
    Map(MapPayload),
    Navigation(NavigationPayload),
    Cards(CardPayload),
    Playback(PlaybackState),
    Progress(ProgressPayload),
    Status(StatusPayload),
    TourCompleted(CompletionPayload),
}

impl UiEvent {
    /// Topic suffix under the configured prefix
    pub fn topic(&self) -> &'static str {
        match self {
            UiEvent::Route(_) | UiEvent::Map(_) => "map",
            UiEvent::Navigation(_) | UiEvent::TourCompleted(_) => "navigation",
            UiEvent::Cards(_) => "cards",
            UiEvent::Playback(_) | UiEvent::Progress(_) => "playback",
            UiEvent::Status(_) => "status",
        }
    }

    /// Events that must reach the client: they go on the priority lane and
    /// are published with QoS 1
    pub fn is_priority(&self) -> bool {
        matches!(
            self,
            UiEvent::Route(_) | UiEvent::Navigation(_) | UiEvent::TourCompleted(_) | UiEvent::Status(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePoint {
    pub id: PointId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePayload {
    pub route_id: RouteId,
    pub name: String,
    /// In route order; consecutive points form the polyline
    pub points: Vec<RoutePoint>,
}

impl RoutePayload {
    pub fn from_route(route: &Route) -> Self {
        Self {
            route_id: route.id.clone(),
            name: route.name.clone(),
            points: route
                .points
                .iter()
                .map(|p| RoutePoint {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    lat: p.coordinates.lat,
                    lng: p.coordinates.lng,
                    radius_m: p.activation_radius,
                    kind: p.kind.clone(),
                })
                .collect(),
        }
    }
}

/// Marker state: active point, visited points, user position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapPayload {
    pub active_index: Option<usize>,
    pub visited: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_position: Option<PositionFix>,
}

/// An accepted transition together with the card content of its point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationPayload {
    pub seq: u64,
    pub previous: Option<usize>,
    pub index: usize,
    pub reason: NavReason,
    pub direction: Direction,
    pub point_id: PointId,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tips: Option<String>,
}

impl NavigationPayload {
    pub fn new(transition: &Transition, point: &Point) -> Self {
        Self {
            seq: transition.seq,
            previous: transition.previous,
            index: transition.index,
            reason: transition.reason,
            direction: transition.direction(),
            point_id: point.id.clone(),
            name: point.name.clone(),
            description: point.description.clone(),
            tips: point.tips.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardAction {
    Show,
    Hide,
    Focus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CardPayload {
    pub action: CardAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl CardPayload {
    pub fn show() -> Self {
        Self { action: CardAction::Show, index: None }
    }

    pub fn hide() -> Self {
        Self { action: CardAction::Hide, index: None }
    }

    pub fn focus(index: usize) -> Self {
        Self { action: CardAction::Focus, index: Some(index) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressPayload {
    pub position_secs: f64,
    pub duration_secs: f64,
    pub percent: f64,
    /// `m:ss`
    pub elapsed: String,
    /// `m:ss`
    pub total: String,
}

impl From<Progress> for ProgressPayload {
    fn from(p: Progress) -> Self {
        Self {
            position_secs: p.position_secs,
            duration_secs: p.duration_secs,
            percent: p.percent,
            elapsed: format_mmss(p.position_secs),
            total: format_mmss(p.duration_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    InvalidRoute,
    CatalogUnavailable,
    /// Narration failed; `code` says whether simulation took over
    MediaError,
    PositionError,
    PositionAcquired,
}

/// The single channel for user-visible runtime errors and recoveries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPayload {
    pub level: StatusLevel,
    pub kind: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl StatusPayload {
    pub fn invalid_route(err: &SessionError) -> Self {
        Self {
            level: StatusLevel::Error,
            kind: StatusKind::InvalidRoute,
            code: None,
            message: err.to_string(),
        }
    }

    pub fn catalog_unavailable(message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Error,
            kind: StatusKind::CatalogUnavailable,
            code: None,
            message: message.into(),
        }
    }

    pub fn media_error(point: &PointId, err: &MediaError, simulated: bool) -> Self {
        Self {
            level: StatusLevel::Warn,
            kind: StatusKind::MediaError,
            code: Some(if simulated { "simulated" } else { "stopped" }.to_string()),
            message: format!("{point}: {err}"),
        }
    }

    pub fn position_error(err: PositionError) -> Self {
        let level = if err.is_terminal() { StatusLevel::Error } else { StatusLevel::Warn };
        Self {
            level,
            kind: StatusKind::PositionError,
            code: Some(err.as_str().to_string()),
            message: err.to_string(),
        }
    }

    pub fn position_acquired() -> Self {
        Self {
            level: StatusLevel::Info,
            kind: StatusKind::PositionAcquired,
            code: None,
            message: "location acquired".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionPayload {
    pub route_id: RouteId,
    pub visited: usize,
    pub total: usize,
}

/// Envelope actually put on the wire
#[derive(Debug, Clone, Serialize)]
pub struct UiMessage {
    pub session: String,
    pub ts: u64,
    #[serde(flatten)]
    pub event: UiEvent,
}

impl UiMessage {
    pub fn topic(&self) -> &'static str {
        self.event.topic()
    }
}

/// Sender handle for UI events
///
/// Clone this to share across multiple producers.
/// Non-blocking - if a lane is full, events are dropped.
#[derive(Clone)]
pub struct UiSender {
    tx: mpsc::Sender<UiMessage>,
    priority_tx: mpsc::Sender<UiMessage>,
    session_id: String,
    metrics: Arc<Metrics>,
}

impl UiSender {

    /// Copy of this sender that stamps events with `session_id`
    pub fn for_session(&self, session_id: &str) -> Self {
        Self {
            tx: self.tx.clone(),
            priority_tx: self.priority_tx.clone(),
            session_id: session_id.to_string(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn send(&self, event: UiEvent) {
        let lane = if event.is_priority() { &self.priority_tx } else { &self.tx };
        let msg = UiMessage { session: self.session_id.clone(), ts: epoch_ms(), event };
        match lane.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                self.metrics.record_ui_event_dropped();
                debug!(topic = %msg.topic(), "ui_event_dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub fn send_status(&self, status: StatusPayload) {
        self.send(UiEvent::Status(status));
    }
}

/// Receiving end of both lanes
pub struct UiReceiver {
    rx: mpsc::Receiver<UiMessage>,
    priority_rx: mpsc::Receiver<UiMessage>,
}

impl UiReceiver {
    /// Next message, priority lane first. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<UiMessage> {
        tokio::select! {
            biased;
            Some(msg) = self.priority_rx.recv() => Some(msg),
            Some(msg) = self.rx.recv() => Some(msg),
            else => None,
        }
    }

    pub fn try_recv(&mut self) -> Result<UiMessage, TryRecvError> {
        self.priority_rx.try_recv().or_else(|_| self.rx.try_recv())
    }
}

/// Create a new UI channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// `buffer_size` bounds the render lane; the priority lane holds
/// `PRIORITY_LANE_SIZE` messages.
pub fn create_ui_channel(buffer_size: usize, metrics: Arc<Metrics>) -> (UiSender, UiReceiver) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let (priority_tx, priority_rx) = mpsc::channel(PRIORITY_LANE_SIZE);
    let sender = UiSender { tx, priority_tx, session_id: String::new(), metrics };
    (sender, UiReceiver { rx, priority_rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_flat_with_tag() {
        let msg = UiMessage {
            session: "s1".to_string(),
            ts: 42,
            event: UiEvent::Cards(CardPayload::focus(2)),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["session"], "s1");
        assert_eq!(json["t"], "cards");
        assert_eq!(json["action"], "focus");
        assert_eq!(json["index"], 2);
        assert_eq!(msg.topic(), "cards");
    }

    #[test]
    fn test_progress_payload_formats_times() {
        let payload = ProgressPayload::from(Progress { position_secs: 65.0, duration_secs: 120.0, percent: 54.2 });
        assert_eq!(payload.elapsed, "1:05");
        assert_eq!(payload.total, "2:00");
    }

    #[test]
    fn test_position_error_levels() {
        assert_eq!(StatusPayload::position_error(PositionError::Timeout).level, StatusLevel::Warn);
        let denied = StatusPayload::position_error(PositionError::PermissionDenied);
        assert_eq!(denied.level, StatusLevel::Error);
        assert_eq!(denied.code.as_deref(), Some("permission_denied"));
    }

    #[tokio::test]
    async fn test_full_channel_drops_and_counts() {
        let metrics = Arc::new(Metrics::new());
        let (ui, mut rx) = create_ui_channel(1, metrics.clone());
        let ui = ui.for_session("abc");

        ui.send(UiEvent::Cards(CardPayload::show()));
        ui.send(UiEvent::Cards(CardPayload::hide()));

        assert_eq!(metrics.ui_events_dropped(), 1);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.session, "abc");
        assert_eq!(first.event, UiEvent::Cards(CardPayload::show()));
    }

    #[tokio::test]
    async fn test_status_survives_full_render_lane() {
        let metrics = Arc::new(Metrics::new());
        let (ui, mut rx) = create_ui_channel(2, metrics.clone());

        for _ in 0..10 {
            ui.send(UiEvent::Cards(CardPayload::focus(0)));
        }
        ui.send_status(StatusPayload::position_acquired());
        ui.send(UiEvent::TourCompleted(CompletionPayload {
            route_id: RouteId("r".into()),
            visited: 1,
            total: 1,
        }));

        assert_eq!(metrics.ui_events_dropped(), 8);
        assert!(matches!(rx.recv().await.unwrap().event, UiEvent::Status(_)));
        assert!(matches!(rx.recv().await.unwrap().event, UiEvent::TourCompleted(_)));
        assert!(matches!(rx.recv().await.unwrap().event, UiEvent::Cards(_)));
        assert!(matches!(rx.recv().await.unwrap().event, UiEvent::Cards(_)));
        assert!(rx.try_recv().is_err());

        drop(ui);
        assert!(rx.recv().await.is_none());
    }
}
