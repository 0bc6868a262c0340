//! Tour event loop
//!
//! The TourRunner is the single task that owns all tour state:
//! - NavigationController (session, active point, transitions)
//! - PlaybackController (narration state for the active point)
//! - The position watch handle
//!
//! Everything that touches that state arrives as a message and is processed
//! one at a time. Slow work (media loads, auto-advance delays) runs in spawned
//! tasks that post their results back on the internal queue, tagged with the
//! transition seq they belong to.

mod handlers;

use crate::domain::error::{MediaError, SessionError};
use crate::domain::types::Route;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::media::{MediaBackend, MediaHandle};
use crate::io::ui_channel::{StatusPayload, UiSender};
use crate::services::navigator::NavigationController;
use crate::services::playback::PlaybackController;
use crate::services::position_tracker::{PositionProvider, PositionUpdate, WatchHandle, WatchOptions};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

/// Internal queue depth (media results, delayed advances, watch updates)
const INTERNAL_QUEUE_SIZE: usize = 256;

fn default_rewind_secs() -> f64 {
    10.0
}

/// A user intent from the card, map or playback surface
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum TourCommand {
    /// Tap on a map marker or swipe to a card
    Navigate { index: usize },
    Next,
    Previous,
    TogglePlayPause,
    Seek { seconds: f64 },
    /// Progress-bar click, 0.0..=1.0
    SeekFraction { fraction: f64 },
    Rewind {
        #[serde(default = "default_rewind_secs")]
        seconds: f64,
    },
    ShowCards,
    HideCards,
    RefreshLocation,
}

impl TourCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            TourCommand::Navigate { .. } => "navigate",
            TourCommand::Next => "next",
            TourCommand::Previous => "previous",
            TourCommand::TogglePlayPause => "toggle_play_pause",
            TourCommand::Seek { .. } => "seek",
            TourCommand::SeekFraction { .. } => "seek_fraction",
            TourCommand::Rewind { .. } => "rewind",
            TourCommand::ShowCards => "show_cards",
            TourCommand::HideCards => "hide_cards",
            TourCommand::RefreshLocation => "refresh_location",
        }
    }
}

/// Events accepted from outside the loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TourEvent {
    Command(TourCommand),
    Position(PositionUpdate),
}

impl From<TourCommand> for TourEvent {
    fn from(cmd: TourCommand) -> Self {
        TourEvent::Command(cmd)
    }
}

impl From<PositionUpdate> for TourEvent {
    fn from(update: PositionUpdate) -> Self {
        TourEvent::Position(update)
    }
}

/// Completions posted by tasks the loop spawned
pub(crate) enum Internal {
    MediaLoaded {
        seq: u64,
        result: Result<Box<dyn MediaHandle>, MediaError>,
        elapsed_ms: u64,
    },
    AutoAdvance {
        index: usize,
        origin_seq: u64,
    },
    Position(PositionUpdate),
}

impl From<PositionUpdate> for Internal {
    fn from(update: PositionUpdate) -> Self {
        Internal::Position(update)
    }
}

/// Runtime knobs for the loop, resolved from config
#[derive(Debug, Clone)]
pub struct TourSettings {
    pub geofence_cooldown: Duration,
    pub auto_advance_delay: Duration,
    pub start_at_first_point: bool,
    pub media_load_timeout: Duration,
    pub simulate_on_media_error: bool,
    pub progress_interval: Duration,
    pub simulation_tick: Duration,
    pub watch: WatchOptions,
}

impl Default for TourSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl TourSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            geofence_cooldown: Duration::from_millis(config.geofence_cooldown_ms()),
            auto_advance_delay: Duration::from_millis(config.auto_advance_delay_ms()),
            start_at_first_point: config.start_at_first_point(),
            media_load_timeout: Duration::from_millis(config.media_load_timeout_ms()),
            simulate_on_media_error: config.simulate_on_media_error(),
            progress_interval: Duration::from_millis(config.progress_interval_ms()),
            simulation_tick: Duration::from_millis(config.simulation_tick_ms()),
            watch: WatchOptions {
                high_accuracy: config.position_high_accuracy(),
                max_age: Duration::from_millis(config.position_max_age_ms()),
                timeout: Duration::from_millis(config.position_timeout_ms()),
            },
        }
    }
}

/// Single-task owner of one tour session
pub struct TourRunner {
    pub(crate) nav: NavigationController,
    pub(crate) playback: PlaybackController,
    pub(crate) media: Arc<dyn MediaBackend>,
    /// Source of position watches; `None` runs with manual navigation only
    pub(crate) positions: Option<Arc<dyn PositionProvider>>,
    pub(crate) watch: Option<WatchHandle>,
    pub(crate) ui: UiSender,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) settings: TourSettings,
    pub(crate) cards_visible: bool,
    /// Whether the last position update was a fix (vs. an error)
    pub(crate) position_ok: bool,
    /// Set when simulated playback starts so the tick interval restarts
    pub(crate) reset_simulation_clock: bool,
    pub(crate) internal_tx: mpsc::Sender<Internal>,
    internal_rx: Option<mpsc::Receiver<Internal>>,
}

impl TourRunner {
    /// Load `route` into a fresh session. An invalid route is reported on the
    /// status channel and returned as an error.
    pub fn new(
        route: Route,
        settings: TourSettings,
        media: Arc<dyn MediaBackend>,
        positions: Option<Arc<dyn PositionProvider>>,
        ui: UiSender,
        metrics: Arc<Metrics>,
    ) -> Result<Self, SessionError> {
        let mut nav = NavigationController::new(settings.geofence_cooldown, settings.auto_advance_delay);
        let session_id = match nav.load(route) {
            Ok(session) => session.session_id().to_string(),
            Err(e) => {
                warn!(error = %e, "tour_load_failed");
                ui.send_status(StatusPayload::invalid_route(&e));
                return Err(e);
            }
        };

        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_QUEUE_SIZE);

        Ok(Self {
            nav,
            playback: PlaybackController::new(settings.simulate_on_media_error),
            media,
            positions,
            watch: None,
            ui: ui.for_session(&session_id),
            metrics,
            settings,
            cards_visible: true,
            position_ok: false,
            reset_simulation_clock: false,
            internal_tx,
            internal_rx: Some(internal_rx),
        })
    }

    /// Run until the external event channel closes
    pub async fn run(&mut self, mut event_rx: mpsc::Receiver<TourEvent>) {
        let Some(mut internal_rx) = self.internal_rx.take() else {
            warn!("tour_runner_already_ran");
            return;
        };

        self.start();

        let mut progress = interval(self.settings.progress_interval);
        progress.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut simulation = interval(self.settings.simulation_tick);
        simulation.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(e) => self.process_event(e),
                        None => break,
                    }
                }
                Some(internal) = internal_rx.recv() => {
                    self.process_internal(internal);
                }
                _ = progress.tick() => {
                    self.sample_progress();
                }
                _ = simulation.tick() => {
                    self.tick_simulation();
                }
            }

            if std::mem::take(&mut self.reset_simulation_clock) {
                simulation.reset();
            }
        }

        self.shutdown();
    }

    /// Process a single external event
    pub fn process_event(&mut self, event: TourEvent) {
        let process_start = Instant::now();

        match event {
            TourEvent::Command(cmd) => self.handle_command(cmd),
            TourEvent::Position(update) => self.handle_position(update),
        }

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_event_processed(latency_us);
    }

    pub(crate) fn process_internal(&mut self, internal: Internal) {
        let process_start = Instant::now();

        match internal {
            Internal::MediaLoaded { seq, result, elapsed_ms } => self.handle_media_loaded(seq, result, elapsed_ms),
            Internal::AutoAdvance { index, origin_seq } => self.handle_auto_advance(index, origin_seq),
            Internal::Position(update) => self.handle_position(update),
        }

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_event_processed(latency_us);
    }

    fn shutdown(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.stop();
        }
        self.playback.stop();

        if let Some(session) = self.nav.session() {
            info!(
                session_id = %session.session_id(),
                visited = %session.visited().len(),
                total = %session.len(),
                "tour_session_ended"
            );
        }
    }

    pub fn nav(&self) -> &NavigationController {
        &self.nav
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn cards_visible(&self) -> bool {
        self.cards_visible
    }
}
