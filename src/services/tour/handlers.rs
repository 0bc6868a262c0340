//! Event handlers for the TourRunner
//!
//! Command, position, media and playback handling, implemented as methods on
//! TourRunner. All of them run on the loop task.

use super::{Internal, TourCommand, TourRunner};
use crate::domain::error::{MediaError, SessionError};
use crate::io::media::MediaHandle;
use crate::io::ui_channel::{
    CardPayload, CompletionPayload, MapPayload, NavigationPayload, ProgressPayload, RoutePayload, StatusPayload,
    UiEvent,
};
use crate::services::geofence;
use crate::services::navigator::{AdvanceOutcome, IgnoreReason, NavOutcome, NavReason, Transition};
use crate::services::playback::{LoadOutcome, PlaybackEnded, PlaybackStatus};
use crate::services::position_tracker::{PositionTracker, PositionUpdate};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

impl TourRunner {
    /// Initial render and position watch
    pub(super) fn start(&mut self) {
        if let Some(session) = self.nav.session() {
            self.ui.send(UiEvent::Route(RoutePayload::from_route(session.route())));
        }
        self.publish_map();
        self.ui.send(UiEvent::Cards(CardPayload::show()));

        self.start_position_watch();

        if self.settings.start_at_first_point {
            let outcome = self.nav.manual_navigate(0);
            self.apply_outcome(outcome);
        }
    }

    pub(super) fn handle_command(&mut self, cmd: TourCommand) {
        debug!(cmd = %cmd.as_str(), "tour_command");

        match cmd {
            TourCommand::Navigate { index } => {
                let outcome = self.nav.manual_navigate(index);
                self.apply_outcome(outcome);
            }
            TourCommand::Next => {
                let outcome = self.nav.next();
                self.apply_outcome(outcome);
            }
            TourCommand::Previous => {
                let outcome = self.nav.previous();
                self.apply_outcome(outcome);
            }
            TourCommand::TogglePlayPause => match self.playback.toggle_play_pause() {
                Some(status) => {
                    info!(status = %status.as_str(), "playback_toggled");
                    self.publish_playback();
                }
                None => debug!(status = %self.playback.status().as_str(), "playback_toggle_ignored"),
            },
            TourCommand::Seek { seconds } => {
                if self.playback.seek(seconds).is_some() {
                    self.publish_seek();
                }
            }
            TourCommand::SeekFraction { fraction } => {
                if self.playback.seek_fraction(fraction).is_some() {
                    self.publish_seek();
                }
            }
            TourCommand::Rewind { seconds } => {
                if self.playback.rewind(seconds).is_some() {
                    self.publish_seek();
                }
            }
            TourCommand::ShowCards => self.set_cards_visible(true),
            TourCommand::HideCards => self.set_cards_visible(false),
            TourCommand::RefreshLocation => self.start_position_watch(),
        }
    }

    pub(super) fn handle_position(&mut self, update: PositionUpdate) {
        let fix = match update {
            PositionUpdate::Fix(fix) => fix,
            PositionUpdate::Error(e) => {
                self.position_ok = false;
                self.metrics.record_position_error();
                warn!(error = %e.as_str(), "position_unavailable");
                self.ui.send_status(StatusPayload::position_error(e));
                return;
            }
        };

        if !self.position_ok {
            self.position_ok = true;
            info!(accuracy_m = %fix.accuracy_m, "position_acquired");
            self.ui.send_status(StatusPayload::position_acquired());
        }

        self.nav.record_position(fix);
        self.publish_map();

        let Some(session) = self.nav.session() else {
            return;
        };
        let inside = geofence::qualifying(fix.coord, session.points());
        let zones: SmallVec<[usize; 4]> = inside.iter().map(|c| c.index).collect();
        self.nav.observe_zones(&zones);

        let Some(candidate) = geofence::select(&inside, self.nav.active_index()) else {
            return;
        };

        debug!(
            index = %candidate.index,
            distance_m = format!("{:.1}", candidate.distance_m),
            "geofence_candidate"
        );
        let outcome = self.nav.geofence_candidate(candidate.index, tokio::time::Instant::now().into_std());
        if matches!(outcome, Ok(NavOutcome::Ignored(_))) {
            self.metrics.record_geofence_suppressed();
        }
        self.apply_outcome(outcome);
    }

    pub(super) fn handle_media_loaded(
        &mut self,
        seq: u64,
        result: Result<Box<dyn MediaHandle>, MediaError>,
        elapsed_ms: u64,
    ) {
        let ok = result.is_ok();
        let point_id = self.playback.state().point_id.clone();

        match self.playback.load_resolved(seq, result) {
            LoadOutcome::Stale => {
                self.metrics.record_media_stale();
                return;
            }
            LoadOutcome::Playing => {
                info!(seq = %seq, elapsed_ms = %elapsed_ms, "playback_started");
            }
            LoadOutcome::Simulating(e) => {
                self.metrics.record_simulated_playback();
                self.reset_simulation_clock = true;
                if let Some(point_id) = point_id.as_ref() {
                    self.ui.send_status(StatusPayload::media_error(point_id, &e, true));
                }
            }
            LoadOutcome::Failed(e) => {
                if let Some(point_id) = point_id.as_ref() {
                    self.ui.send_status(StatusPayload::media_error(point_id, &e, false));
                }
            }
        }

        self.metrics.record_media_load(elapsed_ms, ok);
        self.nav.transition_settled(seq);
        self.publish_playback();
    }

    pub(super) fn handle_auto_advance(&mut self, index: usize, origin_seq: u64) {
        let outcome = self.nav.auto_advance(index, origin_seq);
        self.apply_outcome(outcome);
    }

    /// Progress-interval tick: sample real media and publish progress
    pub(crate) fn sample_progress(&mut self) {
        let (progress, ended) = self.playback.sample();
        if self.playback.status() == PlaybackStatus::Playing || ended.is_some() {
            self.ui.send(UiEvent::Progress(ProgressPayload::from(progress)));
        }
        if let Some(ended) = ended {
            self.handle_playback_ended(ended);
        }
    }

    /// Simulation-interval tick
    pub(crate) fn tick_simulation(&mut self) {
        if let Some(ended) = self.playback.tick_simulation() {
            self.ui.send(UiEvent::Progress(ProgressPayload::from(self.playback.progress())));
            self.handle_playback_ended(ended);
        }
    }

    fn handle_playback_ended(&mut self, ended: PlaybackEnded) {
        info!(seq = %ended.seq, simulated = %self.playback.is_simulated(), "playback_ended");
        self.publish_playback();

        match self.nav.playback_ended(ended.seq) {
            AdvanceOutcome::Scheduled { next, delay, origin_seq } => {
                debug!(next = %next, delay_ms = %delay.as_millis(), "auto_advance_scheduled");
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::AutoAdvance { index: next, origin_seq }).await;
                });
            }
            AdvanceOutcome::TourCompleted => {
                self.metrics.record_tour_completed();
                if let Some(session) = self.nav.session() {
                    self.ui.send(UiEvent::TourCompleted(CompletionPayload {
                        route_id: session.route().id.clone(),
                        visited: session.visited().len(),
                        total: session.len(),
                    }));
                }
            }
            AdvanceOutcome::Ignored => {}
        }
    }

    fn apply_outcome(&mut self, outcome: Result<NavOutcome, SessionError>) {
        match outcome {
            Ok(NavOutcome::Accepted(transition)) => self.apply_transition(transition),
            Ok(NavOutcome::Ignored(reason)) => {
                self.metrics.record_navigation_ignored();
                debug!(reason = %reason.as_str(), "navigation_ignored");
                if reason == IgnoreReason::NoSession {
                    warn!("navigation_without_session");
                }
            }
            Err(e) => {
                warn!(error = %e, "navigation_rejected");
            }
        }
    }

    /// Render the new point and start loading its narration
    fn apply_transition(&mut self, transition: Transition) {
        self.metrics.record_transition(transition.reason);

        let Some(session) = self.nav.session() else {
            return;
        };
        let Some(point) = session.point(transition.index) else {
            return;
        };
        let url = self.media.resolve_audio_url(session.route(), point);
        if transition.reason == NavReason::Geofence {
            info!(index = %transition.index, point = %point.name, "point_reached");
        }
        let request = self.playback.begin_load(transition.seq, point);

        self.ui.send(UiEvent::Navigation(NavigationPayload::new(&transition, point)));
        if transition.reveal_card && !self.cards_visible {
            self.set_cards_visible(true);
        }
        self.ui.send(UiEvent::Cards(CardPayload::focus(transition.index)));
        self.publish_map();
        self.publish_playback();

        debug!(
            seq = %request.seq,
            point = %request.point_id,
            url = %url,
            reason = %transition.reason.as_str(),
            "media_load_started"
        );

        let media = self.media.clone();
        let tx = self.internal_tx.clone();
        let timeout = self.settings.media_load_timeout;
        let seq = request.seq;
        let nominal_secs = request.nominal_secs;
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let result = match tokio::time::timeout(timeout, media.load_and_play(&url, nominal_secs)).await {
                Ok(result) => result,
                Err(_) => Err(MediaError::Timeout(timeout.as_millis() as u64)),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let _ = tx.send(Internal::MediaLoaded { seq, result, elapsed_ms }).await;
        });

    }

    /// (Re)start the position watch. Any previous watch is stopped first.
    fn start_position_watch(&mut self) {
        let Some(provider) = self.positions.clone() else {
            debug!("position_watch_unavailable");
            return;
        };
        if let Some(previous) = self.watch.take() {
            previous.stop();
        }

        let handle = PositionTracker::start(
            provider.open(),
            self.settings.watch,
            self.internal_tx.clone(),
            self.metrics.clone(),
        );
        self.watch = Some(handle);
    }

    fn set_cards_visible(&mut self, visible: bool) {
        if self.cards_visible == visible {
            return;
        }
        self.cards_visible = visible;
        let payload = if visible { CardPayload::show() } else { CardPayload::hide() };
        self.ui.send(UiEvent::Cards(payload));
    }

    fn publish_map(&self) {
        let Some(session) = self.nav.session() else {
            return;
        };
        self.ui.send(UiEvent::Map(MapPayload {
            active_index: session.active_index(),
            visited: session.visited().iter().copied().collect(),
            user_position: session.last_position().copied(),
        }));
    }

    fn publish_playback(&self) {
        self.ui.send(UiEvent::Playback(self.playback.state().clone()));
    }

    fn publish_seek(&self) {
        self.publish_playback();
        self.ui.send(UiEvent::Progress(ProgressPayload::from(self.playback.progress())));
    }
}
