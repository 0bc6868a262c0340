//! Playback controller - narration state for the active point
//!
//! State machine: Idle → Loading → Playing ⇄ Paused, plus Ended and Errored.
//! Each load is bound to the navigation seq that started it; results for any
//! other seq are dropped. When media fails, playback is simulated with
//! one-second ticks up to the point's nominal duration so the tour can still
//! progress.

use crate::domain::error::MediaError;
use crate::domain::types::{Point, PointId};
use crate::io::media::MediaHandle;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
    Errored,
}

impl PlaybackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Loading => "loading",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Ended => "ended",
            PlaybackStatus::Errored => "errored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub point_id: Option<PointId>,
    pub position_secs: f64,
    /// Media-reported once known, otherwise the point's nominal duration
    pub duration_secs: f64,
    pub simulated: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            point_id: None,
            position_secs: 0.0,
            duration_secs: 0.0,
            simulated: false,
        }
    }
}

/// What the host needs to start loading narration for a transition
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub seq: u64,
    pub point_id: PointId,
    pub nominal_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Result belonged to a superseded transition and was dropped
    Stale,
    Playing,
    /// Media failed; simulated playback took over
    Simulating(MediaError),
    /// Media failed and simulation is disabled
    Failed(MediaError),
}

/// Narration for transition `seq` finished (real or simulated)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackEnded {
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub position_secs: f64,
    pub duration_secs: f64,
    pub percent: f64,
}

/// `position / duration * 100`, clamped to [0, 100]; 0 when duration is 0
pub fn progress_percent(position: f64, duration: f64) -> f64 {
    if !(duration > 0.0) || !position.is_finite() {
        return 0.0;
    }
    (position / duration * 100.0).clamp(0.0, 100.0)
}

pub struct PlaybackController {
    state: PlaybackState,
    /// Navigation seq the current load/playback belongs to
    seq: Option<u64>,
    handle: Option<Box<dyn MediaHandle>>,
    simulate_on_error: bool,
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PlaybackController {
    pub fn new(simulate_on_error: bool) -> Self {
        Self {
            state: PlaybackState::default(),
            seq: None,
            handle: None,
            simulate_on_error,
        }
    }

    /// Stop whatever is playing and start loading narration for `point`
    pub fn begin_load(&mut self, seq: u64, point: &Point) -> LoadRequest {
        self.release_handle();

        let nominal_secs = point.nominal_duration_secs();
        self.seq = Some(seq);
        self.state = PlaybackState {
            status: PlaybackStatus::Loading,
            point_id: Some(point.id.clone()),
            position_secs: 0.0,
            duration_secs: nominal_secs,
            simulated: false,
        };

        LoadRequest { seq, point_id: point.id.clone(), nominal_secs }
    }

    /// Apply the result of the load started for `seq`
    pub fn load_resolved(&mut self, seq: u64, result: Result<Box<dyn MediaHandle>, MediaError>) -> LoadOutcome {
        if self.seq != Some(seq) || self.state.status != PlaybackStatus::Loading {
            debug!(seq = %seq, current = ?self.seq, "media_result_dropped");
            // A handle arriving late is paused and dropped here
            if let Ok(mut handle) = result {
                handle.pause();
            }
            return LoadOutcome::Stale;
        }

        match result {
            Ok(mut handle) => {
                handle.play();
                if let Some(duration) = handle.duration().filter(|d| d.is_finite() && *d > 0.0) {
                    self.state.duration_secs = duration;
                }
                self.state.position_secs = handle.current_time();
                self.state.status = PlaybackStatus::Playing;
                self.handle = Some(handle);
                LoadOutcome::Playing
            }
            Err(e) => {
                self.state.status = PlaybackStatus::Errored;
                if !self.simulate_on_error {
                    warn!(seq = %seq, error = %e, "media_load_failed");
                    return LoadOutcome::Failed(e);
                }
                warn!(seq = %seq, error = %e, "media_load_failed_simulating");
                self.state.simulated = true;
                self.state.position_secs = 0.0;
                self.state.status = PlaybackStatus::Playing;
                LoadOutcome::Simulating(e)
            }
        }
    }

    /// One simulated second. Only progresses while simulated and playing.
    pub fn tick_simulation(&mut self) -> Option<PlaybackEnded> {
        if !self.state.simulated || self.state.status != PlaybackStatus::Playing {
            return None;
        }

        self.state.position_secs = (self.state.position_secs + 1.0).min(self.state.duration_secs);
        if self.state.position_secs >= self.state.duration_secs {
            return self.finish();
        }
        None
    }

    /// Refresh position from real media and detect its natural end
    pub fn sample(&mut self) -> (Progress, Option<PlaybackEnded>) {
        let mut ended = None;

        if let Some(handle) = self.handle.as_ref() {
            if matches!(self.state.status, PlaybackStatus::Playing | PlaybackStatus::Paused) {
                if let Some(duration) = handle.duration().filter(|d| d.is_finite() && *d > 0.0) {
                    self.state.duration_secs = duration;
                }
                self.state.position_secs = handle.current_time().clamp(0.0, self.state.duration_secs);

                if self.state.status == PlaybackStatus::Playing && handle.is_ended() {
                    ended = self.finish();
                }
            }
        }

        (self.progress(), ended)
    }

    /// Returns the new status, `None` when the toggle does not apply
    pub fn toggle_play_pause(&mut self) -> Option<PlaybackStatus> {
        let next = match self.state.status {
            PlaybackStatus::Playing => PlaybackStatus::Paused,
            PlaybackStatus::Paused => PlaybackStatus::Playing,
            _ => return None,
        };

        if let Some(handle) = self.handle.as_mut() {
            match next {
                PlaybackStatus::Playing => handle.play(),
                _ => handle.pause(),
            }
        }
        self.state.status = next;
        Some(next)
    }

    /// Move to `target` seconds, clamped to [0, duration]. Refused while loading.
    pub fn seek(&mut self, target: f64) -> Option<f64> {
        if matches!(self.state.status, PlaybackStatus::Loading | PlaybackStatus::Idle) {
            return None;
        }

        let target = if target.is_finite() { target } else { 0.0 };
        let position = target.clamp(0.0, self.state.duration_secs);

        if let Some(handle) = self.handle.as_mut() {
            handle.seek(position);
        }
        self.state.position_secs = position;

        if self.state.status == PlaybackStatus::Ended && position < self.state.duration_secs {
            if let Some(handle) = self.handle.as_mut() {
                handle.pause();
            }
            self.state.status = PlaybackStatus::Paused;
        }
        Some(position)
    }

    /// Seek to a fraction of the track (progress-bar click)
    pub fn seek_fraction(&mut self, fraction: f64) -> Option<f64> {
        if !(self.state.duration_secs > 0.0) {
            return None;
        }
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        self.seek(fraction * self.state.duration_secs)
    }

    pub fn rewind(&mut self, seconds: f64) -> Option<f64> {
        self.seek(self.state.position_secs - seconds.max(0.0))
    }

    /// Release the handle and return to Idle
    pub fn stop(&mut self) {
        self.release_handle();
        self.seq = None;
        self.state = PlaybackState::default();
    }

    fn finish(&mut self) -> Option<PlaybackEnded> {
        self.state.position_secs = self.state.duration_secs;
        self.state.status = PlaybackStatus::Ended;
        self.seq.map(|seq| PlaybackEnded { seq })
    }

    fn release_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.pause();
        }
    }

    pub fn progress(&self) -> Progress {
        Progress {
            position_secs: self.state.position_secs,
            duration_secs: self.state.duration_secs,
            percent: progress_percent(self.state.position_secs, self.state.duration_secs),
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    pub fn is_simulated(&self) -> bool {
        self.state.simulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::test_support::point;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct FakeMedia {
        time: f64,
        duration: Option<f64>,
        playing: bool,
        ended: bool,
        seeks: Vec<f64>,
    }

    /// Handle whose state the test keeps a second reference to
    struct FakeHandle(Arc<Mutex<FakeMedia>>);

    impl MediaHandle for FakeHandle {
        fn play(&mut self) {
            self.0.lock().playing = true;
        }
        fn pause(&mut self) {
            self.0.lock().playing = false;
        }
        fn seek(&mut self, seconds: f64) {
            let mut media = self.0.lock();
            media.time = seconds;
            media.seeks.push(seconds);
        }
        fn current_time(&self) -> f64 {
            self.0.lock().time
        }
        fn duration(&self) -> Option<f64> {
            self.0.lock().duration
        }
        fn is_ended(&self) -> bool {
            self.0.lock().ended
        }
    }

    fn fake(duration: Option<f64>) -> (Box<dyn MediaHandle>, Arc<Mutex<FakeMedia>>) {
        let media = Arc::new(Mutex::new(FakeMedia { duration, ..Default::default() }));
        (Box::new(FakeHandle(media.clone())), media)
    }

    fn simulating(seq: u64) -> PlaybackController {
        let mut playback = PlaybackController::default();
        playback.begin_load(seq, &point("a", 48.0, 11.0, 50.0));
        let outcome = playback.load_resolved(seq, Err(MediaError::NotFound("a.mp3".into())));
        assert!(matches!(outcome, LoadOutcome::Simulating(_)));
        playback
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(30.0, 120.0), 25.0);
        assert_eq!(progress_percent(0.0, 0.0), 0.0);
        assert_eq!(progress_percent(150.0, 120.0), 100.0);
        assert_eq!(progress_percent(-5.0, 120.0), 0.0);
        assert_eq!(progress_percent(5.0, f64::NAN), 0.0);
    }

    #[test]
    fn test_begin_load_uses_nominal_duration() {
        let mut playback = PlaybackController::default();
        let mut p = point("a", 48.0, 11.0, 50.0);
        p.duration = Some(95);
        let request = playback.begin_load(4, &p);

        assert_eq!(request.seq, 4);
        assert_eq!(request.nominal_secs, 95.0);
        assert_eq!(playback.status(), PlaybackStatus::Loading);
        assert_eq!(playback.state().duration_secs, 95.0);
        assert_eq!(playback.state().position_secs, 0.0);
    }

    #[test]
    fn test_load_success_autoplays_with_media_duration() {
        let mut playback = PlaybackController::default();
        playback.begin_load(1, &point("a", 48.0, 11.0, 50.0));
        let (handle, media) = fake(Some(87.5));

        assert_eq!(playback.load_resolved(1, Ok(handle)), LoadOutcome::Playing);
        assert_eq!(playback.status(), PlaybackStatus::Playing);
        assert_eq!(playback.state().duration_secs, 87.5);
        assert!(media.lock().playing);
    }

    #[test]
    fn test_stale_result_is_dropped() {
        let mut playback = PlaybackController::default();
        playback.begin_load(1, &point("a", 48.0, 11.0, 50.0));
        playback.begin_load(2, &point("b", 48.0, 11.0, 50.0));

        let (late, media) = fake(Some(30.0));
        assert_eq!(playback.load_resolved(1, Ok(late)), LoadOutcome::Stale);
        assert_eq!(playback.status(), PlaybackStatus::Loading);
        assert_eq!(playback.state().point_id, Some(PointId("b".into())));
        assert!(!media.lock().playing);
    }

    #[test]
    fn test_new_load_stops_previous_handle() {
        let mut playback = PlaybackController::default();
        playback.begin_load(1, &point("a", 48.0, 11.0, 50.0));
        let (handle, media) = fake(None);
        playback.load_resolved(1, Ok(handle));
        assert!(media.lock().playing);

        playback.begin_load(2, &point("b", 48.0, 11.0, 50.0));
        assert!(!media.lock().playing);
    }

    #[test]
    fn test_media_failure_without_simulation_stays_errored() {
        let mut playback = PlaybackController::new(false);
        playback.begin_load(1, &point("a", 48.0, 11.0, 50.0));
        let outcome = playback.load_resolved(1, Err(MediaError::Timeout(8000)));
        assert_eq!(outcome, LoadOutcome::Failed(MediaError::Timeout(8000)));
        assert_eq!(playback.status(), PlaybackStatus::Errored);
        assert_eq!(playback.tick_simulation(), None);
    }

    #[test]
    fn test_simulated_playback_ends_after_nominal_ticks() {
        let mut playback = simulating(7);
        assert!(playback.is_simulated());
        assert_eq!(playback.status(), PlaybackStatus::Playing);

        for _ in 0..119 {
            assert_eq!(playback.tick_simulation(), None);
        }
        assert_eq!(playback.tick_simulation(), Some(PlaybackEnded { seq: 7 }));
        assert_eq!(playback.status(), PlaybackStatus::Ended);
        assert_eq!(playback.state().position_secs, 120.0);

        // Ended stays ended
        assert_eq!(playback.tick_simulation(), None);
    }

    #[test]
    fn test_simulation_holds_while_paused() {
        let mut playback = simulating(1);
        playback.tick_simulation();
        assert_eq!(playback.toggle_play_pause(), Some(PlaybackStatus::Paused));
        playback.tick_simulation();
        playback.tick_simulation();
        assert_eq!(playback.state().position_secs, 1.0);
    }

    #[test]
    fn test_rewind_clamps_at_zero() {
        let mut playback = simulating(1);
        for _ in 0..5 {
            playback.tick_simulation();
        }
        assert_eq!(playback.state().position_secs, 5.0);
        assert_eq!(playback.rewind(10.0), Some(0.0));
        assert_eq!(playback.state().position_secs, 0.0);
    }

    #[test]
    fn test_toggle_is_noop_while_loading() {
        let mut playback = PlaybackController::default();
        playback.begin_load(1, &point("a", 48.0, 11.0, 50.0));
        assert_eq!(playback.toggle_play_pause(), None);
        assert_eq!(playback.status(), PlaybackStatus::Loading);
        assert_eq!(playback.seek(10.0), None);
    }

    #[test]
    fn test_toggle_drives_handle() {
        let mut playback = PlaybackController::default();
        playback.begin_load(1, &point("a", 48.0, 11.0, 50.0));
        let (handle, media) = fake(None);
        playback.load_resolved(1, Ok(handle));

        assert_eq!(playback.toggle_play_pause(), Some(PlaybackStatus::Paused));
        assert!(!media.lock().playing);
        assert_eq!(playback.toggle_play_pause(), Some(PlaybackStatus::Playing));
        assert!(media.lock().playing);
    }

    #[test]
    fn test_seek_clamps_and_reaches_handle() {
        let mut playback = PlaybackController::default();
        playback.begin_load(1, &point("a", 48.0, 11.0, 50.0));
        let (handle, media) = fake(Some(60.0));
        playback.load_resolved(1, Ok(handle));

        assert_eq!(playback.seek(500.0), Some(60.0));
        assert_eq!(playback.seek(-1.0), Some(0.0));
        assert_eq!(media.lock().seeks, vec![60.0, 0.0]);
    }

    #[test]
    fn test_seek_fraction() {
        let mut playback = simulating(1);
        assert_eq!(playback.seek_fraction(0.25), Some(30.0));
        assert_eq!(playback.seek_fraction(2.0), Some(120.0));
    }

    #[test]
    fn test_seek_back_from_ended_pauses() {
        let mut playback = simulating(1);
        playback.seek(119.0);
        assert_eq!(playback.tick_simulation(), Some(PlaybackEnded { seq: 1 }));

        assert_eq!(playback.seek(30.0), Some(30.0));
        assert_eq!(playback.status(), PlaybackStatus::Paused);
    }

    #[test]
    fn test_sample_detects_natural_end() {
        let mut playback = PlaybackController::default();
        playback.begin_load(3, &point("a", 48.0, 11.0, 50.0));
        let (handle, media) = fake(Some(40.0));
        playback.load_resolved(3, Ok(handle));

        media.lock().time = 10.0;
        let (progress, ended) = playback.sample();
        assert_eq!(progress.position_secs, 10.0);
        assert_eq!(progress.percent, 25.0);
        assert_eq!(ended, None);

        {
            let mut m = media.lock();
            m.time = 40.0;
            m.ended = true;
        }
        let (_, ended) = playback.sample();
        assert_eq!(ended, Some(PlaybackEnded { seq: 3 }));
        assert_eq!(playback.status(), PlaybackStatus::Ended);

        // Only reported once
        assert_eq!(playback.sample().1, None);
    }

    #[test]
    fn test_stop_returns_to_idle() {
        let mut playback = simulating(1);
        playback.stop();
        assert_eq!(playback.status(), PlaybackStatus::Idle);
        assert_eq!(playback.seq(), None);
        assert!(!playback.is_simulated());
    }
}
