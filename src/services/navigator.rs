//! Navigation controller - decides when the active point changes and why
//!
//! Owns the `TourSession` and arbitrates between three sources of intent:
//! - Manual navigation (tap, swipe, prev/next buttons) always wins
//! - Geofence candidates are accepted only while no transition is in flight,
//!   only on entry into a zone, and at most once per point within the
//!   cool-down window
//! - Auto-advance fires after narration ends, unless something else moved first
//!
//! Every accepted change bumps a sequence number. Async results (media loads,
//! delayed advances) carry the seq they were started for and are dropped when
//! it no longer matches.

use crate::domain::error::SessionError;
use crate::domain::session::TourSession;
use crate::domain::types::{PositionFix, Route};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Minimum spacing between two accepted geofence arrivals at the same point
pub const DEFAULT_GEOFENCE_COOLDOWN: Duration = Duration::from_secs(5);

/// Pause between the end of one narration and the move to the next point
pub const DEFAULT_AUTO_ADVANCE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    /// No route loaded
    Idle,
    /// Session loaded, no transition in flight
    Ready,
    /// Audio for transition `seq` has not started yet
    Transitioning { seq: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavReason {
    Manual,
    Geofence,
    AutoAdvance,
}

impl NavReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavReason::Manual => "manual",
            NavReason::Geofence => "geofence",
            NavReason::AutoAdvance => "auto-advance",
        }
    }
}

/// Which way the card carousel should animate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
    Jump,
}

/// An accepted change of the active point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub seq: u64,
    pub previous: Option<usize>,
    pub index: usize,
    pub reason: NavReason,
    /// Geofence arrivals re-open the card surface
    pub reveal_card: bool,
}

impl Transition {
    pub fn direction(&self) -> Direction {
        match self.previous {
            Some(prev) if self.index == prev + 1 => Direction::Forward,
            Some(prev) if self.index + 1 == prev => Direction::Backward,
            _ => Direction::Jump,
        }
    }
}

/// Why a navigation request did not change anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoSession,
    AlreadyActive,
    /// A transition is in flight; geofence candidates wait for it to settle
    Busy,
    CoolingDown,
    /// The user has not left this zone since it was last active
    NotEntered,
    /// An auto-advance whose originating transition has been replaced
    Superseded,
    /// Previous on the first point, next on the last
    AtBoundary,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::NoSession => "no_session",
            IgnoreReason::AlreadyActive => "already_active",
            IgnoreReason::Busy => "busy",
            IgnoreReason::CoolingDown => "cooling_down",
            IgnoreReason::NotEntered => "not_entered",
            IgnoreReason::Superseded => "superseded",
            IgnoreReason::AtBoundary => "at_boundary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavOutcome {
    Accepted(Transition),
    Ignored(IgnoreReason),
}

impl NavOutcome {
    pub fn accepted(self) -> Option<Transition> {
        match self {
            NavOutcome::Accepted(t) => Some(t),
            NavOutcome::Ignored(_) => None,
        }
    }
}

/// Result of narration ending for the current transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Host should post `auto_advance(next, origin_seq)` after `delay`
    Scheduled { next: usize, delay: Duration, origin_seq: u64 },
    /// Last point finished; reported once per session
    TourCompleted,
    Ignored,
}

pub struct NavigationController {
    state: NavState,
    session: Option<TourSession>,
    /// Seq of the most recent accepted transition. Never reset, so results
    /// from a previous session can never match.
    seq: u64,
    cooldown: Duration,
    advance_delay: Duration,
    /// Last accepted geofence arrival per point index
    geofence_history: FxHashMap<usize, Instant>,
    /// Zones that must be left before they can trigger again
    disarmed: FxHashSet<usize>,
    completed: bool,
}

impl Default for NavigationController {
    fn default() -> Self {
        Self::new(DEFAULT_GEOFENCE_COOLDOWN, DEFAULT_AUTO_ADVANCE_DELAY)
    }
}

impl NavigationController {
    pub fn new(cooldown: Duration, advance_delay: Duration) -> Self {
        Self {
            state: NavState::Idle,
            session: None,
            seq: 0,
            cooldown,
            advance_delay,
            geofence_history: FxHashMap::default(),
            disarmed: FxHashSet::default(),
            completed: false,
        }
    }

    /// Start a fresh session on `route`. On error the previous state is kept.
    pub fn load(&mut self, route: Route) -> Result<&TourSession, SessionError> {
        let session = TourSession::load(route)?;
        info!(
            session_id = %session.session_id(),
            route = %session.route().id,
            points = %session.len(),
            "tour_loaded"
        );

        self.geofence_history.clear();
        self.disarmed.clear();
        self.completed = false;
        self.state = NavState::Ready;
        Ok(self.session.insert(session))
    }

    /// Leave the tour. Returns the finished session.
    pub fn unload(&mut self) -> Option<TourSession> {
        self.state = NavState::Idle;
        self.geofence_history.clear();
        self.disarmed.clear();
        self.session.take()
    }

    /// User picked a point. Supersedes any in-flight transition.
    pub fn manual_navigate(&mut self, index: usize) -> Result<NavOutcome, SessionError> {
        let Some(session) = self.session.as_ref() else {
            return Ok(NavOutcome::Ignored(IgnoreReason::NoSession));
        };
        if index >= session.len() {
            return Err(SessionError::IndexOutOfRange { index, len: session.len() });
        }
        if session.active_index() == Some(index) {
            return Ok(NavOutcome::Ignored(IgnoreReason::AlreadyActive));
        }
        self.accept(index, NavReason::Manual)
    }

    /// "Next" button. Starts the tour at the first point when nothing is active.
    pub fn next(&mut self) -> Result<NavOutcome, SessionError> {
        let Some(session) = self.session.as_ref() else {
            return Ok(NavOutcome::Ignored(IgnoreReason::NoSession));
        };
        let target = match session.active_index() {
            None => 0,
            Some(i) if session.is_last(i) => return Ok(NavOutcome::Ignored(IgnoreReason::AtBoundary)),
            Some(i) => i + 1,
        };
        self.manual_navigate(target)
    }

    /// "Previous" button
    pub fn previous(&mut self) -> Result<NavOutcome, SessionError> {
        let Some(session) = self.session.as_ref() else {
            return Ok(NavOutcome::Ignored(IgnoreReason::NoSession));
        };
        match session.active_index() {
            None | Some(0) => Ok(NavOutcome::Ignored(IgnoreReason::AtBoundary)),
            Some(i) => self.manual_navigate(i - 1),
        }
    }

    /// The geofence evaluator picked `index` for the latest fix
    pub fn geofence_candidate(&mut self, index: usize, now: Instant) -> Result<NavOutcome, SessionError> {
        let Some(session) = self.session.as_ref() else {
            return Ok(NavOutcome::Ignored(IgnoreReason::NoSession));
        };
        if index >= session.len() {
            return Err(SessionError::IndexOutOfRange { index, len: session.len() });
        }
        if matches!(self.state, NavState::Transitioning { .. }) {
            return Ok(NavOutcome::Ignored(IgnoreReason::Busy));
        }
        if session.active_index() == Some(index) {
            return Ok(NavOutcome::Ignored(IgnoreReason::AlreadyActive));
        }
        if self.disarmed.contains(&index) {
            return Ok(NavOutcome::Ignored(IgnoreReason::NotEntered));
        }
        if let Some(last) = self.geofence_history.get(&index) {
            if now.saturating_duration_since(*last) < self.cooldown {
                return Ok(NavOutcome::Ignored(IgnoreReason::CoolingDown));
            }
        }

        self.geofence_history.insert(index, now);
        self.disarmed.insert(index);
        self.accept(index, NavReason::Geofence)
    }

    /// Zones containing the latest fix. Zones the user has left are re-armed;
    /// the active point's zone is disarmed while the user stands in it.
    pub fn observe_zones(&mut self, inside: &[usize]) {
        self.disarmed.retain(|i| inside.contains(i));
        if let Some(active) = self.active_index() {
            if inside.contains(&active) {
                self.disarmed.insert(active);
            }
        }
    }

    /// Narration for transition `seq` reached its end
    pub fn playback_ended(&mut self, seq: u64) -> AdvanceOutcome {
        let Some(session) = self.session.as_ref() else {
            return AdvanceOutcome::Ignored;
        };
        if seq != self.seq {
            debug!(seq = %seq, current = %self.seq, "playback_end_stale");
            return AdvanceOutcome::Ignored;
        }
        let Some(active) = session.active_index() else {
            return AdvanceOutcome::Ignored;
        };

        if !session.is_last(active) {
            return AdvanceOutcome::Scheduled {
                next: active + 1,
                delay: self.advance_delay,
                origin_seq: seq,
            };
        }

        if self.completed {
            return AdvanceOutcome::Ignored;
        }
        self.completed = true;
        info!(
            session_id = %session.session_id(),
            visited = %session.visited().len(),
            total = %session.len(),
            "tour_completed"
        );
        AdvanceOutcome::TourCompleted
    }

    /// Delayed advance posted after `AdvanceOutcome::Scheduled`
    pub fn auto_advance(&mut self, index: usize, origin_seq: u64) -> Result<NavOutcome, SessionError> {
        let Some(session) = self.session.as_ref() else {
            return Ok(NavOutcome::Ignored(IgnoreReason::NoSession));
        };
        if origin_seq != self.seq {
            return Ok(NavOutcome::Ignored(IgnoreReason::Superseded));
        }
        if session.active_index() == Some(index) {
            return Ok(NavOutcome::Ignored(IgnoreReason::AlreadyActive));
        }
        self.accept(index, NavReason::AutoAdvance)
    }

    /// Audio for `seq` has started (or fallen back to simulation).
    /// Returns false for a stale seq.
    pub fn transition_settled(&mut self, seq: u64) -> bool {
        match self.state {
            NavState::Transitioning { seq: current } if current == seq => {
                self.state = NavState::Ready;
                true
            }
            _ => false,
        }
    }

    /// Returns false when no session is loaded
    pub fn record_position(&mut self, fix: PositionFix) -> bool {
        match self.session.as_mut() {
            Some(session) => {
                session.record_position(fix);
                true
            }
            None => false,
        }
    }

    fn accept(&mut self, index: usize, reason: NavReason) -> Result<NavOutcome, SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(NavOutcome::Ignored(IgnoreReason::NoSession));
        };
        let previous = session.set_active(index)?;

        self.seq += 1;
        self.state = NavState::Transitioning { seq: self.seq };

        let transition = Transition {
            seq: self.seq,
            previous,
            index,
            reason,
            reveal_card: reason == NavReason::Geofence,
        };

        info!(
            seq = %transition.seq,
            index = %index,
            previous = ?previous,
            reason = %reason.as_str(),
            "point_activated"
        );

        Ok(NavOutcome::Accepted(transition))
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn session(&self) -> Option<&TourSession> {
        self.session.as_ref()
    }

    pub fn active_index(&self) -> Option<usize> {
        self.session.as_ref().and_then(TourSession::active_index)
    }

    /// Seq of the most recent accepted transition
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn advance_delay(&self) -> Duration {
        self.advance_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::test_support::route_of;

    fn loaded(n: usize) -> NavigationController {
        let mut nav = NavigationController::default();
        nav.load(route_of(n)).unwrap();
        nav
    }

    fn accept(outcome: Result<NavOutcome, SessionError>) -> Transition {
        match outcome {
            Ok(NavOutcome::Accepted(t)) => t,
            other => panic!("expected accepted transition, got {other:?}"),
        }
    }

    fn ignored(outcome: Result<NavOutcome, SessionError>) -> IgnoreReason {
        match outcome {
            Ok(NavOutcome::Ignored(reason)) => reason,
            other => panic!("expected ignored, got {other:?}"),
        }
    }

    #[test]
    fn test_load_enters_ready() {
        let nav = loaded(3);
        assert_eq!(nav.state(), NavState::Ready);
        assert_eq!(nav.active_index(), None);
    }

    #[test]
    fn test_load_invalid_route_keeps_idle() {
        let mut nav = NavigationController::default();
        assert!(nav.load(route_of(0)).is_err());
        assert_eq!(nav.state(), NavState::Idle);
        assert!(nav.session().is_none());
    }

    #[test]
    fn test_requests_without_session_are_ignored() {
        let mut nav = NavigationController::default();
        assert_eq!(ignored(nav.manual_navigate(0)), IgnoreReason::NoSession);
        assert_eq!(ignored(nav.geofence_candidate(0, Instant::now())), IgnoreReason::NoSession);
        assert_eq!(nav.playback_ended(0), AdvanceOutcome::Ignored);
    }

    #[test]
    fn test_manual_navigate_transitions() {
        let mut nav = loaded(3);
        let t = accept(nav.manual_navigate(1));
        assert_eq!(t.seq, 1);
        assert_eq!(t.previous, None);
        assert_eq!(t.reason, NavReason::Manual);
        assert!(!t.reveal_card);
        assert_eq!(nav.state(), NavState::Transitioning { seq: 1 });
        assert_eq!(nav.active_index(), Some(1));
    }

    #[test]
    fn test_manual_navigate_to_active_is_idempotent() {
        let mut nav = loaded(3);
        let t = accept(nav.manual_navigate(1));
        nav.transition_settled(t.seq);

        assert_eq!(ignored(nav.manual_navigate(1)), IgnoreReason::AlreadyActive);
        assert_eq!(nav.seq(), 1);
        assert_eq!(nav.state(), NavState::Ready);
    }

    #[test]
    fn test_manual_navigate_out_of_range() {
        let mut nav = loaded(3);
        let err = nav.manual_navigate(7).unwrap_err();
        assert_eq!(err, SessionError::IndexOutOfRange { index: 7, len: 3 });
        assert_eq!(nav.seq(), 0);
    }

    #[test]
    fn test_manual_supersedes_in_flight_transition() {
        let mut nav = loaded(4);
        let first = accept(nav.manual_navigate(1));
        let second = accept(nav.manual_navigate(3));

        assert_eq!(second.seq, first.seq + 1);
        assert_eq!(second.previous, Some(1));
        assert_eq!(nav.state(), NavState::Transitioning { seq: second.seq });

        // Settling the superseded transition has no effect
        assert!(!nav.transition_settled(first.seq));
        assert!(nav.transition_settled(second.seq));
        assert_eq!(nav.state(), NavState::Ready);
    }

    #[test]
    fn test_geofence_refused_while_transitioning() {
        let mut nav = loaded(3);
        accept(nav.manual_navigate(0));
        assert_eq!(ignored(nav.geofence_candidate(2, Instant::now())), IgnoreReason::Busy);
        assert_eq!(nav.active_index(), Some(0));
    }

    #[test]
    fn test_geofence_reveals_card() {
        let mut nav = loaded(3);
        let t = accept(nav.geofence_candidate(2, Instant::now()));
        assert_eq!(t.reason, NavReason::Geofence);
        assert!(t.reveal_card);
    }

    #[test]
    fn test_geofence_cooldown_per_point() {
        let mut nav = loaded(6);
        let start = Instant::now();

        let t = accept(nav.geofence_candidate(5, start));
        nav.transition_settled(t.seq);

        // User walks to point 0, then the same candidate arrives again 1s after the first
        let t = accept(nav.manual_navigate(0));
        nav.transition_settled(t.seq);
        nav.observe_zones(&[0]);
        let again = nav.geofence_candidate(5, start + Duration::from_secs(1));
        assert_eq!(ignored(again), IgnoreReason::CoolingDown);
        assert_eq!(nav.active_index(), Some(0));

        // After the cool-down it is accepted again
        let t = accept(nav.geofence_candidate(5, start + Duration::from_secs(6)));
        assert_eq!(t.index, 5);
    }

    #[test]
    fn test_geofence_on_active_point_is_ignored() {
        let mut nav = loaded(3);
        let now = Instant::now();
        let t = accept(nav.geofence_candidate(1, now));
        nav.transition_settled(t.seq);
        let later = now + Duration::from_secs(60);
        assert_eq!(ignored(nav.geofence_candidate(1, later)), IgnoreReason::AlreadyActive);
    }

    #[test]
    fn test_next_previous_bounded() {
        let mut nav = loaded(2);
        assert_eq!(ignored(nav.previous()), IgnoreReason::AtBoundary);

        assert_eq!(accept(nav.next()).index, 0);
        assert_eq!(ignored(nav.previous()), IgnoreReason::AtBoundary);
        assert_eq!(accept(nav.next()).index, 1);
        assert_eq!(ignored(nav.next()), IgnoreReason::AtBoundary);
        assert_eq!(accept(nav.previous()).index, 0);
    }

    #[test]
    fn test_transition_direction() {
        let mut nav = loaded(5);
        assert_eq!(accept(nav.manual_navigate(0)).direction(), Direction::Jump);
        assert_eq!(accept(nav.manual_navigate(1)).direction(), Direction::Forward);
        assert_eq!(accept(nav.manual_navigate(0)).direction(), Direction::Backward);
        assert_eq!(accept(nav.manual_navigate(4)).direction(), Direction::Jump);
    }

    #[test]
    fn test_visited_is_monotonic() {
        let mut nav = loaded(4);
        for index in [2, 0, 3, 0] {
            let t = accept(nav.manual_navigate(index));
            nav.transition_settled(t.seq);
        }
        let visited: Vec<_> = nav.session().unwrap().visited().iter().copied().collect();
        assert_eq!(visited, vec![0, 2, 3]);
    }

    #[test]
    fn test_playback_ended_schedules_next() {
        let mut nav = loaded(3);
        let t = accept(nav.manual_navigate(0));
        nav.transition_settled(t.seq);

        let outcome = nav.playback_ended(t.seq);
        assert_eq!(
            outcome,
            AdvanceOutcome::Scheduled { next: 1, delay: DEFAULT_AUTO_ADVANCE_DELAY, origin_seq: t.seq }
        );

        let advanced = accept(nav.auto_advance(1, t.seq));
        assert_eq!(advanced.reason, NavReason::AutoAdvance);
        assert_eq!(advanced.previous, Some(0));
    }

    #[test]
    fn test_auto_advance_dropped_after_manual_navigation() {
        let mut nav = loaded(4);
        let t = accept(nav.manual_navigate(0));
        nav.transition_settled(t.seq);
        let AdvanceOutcome::Scheduled { next, origin_seq, .. } = nav.playback_ended(t.seq) else {
            panic!("expected scheduled advance");
        };

        // User jumps during the delay
        accept(nav.manual_navigate(3));
        assert_eq!(ignored(nav.auto_advance(next, origin_seq)), IgnoreReason::Superseded);
        assert_eq!(nav.active_index(), Some(3));
    }

    #[test]
    fn test_stale_playback_end_ignored() {
        let mut nav = loaded(3);
        let first = accept(nav.manual_navigate(0));
        accept(nav.manual_navigate(1));
        assert_eq!(nav.playback_ended(first.seq), AdvanceOutcome::Ignored);
    }

    #[test]
    fn test_tour_completed_on_last_point_once() {
        let mut nav = loaded(3);
        let t = accept(nav.manual_navigate(2));
        nav.transition_settled(t.seq);

        assert_eq!(nav.playback_ended(t.seq), AdvanceOutcome::TourCompleted);
        assert!(nav.is_completed());
        assert_eq!(nav.active_index(), Some(2));
        assert_eq!(nav.playback_ended(t.seq), AdvanceOutcome::Ignored);
    }

    #[test]
    fn test_reload_resets_cooldown_but_not_seq() {
        let mut nav = loaded(3);
        let now = Instant::now();
        accept(nav.geofence_candidate(1, now));
        let seq_before = nav.seq();

        nav.load(route_of(3)).unwrap();
        let t = accept(nav.geofence_candidate(1, now));
        assert!(t.seq > seq_before);
        assert_eq!(t.previous, None);
    }

    #[test]
    fn test_unload_returns_session() {
        let mut nav = loaded(2);
        accept(nav.manual_navigate(1));
        let session = nav.unload().unwrap();
        assert_eq!(session.active_index(), Some(1));
        assert_eq!(nav.state(), NavState::Idle);
        assert!(!nav.record_position(PositionFix::new(48.0, 11.0, 5.0, 1)));
    }

    #[test]
    fn test_geofence_needs_zone_entry_after_leaving_point() {
        let mut nav = loaded(3);
        let start = Instant::now();

        let t = accept(nav.geofence_candidate(0, start));
        nav.transition_settled(t.seq);
        nav.observe_zones(&[0]);

        // Auto-advance moves on while the user is still standing at point 0
        let ended = nav.playback_ended(t.seq);
        let AdvanceOutcome::Scheduled { next, origin_seq, .. } = ended else {
            panic!("expected scheduled advance, got {ended:?}");
        };
        let t = accept(nav.auto_advance(next, origin_seq));
        nav.transition_settled(t.seq);

        nav.observe_zones(&[0]);
        let later = start + Duration::from_secs(60);
        assert_eq!(ignored(nav.geofence_candidate(0, later)), IgnoreReason::NotEntered);
        assert_eq!(nav.active_index(), Some(1));

        // Walking out and back in re-arms the zone
        nav.observe_zones(&[]);
        nav.observe_zones(&[0]);
        assert_eq!(accept(nav.geofence_candidate(0, later)).index, 0);
    }

    #[test]
    fn test_manual_next_not_undone_by_standing_in_zone() {
        let mut nav = loaded(3);
        let t = accept(nav.manual_navigate(0));
        nav.transition_settled(t.seq);
        nav.observe_zones(&[0]);

        let t = accept(nav.next());
        nav.transition_settled(t.seq);
        nav.observe_zones(&[0]);

        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(ignored(nav.geofence_candidate(0, later)), IgnoreReason::NotEntered);
        assert_eq!(nav.active_index(), Some(1));
    }

    #[test]
    fn test_suppressed_zone_stays_armed() {
        let mut nav = loaded(3);
        let t = accept(nav.manual_navigate(0));
        nav.observe_zones(&[2]);
        assert_eq!(ignored(nav.geofence_candidate(2, Instant::now())), IgnoreReason::Busy);

        nav.transition_settled(t.seq);
        nav.observe_zones(&[2]);
        assert_eq!(accept(nav.geofence_candidate(2, Instant::now())).index, 2);
    }
}
