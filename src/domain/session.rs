//! Tour session - canonical state of one walk through a route

use crate::domain::error::SessionError;
use crate::domain::types::{Point, PositionFix, Route};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// State of one tour, created when a route is loaded and dropped when the
/// user leaves the tour. Progress is not persisted.
#[derive(Debug, Clone)]
pub struct TourSession {
    session_id: String,
    route: Route,
    active_index: Option<usize>,
    /// Indices that have been active at least once. Only ever grows.
    visited: BTreeSet<usize>,
    last_position: Option<PositionFix>,
}

impl TourSession {
    /// Start a session on a route snapshot
    pub fn load(route: Route) -> Result<Self, SessionError> {
        validate_route(&route)?;

        let session_id = new_uuid_v7();
        debug!(
            session_id = %session_id,
            route = %route.id,
            points = %route.points.len(),
            "session_loaded"
        );

        Ok(Self {
            session_id,
            route,
            active_index: None,
            visited: BTreeSet::new(),
            last_position: None,
        })
    }

    /// Make `index` the active point. Returns the previous active index.
    pub fn set_active(&mut self, index: usize) -> Result<Option<usize>, SessionError> {
        let len = self.route.points.len();
        if index >= len {
            return Err(SessionError::IndexOutOfRange { index, len });
        }
        let previous = self.active_index.replace(index);
        self.visited.insert(index);
        Ok(previous)
    }

    pub fn record_position(&mut self, fix: PositionFix) {
        self.last_position = Some(fix);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn points(&self) -> &[Point] {
        &self.route.points
    }

    pub fn len(&self) -> usize {
        self.route.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.route.points.is_empty()
    }

    pub fn point(&self, index: usize) -> Option<&Point> {
        self.route.points.get(index)
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    pub fn active_point(&self) -> Option<&Point> {
        self.active_index.and_then(|i| self.point(i))
    }

    pub fn visited(&self) -> &BTreeSet<usize> {
        &self.visited
    }

    pub fn is_visited(&self, index: usize) -> bool {
        self.visited.contains(&index)
    }

    #[inline]
    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.route.points.len()
    }

    pub fn last_position(&self) -> Option<&PositionFix> {
        self.last_position.as_ref()
    }
}

fn validate_route(route: &Route) -> Result<(), SessionError> {
    if route.points.is_empty() {
        return Err(SessionError::InvalidRoute(format!("route {} has no points", route.id)));
    }

    for (i, point) in route.points.iter().enumerate() {
        if !point.activation_radius.is_finite() || point.activation_radius <= 0.0 {
            return Err(SessionError::InvalidRoute(format!(
                "point {} (index {i}) has activation radius {}",
                point.id, point.activation_radius
            )));
        }
        if !point.coordinates.is_valid() {
            return Err(SessionError::InvalidRoute(format!(
                "point {} (index {i}) has coordinates outside WGS84 range",
                point.id
            )));
        }
    }

    Ok(())
}
