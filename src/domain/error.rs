//! Error taxonomy for tour sessions and their collaborators
//!
//! - `SessionError` - route validation and index errors (session-level)
//! - `MediaError` - narration failed to load or play (recovered by simulation)
//! - `PositionError` - location source failures (surfaced as status)
//! - `CatalogError` - route fetch failures

use crate::domain::types::RouteId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Empty or malformed route. Fatal to session start.
    #[error("invalid route: {0}")]
    InvalidRoute(String),

    /// Navigation target outside the route. A programming error.
    #[error("index {index} out of range for route with {len} points")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MediaError {
    #[error("audio resource not found: {0}")]
    NotFound(String),

    #[error("audio resource unavailable: {0}")]
    Unavailable(String),

    #[error("audio load timed out after {0} ms")]
    Timeout(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location unavailable")]
    Unavailable,

    #[error("location request timed out")]
    Timeout,
}

impl PositionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionError::PermissionDenied => "permission_denied",
            PositionError::Unavailable => "unavailable",
            PositionError::Timeout => "timeout",
        }
    }

    /// Whether the watch can keep running after this error
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PositionError::Timeout)
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("route not found: {0}")]
    NotFound(RouteId),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}
