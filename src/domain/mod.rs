//! Domain models - core tour types and session state
//!
//! This module contains the canonical data types used throughout the system:
//! - `Route` / `Point` - the tour catalog snapshot
//! - `PositionFix` - a single location fix
//! - `TourSession` - active point, visited set, last known position
//! - `error` - the session/media/position/catalog error taxonomy

pub mod error;
pub mod session;
pub mod types;

// Re-export commonly used types at module level
pub use error::{CatalogError, MediaError, PositionError, SessionError};
pub use session::TourSession;
pub use types::{Coordinate, Point, PointId, PositionFix, Route, RouteId};
