//! Services - tour logic and state management
//!
//! This module contains the core tour services:
//! - `geofence` - Distance math and candidate selection
//! - `navigator` - Active point transitions (manual, geofence, auto-advance)
//! - `playback` - Narration state machine with simulated fallback
//! - `position_tracker` - Position watch, fix filtering, restart on request
//! - `tour` - The event loop that owns one session

pub mod geofence;
pub mod navigator;
pub mod playback;
pub mod position_tracker;
pub mod tour;

// Re-export commonly used types
pub use navigator::{NavOutcome, NavReason, NavigationController, Transition};
pub use playback::{PlaybackController, PlaybackState, PlaybackStatus};
pub use position_tracker::{PositionProvider, PositionSource, PositionTracker, PositionUpdate};
pub use tour::{TourCommand, TourEvent, TourRunner, TourSettings};
