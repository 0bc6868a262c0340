//! Geofence evaluation - which point, if any, the user has arrived at
//!
//! Pure functions over a position and the route's points:
//! - A point qualifies when the great-circle distance is within its activation radius
//! - Hysteresis: if the active point still qualifies, nothing changes
//! - Otherwise the most deeply entered zone wins (smallest `distance - radius`),
//!   ties go to the lowest route index

use crate::domain::types::{Coordinate, Point};
use smallvec::SmallVec;

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A point whose activation zone contains the position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub index: usize,
    pub distance_m: f64,
    /// `distance - radius`; more negative means deeper inside the zone
    pub depth_m: f64,
}

/// Great-circle distance between two coordinates in meters (haversine)
pub fn distance_m(from: Coordinate, to: Coordinate) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let dlat = (to.lat - from.lat).to_radians();
    let dlng = (to.lng - from.lng).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// All points whose zone contains `position`, in route order
pub fn qualifying(position: Coordinate, points: &[Point]) -> SmallVec<[Candidate; 4]> {
    points
        .iter()
        .enumerate()
        .filter_map(|(index, point)| {
            let distance_m = distance_m(position, point.coordinates);
            (distance_m <= point.activation_radius).then(|| Candidate {
                index,
                distance_m,
                depth_m: distance_m - point.activation_radius,
            })
        })
        .collect()
}

/// Decide which point should become active for `position`.
///
/// Returns `None` both when no zone contains the position and when the
/// currently active point still qualifies.
pub fn evaluate(position: Coordinate, points: &[Point], active: Option<usize>) -> Option<Candidate> {
    select(&qualifying(position, points), active)
}

/// `evaluate` over an already computed `qualifying` list
pub fn select(candidates: &[Candidate], active: Option<usize>) -> Option<Candidate> {
    if let Some(active) = active {
        if candidates.iter().any(|c| c.index == active) {
            return None;
        }
    }

    // Candidates are in route order, so keeping the first of equal depths
    // resolves ties to the lowest index.
    candidates.iter().copied().fold(None, |best: Option<Candidate>, c| match best {
        Some(b) if b.depth_m <= c.depth_m => Some(b),
        _ => Some(c),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::test_support::point;

    /// Offset a coordinate north by `meters`
    fn north_of(origin: Coordinate, meters: f64) -> Coordinate {
        let dlat = (meters / EARTH_RADIUS_M).to_degrees();
        Coordinate::new(origin.lat + dlat, origin.lng)
    }

    #[test]
    fn test_distance_zero() {
        let c = Coordinate::new(52.52, 13.405);
        assert_eq!(distance_m(c, c), 0.0);
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        let d = distance_m(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        // 1 degree of arc on the mean sphere is ~111.19 km
        assert!((d - 111_195.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = Coordinate::new(48.1372, 11.5756);
        let b = Coordinate::new(48.1500, 11.5900);
        assert!((distance_m(a, b) - distance_m(b, a)).abs() < 1e-6);
    }

    #[test]
    fn test_three_point_scenario_picks_middle() {
        // Points 1 and 3 sit either side of point 2; fix lands 30m from point 2
        // and more than 200m from the other two.
        let p2 = Coordinate::new(48.0, 11.0);
        let points = vec![
            point("p1", north_of(p2, -232.0).lat, 11.0, 50.0),
            point("p2", p2.lat, p2.lng, 50.0),
            point("p3", north_of(p2, 232.0).lat, 11.0, 50.0),
        ];
        let fix = north_of(p2, 30.0);

        assert!(distance_m(fix, points[0].coordinates) > 200.0);
        assert!(distance_m(fix, points[2].coordinates) > 200.0);

        let candidate = evaluate(fix, &points, None).unwrap();
        assert_eq!(candidate.index, 1);
        assert!((candidate.distance_m - 30.0).abs() < 0.5);
    }

    #[test]
    fn test_no_candidate_outside_all_zones() {
        let points = vec![point("a", 48.0, 11.0, 50.0), point("b", 48.01, 11.0, 50.0)];
        let far = Coordinate::new(49.0, 11.0);
        assert_eq!(evaluate(far, &points, None), None);
        assert!(qualifying(far, &points).is_empty());
    }

    #[test]
    fn test_radius_boundary_is_inclusive() {
        let origin = Coordinate::new(48.0, 11.0);
        let fix = north_of(origin, 49.99);
        let points = vec![point("a", origin.lat, origin.lng, 50.0)];
        assert_eq!(evaluate(fix, &points, None).map(|c| c.index), Some(0));
    }

    #[test]
    fn test_hysteresis_keeps_active_point() {
        // Overlapping zones: A (radius 100) and B (radius 100) 60m apart.
        let a = Coordinate::new(48.0, 11.0);
        let b = north_of(a, 60.0);
        let points = vec![point("a", a.lat, a.lng, 100.0), point("b", b.lat, b.lng, 100.0)];

        // Fix sits right on B: B is "deeper", but A is active and still qualifies.
        assert_eq!(evaluate(b, &points, Some(0)), None);
        // Without an active point, B wins on depth.
        assert_eq!(evaluate(b, &points, None).map(|c| c.index), Some(1));
    }

    #[test]
    fn test_switches_when_active_no_longer_qualifies() {
        let a = Coordinate::new(48.0, 11.0);
        let b = north_of(a, 300.0);
        let points = vec![point("a", a.lat, a.lng, 50.0), point("b", b.lat, b.lng, 50.0)];
        assert_eq!(evaluate(north_of(b, 10.0), &points, Some(0)).map(|c| c.index), Some(1));
    }

    #[test]
    fn test_deepest_zone_wins() {
        // Fix 40m from A (radius 50, depth -10) and 40m from B (radius 100, depth -60).
        let fix = Coordinate::new(48.0, 11.0);
        let points = vec![
            point("a", north_of(fix, 40.0).lat, 11.0, 50.0),
            point("b", north_of(fix, -40.0).lat, 11.0, 100.0),
        ];
        assert_eq!(evaluate(fix, &points, None).map(|c| c.index), Some(1));
    }

    #[test]
    fn test_tie_breaks_to_lowest_index() {
        let c = Coordinate::new(48.0, 11.0);
        let points = vec![
            point("far", 49.0, 11.0, 50.0),
            point("x", c.lat, c.lng, 50.0),
            point("y", c.lat, c.lng, 50.0),
        ];
        assert_eq!(evaluate(c, &points, None).map(|c| c.index), Some(1));
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let c = Coordinate::new(48.0, 11.0);
        let points = vec![
            point("a", c.lat, c.lng, 80.0),
            point("b", north_of(c, 20.0).lat, 11.0, 80.0),
            point("c", north_of(c, 500.0).lat, 11.0, 80.0),
        ];
        for active in [None, Some(0), Some(1), Some(2)] {
            let first = evaluate(north_of(c, 12.0), &points, active);
            let second = evaluate(north_of(c, 12.0), &points, active);
            assert_eq!(first, second);
        }
    }
}
