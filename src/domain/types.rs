//! Shared types for the tour guide

use serde::{Deserialize, Deserializer, Serialize};

/// Default activation radius when the catalog omits one (meters)
pub const DEFAULT_ACTIVATION_RADIUS_M: f64 = 50.0;

/// Nominal narration length when the catalog omits one (seconds)
pub const DEFAULT_NOMINAL_DURATION_SECS: u32 = 120;

/// Newtype wrapper for route IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub String);

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for point IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointId(pub String);

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// WGS84 coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    #[inline]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both axes finite and inside the WGS84 ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Catalog coordinates are GeoJSON ordered: `[lng, lat]`
fn deserialize_lng_lat<'de, D>(deserializer: D) -> Result<Coordinate, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, SeqAccess, Visitor};

    struct LngLatVisitor;

    impl<'de> Visitor<'de> for LngLatVisitor {
        type Value = Coordinate;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a [lng, lat] pair or a {lat, lng} object")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Coordinate, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let lng: f64 = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(0, &self))?;
            let lat: f64 = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(1, &self))?;
            // Altitude (third element) is tolerated and ignored
            while seq.next_element::<serde::de::IgnoredAny>()?.is_some() {}
            Ok(Coordinate { lat, lng })
        }

        fn visit_map<A>(self, map: A) -> Result<Coordinate, A::Error>
        where
            A: de::MapAccess<'de>,
        {
            Coordinate::deserialize(de::value::MapAccessDeserializer::new(map))
        }
    }

    deserializer.deserialize_any(LngLatVisitor)
}

fn default_activation_radius() -> f64 {
    DEFAULT_ACTIVATION_RADIUS_M
}

fn default_audio_file() -> String {
    "default.mp3".to_string()
}

fn default_audio_folder() -> String {
    "audio/".to_string()
}

/// A single geofenced stop with narration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub id: PointId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "deserialize_lng_lat")]
    pub coordinates: Coordinate,
    #[serde(default = "default_activation_radius")]
    pub activation_radius: f64,
    #[serde(default = "default_audio_file")]
    pub audio_file: String,
    /// Nominal narration length in seconds
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub tips: Option<String>,
}

impl Point {
    /// Nominal duration, falling back to the catalog default
    #[inline]
    pub fn nominal_duration_secs(&self) -> f64 {
        f64::from(self.duration.filter(|d| *d > 0).unwrap_or(DEFAULT_NOMINAL_DURATION_SECS))
    }
}

/// An ordered sequence of points. Order defines navigation and the map polyline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: RouteId,
    pub name: String,
    #[serde(default = "default_audio_folder")]
    pub audio_folder: String,
    #[serde(default)]
    pub points: Vec<Point>,
}

/// A single location fix from the position source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    #[serde(flatten)]
    pub coord: Coordinate,
    /// Accuracy radius in meters
    #[serde(default)]
    pub accuracy_m: f64,
    /// Epoch milliseconds when the fix was taken
    pub ts: u64,
}

impl PositionFix {
    #[inline]
    pub fn new(lat: f64, lng: f64, accuracy_m: f64, ts: u64) -> Self {
        Self { coord: Coordinate::new(lat, lng), accuracy_m, ts }
    }
}

/// Format seconds as `m:ss`, `0:00` for negative or non-finite input
pub fn format_mmss(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG_JSON: &str = r#"{
        "id": "old-town",
        "name": "Old Town",
        "audioFolder": "audio/old-town/",
        "points": [
            {
                "id": "p1",
                "name": "Cathedral",
                "description": "Start here",
                "coordinates": [13.4050, 52.5200],
                "activationRadius": 40,
                "audioFile": "cathedral.mp3",
                "duration": 95,
                "type": "church",
                "tips": "Look up"
            },
            {
                "id": "p2",
                "name": "Market",
                "coordinates": [13.4100, 52.5210]
            }
        ]
    }"#;

    #[test]
    fn test_route_deserializes_lng_lat_order() {
        let route: Route = serde_json::from_str(CATALOG_JSON).unwrap();
        assert_eq!(route.points.len(), 2);
        let p1 = &route.points[0];
        assert_eq!(p1.coordinates.lat, 52.5200);
        assert_eq!(p1.coordinates.lng, 13.4050);
        assert_eq!(p1.activation_radius, 40.0);
        assert_eq!(p1.kind.as_deref(), Some("church"));
        assert_eq!(p1.nominal_duration_secs(), 95.0);
    }

    #[test]
    fn test_point_defaults() {
        let route: Route = serde_json::from_str(CATALOG_JSON).unwrap();
        let p2 = &route.points[1];
        assert_eq!(p2.activation_radius, DEFAULT_ACTIVATION_RADIUS_M);
        assert_eq!(p2.audio_file, "default.mp3");
        assert_eq!(p2.nominal_duration_secs(), 120.0);
        assert!(p2.description.is_empty());
    }

    #[test]
    fn test_coordinate_object_form() {
        let json = r#"{"id":"p","name":"n","coordinates":{"lat":1.5,"lng":2.5}}"#;
        let point: Point = serde_json::from_str(json).unwrap();
        assert_eq!(point.coordinates, Coordinate::new(1.5, 2.5));
    }

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::new(52.5, 13.4).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -181.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_format_mmss() {
        assert_eq!(format_mmss(0.0), "0:00");
        assert_eq!(format_mmss(65.9), "1:05");
        assert_eq!(format_mmss(600.0), "10:00");
        assert_eq!(format_mmss(-3.0), "0:00");
        assert_eq!(format_mmss(f64::NAN), "0:00");
    }
}
