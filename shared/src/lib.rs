use serde::{Deserialize, Serialize};

/// A geographic position. Serialized as a GeoJSON `[lng, lat]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Finite and inside lng ∈ [-180, 180], lat ∈ [-90, 90].
    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

impl From<[f64; 2]> for LngLat {
    fn from([lng, lat]: [f64; 2]) -> Self {
        Self { lng, lat }
    }
}

impl From<LngLat> for [f64; 2] {
    fn from(p: LngLat) -> Self {
        [p.lng, p.lat]
    }
}

/// A labelled map annotation. Not used for animation timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub position: LngLat,
    pub label: String,
}

/// Route document as stored by the publishing tools or written to disk.
///
/// Two shapes are accepted: geometry-first (`geometry` present) and the
/// chain form (`startLocation` + `waypoints[].position`) that still needs a
/// directions lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<LineStringGeometry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waypoints: Vec<WaypointDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_location: Option<StartLocation>,
    /// Kilometres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_distance: Option<f64>,
    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RouteDocumentMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineStringGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Vec<Vec<f64>>,
}

impl LineStringGeometry {
    pub fn from_path(path: &[LngLat]) -> Self {
        Self {
            kind: "LineString".into(),
            coordinates: path.iter().map(|p| vec![p.lng, p.lat]).collect(),
        }
    }
}

/// Waypoint entry. Geometry-first documents use the flat `{lat, lng, label}`
/// form, chain documents use `{position: {lat, lng}, notes | address}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaypointDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<LatLng>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl WaypointDocument {
    /// Position from either the nested or the flat form.
    pub fn lng_lat(&self) -> Option<LngLat> {
        match (self.position, self.lng, self.lat) {
            (Some(p), _, _) => Some(LngLat::new(p.lng, p.lat)),
            (None, Some(lng), Some(lat)) => Some(LngLat::new(lng, lat)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LatLng>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Metadata block written by the directions fetcher, in directions-API units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Metres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_distance: Option<f64>,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    Locked,
    Free,
    #[default]
    Cinematic,
    Overhead,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub center: LngLat,
    /// Degrees in [0, 360).
    pub bearing: f64,
    pub pitch: f64,
    pub zoom: f64,
}

/// Externally supplied camera values, honored in `free` mode only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom: Option<f64>,
}

/// Props handed to the heads-up display each frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HudProps {
    pub distance: String,
    pub time: String,
    /// 0–100.
    pub progress: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationState {
    pub frame_index: u32,
    pub total_frames: u32,
    pub progress: f64,
    pub traveled_distance_km: f64,
    pub current_position: LngLat,
    pub camera_pose: CameraPose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lng_lat_serializes_as_pair() {
        let json = serde_json::to_string(&LngLat::new(5.5, 45.25)).unwrap();
        assert_eq!(json, "[5.5,45.25]");
        let back: LngLat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LngLat::new(5.5, 45.25));
    }

    #[test]
    fn lng_lat_bounds() {
        assert!(LngLat::new(180.0, -90.0).is_valid());
        assert!(!LngLat::new(180.5, 0.0).is_valid());
        assert!(!LngLat::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn parses_chain_document() {
        let doc: RouteDocument = serde_json::from_str(
            r#"{
                "name": "Coast run",
                "startLocation": {"location": {"lat": 40.97, "lng": 27.51}, "address": "Depot"},
                "waypoints": [{"position": {"lat": 40.79, "lng": 27.36}, "notes": "Beach"}]
            }"#,
        )
        .unwrap();
        assert!(doc.geometry.is_none());
        assert_eq!(doc.waypoints[0].lng_lat(), Some(LngLat::new(27.36, 40.79)));
        assert_eq!(doc.start_location.unwrap().address.as_deref(), Some("Depot"));
    }

    #[test]
    fn camera_mode_is_lowercase() {
        let mode: CameraMode = serde_json::from_str("\"overhead\"").unwrap();
        assert_eq!(mode, CameraMode::Overhead);
        assert_eq!(CameraMode::default(), CameraMode::Cinematic);
    }
}
