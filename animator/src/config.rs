use std::{env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use shared::{CameraMode, CameraOverride};

use crate::surface::DEFAULT_MARKER_DATA_URI;
use crate::telemetry::{TelemetryCalculator, DEFAULT_NOMINAL_SPEED_KMH};

pub const DEFAULT_DIRECTIONS_API_ROOT: &str = "https://api.mapbox.com/directions/v5/mapbox";
pub const DEFAULT_ROUTE_FILE: &str = "animator/data/sample_route.json";
/// Upper bound for the load watchdog, one day.
pub const MAX_WATCHDOG_SECS: u64 = 24 * 60 * 60;

/// Animation parameters. Every field is optional in the JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnimationConfig {
    pub show_waypoints: bool,
    pub map_style: String,
    pub camera_mode: CameraMode,
    pub reveal_path: bool,
    /// Frame count; falls back to the composition length when unset or 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation_duration: Option<u32>,
    pub nominal_speed_kmh: f64,
    pub watchdog_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_override: Option<CameraOverride>,
    pub marker_icon: String,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            show_waypoints: true,
            map_style: "streets-v11".into(),
            camera_mode: CameraMode::default(),
            reveal_path: false,
            animation_duration: None,
            nominal_speed_kmh: DEFAULT_NOMINAL_SPEED_KMH,
            watchdog_secs: 30,
            camera_override: None,
            marker_icon: DEFAULT_MARKER_DATA_URI.into(),
        }
    }
}

impl AnimationConfig {
    pub fn style_url(&self) -> String {
        format!("mapbox://styles/mapbox/{}", self.map_style)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs.min(MAX_WATCHDOG_SECS))
    }

    /// Replace out-of-range values once, so frame planning never sees them.
    pub fn validated(mut self) -> Self {
        if TelemetryCalculator::checked(self.nominal_speed_kmh).is_none() {
            tracing::warn!(
                "ignoring nominal speed {} km/h, using {DEFAULT_NOMINAL_SPEED_KMH}",
                self.nominal_speed_kmh
            );
            self.nominal_speed_kmh = DEFAULT_NOMINAL_SPEED_KMH;
        }
        if self.watchdog_secs > MAX_WATCHDOG_SECS {
            tracing::warn!(
                "watchdog of {}s is too long, capping at {MAX_WATCHDOG_SECS}s",
                self.watchdog_secs
            );
            self.watchdog_secs = MAX_WATCHDOG_SECS;
        }
        self
    }

    pub fn total_frames(&self, composition: &Composition) -> u32 {
        self.animation_duration
            .filter(|frames| *frames > 0)
            .unwrap_or(composition.duration_in_frames)
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    pub fps: u32,
    pub duration_in_frames: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for Composition {
    fn default() -> Self {
        Self {
            fps: 30,
            duration_in_frames: 300,
            width: 1280,
            height: 720,
        }
    }
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub access_token: Option<String>,
    pub directions_token: Option<String>,
    pub directions_api_root: String,
    pub directions_profile: String,
    pub database_url: Option<String>,
    pub route_file: PathBuf,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let access_token = get("MAPBOX_PUBLIC_TOKEN").or_else(|| get("REMOTION_MAPBOX_PUBLIC_TOKEN"));
        let directions_token = get("MAPBOX_SECRET_TOKEN").or_else(|| access_token.clone());

        Self {
            access_token,
            directions_token,
            directions_api_root: get("DIRECTIONS_API_ROOT")
                .unwrap_or_else(|| DEFAULT_DIRECTIONS_API_ROOT.into()),
            directions_profile: get("DIRECTIONS_PROFILE").unwrap_or_else(|| "driving".into()),
            database_url: get("DATABASE_URL"),
            route_file: get("ROUTE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROUTE_FILE)),
        }
    }
}
