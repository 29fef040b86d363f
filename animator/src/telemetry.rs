use shared::HudProps;

use crate::route::Route;

/// Fallback average speed when the source carries no duration.
pub const DEFAULT_NOMINAL_SPEED_KMH: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub progress: f64,
    pub traveled_km: f64,
    pub remaining_minutes: f64,
    pub total_distance_km: f64,
}

impl Telemetry {
    pub fn hud_props(&self) -> HudProps {
        HudProps {
            distance: format!("{:.1}", self.traveled_km),
            time: format_duration(self.remaining_minutes),
            progress: self.progress * 100.0,
        }
    }
}

/// Progress through the animation in [0, 1]. A single-frame (or empty)
/// animation is complete on its first frame.
pub fn progress_fraction(frame_index: u32, total_frames: u32) -> f64 {
    if total_frames <= 1 {
        return 1.0;
    }
    (f64::from(frame_index) / f64::from(total_frames - 1)).min(1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryCalculator {
    nominal_speed_kmh: f64,
}

impl Default for TelemetryCalculator {
    fn default() -> Self {
        Self {
            nominal_speed_kmh: DEFAULT_NOMINAL_SPEED_KMH,
        }
    }
}

impl TelemetryCalculator {
    /// Falls back to the default speed for non-finite or non-positive values.
    pub fn new(nominal_speed_kmh: f64) -> Self {
        Self::checked(nominal_speed_kmh).unwrap_or_default()
    }

    pub fn checked(nominal_speed_kmh: f64) -> Option<Self> {
        (nominal_speed_kmh.is_finite() && nominal_speed_kmh > 0.0)
            .then_some(Self { nominal_speed_kmh })
    }

    pub fn nominal_speed_kmh(&self) -> f64 {
        self.nominal_speed_kmh
    }

    /// Depends on nothing but its arguments, so any frame can be computed
    /// out of order.
    pub fn compute(&self, route: &Route, frame_index: u32, total_frames: u32) -> Telemetry {
        let progress = progress_fraction(frame_index, total_frames);
        let total_distance_km = route.total_distance_km();
        let total_minutes = route
            .total_duration_min()
            .unwrap_or(total_distance_km / self.nominal_speed_kmh * 60.0);

        Telemetry {
            progress,
            traveled_km: total_distance_km * progress,
            remaining_minutes: total_minutes * (1.0 - progress),
            total_distance_km,
        }
    }
}

pub fn compute_telemetry(route: &Route, frame_index: u32, total_frames: u32) -> Telemetry {
    TelemetryCalculator::default().compute(route, frame_index, total_frames)
}

/// `90.0` → `"1h 30m"`, `42.7` → `"42m"`.
pub fn format_duration(minutes: f64) -> String {
    let minutes = if minutes.is_finite() { minutes.max(0.0) } else { 0.0 };
    let hours = (minutes / 60.0).floor();
    let rest = (minutes % 60.0).floor();
    if hours > 0.0 {
        format!("{hours}h {rest}m")
    } else {
        format!("{rest}m")
    }
}
