use shared::{CameraMode, CameraOverride, CameraPose, LngLat};

use crate::geometry;
use crate::route::Route;

pub const LOCKED_LOOK_AHEAD_KM: f64 = 0.1;
pub const CINEMATIC_LOOK_AHEAD_KM: f64 = 0.3;

const FOLLOW_PITCH: f64 = 60.0;
const FOLLOW_ZOOM: f64 = 14.0;
const OVERHEAD_ZOOM: f64 = 13.0;

/// Camera pose for a given progress. Pure: the same inputs always give the
/// same pose, whatever frames were planned before.
pub fn plan_camera(route: &Route, progress: f64, mode: CameraMode) -> CameraPose {
    let progress = if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    };
    let traveled = route.path_length_km() * progress;
    let center = route.point_at(traveled);

    match mode {
        CameraMode::Overhead => CameraPose {
            center,
            bearing: 0.0,
            pitch: 0.0,
            zoom: OVERHEAD_ZOOM,
        },
        CameraMode::Locked | CameraMode::Free => {
            follow(route, center, traveled, LOCKED_LOOK_AHEAD_KM)
        }
        CameraMode::Cinematic => follow(route, center, traveled, CINEMATIC_LOOK_AHEAD_KM),
    }
}

fn follow(route: &Route, center: LngLat, traveled: f64, look_ahead: f64) -> CameraPose {
    CameraPose {
        center,
        bearing: heading(route, center, traveled, look_ahead),
        pitch: FOLLOW_PITCH,
        zoom: FOLLOW_ZOOM,
    }
}

fn heading(route: &Route, center: LngLat, traveled: f64, look_ahead: f64) -> f64 {
    let length = route.path_length_km();
    if length <= 0.0 {
        return 0.0;
    }
    if traveled + look_ahead <= length {
        return geometry::bearing(center, route.point_at(traveled + look_ahead));
    }
    // Window runs past the end: hold the heading of the final stretch.
    let end = route.point_at(length);
    let from = route.point_at((length - look_ahead).max(0.0));
    geometry::bearing(from, end)
}

/// Replace whichever fields the override sets.
pub fn apply_override(pose: CameraPose, camera_override: &CameraOverride) -> CameraPose {
    CameraPose {
        center: pose.center,
        bearing: camera_override
            .bearing
            .filter(|b| b.is_finite())
            .map(geometry::normalize_bearing)
            .unwrap_or(pose.bearing),
        pitch: camera_override
            .pitch
            .filter(|p| p.is_finite())
            .unwrap_or(pose.pitch),
        zoom: camera_override
            .zoom
            .filter(|z| z.is_finite())
            .unwrap_or(pose.zoom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eastward() -> Route {
        Route::from_geometry(
            vec![LngLat::new(4.0, 45.0), LngLat::new(4.2, 45.0)],
            Vec::new(),
        )
        .unwrap()
    }

    /// East, then a sharp turn north.
    fn corner() -> Route {
        Route::from_geometry(
            vec![
                LngLat::new(4.0, 45.0),
                LngLat::new(4.01, 45.0),
                LngLat::new(4.01, 45.01),
            ],
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn overhead_is_fixed_and_only_center_moves() {
        let route = corner();
        let mut centers = Vec::new();
        for progress in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let pose = plan_camera(&route, progress, CameraMode::Overhead);
            assert_eq!(pose.bearing, 0.0);
            assert_eq!(pose.pitch, 0.0);
            assert_eq!(pose.zoom, 13.0);
            centers.push(pose.center);
        }
        assert_eq!(centers[0], route.start());
        assert_ne!(centers[0], centers[4]);
    }

    #[test]
    fn locked_follows_direction_of_travel() {
        let pose = plan_camera(&eastward(), 0.1, CameraMode::Locked);
        assert!((pose.bearing - 90.0).abs() < 0.5, "bearing {}", pose.bearing);
        assert_eq!(pose.pitch, 60.0);
        assert_eq!(pose.zoom, 14.0);
    }

    #[test]
    fn free_matches_locked() {
        let route = corner();
        for progress in [0.0, 0.3, 0.9] {
            assert_eq!(
                plan_camera(&route, progress, CameraMode::Free),
                plan_camera(&route, progress, CameraMode::Locked)
            );
        }
    }

    #[test]
    fn cinematic_turns_earlier_than_locked() {
        // 0.2 km before the corner, only the longer window reaches past it.
        let route = corner();
        let length = route.path_length_km();
        let progress = (geometry::haversine_km(route.path()[0], route.path()[1]) - 0.2) / length;

        let locked = plan_camera(&route, progress, CameraMode::Locked);
        let cinematic = plan_camera(&route, progress, CameraMode::Cinematic);
        assert!((locked.bearing - 90.0).abs() < 0.5);
        assert!(cinematic.bearing < locked.bearing - 1.0);
    }

    #[test]
    fn heading_holds_near_the_end() {
        let route = corner();
        let at_end = plan_camera(&route, 1.0, CameraMode::Cinematic);
        let almost = plan_camera(&route, 0.995, CameraMode::Cinematic);
        assert!(at_end.bearing.is_finite());
        assert_eq!(at_end.bearing, almost.bearing);
        assert!(at_end.bearing < 1.0 || at_end.bearing > 359.0);
    }

    #[test]
    fn progress_is_clamped() {
        let route = eastward();
        assert_eq!(
            plan_camera(&route, 1.7, CameraMode::Locked),
            plan_camera(&route, 1.0, CameraMode::Locked)
        );
        assert_eq!(
            plan_camera(&route, f64::NAN, CameraMode::Locked),
            plan_camera(&route, 0.0, CameraMode::Locked)
        );
    }

    #[test]
    fn zero_length_path_points_north() {
        let route = Route::from_geometry(
            vec![LngLat::new(4.0, 45.0), LngLat::new(4.0, 45.0)],
            Vec::new(),
        )
        .unwrap();
        let pose = plan_camera(&route, 0.5, CameraMode::Cinematic);
        assert_eq!(pose.bearing, 0.0);
        assert_eq!(pose.center, LngLat::new(4.0, 45.0));
    }

    #[test]
    fn override_replaces_only_given_fields() {
        let pose = plan_camera(&eastward(), 0.0, CameraMode::Free);
        let adjusted = apply_override(
            pose,
            &CameraOverride {
                bearing: Some(-90.0),
                pitch: None,
                zoom: Some(16.5),
            },
        );
        assert_eq!(adjusted.bearing, 270.0);
        assert_eq!(adjusted.pitch, pose.pitch);
        assert_eq!(adjusted.zoom, 16.5);
        assert_eq!(adjusted.center, pose.center);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_pose_is_deterministic_and_bounded(progress in 0.0..=1.0f64) {
                let route = corner();
                for mode in [CameraMode::Locked, CameraMode::Free, CameraMode::Cinematic, CameraMode::Overhead] {
                    let a = plan_camera(&route, progress, mode);
                    let b = plan_camera(&route, progress, mode);
                    prop_assert_eq!(a, b);
                    prop_assert!((0.0..360.0).contains(&a.bearing));
                    prop_assert!(a.center.is_valid());
                }
            }
        }
    }
}
