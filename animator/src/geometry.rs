//! Great-circle operations over an ordered `[lng, lat]` path.
//!
//! Every distance here is geodesic on a sphere of radius [`EARTH_RADIUS_KM`].
//! Do not mix these results with planar degree arithmetic.

use shared::LngLat;

pub const EARTH_RADIUS_KM: f64 = 6_371.008_8;

const ANGULAR_EPSILON: f64 = 1e-12;

pub fn haversine_km(a: LngLat, b: LngLat) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lng - a.lng).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Sum of consecutive segment lengths. Empty and single-point paths are 0.
pub fn path_length_km(path: &[LngLat]) -> f64 {
    path.windows(2).map(|w| haversine_km(w[0], w[1])).sum()
}

/// Distance from the path start to every vertex. Accumulates in the same
/// order as [`point_at_distance`] so vertex lookups agree bit for bit.
pub fn cumulative_km(path: &[LngLat]) -> Vec<f64> {
    let mut out = Vec::with_capacity(path.len());
    let mut traveled = 0.0;
    for (idx, point) in path.iter().enumerate() {
        if idx > 0 {
            traveled += haversine_km(path[idx - 1], *point);
        }
        out.push(traveled);
    }
    out
}

/// Initial compass bearing from `from` to `to`, in [0, 360).
///
/// Coincident points yield 0.
pub fn bearing(from: LngLat, to: LngLat) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let dlon = (to.lng - from.lng).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    normalize_bearing(y.atan2(x).to_degrees())
}

pub fn normalize_bearing(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0) + 0.0;
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Point a fraction `t` of the way along the great circle from `a` to `b`.
pub fn intermediate_point(a: LngLat, b: LngLat, t: f64) -> LngLat {
    let delta = haversine_km(a, b) / EARTH_RADIUS_KM;
    let sin_delta = delta.sin();
    if sin_delta.abs() < ANGULAR_EPSILON {
        return LngLat::new(a.lng + (b.lng - a.lng) * t, a.lat + (b.lat - a.lat) * t);
    }

    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let wa = ((1.0 - t) * delta).sin() / sin_delta;
    let wb = (t * delta).sin() / sin_delta;

    let x = wa * lat1.cos() * lon1.cos() + wb * lat2.cos() * lon2.cos();
    let y = wa * lat1.cos() * lon1.sin() + wb * lat2.cos() * lon2.sin();
    let z = wa * lat1.sin() + wb * lat2.sin();

    LngLat::new(
        y.atan2(x).to_degrees(),
        z.atan2((x * x + y * y).sqrt()).to_degrees(),
    )
}

/// Point `distance_km` along the path, clamped to [0, length].
///
/// A distance landing exactly on a vertex returns that vertex. `None` only
/// for an empty path.
pub fn point_at_distance(path: &[LngLat], distance_km: f64) -> Option<LngLat> {
    let (&first, rest) = path.split_first()?;
    // NaN lands here too
    if !(distance_km > 0.0) {
        return Some(first);
    }

    let mut traveled = 0.0;
    let mut prev = first;
    for &next in rest {
        if distance_km <= traveled {
            return Some(prev);
        }
        let reached = traveled + haversine_km(prev, next);
        if distance_km < reached {
            let t = (distance_km - traveled) / (reached - traveled);
            return Some(intermediate_point(prev, next, t));
        }
        traveled = reached;
        prev = next;
    }
    Some(prev)
}

/// Contiguous slice between two along-path distances, endpoints interpolated.
pub fn slice_along(path: &[LngLat], start_km: f64, stop_km: f64) -> Vec<LngLat> {
    let start_km = start_km.max(0.0);
    let stop_km = stop_km.max(start_km);
    let (Some(head), Some(tail)) = (
        point_at_distance(path, start_km),
        point_at_distance(path, stop_km),
    ) else {
        return Vec::new();
    };

    let mut out = vec![head];
    out.extend(
        path.iter()
            .zip(cumulative_km(path))
            .filter(|(_, at)| *at > start_km && *at < stop_km)
            .map(|(point, _)| *point),
    );
    out.push(tail);
    out
}

/// Along-path distance of the point on `path` closest to `target`.
pub fn locate_km(path: &[LngLat], target: LngLat) -> f64 {
    let cumulative = cumulative_km(path);
    let mut best = (f64::INFINITY, 0.0);

    for (idx, pair) in path.windows(2).enumerate() {
        let (a, b) = (pair[0], pair[1]);
        let segment = cumulative[idx + 1] - cumulative[idx];
        let along = if segment > 0.0 {
            along_track_km(a, b, target).clamp(0.0, segment)
        } else {
            0.0
        };
        let foot = if segment > 0.0 {
            intermediate_point(a, b, along / segment)
        } else {
            a
        };
        let offset = haversine_km(foot, target);
        if offset < best.0 {
            best = (offset, cumulative[idx] + along);
        }
    }

    best.1
}

/// Signed along-track distance of `p` projected onto the great circle a→b.
fn along_track_km(a: LngLat, b: LngLat, p: LngLat) -> f64 {
    let d13 = haversine_km(a, p) / EARTH_RADIUS_KM;
    let theta = (bearing(a, p) - bearing(a, b)).to_radians();
    let cross = (d13.sin() * theta.sin()).asin();
    let cos_cross = cross.cos();
    if cos_cross.abs() < ANGULAR_EPSILON {
        return 0.0;
    }
    let along = (d13.cos() / cos_cross).clamp(-1.0, 1.0).acos() * EARTH_RADIUS_KM;
    if theta.cos() < 0.0 { -along } else { along }
}

/// Slice of `path` between the projections of `from` and `to`, in path order.
pub fn sub_path(path: &[LngLat], from: LngLat, to: LngLat) -> Vec<LngLat> {
    let a = locate_km(path, from);
    let b = locate_km(path, to);
    slice_along(path, a.min(b), a.max(b))
}
