use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use geo_types::Point;
use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};
use shared::{LineStringGeometry, LngLat, RouteDocument, WaypointDocument};

use crate::error::RouteError;
use crate::route::Route;

const CREATOR: &str = "route_animator";

#[derive(Debug, thiserror::Error)]
pub enum GpxImportError {
    #[error("failed to parse GPX: {0}")]
    Parse(#[from] gpx::errors::GpxError),
    #[error("GPX file has no track or route points")]
    Empty,
}

/// Route as a base64 GPX 1.1 document: the path as one track segment,
/// waypoints as named GPX waypoints.
pub fn encode_route_as_gpx(route: &Route) -> Result<String, RouteError> {
    let name = route.name().unwrap_or(CREATOR).to_string();
    let mut gpx = Gpx {
        version: GpxVersion::Gpx11,
        creator: Some(CREATOR.into()),
        ..Default::default()
    };
    let mut track = Track {
        name: Some(name),
        ..Default::default()
    };

    let mut segment = TrackSegment::new();
    segment
        .points
        .extend(route.path().iter().map(|p| to_waypoint(*p)));
    track.segments.push(segment);
    gpx.tracks.push(track);

    for annotation in route.waypoints() {
        let mut waypoint = to_waypoint(annotation.position);
        waypoint.name = Some(annotation.label.clone());
        gpx.waypoints.push(waypoint);
    }

    let mut buffer = Vec::new();
    gpx::write(&gpx, &mut buffer)?;
    Ok(BASE64.encode(buffer))
}

fn to_waypoint(position: LngLat) -> Waypoint {
    Waypoint::new(Point::new(position.lng, position.lat))
}

/// Read a GPX file into a geometry-first route document. Track points win,
/// route points are used when the file has no tracks.
pub fn read_gpx_document<R: Read>(reader: R) -> Result<RouteDocument, GpxImportError> {
    let gpx = gpx::read(reader)?;

    let track_points: Vec<&Waypoint> = gpx
        .tracks
        .iter()
        .flat_map(|t| t.segments.iter())
        .flat_map(|s| s.points.iter())
        .collect();
    let points = if track_points.is_empty() {
        gpx.routes.iter().flat_map(|r| r.points.iter()).collect()
    } else {
        track_points
    };
    if points.is_empty() {
        return Err(GpxImportError::Empty);
    }

    let coordinates = points
        .iter()
        .map(|wp| {
            let p = wp.point();
            vec![p.x(), p.y()]
        })
        .collect();

    let name = gpx
        .tracks
        .iter()
        .find_map(|t| t.name.clone())
        .or_else(|| gpx.routes.iter().find_map(|r| r.name.clone()))
        .or_else(|| gpx.metadata.as_ref().and_then(|m| m.name.clone()));

    let waypoints = gpx
        .waypoints
        .iter()
        .map(|wp| {
            let p = wp.point();
            WaypointDocument {
                lat: Some(p.y()),
                lng: Some(p.x()),
                label: wp.name.clone(),
                ..Default::default()
            }
        })
        .collect();

    tracing::debug!("imported GPX document {:?}", name);
    Ok(RouteDocument {
        name,
        geometry: Some(LineStringGeometry {
            kind: "LineString".into(),
            coordinates,
        }),
        waypoints,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use shared::Waypoint as Annotation;

    use super::*;
    use crate::route::RouteInput;

    const TRACK_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <wpt lat="45.05" lon="5.05"><name>Col</name></wpt>
  <trk>
    <name>Morning ride</name>
    <trkseg>
      <trkpt lat="45.0" lon="5.0"></trkpt>
      <trkpt lat="45.05" lon="5.05"></trkpt>
      <trkpt lat="45.1" lon="5.1"></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

    const ROUTE_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <rte>
    <name>Planned</name>
    <rtept lat="44.0" lon="4.0"></rtept>
    <rtept lat="44.1" lon="4.1"></rtept>
  </rte>
</gpx>"#;

    #[test]
    fn track_becomes_geometry() {
        let doc = read_gpx_document(TRACK_GPX.as_bytes()).unwrap();
        assert_eq!(doc.name.as_deref(), Some("Morning ride"));
        let geometry = doc.geometry.as_ref().unwrap();
        assert_eq!(geometry.coordinates.len(), 3);
        assert_eq!(geometry.coordinates[0], vec![5.0, 45.0]);
        assert_eq!(doc.waypoints[0].label.as_deref(), Some("Col"));

        let RouteInput::Ready(route) = Route::from_document(&doc).unwrap() else {
            panic!("track documents carry geometry");
        };
        assert_eq!(route.waypoints()[0].label, "Col");
    }

    #[test]
    fn routes_used_without_tracks() {
        let doc = read_gpx_document(ROUTE_GPX.as_bytes()).unwrap();
        assert_eq!(doc.name.as_deref(), Some("Planned"));
        assert_eq!(doc.geometry.unwrap().coordinates[1], vec![4.1, 44.1]);
    }

    #[test]
    fn empty_gpx_is_rejected() {
        let empty = r#"<?xml version="1.0"?><gpx version="1.1" creator="test"></gpx>"#;
        assert!(matches!(
            read_gpx_document(empty.as_bytes()),
            Err(GpxImportError::Empty)
        ));
    }

    #[test]
    fn exported_gpx_reads_back() {
        let route = Route::from_geometry(
            vec![LngLat::new(5.0, 45.0), LngLat::new(5.1, 45.1)],
            vec![Annotation {
                position: LngLat::new(5.05, 45.05),
                label: "Halfway".into(),
            }],
        )
        .unwrap()
        .with_name(Some("Export".into()));

        let encoded = encode_route_as_gpx(&route).unwrap();
        let xml = BASE64.decode(encoded).unwrap();
        let doc = read_gpx_document(xml.as_slice()).unwrap();
        assert_eq!(doc.name.as_deref(), Some("Export"));
        assert_eq!(doc.geometry.unwrap().coordinates.len(), 2);
        assert_eq!(doc.waypoints[0].label.as_deref(), Some("Halfway"));
    }
}
