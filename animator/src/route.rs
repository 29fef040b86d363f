use geojson::FeatureCollection;
use shared::{LngLat, RouteDocument, Waypoint, WaypointDocument};

use crate::directions::ResolvedRoute;
use crate::error::{InvalidRouteError, RouteError, RouteResolutionError};
use crate::geometry;
use crate::surface::{line_feature, waypoint_features};

/// Immutable, validated route for one render session.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    path: Vec<LngLat>,
    waypoints: Vec<Waypoint>,
    total_distance_km: Option<f64>,
    total_duration_min: Option<f64>,
    name: Option<String>,
    path_length_km: f64,
}

/// Outcome of reading a document: either a usable route, or a chain of
/// points an external directions service still has to turn into geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteInput {
    Ready(Route),
    NeedsResolution(ExternalRouteRequest),
}

impl Route {
    pub fn from_geometry(
        path: Vec<LngLat>,
        waypoints: Vec<Waypoint>,
    ) -> Result<Self, InvalidRouteError> {
        if path.len() < 2 {
            return Err(InvalidRouteError::TooFewPoints { count: path.len() });
        }
        for (index, point) in path.iter().enumerate() {
            check_position(index, *point)?;
        }
        for (index, waypoint) in waypoints.iter().enumerate() {
            if !waypoint.position.is_valid() {
                return Err(InvalidRouteError::InvalidWaypoint { index });
            }
        }

        let path_length_km = geometry::path_length_km(&path);
        Ok(Self {
            path,
            waypoints,
            total_distance_km: None,
            total_duration_min: None,
            name: None,
            path_length_km,
        })
    }

    /// Declared totals from the source. Non-finite or negative values are
    /// ignored and the route falls back to its own measurements.
    pub fn with_totals(mut self, distance_km: Option<f64>, duration_min: Option<f64>) -> Self {
        self.total_distance_km = distance_km.filter(|d| d.is_finite() && *d >= 0.0);
        self.total_duration_min = duration_min.filter(|d| d.is_finite() && *d >= 0.0);
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn from_document(doc: &RouteDocument) -> Result<RouteInput, RouteError> {
        let name = document_name(doc);
        let geometry = doc
            .geometry
            .as_ref()
            .filter(|g| !g.coordinates.is_empty());

        let Some(geometry) = geometry else {
            let chain = chain_points(doc);
            if chain.is_empty() {
                return Err(InvalidRouteError::MissingGeometry.into());
            }
            tracing::info!("route geometry missing, {} chain points need resolution", chain.len());
            let request = from_waypoint_chain(chain)?.with_name(name);
            return Ok(RouteInput::NeedsResolution(request));
        };

        if geometry.kind != "LineString" {
            return Err(InvalidRouteError::UnsupportedGeometry(geometry.kind.clone()).into());
        }
        let path = geometry
            .coordinates
            .iter()
            .enumerate()
            .map(|(index, position)| match position.as_slice() {
                [lng, lat, ..] => Ok(LngLat::new(*lng, *lat)),
                _ => Err(InvalidRouteError::MalformedPosition { index }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let waypoints = annotation_waypoints(&doc.waypoints)?;

        let route = Route::from_geometry(path, waypoints)?
            .with_totals(document_distance_km(doc), document_duration_min(doc))
            .with_name(name);
        Ok(RouteInput::Ready(route))
    }

    pub fn path(&self) -> &[LngLat] {
        &self.path
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn start(&self) -> LngLat {
        self.path[0]
    }

    /// Geodesic length of the path itself.
    pub fn path_length_km(&self) -> f64 {
        self.path_length_km
    }

    /// Declared distance if the source supplied one, else the path length.
    pub fn total_distance_km(&self) -> f64 {
        self.total_distance_km.unwrap_or(self.path_length_km)
    }

    pub fn total_duration_min(&self) -> Option<f64> {
        self.total_duration_min
    }

    pub fn point_at(&self, distance_km: f64) -> LngLat {
        geometry::point_at_distance(&self.path, distance_km).unwrap_or(self.path[0])
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let mut route = line_feature(&self.path);
        route.set_property("kind", "route");
        if let Some(name) = &self.name {
            route.set_property("name", name.clone());
        }

        let mut features = vec![route];
        features.extend(waypoint_features(&self.waypoints).features);
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

fn check_position(index: usize, point: LngLat) -> Result<(), InvalidRouteError> {
    if !point.lng.is_finite() || !point.lat.is_finite() {
        return Err(InvalidRouteError::NonFinite { index });
    }
    if !point.is_valid() {
        return Err(InvalidRouteError::OutOfBounds {
            index,
            lng: point.lng,
            lat: point.lat,
        });
    }
    Ok(())
}

/// Ordered coordinates handed to an external directions resolver. Building
/// one never touches the network.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalRouteRequest {
    points: Vec<Waypoint>,
    name: Option<String>,
}

/// Keep the usable points of a chain; fewer than two is a resolution error.
pub fn from_waypoint_chain(
    points: Vec<Waypoint>,
) -> Result<ExternalRouteRequest, RouteResolutionError> {
    let total = points.len();
    let usable: Vec<Waypoint> = points
        .into_iter()
        .filter(|wp| wp.position.is_valid())
        .collect();
    if usable.len() < total {
        tracing::warn!("dropped {} chain points with invalid positions", total - usable.len());
    }
    if usable.len() < 2 {
        return Err(RouteResolutionError::TooFewPoints {
            usable: usable.len(),
        });
    }
    Ok(ExternalRouteRequest {
        points: usable,
        name: None,
    })
}

impl ExternalRouteRequest {
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn coordinates(&self) -> Vec<LngLat> {
        self.points.iter().map(|wp| wp.position).collect()
    }

    pub fn points(&self) -> &[Waypoint] {
        &self.points
    }

    /// Build the route from a resolver answer. Chain points stay on as
    /// annotation waypoints.
    pub fn into_route(self, resolved: ResolvedRoute) -> Result<Route, RouteResolutionError> {
        let route = Route::from_geometry(resolved.path, self.points)?
            .with_totals(
                resolved.distance_m.map(|m| m / 1000.0),
                resolved.duration_s.map(|s| s / 60.0),
            )
            .with_name(self.name);
        Ok(route)
    }
}

fn document_name(doc: &RouteDocument) -> Option<String> {
    doc.name
        .clone()
        .or_else(|| doc.metadata.as_ref().and_then(|m| m.name.clone()))
}

fn document_distance_km(doc: &RouteDocument) -> Option<f64> {
    doc.total_distance.or_else(|| {
        doc.metadata
            .as_ref()
            .and_then(|m| m.total_distance)
            .map(|metres| metres / 1000.0)
    })
}

fn document_duration_min(doc: &RouteDocument) -> Option<f64> {
    doc.total_duration.or_else(|| {
        doc.metadata
            .as_ref()
            .and_then(|m| m.total_duration)
            .map(|secs| secs / 60.0)
    })
}

fn waypoint_label(index: usize, wp: &WaypointDocument) -> String {
    wp.label
        .clone()
        .or_else(|| wp.notes.clone())
        .or_else(|| wp.address.clone())
        .unwrap_or_else(|| format!("Stop {}", index + 1))
}

fn annotation_waypoints(docs: &[WaypointDocument]) -> Result<Vec<Waypoint>, InvalidRouteError> {
    docs.iter()
        .enumerate()
        .map(|(index, wp)| {
            let position = wp
                .lng_lat()
                .ok_or(InvalidRouteError::InvalidWaypoint { index })?;
            Ok(Waypoint {
                position,
                label: waypoint_label(index, wp),
            })
        })
        .collect()
}

/// Start location followed by every waypoint that carries a position.
fn chain_points(doc: &RouteDocument) -> Vec<Waypoint> {
    let mut points = Vec::with_capacity(doc.waypoints.len() + 1);

    match doc.start_location.as_ref().and_then(|s| s.location.map(|l| (l, s))) {
        Some((location, start)) => points.push(Waypoint {
            position: LngLat::new(location.lng, location.lat),
            label: start.address.clone().unwrap_or_else(|| "Start".into()),
        }),
        None => tracing::warn!("no startLocation found, using waypoints only"),
    }

    points.extend(doc.waypoints.iter().enumerate().filter_map(|(index, wp)| {
        wp.lng_lat().map(|position| Waypoint {
            position,
            label: waypoint_label(index, wp),
        })
    }));
    points
}
