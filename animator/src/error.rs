use thiserror::Error;

/// Malformed or out-of-bounds route data. Raised at construction, never
/// clamped away.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidRouteError {
    #[error("route path needs at least 2 points, got {count}")]
    TooFewPoints { count: usize },
    #[error("coordinate {index} is out of bounds: [{lng}, {lat}]")]
    OutOfBounds { index: usize, lng: f64, lat: f64 },
    #[error("coordinate {index} is not a finite number")]
    NonFinite { index: usize },
    #[error("coordinate {index} is not a [lng, lat] position")]
    MalformedPosition { index: usize },
    #[error("unsupported geometry type {0:?}, expected LineString")]
    UnsupportedGeometry(String),
    #[error("waypoint {index} has no usable position")]
    InvalidWaypoint { index: usize },
    #[error("geometry missing and no waypoints to calculate a route from")]
    MissingGeometry,
}

/// External directions resolution failed. Terminal for the session.
#[derive(Debug, Error)]
pub enum RouteResolutionError {
    #[error("not enough points to calculate a route: {usable} usable, need start + end")]
    TooFewPoints { usable: usize },
    #[error("no route found: {message}")]
    NoRoute { message: String },
    #[error("directions API error: {status} - {body}")]
    Http { status: u16, body: String },
    #[error("directions request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("directions credential not configured")]
    MissingCredential,
    #[error("directions returned an unusable geometry: {0}")]
    InvalidGeometry(#[from] InvalidRouteError),
}

/// A visual asset could not be loaded. The session continues without it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("failed to load asset {asset}: {reason}")]
pub struct AssetLoadError {
    pub asset: String,
    pub reason: String,
}

/// The render surface could not start (bad credential, no container...).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("render surface failed to initialize: {reason}")]
pub struct SurfaceInitError {
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to build GPX document: {0}")]
    Gpx(#[from] gpx::errors::GpxError),
    #[error(transparent)]
    InvalidRoute(#[from] InvalidRouteError),
    #[error(transparent)]
    Resolution(#[from] RouteResolutionError),
}
