use std::{future::Future, pin::Pin};

use serde::Deserialize;
use shared::{LineStringGeometry, LngLat};

use crate::config::SessionConfig;
use crate::error::{InvalidRouteError, RouteResolutionError};
use crate::route::ExternalRouteRequest;

/// Geometry and totals returned by a directions service, in its own units.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRoute {
    pub path: Vec<LngLat>,
    pub distance_m: Option<f64>,
    pub duration_s: Option<f64>,
}

pub type ResolveFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ResolvedRoute, RouteResolutionError>> + Send + 'a>>;

/// Turns an ordered chain of points into road geometry. Called at most once
/// per session, never retried.
pub trait DirectionsResolver: Send + Sync {
    fn resolve<'a>(&'a self, request: &'a ExternalRouteRequest) -> ResolveFuture<'a>;
}

/// Mapbox Directions v5 client.
#[derive(Debug, Clone)]
pub struct MapboxDirections {
    client: reqwest::Client,
    api_root: String,
    profile: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    geometry: LineStringGeometry,
    #[serde(default)]
    distance: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
}

impl MapboxDirections {
    pub fn new(
        api_root: impl Into<String>,
        profile: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_root: api_root.into().trim_end_matches('/').to_string(),
            profile: profile.into(),
            access_token,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.directions_api_root.clone(),
            config.directions_profile.clone(),
            config.directions_token.clone(),
        )
    }

    /// Request URL without the credential.
    pub fn request_url(&self, coordinates: &[LngLat]) -> String {
        let joined = coordinates
            .iter()
            .map(|p| format!("{},{}", p.lng, p.lat))
            .collect::<Vec<_>>()
            .join(";");
        format!("{}/{}/{}", self.api_root, self.profile, joined)
    }

    async fn fetch(
        &self,
        request: &ExternalRouteRequest,
    ) -> Result<ResolvedRoute, RouteResolutionError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or(RouteResolutionError::MissingCredential)?;
        let coordinates = request.coordinates();
        if coordinates.len() < 2 {
            return Err(RouteResolutionError::TooFewPoints {
                usable: coordinates.len(),
            });
        }

        let url = self.request_url(&coordinates);
        tracing::info!("calculating route through {} points: {url}", coordinates.len());

        let response = self
            .client
            .get(&url)
            .query(&[
                ("geometries", "geojson"),
                ("overview", "full"),
                ("access_token", token),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("directions API error: {} - {body}", status.as_u16());
            return Err(RouteResolutionError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: DirectionsResponse = response.json().await?;
        parse_response(body)
    }
}

impl DirectionsResolver for MapboxDirections {
    fn resolve<'a>(&'a self, request: &'a ExternalRouteRequest) -> ResolveFuture<'a> {
        Box::pin(self.fetch(request))
    }
}

fn parse_response(body: DirectionsResponse) -> Result<ResolvedRoute, RouteResolutionError> {
    let Some(route) = body.routes.into_iter().next() else {
        let message = body
            .message
            .or(body.code)
            .unwrap_or_else(|| "unknown error".into());
        return Err(RouteResolutionError::NoRoute { message });
    };

    let path = route
        .geometry
        .coordinates
        .iter()
        .enumerate()
        .map(|(index, position)| match position.as_slice() {
            [lng, lat, ..] => Ok(LngLat::new(*lng, *lat)),
            _ => Err(InvalidRouteError::MalformedPosition { index }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        "route calculated: {} points, {:?} m, {:?} s",
        path.len(),
        route.distance,
        route.duration
    );
    Ok(ResolvedRoute {
        path,
        distance_m: route.distance,
        duration_s: route.duration,
    })
}
