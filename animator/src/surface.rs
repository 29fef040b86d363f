//! The map widget the animation draws into, seen from the core as a sink for
//! declarative source/layer updates and camera moves.

use std::{collections::HashSet, future::Future, time::Duration};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use serde::Serialize;
use serde_json::json;
use shared::{CameraPose, LngLat, Waypoint};
use thiserror::Error;

use crate::config::AnimationConfig;
use crate::error::{AssetLoadError, SurfaceInitError};
use crate::route::Route;

pub const DEM_SOURCE: &str = "mapbox-dem";
pub const ROUTE_SOURCE: &str = "route";
pub const PROGRESS_SOURCE: &str = "progress";
pub const POINT_SOURCE: &str = "point";
pub const WAYPOINT_SOURCE: &str = "waypoints";
pub const MARKER_IMAGE: &str = "custom-marker";

const TERRAIN_EXAGGERATION: f64 = 1.5;
const INITIAL_ZOOM: f64 = 13.0;
const INITIAL_PITCH: f64 = 45.0;

/// 1x1 PNG used when no marker icon is configured.
pub const DEFAULT_MARKER_DATA_URI: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SurfaceError {
    #[error("render surface is not initialized")]
    NotInitialized,
    #[error("render surface was removed")]
    Removed,
    #[error("render surface rejected command: {0}")]
    Rejected(String),
}

/// Initial widget state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceOptions {
    #[serde(skip_serializing)]
    pub access_token: String,
    pub style: String,
    pub center: LngLat,
    pub zoom: f64,
    pub pitch: f64,
    pub bearing: f64,
    pub interactive: bool,
}

impl SurfaceOptions {
    pub fn initial(config: &AnimationConfig, route: &Route, access_token: String) -> Self {
        Self {
            access_token,
            style: config.style_url(),
            center: route.start(),
            zoom: INITIAL_ZOOM,
            pitch: INITIAL_PITCH,
            bearing: 0.0,
            interactive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SourceSpec {
    Geojson {
        data: GeoJson,
    },
    RasterDem {
        url: String,
        #[serde(rename = "tileSize")]
        tile_size: u32,
        maxzoom: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Line,
    Symbol,
    Circle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    pub source: String,
    pub layout: serde_json::Value,
    pub paint: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SurfaceCommand {
    AddSource { id: String, source: SourceSpec },
    SetTerrain { source: String, exaggeration: f64 },
    AddLayer { layer: LayerSpec },
    SetData { source: String, data: GeoJson },
    JumpTo { camera: CameraPose },
}

impl SurfaceCommand {
    fn geojson_source(id: &str, data: GeoJson) -> Self {
        Self::AddSource {
            id: id.into(),
            source: SourceSpec::Geojson { data },
        }
    }

    fn layer(
        id: &str,
        kind: LayerKind,
        source: &str,
        layout: serde_json::Value,
        paint: serde_json::Value,
    ) -> Self {
        Self::AddLayer {
            layer: LayerSpec {
                id: id.into(),
                kind,
                source: source.into(),
                layout,
                paint,
            },
        }
    }
}

/// A map widget. One instance per session: `init` once, `remove` at the end.
pub trait RenderSurface: Send {
    fn init(&mut self, options: &SurfaceOptions) -> Result<(), SurfaceInitError>;

    /// Resolves when the map style has finished loading.
    fn style_loaded(&mut self) -> impl Future<Output = Result<(), AssetLoadError>> + Send;

    fn load_image(
        &mut self,
        id: &str,
        icon: &MarkerIcon,
    ) -> impl Future<Output = Result<(), AssetLoadError>> + Send;

    fn apply(&mut self, command: SurfaceCommand) -> Result<(), SurfaceError>;

    fn remove(&mut self);
}

/// A decoded image handed to the widget as an icon.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerIcon {
    mime: String,
    bytes: Vec<u8>,
}

impl MarkerIcon {
    /// Parse a `data:<mime>;base64,<payload>` URI.
    pub fn from_data_uri(uri: &str) -> Result<Self, AssetLoadError> {
        let fail = |reason: &str| AssetLoadError {
            asset: MARKER_IMAGE.into(),
            reason: reason.into(),
        };

        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| fail("not a data URI"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| fail("data URI has no payload"))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| fail("only base64 data URIs are supported"))?;
        let bytes = BASE64
            .decode(payload.trim())
            .map_err(|e| fail(&format!("invalid base64: {e}")))?;
        if bytes.is_empty() {
            return Err(fail("empty image"));
        }

        Ok(Self {
            mime: mime.to_string(),
            bytes,
        })
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_png(&self) -> bool {
        self.bytes.starts_with(&PNG_SIGNATURE)
    }
}

pub fn line_feature(path: &[LngLat]) -> Feature {
    let coordinates = path.iter().map(|p| vec![p.lng, p.lat]).collect();
    feature(Value::LineString(coordinates))
}

pub fn point_feature(position: LngLat) -> Feature {
    feature(Value::Point(vec![position.lng, position.lat]))
}

pub fn point_collection(position: LngLat) -> FeatureCollection {
    collection(vec![point_feature(position)])
}

/// Waypoints as points carrying their label in `title`.
pub fn waypoint_features(waypoints: &[Waypoint]) -> FeatureCollection {
    let features = waypoints
        .iter()
        .map(|wp| {
            let mut f = point_feature(wp.position);
            f.set_property("title", wp.label.clone());
            f
        })
        .collect();
    collection(features)
}

fn feature(value: Value) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: None,
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn visibility(visible: bool) -> &'static str {
    if visible {
        "visible"
    } else {
        "none"
    }
}

/// Sources and layers issued once when the session becomes ready.
pub fn setup_commands(
    route: &Route,
    config: &AnimationConfig,
    marker_loaded: bool,
) -> Vec<SurfaceCommand> {
    let mut commands = vec![
        SurfaceCommand::AddSource {
            id: DEM_SOURCE.into(),
            source: SourceSpec::RasterDem {
                url: "mapbox://mapbox.mapbox-terrain-dem-v1".into(),
                tile_size: 512,
                maxzoom: 14,
            },
        },
        SurfaceCommand::SetTerrain {
            source: DEM_SOURCE.into(),
            exaggeration: TERRAIN_EXAGGERATION,
        },
        SurfaceCommand::geojson_source(ROUTE_SOURCE, GeoJson::Feature(line_feature(route.path()))),
    ];

    if config.reveal_path {
        commands.push(SurfaceCommand::layer(
            "route-bg",
            LayerKind::Line,
            ROUTE_SOURCE,
            json!({ "line-join": "round", "line-cap": "round" }),
            json!({ "line-color": "#cccccc", "line-width": 8, "line-opacity": 0.5 }),
        ));
    }

    commands.push(SurfaceCommand::geojson_source(
        PROGRESS_SOURCE,
        GeoJson::Feature(line_feature(&[])),
    ));
    commands.push(SurfaceCommand::layer(
        "progress-line",
        LayerKind::Line,
        PROGRESS_SOURCE,
        json!({ "line-join": "round", "line-cap": "round" }),
        json!({ "line-color": "#3b9ddd", "line-width": 8 }),
    ));
    commands.push(SurfaceCommand::layer(
        "route",
        LayerKind::Line,
        ROUTE_SOURCE,
        json!({
            "line-join": "round",
            "line-cap": "round",
            "visibility": visibility(!config.reveal_path),
        }),
        json!({ "line-color": "#3b9ddd", "line-width": 8 }),
    ));

    if marker_loaded {
        commands.push(SurfaceCommand::geojson_source(
            POINT_SOURCE,
            GeoJson::FeatureCollection(point_collection(route.start())),
        ));
        commands.push(SurfaceCommand::layer(
            "point",
            LayerKind::Symbol,
            POINT_SOURCE,
            json!({
                "icon-image": MARKER_IMAGE,
                "icon-size": 0.2,
                "icon-allow-overlap": true,
                "icon-ignore-placement": true,
            }),
            json!({}),
        ));
    } else {
        tracing::warn!("marker image unavailable, rendering without the position marker");
    }

    if !route.waypoints().is_empty() {
        let shown = visibility(config.show_waypoints);
        commands.push(SurfaceCommand::geojson_source(
            WAYPOINT_SOURCE,
            GeoJson::FeatureCollection(waypoint_features(route.waypoints())),
        ));
        commands.push(SurfaceCommand::layer(
            "waypoints-layer",
            LayerKind::Circle,
            WAYPOINT_SOURCE,
            json!({ "visibility": shown }),
            json!({
                "circle-radius": 6,
                "circle-color": "#ffffff",
                "circle-stroke-width": 2,
                "circle-stroke-color": "#3b9ddd",
            }),
        ));
        commands.push(SurfaceCommand::layer(
            "waypoints-labels",
            LayerKind::Symbol,
            WAYPOINT_SOURCE,
            json!({
                "text-field": ["get", "title"],
                "text-font": ["Open Sans Semibold", "Arial Unicode MS Bold"],
                "text-offset": [0, 1.25],
                "text-anchor": "top",
                "text-size": 12,
                "visibility": shown,
            }),
            json!({
                "text-color": "#333333",
                "text-halo-color": "#ffffff",
                "text-halo-width": 1,
            }),
        ));
    }

    commands
}

/// Test and export behaviour of a [`HeadlessSurface`].
#[derive(Debug, Clone, Default)]
pub struct HeadlessBehavior {
    pub reject_init: Option<String>,
    pub style_error: Option<String>,
    pub style_delay: Option<Duration>,
    /// Style never finishes loading.
    pub stall_style: bool,
    pub image_error: Option<String>,
}

/// In-memory surface. Records every command so the stream can be replayed
/// by a real map player.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    behavior: HeadlessBehavior,
    options: Option<SurfaceOptions>,
    images: Vec<String>,
    sources: HashSet<String>,
    commands: Vec<SurfaceCommand>,
    removed: bool,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: HeadlessBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    pub fn options(&self) -> Option<&SurfaceOptions> {
        self.options.as_ref()
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn commands(&self) -> &[SurfaceCommand] {
        &self.commands
    }

    /// Take the commands recorded so far.
    pub fn drain(&mut self) -> Vec<SurfaceCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

impl RenderSurface for HeadlessSurface {
    fn init(&mut self, options: &SurfaceOptions) -> Result<(), SurfaceInitError> {
        if let Some(reason) = &self.behavior.reject_init {
            return Err(SurfaceInitError {
                reason: reason.clone(),
            });
        }
        if options.access_token.trim().is_empty() {
            return Err(SurfaceInitError {
                reason: "access token is empty".into(),
            });
        }
        if self.options.is_some() {
            return Err(SurfaceInitError {
                reason: "surface already initialized".into(),
            });
        }
        tracing::debug!("headless surface initialized with style {}", options.style);
        self.options = Some(options.clone());
        Ok(())
    }

    async fn style_loaded(&mut self) -> Result<(), AssetLoadError> {
        if self.behavior.stall_style {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.behavior.style_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior.style_error {
            Some(reason) => Err(AssetLoadError {
                asset: "style".into(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn load_image(&mut self, id: &str, icon: &MarkerIcon) -> Result<(), AssetLoadError> {
        if let Some(reason) = &self.behavior.image_error {
            return Err(AssetLoadError {
                asset: id.into(),
                reason: reason.clone(),
            });
        }
        if !icon.is_png() {
            return Err(AssetLoadError {
                asset: id.into(),
                reason: format!("unsupported image data ({})", icon.mime()),
            });
        }
        self.images.push(id.to_string());
        Ok(())
    }

    fn apply(&mut self, command: SurfaceCommand) -> Result<(), SurfaceError> {
        if self.removed {
            return Err(SurfaceError::Removed);
        }
        if self.options.is_none() {
            return Err(SurfaceError::NotInitialized);
        }
        match &command {
            SurfaceCommand::AddSource { id, .. } => {
                if !self.sources.insert(id.clone()) {
                    return Err(SurfaceError::Rejected(format!("duplicate source {id}")));
                }
            }
            SurfaceCommand::SetData { source, .. } | SurfaceCommand::SetTerrain { source, .. } => {
                if !self.sources.contains(source) {
                    return Err(SurfaceError::Rejected(format!("unknown source {source}")));
                }
            }
            SurfaceCommand::AddLayer { layer } => {
                if !self.sources.contains(&layer.source) {
                    return Err(SurfaceError::Rejected(format!(
                        "layer {} references unknown source {}",
                        layer.id, layer.source
                    )));
                }
            }
            SurfaceCommand::JumpTo { .. } => {}
        }
        self.commands.push(command);
        Ok(())
    }

    fn remove(&mut self) {
        if !self.removed {
            tracing::debug!("headless surface removed");
        }
        self.removed = true;
    }
}
