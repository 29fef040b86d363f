//! Session state machine: acquire a route, bring the render surface up,
//! then turn frame indices into surface commands and HUD props.
//!
//! ```text
//! Idle -> Loading -> Ready -> Rendering
//!            |                    |
//!            +-----> Error <------+
//! (any) -> Disposed
//! ```

use std::sync::Arc;

use geojson::GeoJson;
use serde::Serialize;
use shared::{AnimationState, CameraMode, HudProps, LngLat};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

use crate::camera::{apply_override, plan_camera};
use crate::config::{AnimationConfig, Composition};
use crate::directions::DirectionsResolver;
use crate::error::RouteError;
use crate::geometry;
use crate::route::{Route, RouteInput};
use crate::source::{SourceChain, SourceError};
use crate::store::RouteStore;
use crate::surface::{
    line_feature, point_collection, setup_commands, MarkerIcon, RenderSurface, SurfaceCommand,
    SurfaceOptions, MARKER_IMAGE, POINT_SOURCE, PROGRESS_SOURCE,
};
use crate::telemetry::TelemetryCalculator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKind {
    MissingCredential,
    InvalidRoute,
    RouteResolution,
    SourceUnavailable,
    SurfaceInit,
    LoadTimeout,
    RenderFault,
}

/// Static output shown instead of frames once a session has failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, route_id: Option<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            route_id,
        }
    }

    pub fn title(&self) -> &'static str {
        match self.kind {
            DiagnosticKind::MissingCredential => "Missing MAPBOX_PUBLIC_TOKEN",
            DiagnosticKind::InvalidRoute => "Invalid route data",
            DiagnosticKind::RouteResolution => "Route could not be calculated",
            DiagnosticKind::SourceUnavailable => "Route data unavailable",
            DiagnosticKind::SurfaceInit => "Map failed to initialize",
            DiagnosticKind::LoadTimeout => "Route loading timed out",
            DiagnosticKind::RenderFault => "Error rendering map",
        }
    }

    fn from_load_error(err: &LoadError, route_id: Option<String>) -> Self {
        let kind = match err {
            LoadError::Source(_) => DiagnosticKind::SourceUnavailable,
            LoadError::Route(RouteError::Resolution(_)) => DiagnosticKind::RouteResolution,
            LoadError::Route(RouteError::InvalidRoute(_) | RouteError::Gpx(_)) => {
                DiagnosticKind::InvalidRoute
            }
        };
        Self::new(kind, err.to_string(), route_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum DriverState {
    Idle,
    Loading,
    Ready,
    Rendering,
    Error { diagnostic: Diagnostic },
    Disposed,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    #[error("session is not ready to render")]
    NotReady,
    #[error("session has been disposed")]
    Disposed,
    #[error("cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: String },
}

#[derive(Debug, Error)]
enum LoadError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Everything derived for one frame. Computed from the route, the config and
/// the frame index only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePlan {
    pub state: AnimationState,
    pub hud: HudProps,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed_path: Option<Vec<LngLat>>,
}

impl FramePlan {
    /// Marker, revealed path, then camera.
    pub fn commands(&self, with_marker: bool) -> Vec<SurfaceCommand> {
        let mut commands = Vec::with_capacity(3);
        if with_marker {
            commands.push(SurfaceCommand::SetData {
                source: POINT_SOURCE.into(),
                data: GeoJson::FeatureCollection(point_collection(self.state.current_position)),
            });
        }
        if let Some(revealed) = &self.revealed_path {
            commands.push(SurfaceCommand::SetData {
                source: PROGRESS_SOURCE.into(),
                data: GeoJson::Feature(line_feature(revealed)),
            });
        }
        commands.push(SurfaceCommand::JumpTo {
            camera: self.state.camera_pose,
        });
        commands
    }
}

pub fn plan_frame(
    route: &Route,
    config: &AnimationConfig,
    frame_index: u32,
    total_frames: u32,
) -> FramePlan {
    let total_frames = total_frames.max(1);
    let telemetry =
        TelemetryCalculator::new(config.nominal_speed_kmh).compute(route, frame_index, total_frames);

    let along_path = route.path_length_km() * telemetry.progress;
    let mut camera_pose = plan_camera(route, telemetry.progress, config.camera_mode);
    if config.camera_mode == CameraMode::Free {
        if let Some(camera_override) = &config.camera_override {
            camera_pose = apply_override(camera_pose, camera_override);
        }
    }
    let revealed_path = config
        .reveal_path
        .then(|| geometry::slice_along(route.path(), 0.0, along_path));

    FramePlan {
        state: AnimationState {
            frame_index,
            total_frames,
            progress: telemetry.progress,
            traveled_distance_km: telemetry.traveled_km,
            current_position: route.point_at(along_path),
            camera_pose,
        },
        hud: telemetry.hud_props(),
        revealed_path,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "output", rename_all = "camelCase")]
pub enum FrameOutput {
    Frame(FramePlan),
    Diagnostic(Diagnostic),
}

/// Cancels a session from outside the task driving it. Cloneable and safe
/// to trigger any number of times.
#[derive(Debug, Clone)]
pub struct DisposeHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl DisposeHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn dispose(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_disposed(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

struct AssetReport {
    style_loaded: bool,
    marker_loaded: bool,
}

pub struct AnimationDriver<S: RenderSurface> {
    surface: S,
    surface_live: bool,
    config: AnimationConfig,
    access_token: Option<String>,
    total_frames: u32,
    state: DriverState,
    route: Option<Arc<Route>>,
    route_id: Option<String>,
    marker_loaded: bool,
    degraded: bool,
    dispose: DisposeHandle,
}

impl<S: RenderSurface> AnimationDriver<S> {
    pub fn new(
        surface: S,
        config: AnimationConfig,
        composition: &Composition,
        access_token: Option<String>,
    ) -> Self {
        let config = config.validated();
        let total_frames = config.total_frames(composition);
        Self {
            surface,
            surface_live: false,
            config,
            access_token: access_token.filter(|t| !t.trim().is_empty()),
            total_frames,
            state: DriverState::Idle,
            route: None,
            route_id: None,
            marker_loaded: false,
            degraded: false,
            dispose: DisposeHandle::new(),
        }
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    pub fn route(&self) -> Option<&Route> {
        self.route.as_deref()
    }

    pub fn config(&self) -> &AnimationConfig {
        &self.config
    }

    pub fn total_frames(&self) -> u32 {
        self.total_frames
    }

    /// Ready was reached without every asset (or by the watchdog).
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn dispose_handle(&self) -> DisposeHandle {
        self.dispose.clone()
    }

    fn transition(&mut self, next: DriverState) {
        tracing::debug!("driver state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, diagnostic: Diagnostic) {
        tracing::error!(
            "{}: {} (route id: {})",
            diagnostic.title(),
            diagnostic.message,
            diagnostic.route_id.as_deref().unwrap_or("none")
        );
        self.transition(DriverState::Error { diagnostic });
    }

    /// Run the whole Loading phase. Ends in Ready, Error or Disposed.
    pub async fn load(
        &mut self,
        chain: &SourceChain,
        store: &dyn RouteStore,
        resolver: &dyn DirectionsResolver,
    ) -> Result<&DriverState, DriverError> {
        if self.dispose.is_disposed() {
            self.finish_disposal();
            return Err(DriverError::Disposed);
        }
        if self.state != DriverState::Idle {
            return Err(DriverError::InvalidTransition {
                action: "load",
                state: format!("{:?}", self.state),
            });
        }
        self.transition(DriverState::Loading);
        self.route_id = chain.route_id().map(str::to_owned);

        let Some(token) = self.access_token.clone() else {
            self.fail(Diagnostic::new(
                DiagnosticKind::MissingCredential,
                "Set MAPBOX_PUBLIC_TOKEN to render the map",
                self.route_id.clone(),
            ));
            return Ok(&self.state);
        };

        let watchdog = self.config.watchdog();
        let deadline = Instant::now() + watchdog;
        let mut disposed = self.dispose.subscribe();

        let acquired = tokio::select! {
            biased;
            _ = disposed.wait_for(|d| *d) => None,
            result = timeout_at(deadline, acquire_route(chain, store, resolver)) => Some(result),
        };
        let route = match acquired {
            None => {
                tracing::info!("session disposed while loading the route, dropping the result");
                self.finish_disposal();
                return Ok(&self.state);
            }
            Some(Err(_elapsed)) => {
                tracing::warn!("route loading exceeded {watchdog:?}, force unblocking");
                self.fail(Diagnostic::new(
                    DiagnosticKind::LoadTimeout,
                    format!("route was not available within {}s", watchdog.as_secs()),
                    self.route_id.clone(),
                ));
                return Ok(&self.state);
            }
            Some(Ok(Err(err))) => {
                let diagnostic = Diagnostic::from_load_error(&err, self.route_id.clone());
                self.fail(diagnostic);
                return Ok(&self.state);
            }
            Some(Ok(Ok(route))) => Arc::new(route),
        };

        let options = SurfaceOptions::initial(&self.config, &route, token);
        if let Err(err) = self.surface.init(&options) {
            self.fail(Diagnostic::new(
                DiagnosticKind::SurfaceInit,
                err.to_string(),
                self.route_id.clone(),
            ));
            return Ok(&self.state);
        }
        self.surface_live = true;
        tracing::info!("render surface initialized with {}", options.style);

        let icon = match MarkerIcon::from_data_uri(&self.config.marker_icon) {
            Ok(icon) => Some(icon),
            Err(err) => {
                tracing::warn!("{err}, continuing without the marker");
                None
            }
        };

        let assets = tokio::select! {
            biased;
            _ = disposed.wait_for(|d| *d) => None,
            result = timeout_at(deadline, load_assets(&mut self.surface, icon.as_ref())) => Some(result),
        };
        let report = match assets {
            None => {
                tracing::info!("session disposed while loading map assets");
                self.finish_disposal();
                return Ok(&self.state);
            }
            Some(Err(_elapsed)) => {
                tracing::warn!("map assets not loaded within {watchdog:?}, force unblocking render");
                AssetReport {
                    style_loaded: false,
                    marker_loaded: false,
                }
            }
            Some(Ok(report)) => report,
        };
        self.marker_loaded = report.marker_loaded;
        self.degraded = !(report.style_loaded && report.marker_loaded);

        for command in setup_commands(&route, &self.config, self.marker_loaded) {
            if let Err(err) = self.surface.apply(command) {
                self.fail(Diagnostic::new(
                    DiagnosticKind::RenderFault,
                    err.to_string(),
                    self.route_id.clone(),
                ));
                return Ok(&self.state);
            }
        }

        tracing::info!(
            "route ready: {} points, {:.1} km, {} frames{}",
            route.path().len(),
            route.total_distance_km(),
            self.total_frames,
            if self.degraded { " (degraded)" } else { "" }
        );
        self.route = Some(route);
        self.transition(DriverState::Ready);
        Ok(&self.state)
    }

    /// Output for one frame. Seeking is free: nothing carries over between
    /// calls except the session's route and config.
    pub fn render_frame(&mut self, frame_index: u32) -> Result<FrameOutput, DriverError> {
        if self.dispose.is_disposed() {
            self.finish_disposal();
        }
        match &self.state {
            DriverState::Disposed => return Err(DriverError::Disposed),
            DriverState::Error { diagnostic } => {
                return Ok(FrameOutput::Diagnostic(diagnostic.clone()))
            }
            DriverState::Idle | DriverState::Loading => return Err(DriverError::NotReady),
            DriverState::Ready | DriverState::Rendering => {}
        }
        let Some(route) = self.route.clone() else {
            return Err(DriverError::NotReady);
        };

        let plan = plan_frame(&route, &self.config, frame_index, self.total_frames);
        for command in plan.commands(self.marker_loaded) {
            if let Err(err) = self.surface.apply(command) {
                tracing::error!("animation loop error at frame {frame_index}: {err}");
                let diagnostic = Diagnostic::new(
                    DiagnosticKind::RenderFault,
                    err.to_string(),
                    self.route_id.clone(),
                );
                self.fail(diagnostic.clone());
                return Ok(FrameOutput::Diagnostic(diagnostic));
            }
        }
        if self.state == DriverState::Ready {
            self.transition(DriverState::Rendering);
        }
        Ok(FrameOutput::Frame(plan))
    }

    /// Tear the session down. Safe in any state and idempotent.
    pub fn dispose(&mut self) {
        self.dispose.dispose();
        self.finish_disposal();
    }

    fn finish_disposal(&mut self) {
        if self.state == DriverState::Disposed {
            return;
        }
        if self.surface_live {
            self.surface.remove();
            self.surface_live = false;
        }
        self.route = None;
        tracing::info!("session disposed");
        self.transition(DriverState::Disposed);
    }
}

impl<S: RenderSurface> Drop for AnimationDriver<S> {
    fn drop(&mut self) {
        if self.surface_live {
            self.surface.remove();
        }
    }
}

async fn acquire_route(
    chain: &SourceChain,
    store: &dyn RouteStore,
    resolver: &dyn DirectionsResolver,
) -> Result<Route, LoadError> {
    let doc = chain.fetch(store).await?;
    match Route::from_document(&doc)? {
        RouteInput::Ready(route) => Ok(route),
        RouteInput::NeedsResolution(request) => {
            tracing::info!(
                "resolving {} chain points through the directions service",
                request.points().len()
            );
            let resolved = resolver
                .resolve(&request)
                .await
                .map_err(RouteError::from)?;
            let route = request.into_route(resolved).map_err(RouteError::from)?;
            tracing::info!("directions resolved: {} points", route.path().len());
            Ok(route)
        }
    }
}

async fn load_assets<S: RenderSurface>(surface: &mut S, icon: Option<&MarkerIcon>) -> AssetReport {
    let style = surface.style_loaded().await;
    if let Err(err) = &style {
        tracing::warn!("{err}, continuing with the partial style");
    }
    let marker_loaded = match icon {
        Some(icon) => match surface.load_image(MARKER_IMAGE, icon).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("Error loading marker image: {err}");
                false
            }
        },
        None => false,
    };
    AssetReport {
        style_loaded: style.is_ok(),
        marker_loaded,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use shared::{CameraOverride, LineStringGeometry, RouteDocument, Waypoint, WaypointDocument};
    use shared::{LatLng, StartLocation};

    use super::*;
    use crate::config::MAX_WATCHDOG_SECS;
    use crate::directions::{ResolveFuture, ResolvedRoute};
    use crate::error::RouteResolutionError;
    use crate::route::ExternalRouteRequest;
    use crate::store::{MemoryRouteStore, StoreFuture};
    use crate::surface::{HeadlessBehavior, HeadlessSurface};
    use crate::telemetry::DEFAULT_NOMINAL_SPEED_KMH;

    /// Resolver answering with a fixed outcome; `None` means "no route".
    struct StubResolver {
        answer: Option<ResolvedRoute>,
    }

    impl DirectionsResolver for StubResolver {
        fn resolve<'a>(&'a self, _request: &'a ExternalRouteRequest) -> ResolveFuture<'a> {
            let answer = self.answer.clone();
            Box::pin(async move {
                answer.ok_or(RouteResolutionError::NoRoute {
                    message: "No route found".into(),
                })
            })
        }
    }

    fn no_directions() -> StubResolver {
        StubResolver { answer: None }
    }

    /// Store whose lookups take `delay` (forever when `None`).
    struct SlowStore {
        delay: Option<Duration>,
        inner: MemoryRouteStore,
    }

    impl RouteStore for SlowStore {
        fn fetch<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<RouteDocument>> {
            Box::pin(async move {
                match self.delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
                self.inner.fetch(id).await
            })
        }
    }

    fn diagonal_doc() -> RouteDocument {
        RouteDocument {
            name: Some("Diagonal".into()),
            geometry: Some(LineStringGeometry {
                kind: "LineString".into(),
                coordinates: vec![vec![0.0, 0.0], vec![10.0, 10.0]],
            }),
            ..Default::default()
        }
    }

    fn chain_doc() -> RouteDocument {
        RouteDocument {
            start_location: Some(StartLocation {
                location: Some(LatLng { lat: 45.0, lng: 5.0 }),
                address: Some("Depot".into()),
            }),
            waypoints: vec![WaypointDocument {
                position: Some(LatLng { lat: 45.1, lng: 5.1 }),
                notes: Some("Summit".into()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn driver(config: AnimationConfig) -> AnimationDriver<HeadlessSurface> {
        AnimationDriver::new(
            HeadlessSurface::new(),
            config,
            &Composition::default(),
            Some("pk.test".into()),
        )
    }

    async fn ready_driver(config: AnimationConfig) -> AnimationDriver<HeadlessSurface> {
        let mut driver = driver(config);
        let chain = SourceChain::from_options(Some(diagonal_doc()), None, None);
        driver
            .load(&chain, &MemoryRouteStore::new(), &no_directions())
            .await
            .unwrap();
        assert_eq!(driver.state(), &DriverState::Ready);
        driver
    }

    fn frame(output: FrameOutput) -> FramePlan {
        match output {
            FrameOutput::Frame(plan) => plan,
            FrameOutput::Diagnostic(d) => panic!("expected a frame, got {d:?}"),
        }
    }

    fn diagnostic(state: &DriverState) -> &Diagnostic {
        match state {
            DriverState::Error { diagnostic } => diagnostic,
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_frame_starts_at_origin() {
        let mut driver = ready_driver(AnimationConfig::default()).await;
        let plan = frame(driver.render_frame(0).unwrap());
        assert_eq!(plan.state.progress, 0.0);
        assert!(plan.state.traveled_distance_km.abs() < 1e-9);
        assert_eq!(plan.state.current_position, LngLat::new(0.0, 0.0));
        assert_eq!(plan.hud.distance, "0.0");
        assert_eq!(driver.state(), &DriverState::Rendering);
    }

    #[tokio::test]
    async fn last_frame_reaches_the_end() {
        let mut driver = ready_driver(AnimationConfig::default()).await;
        let plan = frame(driver.render_frame(299).unwrap());
        assert_eq!(plan.state.progress, 1.0);
        assert!((plan.state.current_position.lng - 10.0).abs() < 1e-4);
        assert!((plan.state.current_position.lat - 10.0).abs() < 1e-4);
        assert_eq!(plan.hud.progress, 100.0);
        assert_eq!(plan.hud.time, "0m");
    }

    #[tokio::test]
    async fn seeking_matches_sequential_playback() {
        let mut sequential = ready_driver(AnimationConfig::default()).await;
        let mut seeking = ready_driver(AnimationConfig::default()).await;
        let mut reached = None;
        for index in 0..=150 {
            reached = Some(sequential.render_frame(index).unwrap());
        }
        let sought = seeking.render_frame(150).unwrap();
        assert_eq!(reached, Some(sought.clone()));
        assert_eq!(seeking.render_frame(150).unwrap(), sought);
    }

    #[tokio::test]
    async fn overhead_mode_is_fixed() {
        let config = AnimationConfig {
            camera_mode: CameraMode::Overhead,
            ..Default::default()
        };
        let mut driver = ready_driver(config).await;
        for index in [0, 77, 299] {
            let pose = frame(driver.render_frame(index).unwrap()).state.camera_pose;
            assert_eq!((pose.bearing, pose.pitch, pose.zoom), (0.0, 0.0, 13.0));
        }
    }

    #[tokio::test]
    async fn frame_commands_follow_reveal_mode() {
        let mut plain = ready_driver(AnimationConfig::default()).await;
        plain.surface_mut().drain();
        plain.render_frame(10).unwrap();
        let ops: Vec<_> = plain.surface_mut().drain();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], SurfaceCommand::SetData { source, .. } if source == POINT_SOURCE));
        assert!(matches!(ops[1], SurfaceCommand::JumpTo { .. }));

        let mut reveal = ready_driver(AnimationConfig {
            reveal_path: true,
            ..Default::default()
        })
        .await;
        reveal.surface_mut().drain();
        let plan = frame(reveal.render_frame(150).unwrap());
        let revealed = plan.revealed_path.unwrap();
        assert_eq!(revealed[0], LngLat::new(0.0, 0.0));
        assert_eq!(*revealed.last().unwrap(), plan.state.current_position);
        let ops = reveal.surface_mut().drain();
        assert!(matches!(&ops[1], SurfaceCommand::SetData { source, .. } if source == PROGRESS_SOURCE));
    }

    #[tokio::test]
    async fn free_mode_applies_camera_override() {
        let camera_override = Some(CameraOverride {
            bearing: Some(45.0),
            pitch: Some(30.0),
            zoom: None,
        });
        let mut free = ready_driver(AnimationConfig {
            camera_mode: CameraMode::Free,
            camera_override,
            ..Default::default()
        })
        .await;
        let pose = frame(free.render_frame(10).unwrap()).state.camera_pose;
        assert_eq!((pose.bearing, pose.pitch, pose.zoom), (45.0, 30.0, 14.0));

        let mut locked = ready_driver(AnimationConfig {
            camera_mode: CameraMode::Locked,
            camera_override,
            ..Default::default()
        })
        .await;
        let pose = frame(locked.render_frame(10).unwrap()).state.camera_pose;
        assert_eq!(pose.pitch, 60.0);
    }

    #[tokio::test]
    async fn chain_route_is_resolved() {
        let resolver = StubResolver {
            answer: Some(ResolvedRoute {
                path: vec![
                    LngLat::new(5.0, 45.0),
                    LngLat::new(5.04, 45.06),
                    LngLat::new(5.1, 45.1),
                ],
                distance_m: Some(16_000.0),
                duration_s: Some(1_200.0),
            }),
        };
        let mut driver = driver(AnimationConfig::default());
        let chain = SourceChain::from_options(Some(chain_doc()), None, None);
        driver
            .load(&chain, &MemoryRouteStore::new(), &resolver)
            .await
            .unwrap();

        assert_eq!(driver.state(), &DriverState::Ready);
        let route = driver.route().unwrap();
        assert_eq!(route.path().len(), 3);
        assert_eq!(route.total_distance_km(), 16.0);
        assert_eq!(route.waypoints()[0].label, "Depot");
        assert_eq!(route.waypoints()[1].label, "Summit");
    }

    #[tokio::test]
    async fn failed_resolution_is_terminal() {
        let mut driver = driver(AnimationConfig::default());
        let store = MemoryRouteStore::new().with_document("route-42", chain_doc());
        let chain = SourceChain::from_options(None, Some("route-42".into()), None);
        driver.load(&chain, &store, &no_directions()).await.unwrap();

        let diag = diagnostic(driver.state()).clone();
        assert_eq!(diag.kind, DiagnosticKind::RouteResolution);
        assert_eq!(diag.route_id.as_deref(), Some("route-42"));
        assert!(driver.route().is_none());
        assert_eq!(
            driver.render_frame(0).unwrap(),
            FrameOutput::Diagnostic(diag)
        );
        assert!(driver.surface().options().is_none());
    }

    #[tokio::test]
    async fn inline_failure_names_no_stored_route() {
        let mut driver = driver(AnimationConfig::default());
        let chain = SourceChain::from_options(Some(chain_doc()), Some("route-42".into()), None);
        driver
            .load(&chain, &MemoryRouteStore::new(), &no_directions())
            .await
            .unwrap();

        let diag = diagnostic(driver.state());
        assert_eq!(diag.kind, DiagnosticKind::RouteResolution);
        assert_eq!(diag.route_id, None);
    }

    #[tokio::test]
    async fn missing_token_renders_diagnostic() {
        let mut driver = AnimationDriver::new(
            HeadlessSurface::new(),
            AnimationConfig::default(),
            &Composition::default(),
            Some("   ".into()),
        );
        let chain = SourceChain::from_options(Some(diagonal_doc()), None, None);
        driver
            .load(&chain, &MemoryRouteStore::new(), &no_directions())
            .await
            .unwrap();
        let diag = diagnostic(driver.state());
        assert_eq!(diag.kind, DiagnosticKind::MissingCredential);
        assert_eq!(diag.title(), "Missing MAPBOX_PUBLIC_TOKEN");
    }

    #[tokio::test]
    async fn invalid_route_is_never_defaulted() {
        let mut doc = diagonal_doc();
        doc.geometry = Some(LineStringGeometry {
            kind: "LineString".into(),
            coordinates: vec![vec![4.57, 45.93]],
        });
        let mut driver = driver(AnimationConfig::default());
        let store = MemoryRouteStore::new().with_document("one-point", doc);
        let chain = SourceChain::from_options(None, Some("one-point".into()), None);
        driver.load(&chain, &store, &no_directions()).await.unwrap();

        let diag = diagnostic(driver.state());
        assert_eq!(diag.kind, DiagnosticKind::InvalidRoute);
        assert_eq!(diag.route_id.as_deref(), Some("one-point"));
    }

    #[tokio::test]
    async fn unknown_route_id_is_source_unavailable() {
        let mut driver = driver(AnimationConfig::default());
        let chain = SourceChain::from_options(None, Some("ghost".into()), None);
        driver
            .load(&chain, &MemoryRouteStore::new(), &no_directions())
            .await
            .unwrap();
        assert_eq!(
            diagnostic(driver.state()).kind,
            DiagnosticKind::SourceUnavailable
        );
    }

    #[tokio::test]
    async fn surface_init_failure_is_terminal() {
        let mut driver = AnimationDriver::new(
            HeadlessSurface::with_behavior(HeadlessBehavior {
                reject_init: Some("invalid token".into()),
                ..Default::default()
            }),
            AnimationConfig::default(),
            &Composition::default(),
            Some("pk.bad".into()),
        );
        let chain = SourceChain::from_options(Some(diagonal_doc()), None, None);
        driver
            .load(&chain, &MemoryRouteStore::new(), &no_directions())
            .await
            .unwrap();
        assert_eq!(diagnostic(driver.state()).kind, DiagnosticKind::SurfaceInit);
    }

    #[tokio::test]
    async fn broken_marker_degrades_instead_of_failing() {
        let mut driver = driver(AnimationConfig {
            marker_icon: "data:image/png;base64,@@@".into(),
            ..Default::default()
        });
        let chain = SourceChain::from_options(Some(diagonal_doc()), None, None);
        driver
            .load(&chain, &MemoryRouteStore::new(), &no_directions())
            .await
            .unwrap();
        assert_eq!(driver.state(), &DriverState::Ready);
        assert!(driver.is_degraded());
        assert!(driver.surface().images().is_empty());

        driver.surface_mut().drain();
        driver.render_frame(3).unwrap();
        let ops = driver.surface_mut().drain();
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], SurfaceCommand::JumpTo { .. }));
    }

    #[tokio::test]
    async fn style_error_degrades() {
        let mut driver = AnimationDriver::new(
            HeadlessSurface::with_behavior(HeadlessBehavior {
                style_error: Some("sprite 404".into()),
                ..Default::default()
            }),
            AnimationConfig::default(),
            &Composition::default(),
            Some("pk.test".into()),
        );
        let chain = SourceChain::from_options(Some(diagonal_doc()), None, None);
        driver
            .load(&chain, &MemoryRouteStore::new(), &no_directions())
            .await
            .unwrap();
        assert_eq!(driver.state(), &DriverState::Ready);
        assert!(driver.is_degraded());
        assert_eq!(driver.surface().images(), [MARKER_IMAGE.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_unblocks_stalled_style() {
        let mut driver = AnimationDriver::new(
            HeadlessSurface::with_behavior(HeadlessBehavior {
                stall_style: true,
                ..Default::default()
            }),
            AnimationConfig::default(),
            &Composition::default(),
            Some("pk.test".into()),
        );
        let chain = SourceChain::from_options(Some(diagonal_doc()), None, None);
        let started = Instant::now();
        driver
            .load(&chain, &MemoryRouteStore::new(), &no_directions())
            .await
            .unwrap();

        assert_eq!(driver.state(), &DriverState::Ready);
        assert!(driver.is_degraded());
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(matches!(driver.render_frame(0), Ok(FrameOutput::Frame(_))));
    }

    #[tokio::test]
    async fn huge_watchdog_still_loads() {
        let config: AnimationConfig =
            serde_json::from_str(r#"{"watchdogSecs": 18446744073709551615}"#).unwrap();
        let driver = ready_driver(config).await;
        assert!(!driver.is_degraded());
        assert_eq!(driver.config().watchdog_secs, MAX_WATCHDOG_SECS);
    }

    #[tokio::test]
    async fn invalid_nominal_speed_is_replaced_at_construction() {
        let mut driver = ready_driver(AnimationConfig {
            nominal_speed_kmh: f64::NAN,
            ..Default::default()
        })
        .await;
        assert_eq!(driver.config().nominal_speed_kmh, DEFAULT_NOMINAL_SPEED_KMH);
        let plan = frame(driver.render_frame(0).unwrap());
        assert_ne!(plan.hud.time, "0m");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_style_within_watchdog_is_not_degraded() {
        let mut driver = AnimationDriver::new(
            HeadlessSurface::with_behavior(HeadlessBehavior {
                style_delay: Some(Duration::from_secs(10)),
                ..Default::default()
            }),
            AnimationConfig::default(),
            &Composition::default(),
            Some("pk.test".into()),
        );
        let chain = SourceChain::from_options(Some(diagonal_doc()), None, None);
        let started = Instant::now();
        driver
            .load(&chain, &MemoryRouteStore::new(), &no_directions())
            .await
            .unwrap();

        assert_eq!(driver.state(), &DriverState::Ready);
        assert!(!driver.is_degraded());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(30));
        assert_eq!(driver.surface().images(), [MARKER_IMAGE.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_fails_stalled_route_fetch() {
        let store = SlowStore {
            delay: None,
            inner: MemoryRouteStore::new(),
        };
        let mut driver = driver(AnimationConfig {
            watchdog_secs: 5,
            ..Default::default()
        });
        let chain = SourceChain::from_options(None, Some("slow".into()), None);
        driver.load(&chain, &store, &no_directions()).await.unwrap();

        let diag = diagnostic(driver.state());
        assert_eq!(diag.kind, DiagnosticKind::LoadTimeout);
        assert_eq!(diag.route_id.as_deref(), Some("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_mid_loading_drops_late_result() {
        let store = SlowStore {
            delay: Some(Duration::from_secs(2)),
            inner: MemoryRouteStore::new().with_document("late", diagonal_doc()),
        };
        let mut driver = driver(AnimationConfig::default());
        let handle = driver.dispose_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.dispose();
        });

        let chain = SourceChain::from_options(None, Some("late".into()), None);
        driver.load(&chain, &store, &no_directions()).await.unwrap();

        assert_eq!(driver.state(), &DriverState::Disposed);
        assert!(driver.route().is_none());
        assert!(driver.surface().options().is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(driver.state(), &DriverState::Disposed);
        assert_eq!(driver.render_frame(0), Err(DriverError::Disposed));
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_while_waiting_for_style_removes_surface() {
        let mut driver = AnimationDriver::new(
            HeadlessSurface::with_behavior(HeadlessBehavior {
                stall_style: true,
                ..Default::default()
            }),
            AnimationConfig::default(),
            &Composition::default(),
            Some("pk.test".into()),
        );
        let handle = driver.dispose_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.dispose();
        });
        let chain = SourceChain::from_options(Some(diagonal_doc()), None, None);
        driver
            .load(&chain, &MemoryRouteStore::new(), &no_directions())
            .await
            .unwrap();

        assert_eq!(driver.state(), &DriverState::Disposed);
        assert!(driver.surface().is_removed());
    }

    #[tokio::test]
    async fn dispose_is_idempotent_in_every_state() {
        let mut idle = driver(AnimationConfig::default());
        idle.dispose();
        idle.dispose();
        assert_eq!(idle.state(), &DriverState::Disposed);
        assert!(!idle.surface().is_removed());

        let mut rendering = ready_driver(AnimationConfig::default()).await;
        rendering.render_frame(1).unwrap();
        rendering.dispose();
        rendering.dispose();
        assert_eq!(rendering.state(), &DriverState::Disposed);
        assert!(rendering.surface().is_removed());

        let chain = SourceChain::from_options(Some(diagonal_doc()), None, None);
        assert_eq!(
            rendering
                .load(&chain, &MemoryRouteStore::new(), &no_directions())
                .await,
            Err(DriverError::Disposed)
        );
    }

    #[tokio::test]
    async fn load_twice_is_rejected() {
        let mut driver = ready_driver(AnimationConfig::default()).await;
        let chain = SourceChain::from_options(Some(diagonal_doc()), None, None);
        assert!(matches!(
            driver
                .load(&chain, &MemoryRouteStore::new(), &no_directions())
                .await,
            Err(DriverError::InvalidTransition { action: "load", .. })
        ));
    }

    #[test]
    fn render_before_load_is_not_ready() {
        let mut driver = driver(AnimationConfig::default());
        assert_eq!(driver.render_frame(0), Err(DriverError::NotReady));
    }

    #[test]
    fn single_frame_animation_is_complete() {
        let route = Route::from_geometry(
            vec![LngLat::new(0.0, 0.0), LngLat::new(10.0, 10.0)],
            vec![Waypoint {
                position: LngLat::new(5.0, 5.0),
                label: "Mid".into(),
            }],
        )
        .unwrap();
        let plan = plan_frame(&route, &AnimationConfig::default(), 0, 1);
        assert_eq!(plan.state.progress, 1.0);
        assert_eq!(plan.state.total_frames, 1);
    }

    #[test]
    fn outputs_serialize_with_tags() {
        let route = Route::from_geometry(
            vec![LngLat::new(0.0, 0.0), LngLat::new(1.0, 1.0)],
            Vec::new(),
        )
        .unwrap();
        let plan = plan_frame(&route, &AnimationConfig::default(), 0, 10);
        let json = serde_json::to_value(FrameOutput::Frame(plan)).unwrap();
        assert_eq!(json["output"], "frame");
        assert_eq!(json["state"]["frameIndex"], 0);
        assert!(json.get("revealedPath").is_none());

        let state = DriverState::Error {
            diagnostic: Diagnostic::new(DiagnosticKind::LoadTimeout, "late", Some("r1".into())),
        };
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json["state"], "error");
        assert_eq!(json["diagnostic"]["kind"], "loadTimeout");
        assert_eq!(json["diagnostic"]["routeId"], "r1");
    }
}
