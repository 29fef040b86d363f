pub mod camera;
pub mod config;
pub mod directions;
pub mod driver;
pub mod error;
pub mod geometry;
pub mod gpx_io;
pub mod route;
pub mod source;
pub mod store;
pub mod surface;
pub mod telemetry;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use shared::ApiError;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Composition, SessionConfig};
use crate::directions::DirectionsResolver;
use crate::driver::{AnimationDriver, DriverError, DriverState, FrameOutput};
use crate::gpx_io::encode_route_as_gpx;
use crate::source::SourceChain;
use crate::store::{MemoryRouteStore, PgRouteStore, RouteStore, StoreError};
use crate::surface::{HeadlessSurface, SurfaceCommand, SurfaceOptions};

/// A loaded session rendering into a headless surface. Setup commands are
/// kept apart so clients can fetch them independently of any frame.
pub struct RenderSession {
    driver: AnimationDriver<HeadlessSurface>,
    composition: Composition,
    setup: Vec<SurfaceCommand>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupResponse {
    #[serde(flatten)]
    pub state: DriverState,
    pub degraded: bool,
    pub total_frames: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub options: Option<SurfaceOptions>,
    pub commands: Vec<SurfaceCommand>,
}

#[derive(Debug, Serialize)]
pub struct FrameResponse {
    #[serde(flatten)]
    pub output: FrameOutput,
    pub commands: Vec<SurfaceCommand>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpxResponse {
    pub gpx_base64: String,
}

impl RenderSession {
    /// Drive the session through Loading. Whatever the outcome, the session
    /// can answer requests afterwards: failures render as diagnostics.
    pub async fn load(
        mut driver: AnimationDriver<HeadlessSurface>,
        composition: Composition,
        chain: &SourceChain,
        store: &dyn RouteStore,
        resolver: &dyn DirectionsResolver,
    ) -> Self {
        if let Err(err) = driver.load(chain, store, resolver).await {
            tracing::error!("session could not load: {err}");
        }
        let setup = driver.surface_mut().drain();
        Self {
            driver,
            composition,
            setup,
        }
    }

    pub fn driver(&self) -> &AnimationDriver<HeadlessSurface> {
        &self.driver
    }

    pub fn setup(&self) -> SetupResponse {
        SetupResponse {
            state: self.driver.state().clone(),
            degraded: self.driver.is_degraded(),
            total_frames: self.driver.total_frames(),
            fps: self.composition.fps,
            width: self.composition.width,
            height: self.composition.height,
            options: self.driver.surface().options().cloned(),
            commands: self.setup.clone(),
        }
    }

    pub fn render(&mut self, frame_index: u32) -> Result<FrameResponse, DriverError> {
        let output = self.driver.render_frame(frame_index)?;
        let commands = self.driver.surface_mut().drain();
        Ok(FrameResponse { output, commands })
    }

    pub fn dispose(&mut self) {
        self.driver.dispose();
    }
}

/// Document store for the session: Postgres when `DATABASE_URL` is set,
/// otherwise an empty in-memory store.
pub async fn open_store(config: &SessionConfig) -> Result<Box<dyn RouteStore>, StoreError> {
    match &config.database_url {
        Some(url) => {
            let store = PgRouteStore::connect(url).await?;
            store.migrate().await?;
            Ok(Box::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, stored routes are unavailable");
            Ok(Box::new(MemoryRouteStore::new()))
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Mutex<RenderSession>>,
}

impl AppState {
    pub fn new(session: RenderSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/route", get(route_handler))
        .route("/api/route/gpx", get(gpx_handler))
        .route("/api/setup", get(setup_handler))
        .route("/api/frames/:index", get(frame_handler))
        .layer(cors)
        .with_state(state)
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

async fn route_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let session = state.session.lock().await;
    let route = session.driver.route().ok_or_else(|| unavailable(&session))?;
    Ok(Json(route.to_feature_collection()))
}

async fn gpx_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let session = state.session.lock().await;
    let route = session.driver.route().ok_or_else(|| unavailable(&session))?;
    let gpx_base64 = encode_route_as_gpx(route).map_err(|err| {
        api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })?;
    Ok(Json(GpxResponse { gpx_base64 }))
}

async fn setup_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.lock().await.setup())
}

async fn frame_handler(
    State(state): State<AppState>,
    Path(index): Path<u32>,
) -> ApiResult<impl IntoResponse> {
    let mut session = state.session.lock().await;
    let response = session.render(index).map_err(driver_error)?;
    Ok(Json(response))
}

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            message: message.into(),
        }),
    )
}

fn unavailable(session: &RenderSession) -> (StatusCode, Json<ApiError>) {
    match session.driver.state() {
        DriverState::Error { diagnostic } => api_error(
            StatusCode::CONFLICT,
            format!("{}: {}", diagnostic.title(), diagnostic.message),
        ),
        DriverState::Disposed => driver_error(DriverError::Disposed),
        _ => driver_error(DriverError::NotReady),
    }
}

fn driver_error(err: DriverError) -> (StatusCode, Json<ApiError>) {
    let status = match err {
        DriverError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        DriverError::Disposed => StatusCode::GONE,
        DriverError::InvalidTransition { .. } => StatusCode::CONFLICT,
    };
    api_error(status, err.to_string())
}
