use std::{env, net::SocketAddr, path::Path};

use route_animator::{
    config::{AnimationConfig, Composition, SessionConfig},
    create_router,
    directions::MapboxDirections,
    driver::AnimationDriver,
    open_store,
    source::SourceChain,
    surface::HeadlessSurface,
    AppState, RenderSession,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

fn read_props(path: &Path) -> Result<AnimationConfig, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "route_animator=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let session_config = SessionConfig::from_env();
    let config = match env::var("ANIMATION_PROPS") {
        Ok(path) => {
            tracing::info!("reading animation props from {path}");
            read_props(Path::new(&path))?
        }
        Err(_) => AnimationConfig::default(),
    };

    let chain = SourceChain::from_options(
        None,
        env::var("ROUTE_ID").ok(),
        Some(session_config.route_file.clone()),
    );
    let store = open_store(&session_config).await?;
    let resolver = MapboxDirections::from_config(&session_config);

    let composition = Composition::default();
    let driver = AnimationDriver::new(
        HeadlessSurface::new(),
        config,
        &composition,
        session_config.access_token.clone(),
    );
    let session =
        RenderSession::load(driver, composition, &chain, store.as_ref(), &resolver).await;
    tracing::info!("session state: {:?}", session.driver().state());

    let app = create_router(AppState::new(session));

    let addr: SocketAddr = env::var("BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()?;
    tracing::info!("starting frame server on http://{addr}");
    tracing::info!("  GET /api/route - route GeoJSON");
    tracing::info!("  GET /api/setup - surface setup commands");
    tracing::info!("  GET /api/frames/:index - per-frame output");
    tracing::info!("  GET /api/route/gpx - route as GPX");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
