use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};

use clap::{Parser, ValueEnum};
use route_animator::{
    config::{AnimationConfig, Composition, SessionConfig},
    directions::MapboxDirections,
    driver::AnimationDriver,
    open_store,
    source::SourceChain,
    surface::HeadlessSurface,
    RenderSession,
};
use shared::{CameraMode, RouteDocument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CameraModeArg {
    Locked,
    Free,
    Cinematic,
    Overhead,
}

impl From<CameraModeArg> for CameraMode {
    fn from(arg: CameraModeArg) -> Self {
        match arg {
            CameraModeArg::Locked => CameraMode::Locked,
            CameraModeArg::Free => CameraMode::Free,
            CameraModeArg::Cinematic => CameraMode::Cinematic,
            CameraModeArg::Overhead => CameraMode::Overhead,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Write the surface commands and HUD props of a route animation as JSON lines"
)]
struct Args {
    /// Inline route document (JSON). Takes priority over every other source
    #[arg(long)]
    route_json: Option<String>,

    /// Id of a published route in the document store (needs DATABASE_URL)
    #[arg(long)]
    route_id: Option<String>,

    /// Static .json or .gpx fallback. Defaults to ROUTE_FILE
    #[arg(long)]
    route_file: Option<PathBuf>,

    /// Animation props JSON, as accepted by the frame server
    #[arg(long)]
    props: Option<PathBuf>,

    #[arg(long, value_enum)]
    camera_mode: Option<CameraModeArg>,

    #[arg(long)]
    map_style: Option<String>,

    #[arg(long)]
    reveal_path: bool,

    #[arg(long)]
    hide_waypoints: bool,

    /// Frame count, overriding the composition length
    #[arg(long)]
    frames: Option<u32>,

    /// Render only this frame
    #[arg(long)]
    frame: Option<u32>,

    /// Output file (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Args {
    fn animation_config(&self) -> Result<AnimationConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.props {
            Some(path) => serde_json::from_reader(File::open(path)?)?,
            None => AnimationConfig::default(),
        };
        if let Some(mode) = self.camera_mode {
            config.camera_mode = mode.into();
        }
        if let Some(style) = &self.map_style {
            config.map_style = style.clone();
        }
        if self.reveal_path {
            config.reveal_path = true;
        }
        if self.hide_waypoints {
            config.show_waypoints = false;
        }
        if self.frames.is_some() {
            config.animation_duration = self.frames;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    let session_config = SessionConfig::from_env();
    let config = args.animation_config()?;

    let inline: Option<RouteDocument> = args
        .route_json
        .as_deref()
        .map(|json| serde_json::from_str(json))
        .transpose()?;
    let chain = SourceChain::from_options(
        inline,
        args.route_id.clone(),
        Some(
            args.route_file
                .clone()
                .unwrap_or_else(|| session_config.route_file.clone()),
        ),
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
    let mut session =
        RenderSession::load(driver, composition, &chain, store.as_ref(), &resolver).await;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    serde_json::to_writer(&mut out, &session.setup())?;
    writeln!(out)?;

    let frames = match args.frame {
        Some(index) => index..index.saturating_add(1),
        None => 0..session.driver().total_frames(),
    };
    let mut written = 0u32;
    for index in frames {
        let response = session.render(index)?;
        serde_json::to_writer(&mut out, &response)?;
        writeln!(out)?;
        written += 1;
    }
    out.flush()?;
    session.dispose();

    tracing::info!("wrote setup and {written} frames");
    Ok(())
}
