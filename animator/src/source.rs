use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use shared::RouteDocument;
use thiserror::Error;

use crate::gpx_io::{read_gpx_document, GpxImportError};
use crate::store::{RouteStore, StoreError};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no route source configured")]
    NotConfigured,
    #[error("route {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid route document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Gpx(#[from] GpxImportError),
}

/// Where a session's route document comes from.
#[derive(Debug, Clone)]
pub enum RouteSource {
    /// Passed in with the render request.
    Inline(Box<RouteDocument>),
    /// Looked up in the document store.
    Stored { id: String },
    /// `.json` route document or `.gpx` track on disk.
    StaticFile(PathBuf),
}

impl RouteSource {
    fn priority(&self) -> u8 {
        match self {
            RouteSource::Inline(_) => 0,
            RouteSource::Stored { .. } => 1,
            RouteSource::StaticFile(_) => 2,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RouteSource::Inline(_) => "inline route data".into(),
            RouteSource::Stored { id } => format!("stored route {id}"),
            RouteSource::StaticFile(path) => format!("static file {}", path.display()),
        }
    }

    pub async fn fetch(&self, store: &dyn RouteStore) -> Result<RouteDocument, SourceError> {
        match self {
            RouteSource::Inline(doc) => Ok(doc.as_ref().clone()),
            RouteSource::Stored { id } => {
                tracing::info!("fetching route {id} from the document store");
                let doc = store
                    .fetch(id)
                    .await?
                    .ok_or_else(|| SourceError::NotFound(id.clone()))?;
                log_document(&doc);
                Ok(doc)
            }
            RouteSource::StaticFile(path) => read_document(path),
        }
    }
}

fn log_document(doc: &RouteDocument) {
    tracing::debug!(
        "route document: name={:?} geometry={} waypoints={} startLocation={}",
        doc.name,
        doc.geometry.is_some(),
        doc.waypoints.len(),
        doc.start_location.is_some()
    );
    if doc.geometry.is_none() {
        tracing::warn!("route document has no geometry field");
    }
}

/// Load a route document from disk, by extension.
pub fn read_document(path: &Path) -> Result<RouteDocument, SourceError> {
    let file = File::open(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);

    let is_gpx = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gpx"));
    let doc = if is_gpx {
        read_gpx_document(reader)?
    } else {
        serde_json::from_reader(reader)?
    };
    tracing::info!("loaded route document from {}", path.display());
    Ok(doc)
}

/// Route sources in priority order: inline, then stored id, then static
/// file. Only the first configured one is honored.
#[derive(Debug, Clone, Default)]
pub struct SourceChain {
    strategies: Vec<RouteSource>,
}

impl SourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: RouteSource) -> Self {
        self.strategies.push(source);
        self.strategies.sort_by_key(RouteSource::priority);
        self
    }

    pub fn from_options(
        inline: Option<RouteDocument>,
        route_id: Option<String>,
        static_file: Option<PathBuf>,
    ) -> Self {
        let mut chain = Self::new();
        if let Some(doc) = inline {
            chain = chain.with(RouteSource::Inline(Box::new(doc)));
        }
        if let Some(id) = route_id.filter(|id| !id.is_empty()) {
            chain = chain.with(RouteSource::Stored { id });
        }
        if let Some(path) = static_file {
            chain = chain.with(RouteSource::StaticFile(path));
        }
        chain
    }

    pub fn strategies(&self) -> &[RouteSource] {
        &self.strategies
    }

    pub fn honored(&self) -> Option<&RouteSource> {
        self.strategies.first()
    }

    /// Identifier reported in diagnostics, only when the stored document is
    /// the one being loaded.
    pub fn route_id(&self) -> Option<&str> {
        match self.honored() {
            Some(RouteSource::Stored { id }) => Some(id.as_str()),
            _ => None,
        }
    }

    pub async fn fetch(&self, store: &dyn RouteStore) -> Result<RouteDocument, SourceError> {
        let source = self.honored().ok_or(SourceError::NotConfigured)?;
        tracing::info!("loading route from {}", source.describe());
        source.fetch(store).await
    }
}
