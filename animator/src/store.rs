// Route documents published by the planning tools, looked up by id at render time.

use std::{collections::HashMap, future::Future, pin::Pin};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::RouteDocument;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Invalid route document: {0}")]
    InvalidData(String),
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Read side of the document database.
pub trait RouteStore: Send + Sync {
    /// `Ok(None)` when no document has this id.
    fn fetch<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<RouteDocument>>;
}

/// Published route (DB representation)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PublishedRoute {
    pub id: String,
    pub name: Option<String>,
    pub document: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublishedRoute {
    pub fn to_document(&self) -> Result<RouteDocument, StoreError> {
        serde_json::from_value(self.document.clone())
            .map_err(|e| StoreError::InvalidData(format!("route {}: {e}", self.id)))
    }
}

pub struct PgRouteStore {
    pool: PgPool,
}

impl PgRouteStore {
    /// # Errors
    /// Returns StoreError if the pool cannot connect.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool created");

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        // query() runs one statement at a time, the migration has several
        let mut conn = self.pool.acquire().await?;
        let migration_sql = include_str!("../migrations/20260301_create_published_routes.sql");
        sqlx::raw_sql(migration_sql).execute(&mut *conn).await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Insert or replace the document stored under `id`.
    pub async fn publish(
        &self,
        id: &str,
        document: &RouteDocument,
    ) -> Result<PublishedRoute, StoreError> {
        let json = serde_json::to_value(document)
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;

        let route = sqlx::query_as::<_, PublishedRoute>(
            r#"
            INSERT INTO published_routes (id, name, document)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
                SET name = EXCLUDED.name,
                    document = EXCLUDED.document,
                    updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&document.name)
        .bind(json)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Published route {} ({:?})", route.id, route.name);
        Ok(route)
    }

    pub async fn get(&self, id: &str) -> Result<Option<PublishedRoute>, StoreError> {
        let route = sqlx::query_as::<_, PublishedRoute>(
            "SELECT * FROM published_routes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(route)
    }
}

impl RouteStore for PgRouteStore {
    fn fetch<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<RouteDocument>> {
        Box::pin(async move {
            match self.get(id).await? {
                Some(row) => Ok(Some(row.to_document()?)),
                None => Ok(None),
            }
        })
    }
}

/// Documents held in memory, for sessions without a database.
#[derive(Debug, Clone, Default)]
pub struct MemoryRouteStore {
    documents: HashMap<String, RouteDocument>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, id: impl Into<String>, document: RouteDocument) -> Self {
        self.insert(id, document);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, document: RouteDocument) {
        self.documents.insert(id.into(), document);
    }
}

impl RouteStore for MemoryRouteStore {
    fn fetch<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<RouteDocument>> {
        Box::pin(async move { Ok(self.documents.get(id).cloned()) })
    }
}
