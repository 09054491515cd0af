//! SQLite-backed gallery

use crate::distance::DistanceMetric;
use crate::identity::{rank, validate_name, Identity, Neighbor, UpsertOutcome};
use crate::store::GalleryStore;
use crate::vector::FeatureVector;
use crate::GalleryError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS identities (
        name        TEXT PRIMARY KEY NOT NULL,
        embedding   BLOB NOT NULL,
        source      TEXT,
        revision    INTEGER NOT NULL DEFAULT 1,
        enrolled_at TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    )";

/// Gallery persisted in a single SQLite table.
///
/// Embeddings are stored as postcard-encoded blobs and ranked in process.
/// Each operation checks a connection out of the pool for its own duration
/// only; the connection goes back on every exit path when the guard drops.
/// An upsert is one `INSERT .. ON CONFLICT DO UPDATE` statement, so a record
/// is never visible half written. Equal distances are ordered by name.
pub struct SqliteGallery {
    pool: SqlitePool,
    metric: DistanceMetric,
}

impl SqliteGallery {
    /// Open (creating if needed) the database at `url` and ensure the schema
    pub async fn connect(
        url: &str,
        max_connections: u32,
        metric: DistanceMetric,
    ) -> Result<Self, GalleryError> {
        info!("Opening SQLite gallery at {} ({} distance)", url, metric);

        let options = SqliteConnectOptions::from_str(url)
            .map_err(unavailable)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        Self::with_pool(pool, metric).await
    }

    /// Private in-memory database, mainly for tests.
    ///
    /// Uses a single long-lived connection because every SQLite memory
    /// connection is a separate database.
    pub async fn in_memory(metric: DistanceMetric) -> Result<Self, GalleryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect("sqlite::memory:")
            .await
            .map_err(unavailable)?;

        Self::with_pool(pool, metric).await
    }

    async fn with_pool(pool: SqlitePool, metric: DistanceMetric) -> Result<Self, GalleryError> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(unavailable)?;
        Ok(Self { pool, metric })
    }

    /// Close the pool, waiting for checked-out connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl GalleryStore for SqliteGallery {
    async fn upsert(&self, identity: &Identity) -> Result<UpsertOutcome, GalleryError> {
        validate_name(&identity.name)?;

        let blob = encode(&identity.vector)?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.pool.acquire().await.map_err(unavailable)?;
        let revision: i64 = sqlx::query(
            "INSERT INTO identities (name, embedding, source, revision, enrolled_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)
             ON CONFLICT(name) DO UPDATE SET
                 embedding  = excluded.embedding,
                 source     = excluded.source,
                 revision   = identities.revision + 1,
                 updated_at = excluded.updated_at
             RETURNING revision",
        )
        .bind(&identity.name)
        .bind(blob)
        .bind(identity.source.as_deref())
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(unavailable)?
        .try_get("revision")
        .map_err(unavailable)?;

        debug!("Upserted {} (revision {})", identity.name, revision);

        Ok(if revision > 1 {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn nearest(
        &self,
        vector: &FeatureVector,
        k: usize,
    ) -> Result<Vec<Neighbor>, GalleryError> {
        let rows = {
            let mut conn = self.pool.acquire().await.map_err(unavailable)?;
            sqlx::query("SELECT name, embedding, source FROM identities")
                .fetch_all(&mut *conn)
                .await
                .map_err(unavailable)?
        };

        let mut neighbors = Vec::with_capacity(rows.len());
        for row in &rows {
            let identity = decode_row(row)?;
            neighbors.push(Neighbor {
                distance: self.metric.distance(vector, &identity.vector),
                name: identity.name,
            });
        }

        Ok(rank(neighbors, k))
    }

    async fn get(&self, name: &str) -> Result<Option<Identity>, GalleryError> {
        let mut conn = self.pool.acquire().await.map_err(unavailable)?;
        let row = sqlx::query("SELECT name, embedding, source FROM identities WHERE name = ?1")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .map_err(unavailable)?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn len(&self) -> Result<usize, GalleryError> {
        let mut conn = self.pool.acquire().await.map_err(unavailable)?;
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM identities")
            .fetch_one(&mut *conn)
            .await
            .map_err(unavailable)?
            .try_get("n")
            .map_err(unavailable)?;
        Ok(count as usize)
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }
}

fn encode(vector: &FeatureVector) -> Result<Vec<u8>, GalleryError> {
    postcard::to_allocvec(vector).map_err(|e| GalleryError::Serialization(e.to_string()))
}

fn decode_row(row: &SqliteRow) -> Result<Identity, GalleryError> {
    let name: String = row.try_get("name").map_err(unavailable)?;
    let blob: Vec<u8> = row.try_get("embedding").map_err(unavailable)?;
    let source: Option<String> = row.try_get("source").map_err(unavailable)?;

    let vector: FeatureVector = postcard::from_bytes(&blob)
        .map_err(|e| GalleryError::Serialization(format!("{}: {}", name, e)))?;

    Ok(Identity {
        name,
        vector,
        source,
    })
}

fn unavailable(err: sqlx::Error) -> GalleryError {
    GalleryError::Unavailable(err.to_string())
}
