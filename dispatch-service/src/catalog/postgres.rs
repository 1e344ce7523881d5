//! Storage path lookup against the `images` table.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::dispatch::{ResourceId, ResourceLocator};

const STORAGE_PATH_QUERY: &str = "SELECT minio_path FROM images WHERE id = $1";

/// Read-only view of image metadata; the upload service owns the table.
#[derive(Debug, Clone)]
pub struct PgImageLocator {
    pool: PgPool,
}

impl PgImageLocator {
    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("postgres_connected");

        Ok(Self { pool })
    }
}

/// Image ids are UUIDs; anything else cannot exist in the table.
fn parse_image_id(id: &ResourceId) -> Option<Uuid> {
    Uuid::parse_str(id.as_str()).ok()
}

#[async_trait]
impl ResourceLocator for PgImageLocator {
    async fn storage_path(&self, id: &ResourceId) -> Result<Option<String>> {
        let Some(image_id) = parse_image_id(id) else {
            return Ok(None);
        };

        sqlx::query_scalar::<_, String>(STORAGE_PATH_QUERY)
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to look up image {}", image_id))
    }
}
