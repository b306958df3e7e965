use anyhow::Context;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::app::ports::DescriptorStore;
use crate::domain::image::ImageDescriptor;
use crate::error::{PipelineError, PipelineResult};
use crate::infra::db::Db;

/// `images` table access. One row per image, keyed by id.
#[derive(Clone)]
pub struct PgDescriptorStore {
    db: Db,
}

impl PgDescriptorStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DescriptorStore for PgDescriptorStore {
    async fn upsert(&self, descriptor: &ImageDescriptor) -> PipelineResult<()> {
        sqlx::query(
            "INSERT INTO images (id, name, original_url, variant_urls, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, now()) \
             ON CONFLICT (id) DO UPDATE \
             SET variant_urls = images.variant_urls || EXCLUDED.variant_urls, \
                 updated_at = now()",
        )
        .bind(descriptor.id)
        .bind(&descriptor.name)
        .bind(&descriptor.original_url)
        .bind(Json(&descriptor.variant_urls))
        .bind(descriptor.created_at)
        .execute(self.db.pool())
        .await
        .with_context(|| format!("upsert image {}", descriptor.id))
        .map_err(PipelineError::transient)?;

        Ok(())
    }

    async fn set_variant_url(&self, id: Uuid, tag: &str, url: &str) -> PipelineResult<()> {
        // Merging a single key keeps concurrent updates for other sizes intact.
        let result = sqlx::query(
            "UPDATE images \
             SET variant_urls = variant_urls || jsonb_build_object($2::text, $3::text), \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(tag)
        .bind(url)
        .execute(self.db.pool())
        .await
        .with_context(|| format!("set variant {} on image {}", tag, id))
        .map_err(PipelineError::transient)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(id));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> PipelineResult<ImageDescriptor> {
        let row = sqlx::query(
            "SELECT id, name, original_url, variant_urls, created_at \
             FROM images WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .with_context(|| format!("load image {}", id))
        .map_err(PipelineError::transient)?;

        let row = row.ok_or(PipelineError::NotFound(id))?;
        let variant_urls: Json<BTreeMap<String, String>> = row
            .try_get("variant_urls")
            .with_context(|| format!("decode variant urls of image {}", id))
            .map_err(PipelineError::transient)?;

        Ok(ImageDescriptor {
            id: row.get("id"),
            name: row.get("name"),
            original_url: row.get("original_url"),
            variant_urls: variant_urls.0,
            created_at: row.get("created_at"),
        })
    }

    async fn ping(&self) -> PipelineResult<()> {
        self.db.ping().await.map_err(PipelineError::transient)
    }
}
