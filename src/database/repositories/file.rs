//! File repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::models::FileDbModel;
use crate::database::DbPool;
use crate::{Error, Result};

/// File repository trait.
#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn get_file(&self, id: &str) -> Result<FileDbModel>;
    async fn create_file(&self, file: &FileDbModel) -> Result<()>;
    async fn delete_file(&self, id: &str) -> Result<u64>;
    /// Rows whose `expires_at` has passed; rows with NULL expiry never match.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileDbModel>>;
}

/// SQLx implementation of [`FileRepository`].
pub struct SqlxFileRepository {
    pool: DbPool,
}

impl SqlxFileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileRepository for SqlxFileRepository {
    async fn get_file(&self, id: &str) -> Result<FileDbModel> {
        sqlx::query_as::<_, FileDbModel>("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("File", id))
    }

    async fn create_file(&self, file: &FileDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (
                id, owner_id, original_name, storage_path, mime_type,
                size_bytes, zone, media_type, expires_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.owner_id)
        .bind(&file.original_name)
        .bind(&file.storage_path)
        .bind(&file.mime_type)
        .bind(file.size_bytes)
        .bind(&file.zone)
        .bind(&file.media_type)
        .bind(file.expires_at)
        .bind(file.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_file(&self, id: &str) -> Result<u64> {
        let res = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileDbModel>> {
        let files = sqlx::query_as::<_, FileDbModel>(
            "SELECT * FROM files WHERE expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }
}
