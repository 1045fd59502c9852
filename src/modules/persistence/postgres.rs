use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{CatalogRepository, ChangeSet, FileQuery, RepoResult};
use crate::features::files::models::{FileRecord, NewFileRecord};
use crate::features::folders::models::{FolderRecord, NewFolderRecord};

const FILE_COLUMNS: &str = r#"
    id, path, source_path, original_name, content_hash, content_hash_hex, size_bytes,
    is_compressed, mime_type, is_photo, taken_at, camera_make, camera_model, latitude,
    longitude, width, height, tags, folder_id, is_active, created_at, updated_at
"#;

const FOLDER_COLUMNS: &str = "id, path, name, parent_id, is_default, created_at, updated_at";

/// PostgreSQL implementation of the catalog
pub struct PgCatalogRepository {
    pool: PgPool,
}

impl PgCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply_file_update(
        tx: &mut Transaction<'_, Postgres>,
        file: &FileRecord,
    ) -> RepoResult<()> {
        sqlx::query(
            r#"
            UPDATE files
            SET path = $2, original_name = $3, folder_id = $4, tags = $5, is_active = $6,
                size_bytes = $7, is_compressed = $8, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(file.id)
        .bind(&file.path)
        .bind(&file.original_name)
        .bind(file.folder_id)
        .bind(&file.tags)
        .bind(file.is_active)
        .bind(file.size_bytes)
        .bind(file.is_compressed)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

/// Escape LIKE wildcards in user input
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn find_file(&self, id: Uuid) -> RepoResult<Option<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files WHERE id = $1 AND is_active = TRUE",
            FILE_COLUMNS
        );
        let file = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(file)
    }

    async fn find_file_by_path(&self, path: &str) -> RepoResult<Option<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files WHERE (path = $1 OR source_path = $1) AND is_active = TRUE LIMIT 1",
            FILE_COLUMNS
        );
        let file = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(file)
    }

    async fn find_file_by_hash(&self, hash: &[u8]) -> RepoResult<Option<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files WHERE content_hash = $1 AND is_active = TRUE",
            FILE_COLUMNS
        );
        let file = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(file)
    }

    async fn add_file(&self, file: NewFileRecord) -> RepoResult<FileRecord> {
        let photo = file.photo.unwrap_or_default();
        let sql = format!(
            r#"
            INSERT INTO files (id, path, source_path, original_name, content_hash, content_hash_hex,
                size_bytes, is_compressed, mime_type, is_photo, taken_at, camera_make, camera_model,
                latitude, longitude, width, height, folder_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {}
            "#,
            FILE_COLUMNS
        );
        let record = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(Uuid::now_v7())
            .bind(&file.path)
            .bind(&file.source_path)
            .bind(&file.original_name)
            .bind(&file.content_hash)
            .bind(&file.content_hash_hex)
            .bind(file.size_bytes)
            .bind(file.is_compressed)
            .bind(&file.mime_type)
            .bind(file.is_photo)
            .bind(photo.taken_at)
            .bind(&photo.camera_make)
            .bind(&photo.camera_model)
            .bind(photo.latitude)
            .bind(photo.longitude)
            .bind(photo.width.map(|w| w as i32))
            .bind(photo.height.map(|h| h as i32))
            .bind(file.folder_id)
            .fetch_one(&self.pool)
            .await?;

        debug!("Inserted file record {} at {}", record.id, record.path);
        Ok(record)
    }

    async fn update_file(&self, file: &FileRecord) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::apply_file_update(&mut tx, file).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_file(&self, id: Uuid) -> RepoResult<()> {
        sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_files(&self, query: &FileQuery) -> RepoResult<(Vec<FileRecord>, i64)> {
        const FILTER: &str = r#"
            is_active = TRUE
            AND ($1::uuid IS NULL OR folder_id = $1)
            AND ($2::text IS NULL OR original_name ILIKE $2)
            AND ($3::text IS NULL OR $3 = ANY(tags))
            AND ($4::bool IS NULL OR is_photo = $4)
        "#;

        let search = query.search.as_deref().map(like_pattern);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM files WHERE {}", FILTER))
            .bind(query.folder_id)
            .bind(&search)
            .bind(&query.tag)
            .bind(query.is_photo)
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {} FROM files WHERE {} ORDER BY created_at DESC, id LIMIT $5 OFFSET $6",
            FILE_COLUMNS, FILTER
        );
        let files = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(query.folder_id)
            .bind(&search)
            .bind(&query.tag)
            .bind(query.is_photo)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((files, total))
    }

    async fn list_files_in_folder(
        &self,
        folder_id: Uuid,
        include_inactive: bool,
    ) -> RepoResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files WHERE folder_id = $1 AND ($2 OR is_active = TRUE) ORDER BY original_name",
            FILE_COLUMNS
        );
        let files = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(folder_id)
            .bind(include_inactive)
            .fetch_all(&self.pool)
            .await?;
        Ok(files)
    }

    async fn get_folder(&self, id: Uuid) -> RepoResult<Option<FolderRecord>> {
        let sql = format!("SELECT {} FROM folders WHERE id = $1", FOLDER_COLUMNS);
        let folder = sqlx::query_as::<_, FolderRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(folder)
    }

    async fn get_folders_by_parent(
        &self,
        parent_id: Option<Uuid>,
    ) -> RepoResult<Vec<FolderRecord>> {
        let sql = format!(
            "SELECT {} FROM folders WHERE parent_id IS NOT DISTINCT FROM $1 ORDER BY name",
            FOLDER_COLUMNS
        );
        let folders = sqlx::query_as::<_, FolderRecord>(&sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(folders)
    }

    async fn find_default_folder(&self) -> RepoResult<Option<FolderRecord>> {
        let sql = format!(
            "SELECT {} FROM folders WHERE is_default = TRUE",
            FOLDER_COLUMNS
        );
        let folder = sqlx::query_as::<_, FolderRecord>(&sql)
            .fetch_optional(&self.pool)
            .await?;
        Ok(folder)
    }

    async fn add_folder(&self, folder: NewFolderRecord) -> RepoResult<FolderRecord> {
        let sql = format!(
            r#"
            INSERT INTO folders (id, path, name, parent_id, is_default)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            FOLDER_COLUMNS
        );
        let record = sqlx::query_as::<_, FolderRecord>(&sql)
            .bind(Uuid::now_v7())
            .bind(&folder.path)
            .bind(&folder.name)
            .bind(folder.parent_id)
            .bind(folder.is_default)
            .fetch_one(&self.pool)
            .await?;

        debug!("Inserted folder record {} at {}", record.id, record.path);
        Ok(record)
    }

    async fn list_folders(&self) -> RepoResult<Vec<FolderRecord>> {
        let sql = format!("SELECT {} FROM folders ORDER BY path", FOLDER_COLUMNS);
        let folders = sqlx::query_as::<_, FolderRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(folders)
    }

    async fn save_changes(&self, changes: ChangeSet) -> RepoResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for folder in &changes.folder_updates {
            sqlx::query(
                r#"
                UPDATE folders
                SET path = $2, name = $3, parent_id = $4, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(folder.id)
            .bind(&folder.path)
            .bind(&folder.name)
            .bind(folder.parent_id)
            .execute(&mut *tx)
            .await?;
        }

        for file in &changes.file_updates {
            Self::apply_file_update(&mut tx, file).await?;
        }

        if !changes.file_deletes.is_empty() {
            sqlx::query("DELETE FROM files WHERE id = ANY($1)")
                .bind(&changes.file_deletes)
                .execute(&mut *tx)
                .await?;
        }

        for folder_id in &changes.folder_deletes {
            sqlx::query("DELETE FROM folders WHERE id = $1")
                .bind(folder_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(
            "Committed changes: {} folder updates, {} file updates, {} file deletes, {} folder deletes",
            changes.folder_updates.len(),
            changes.file_updates.len(),
            changes.file_deletes.len(),
            changes.folder_deletes.len()
        );
        Ok(())
    }
}
