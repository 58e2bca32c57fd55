// SPDX-License-Identifier: Apache-2.0
//! Postgres-backed [`FileStore`] and [`CredentialLookup`] implementations.

use super::{expires_at_from_now, FileStore, ListOptions, ListPage, RenameOutcome, UpsertOutcome};
use crate::error::AppError;
use crate::model::{content_hash, empty_hash, FileRecord};
use crate::validate::derive_metadata;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;
use syncd_auth::{CredentialLookup, CredentialRow, Permission, Permissions};
use uuid::Uuid;

/// A bounded connection pool fronting the `files`/`credentials`/`tenants`
/// relations, matching the concurrency model's recommended shape (10 max
/// leases, 30s idle timeout, 5s acquisition timeout).
#[derive(Clone)]
pub struct PgFileStore {
    pool: PgPool,
}

impl PgFileStore {
    /// Connect using the given DSN and pool shape, then run compiled-in migrations.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        idle_timeout: Duration,
        acquire_timeout: Duration,
    ) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(idle_timeout)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            AppError::Internal(format!("migration failed: {e}"))
        })?;
        Ok(Self { pool })
    }

    /// Wrap an already-configured pool (e.g. one shared with a health check).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for health checks (`SELECT 1`).
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const FILE_COLUMNS: &str =
    "id, tenant_id, path, content, hash, size, extension, is_binary, created_at, updated_at, expires_at";

fn new_file_values(tenant_id: Uuid, path: &str, content: &str, now: chrono::DateTime<Utc>) -> (Uuid, String, String, i64, Option<String>, bool) {
    let (extension, is_binary) = derive_metadata(path);
    let _ = now;
    (Uuid::new_v4(), content_hash(content), content.to_string(), content.len() as i64, extension, is_binary)
}

#[async_trait]
impl FileStore for PgFileStore {
    async fn get(&self, tenant_id: Uuid, path: &str) -> Result<Option<FileRecord>, AppError> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE tenant_id = $1 AND path = $2 AND expires_at IS NULL"
        );
        let row = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(tenant_id)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_including_tombstones(
        &self,
        tenant_id: Uuid,
        path: &str,
    ) -> Result<Option<FileRecord>, AppError> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE tenant_id = $1 AND path = $2");
        let row = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(tenant_id)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn create_empty(&self, tenant_id: Uuid, path: &str) -> Result<UpsertOutcome, AppError> {
        let mut tx = self.pool.begin().await?;
        let select_sql =
            format!("SELECT {FILE_COLUMNS} FROM files WHERE tenant_id = $1 AND path = $2 FOR UPDATE");
        let existing = sqlx::query_as::<_, FileRecord>(&select_sql)
            .bind(tenant_id)
            .bind(path)
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match existing {
            Some(row) if !row.is_tombstone() => UpsertOutcome { record: row, created: false },
            Some(row) => {
                let update_sql = format!(
                    "UPDATE files SET content = '', hash = $1, size = 0, expires_at = NULL, updated_at = now() WHERE id = $2 RETURNING {FILE_COLUMNS}"
                );
                let record = sqlx::query_as::<_, FileRecord>(&update_sql)
                    .bind(empty_hash())
                    .bind(row.id)
                    .fetch_one(&mut *tx)
                    .await?;
                UpsertOutcome { record, created: true }
            }
            None => {
                let now = Utc::now();
                let (id, hash, content, size, extension, is_binary) =
                    new_file_values(tenant_id, path, "", now);
                let insert_sql = format!(
                    "INSERT INTO files (id, tenant_id, path, content, hash, size, extension, is_binary) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {FILE_COLUMNS}"
                );
                let record = sqlx::query_as::<_, FileRecord>(&insert_sql)
                    .bind(id)
                    .bind(tenant_id)
                    .bind(path)
                    .bind(content)
                    .bind(hash)
                    .bind(size)
                    .bind(extension)
                    .bind(is_binary)
                    .fetch_one(&mut *tx)
                    .await?;
                UpsertOutcome { record, created: true }
            }
        };
        tx.commit().await?;
        Ok(outcome)
    }

    async fn create_strict(
        &self,
        tenant_id: Uuid,
        path: &str,
        content: &str,
    ) -> Result<FileRecord, AppError> {
        let mut tx = self.pool.begin().await?;
        let select_sql =
            format!("SELECT {FILE_COLUMNS} FROM files WHERE tenant_id = $1 AND path = $2 FOR UPDATE");
        let existing = sqlx::query_as::<_, FileRecord>(&select_sql)
            .bind(tenant_id)
            .bind(path)
            .fetch_optional(&mut *tx)
            .await?;

        let record = match existing {
            Some(row) if !row.is_tombstone() => return Err(AppError::Conflict),
            Some(row) => {
                let update_sql = format!(
                    "UPDATE files SET content = $1, hash = $2, size = $3, expires_at = NULL, updated_at = now() WHERE id = $4 RETURNING {FILE_COLUMNS}"
                );
                sqlx::query_as::<_, FileRecord>(&update_sql)
                    .bind(content)
                    .bind(content_hash(content))
                    .bind(content.len() as i64)
                    .bind(row.id)
                    .fetch_one(&mut *tx)
                    .await?
            }
            None => {
                let now = Utc::now();
                let (id, hash, content_owned, size, extension, is_binary) =
                    new_file_values(tenant_id, path, content, now);
                let insert_sql = format!(
                    "INSERT INTO files (id, tenant_id, path, content, hash, size, extension, is_binary) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {FILE_COLUMNS}"
                );
                sqlx::query_as::<_, FileRecord>(&insert_sql)
                    .bind(id)
                    .bind(tenant_id)
                    .bind(path)
                    .bind(content_owned)
                    .bind(hash)
                    .bind(size)
                    .bind(extension)
                    .bind(is_binary)
                    .fetch_one(&mut *tx)
                    .await?
            }
        };
        tx.commit().await?;
        Ok(record)
    }

    async fn upsert(
        &self,
        tenant_id: Uuid,
        path: &str,
        content: &str,
    ) -> Result<UpsertOutcome, AppError> {
        let mut tx = self.pool.begin().await?;
        let select_sql =
            format!("SELECT {FILE_COLUMNS} FROM files WHERE tenant_id = $1 AND path = $2 FOR UPDATE");
        let existing = sqlx::query_as::<_, FileRecord>(&select_sql)
            .bind(tenant_id)
            .bind(path)
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match existing {
            Some(row) if !row.is_tombstone() => {
                let update_sql = format!(
                    "UPDATE files SET content = $1, hash = $2, size = $3, updated_at = now() WHERE id = $4 RETURNING {FILE_COLUMNS}"
                );
                let record = sqlx::query_as::<_, FileRecord>(&update_sql)
                    .bind(content)
                    .bind(content_hash(content))
                    .bind(content.len() as i64)
                    .bind(row.id)
                    .fetch_one(&mut *tx)
                    .await?;
                UpsertOutcome { record, created: false }
            }
            Some(row) => {
                let update_sql = format!(
                    "UPDATE files SET content = $1, hash = $2, size = $3, expires_at = NULL, updated_at = now() WHERE id = $4 RETURNING {FILE_COLUMNS}"
                );
                let record = sqlx::query_as::<_, FileRecord>(&update_sql)
                    .bind(content)
                    .bind(content_hash(content))
                    .bind(content.len() as i64)
                    .bind(row.id)
                    .fetch_one(&mut *tx)
                    .await?;
                UpsertOutcome { record, created: true }
            }
            None => {
                let now = Utc::now();
                let (id, hash, content_owned, size, extension, is_binary) =
                    new_file_values(tenant_id, path, content, now);
                let insert_sql = format!(
                    "INSERT INTO files (id, tenant_id, path, content, hash, size, extension, is_binary) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {FILE_COLUMNS}"
                );
                let record = sqlx::query_as::<_, FileRecord>(&insert_sql)
                    .bind(id)
                    .bind(tenant_id)
                    .bind(path)
                    .bind(content_owned)
                    .bind(hash)
                    .bind(size)
                    .bind(extension)
                    .bind(is_binary)
                    .fetch_one(&mut *tx)
                    .await?;
                UpsertOutcome { record, created: true }
            }
        };
        tx.commit().await?;
        Ok(outcome)
    }

    async fn soft_delete(&self, tenant_id: Uuid, path: &str) -> Result<bool, AppError> {
        let sql = "UPDATE files SET content = '', hash = $1, size = 0, expires_at = $2, updated_at = now() \
                    WHERE tenant_id = $3 AND path = $4 AND expires_at IS NULL";
        let result = sqlx::query(sql)
            .bind(empty_hash())
            .bind(expires_at_from_now(Utc::now()))
            .bind(tenant_id)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn soft_delete_all(&self, tenant_id: Uuid) -> Result<u64, AppError> {
        let sql = "UPDATE files SET content = '', hash = $1, size = 0, expires_at = $2, updated_at = now() \
                    WHERE tenant_id = $3 AND expires_at IS NULL";
        let result = sqlx::query(sql)
            .bind(empty_hash())
            .bind(expires_at_from_now(Utc::now()))
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn rename(
        &self,
        tenant_id: Uuid,
        old_path: &str,
        new_path: &str,
    ) -> Result<RenameOutcome, AppError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let select_sql =
            format!("SELECT {FILE_COLUMNS} FROM files WHERE tenant_id = $1 AND path = $2 FOR UPDATE");
        let source_active = sqlx::query_as::<_, FileRecord>(&select_sql)
            .bind(tenant_id)
            .bind(old_path)
            .fetch_optional(&mut *tx)
            .await?
            .filter(|r| !r.is_tombstone());

        // Soft-delete any active record at new_path, regardless of branch.
        sqlx::query(
            "UPDATE files SET content = '', hash = $1, size = 0, expires_at = $2, updated_at = now() \
             WHERE tenant_id = $3 AND path = $4 AND expires_at IS NULL",
        )
        .bind(empty_hash())
        .bind(expires_at_from_now(now))
        .bind(tenant_id)
        .bind(new_path)
        .execute(&mut *tx)
        .await?;

        let outcome = match source_active {
            None => {
                let dest_select =
                    format!("SELECT {FILE_COLUMNS} FROM files WHERE tenant_id = $1 AND path = $2 AND expires_at IS NOT NULL FOR UPDATE");
                let dest_tombstone = sqlx::query_as::<_, FileRecord>(&dest_select)
                    .bind(tenant_id)
                    .bind(new_path)
                    .fetch_optional(&mut *tx)
                    .await?;
                let record = if let Some(tombstone) = dest_tombstone {
                    let update_sql = format!(
                        "UPDATE files SET content = '', hash = $1, size = 0, expires_at = NULL, updated_at = now() WHERE id = $2 RETURNING {FILE_COLUMNS}"
                    );
                    sqlx::query_as::<_, FileRecord>(&update_sql)
                        .bind(empty_hash())
                        .bind(tombstone.id)
                        .fetch_one(&mut *tx)
                        .await?
                } else {
                    let (id, hash, content, size, extension, is_binary) =
                        new_file_values(tenant_id, new_path, "", now);
                    let insert_sql = format!(
                        "INSERT INTO files (id, tenant_id, path, content, hash, size, extension, is_binary) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {FILE_COLUMNS}"
                    );
                    sqlx::query_as::<_, FileRecord>(&insert_sql)
                        .bind(id)
                        .bind(tenant_id)
                        .bind(new_path)
                        .bind(content)
                        .bind(hash)
                        .bind(size)
                        .bind(extension)
                        .bind(is_binary)
                        .fetch_one(&mut *tx)
                        .await?
                };
                RenameOutcome { record, created: true }
            }
            Some(source) => {
                // Hard-delete any tombstone at new_path to free the unique key.
                sqlx::query("DELETE FROM files WHERE tenant_id = $1 AND path = $2 AND expires_at IS NOT NULL")
                    .bind(tenant_id)
                    .bind(new_path)
                    .execute(&mut *tx)
                    .await?;

                let update_sql =
                    format!("UPDATE files SET path = $1, updated_at = now() WHERE id = $2 RETURNING {FILE_COLUMNS}");
                let record = sqlx::query_as::<_, FileRecord>(&update_sql)
                    .bind(new_path)
                    .bind(source.id)
                    .fetch_one(&mut *tx)
                    .await?;

                // Leave a tombstone at old_path so offline peers can tell
                // "renamed away" from "never existed".
                let (tomb_id, tomb_hash, tomb_content, _size, tomb_ext, tomb_binary) =
                    new_file_values(tenant_id, old_path, "", now);
                let insert_sql = "INSERT INTO files (id, tenant_id, path, content, hash, size, extension, is_binary, expires_at) \
                                   VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8)";
                sqlx::query(insert_sql)
                    .bind(tomb_id)
                    .bind(tenant_id)
                    .bind(old_path)
                    .bind(tomb_content)
                    .bind(tomb_hash)
                    .bind(tomb_ext)
                    .bind(tomb_binary)
                    .bind(expires_at_from_now(now))
                    .execute(&mut *tx)
                    .await?;

                RenameOutcome { record, created: false }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn cleanup_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM files WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list(&self, tenant_id: Uuid, options: ListOptions) -> Result<ListPage, AppError> {
        let options = options.normalized();

        let build_where = |qb: &mut QueryBuilder<'_, Postgres>| {
            qb.push(" WHERE tenant_id = ").push_bind(tenant_id);
            if !options.include_deleted {
                qb.push(" AND expires_at IS NULL");
            }
            if let Some(prefix) = &options.path_prefix {
                qb.push(" AND path LIKE ").push_bind(format!("{prefix}%"));
            }
            if let Some(contains) = &options.path_contains {
                qb.push(" AND path LIKE ").push_bind(format!("%{contains}%"));
            }
            if !options.extensions.is_empty() {
                qb.push(" AND extension IN (");
                let mut sep = qb.separated(", ");
                for ext in &options.extensions {
                    sep.push_bind(ext.clone());
                }
                qb.push(")");
            }
            if let Some(needle) = &options.content_contains {
                qb.push(" AND is_binary = false AND content ILIKE ")
                    .push_bind(format!("%{needle}%"));
            }
            if let Some(is_binary) = options.is_binary {
                qb.push(" AND is_binary = ").push_bind(is_binary);
            }
        };

        let mut count_qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM files");
        build_where(&mut count_qb);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.try_get(0)?;

        let mut page_qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {FILE_COLUMNS} FROM files"));
        build_where(&mut page_qb);
        page_qb.push(" ORDER BY path ASC LIMIT ").push_bind(options.limit);
        page_qb.push(" OFFSET ").push_bind(options.offset);

        let files = page_qb.build_query_as::<FileRecord>().fetch_all(&self.pool).await?;

        Ok(ListPage { files, total, limit: options.limit, offset: options.offset })
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[async_trait]
impl CredentialLookup for PgFileStore {
    async fn find_active_by_hash(&self, hash: &str) -> Option<CredentialRow> {
        let row = sqlx::query(
            "SELECT id, tenant_id, can_read, can_write, revoked_at FROM credentials \
             WHERE key_hash = $1 AND revoked_at IS NULL",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .ok()??;

        let can_read: bool = row.try_get("can_read").ok()?;
        let can_write: bool = row.try_get("can_write").ok()?;
        let mut perms = Vec::new();
        if can_read {
            perms.push(Permission::Read);
        }
        if can_write {
            perms.push(Permission::Write);
        }

        Some(CredentialRow {
            id: row.try_get("id").ok()?,
            tenant_id: row.try_get("tenant_id").ok()?,
            permissions: Permissions::from_iter(perms),
            revoked_at: None,
        })
    }

    async fn touch_last_used(&self, credential_id: Uuid) {
        if let Err(err) = sqlx::query("UPDATE credentials SET last_used_at = now() WHERE id = $1")
            .bind(credential_id)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(?err, %credential_id, "failed to update credential last_used_at");
        }
    }
}
