// SPDX-License-Identifier: Apache-2.0
//! File store and query engine: the trait both the production
//! Postgres-backed implementation and the in-memory test double satisfy.

mod memory;
mod pg;

pub use memory::InMemoryFileStore;
pub use pg::PgFileStore;

use crate::error::AppError;
use crate::model::FileRecord;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

/// Tombstone TTL: 30 days between soft-delete and eligibility for
/// permanent removal.
pub fn tombstone_ttl() -> ChronoDuration {
    ChronoDuration::days(30)
}

/// Outcome of an operation that may have created a new row (including by
/// resurrecting a tombstone) or mutated an existing active one.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// The resulting record.
    pub record: FileRecord,
    /// True if this write created a new id-bearing row or resurrected a
    /// tombstone; false if it updated an already-active record in place.
    pub created: bool,
}

/// Outcome of a rename.
#[derive(Debug, Clone)]
pub struct RenameOutcome {
    /// The record now living at `new_path`.
    pub record: FileRecord,
    /// True iff there was no active record at `old_path` (so the rename
    /// degraded to creating an empty record at `new_path`).
    pub created: bool,
}

/// Filters and pagination for [`FileStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// `path LIKE prefix || '%'`.
    pub path_prefix: Option<String>,
    /// `path LIKE '%' || v || '%'`, case-sensitive.
    pub path_contains: Option<String>,
    /// Normalized (trimmed, lowercased) extension tokens; `extension IN (…)`.
    pub extensions: Vec<String>,
    /// `content ILIKE '%' || v || '%'` AND `is_binary = false`.
    pub content_contains: Option<String>,
    /// `is_binary = v`.
    pub is_binary: Option<bool>,
    /// When false (default), adds `expires_at IS NULL`.
    pub include_deleted: bool,
    /// Page size, clamped to [1, 1000] by [`ListOptions::normalized`].
    pub limit: i64,
    /// Page offset, clamped to >= 0 by [`ListOptions::normalized`].
    pub offset: i64,
}

impl ListOptions {
    /// Default page size.
    pub const DEFAULT_LIMIT: i64 = 100;
    /// Maximum page size.
    pub const MAX_LIMIT: i64 = 1000;

    /// Normalize extension tokens (trim + lowercase) and clamp pagination
    /// to their documented bounds.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.extensions = self
            .extensions
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if self.limit <= 0 {
            self.limit = Self::DEFAULT_LIMIT;
        }
        self.limit = self.limit.clamp(1, Self::MAX_LIMIT);
        self.offset = self.offset.max(0);
        self
    }
}

/// A page of listing results.
#[derive(Debug, Clone)]
pub struct ListPage {
    /// Matching records for this page (summary projection applied by the caller).
    pub files: Vec<FileRecord>,
    /// Total count matching the same WHERE clause, across all pages.
    pub total: i64,
    /// Echoed page size.
    pub limit: i64,
    /// Echoed page offset.
    pub offset: i64,
}

/// The tenant-scoped file store operations plus the listing query
/// engine. Every method is implicitly scoped to `tenant_id`.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Active record at `path`, or `None` (tombstones are invisible).
    async fn get(&self, tenant_id: Uuid, path: &str) -> Result<Option<FileRecord>, AppError>;

    /// Record at `path` regardless of tombstone state.
    async fn get_including_tombstones(
        &self,
        tenant_id: Uuid,
        path: &str,
    ) -> Result<Option<FileRecord>, AppError>;

    /// Idempotent empty-file creation; resurrects a tombstone if present.
    async fn create_empty(&self, tenant_id: Uuid, path: &str) -> Result<UpsertOutcome, AppError>;

    /// Strict creation: fails with `Conflict` if an active record exists.
    async fn create_strict(
        &self,
        tenant_id: Uuid,
        path: &str,
        content: &str,
    ) -> Result<FileRecord, AppError>;

    /// Create-or-update; resurrects a tombstone if present.
    async fn upsert(
        &self,
        tenant_id: Uuid,
        path: &str,
        content: &str,
    ) -> Result<UpsertOutcome, AppError>;

    /// Soft-delete the active record at `path`. Returns whether a row was affected.
    async fn soft_delete(&self, tenant_id: Uuid, path: &str) -> Result<bool, AppError>;

    /// Soft-delete every active record for the tenant. Returns the count affected.
    async fn soft_delete_all(&self, tenant_id: Uuid) -> Result<u64, AppError>;

    /// Rename `old_path` to `new_path`, per the documented ordered semantics.
    async fn rename(
        &self,
        tenant_id: Uuid,
        old_path: &str,
        new_path: &str,
    ) -> Result<RenameOutcome, AppError>;

    /// Permanently delete every record (tenant-scoped or global, at the
    /// implementor's discretion) whose `expires_at` has passed. Invoked
    /// fire-and-forget; failures are logged and ignored by the caller.
    async fn cleanup_expired(&self) -> Result<u64, AppError>;

    /// Paginated, filtered listing. Does not itself trigger cleanup —
    /// callers invoke [`FileStore::cleanup_expired`] fire-and-forget first.
    async fn list(&self, tenant_id: Uuid, options: ListOptions) -> Result<ListPage, AppError>;

    /// Liveness check for the health endpoint. Never returns an error —
    /// a failed check is reported as `false`, not propagated.
    async fn ping(&self) -> bool;
}

fn expires_at_from_now(now: DateTime<Utc>) -> DateTime<Utc> {
    now + tombstone_ttl()
}
