// SPDX-License-Identifier: Apache-2.0
//! In-memory [`FileStore`] implementation.
//!
//! Used by this crate's own unit tests and by the gateway crate's
//! broadcast-exclusion tests so those can exercise real file store
//! semantics without a live Postgres connection.

use super::{expires_at_from_now, FileStore, ListOptions, ListPage, RenameOutcome, UpsertOutcome};
use crate::error::AppError;
use crate::model::{content_hash, empty_hash, FileRecord};
use crate::validate::derive_metadata;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Rows {
    by_key: HashMap<(Uuid, String), FileRecord>,
}

/// A `Mutex`-guarded `HashMap`-backed store matching the Postgres
/// implementation's observable semantics exactly. Not suitable for
/// production (no durability, no cross-process sharing) — a direct
/// stand-in for the database in tests.
#[derive(Default)]
pub struct InMemoryFileStore {
    rows: Mutex<Rows>,
}

impl InMemoryFileStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn new_record(tenant_id: Uuid, path: &str, content: &str, now: chrono::DateTime<Utc>) -> FileRecord {
        let (extension, is_binary) = derive_metadata(path);
        FileRecord {
            id: Uuid::new_v4(),
            tenant_id,
            path: path.to_string(),
            content: content.to_string(),
            hash: content_hash(content),
            size: content.len() as i64,
            extension,
            is_binary,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn get(&self, tenant_id: Uuid, path: &str) -> Result<Option<FileRecord>, AppError> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .by_key
            .get(&(tenant_id, path.to_string()))
            .filter(|r| !r.is_tombstone())
            .cloned())
    }

    async fn get_including_tombstones(
        &self,
        tenant_id: Uuid,
        path: &str,
    ) -> Result<Option<FileRecord>, AppError> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.by_key.get(&(tenant_id, path.to_string())).cloned())
    }

    async fn create_empty(&self, tenant_id: Uuid, path: &str) -> Result<UpsertOutcome, AppError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let key = (tenant_id, path.to_string());
        match rows.by_key.get(&key) {
            Some(existing) if !existing.is_tombstone() => {
                Ok(UpsertOutcome { record: existing.clone(), created: false })
            }
            Some(tombstone) => {
                let mut record = tombstone.clone();
                record.content = String::new();
                record.hash = empty_hash();
                record.size = 0;
                record.expires_at = None;
                record.updated_at = now;
                rows.by_key.insert(key, record.clone());
                Ok(UpsertOutcome { record, created: true })
            }
            None => {
                let record = Self::new_record(tenant_id, path, "", now);
                rows.by_key.insert(key, record.clone());
                Ok(UpsertOutcome { record, created: true })
            }
        }
    }

    async fn create_strict(
        &self,
        tenant_id: Uuid,
        path: &str,
        content: &str,
    ) -> Result<FileRecord, AppError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let key = (tenant_id, path.to_string());
        match rows.by_key.get(&key) {
            Some(existing) if !existing.is_tombstone() => Err(AppError::Conflict),
            Some(tombstone) => {
                let mut record = tombstone.clone();
                record.content = content.to_string();
                record.hash = content_hash(content);
                record.size = content.len() as i64;
                record.expires_at = None;
                record.updated_at = now;
                rows.by_key.insert(key, record.clone());
                Ok(record)
            }
            None => {
                let record = Self::new_record(tenant_id, path, content, now);
                rows.by_key.insert(key, record.clone());
                Ok(record)
            }
        }
    }

    async fn upsert(
        &self,
        tenant_id: Uuid,
        path: &str,
        content: &str,
    ) -> Result<UpsertOutcome, AppError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let key = (tenant_id, path.to_string());
        match rows.by_key.get(&key) {
            Some(existing) if !existing.is_tombstone() => {
                let mut record = existing.clone();
                record.content = content.to_string();
                record.hash = content_hash(content);
                record.size = content.len() as i64;
                record.updated_at = now;
                rows.by_key.insert(key, record.clone());
                Ok(UpsertOutcome { record, created: false })
            }
            Some(tombstone) => {
                let mut record = tombstone.clone();
                record.content = content.to_string();
                record.hash = content_hash(content);
                record.size = content.len() as i64;
                record.expires_at = None;
                record.updated_at = now;
                rows.by_key.insert(key, record.clone());
                Ok(UpsertOutcome { record, created: true })
            }
            None => {
                let record = Self::new_record(tenant_id, path, content, now);
                rows.by_key.insert(key, record.clone());
                Ok(UpsertOutcome { record, created: true })
            }
        }
    }

    async fn soft_delete(&self, tenant_id: Uuid, path: &str) -> Result<bool, AppError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let key = (tenant_id, path.to_string());
        match rows.by_key.get_mut(&key) {
            Some(record) if !record.is_tombstone() => {
                record.content = String::new();
                record.hash = empty_hash();
                record.size = 0;
                record.expires_at = Some(expires_at_from_now(now));
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn soft_delete_all(&self, tenant_id: Uuid) -> Result<u64, AppError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut count = 0u64;
        for (key, record) in &mut rows.by_key {
            if key.0 == tenant_id && !record.is_tombstone() {
                record.content = String::new();
                record.hash = empty_hash();
                record.size = 0;
                record.expires_at = Some(expires_at_from_now(now));
                record.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn rename(
        &self,
        tenant_id: Uuid,
        old_path: &str,
        new_path: &str,
    ) -> Result<RenameOutcome, AppError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let old_key = (tenant_id, old_path.to_string());
        let new_key = (tenant_id, new_path.to_string());

        let source_active = rows.by_key.get(&old_key).filter(|r| !r.is_tombstone()).cloned();

        // Soft-delete any active record at new_path, regardless of branch.
        if let Some(dest) = rows.by_key.get_mut(&new_key) {
            if !dest.is_tombstone() {
                dest.content = String::new();
                dest.hash = empty_hash();
                dest.size = 0;
                dest.expires_at = Some(expires_at_from_now(now));
                dest.updated_at = now;
            }
        }

        match source_active {
            None => {
                let tombstone_at_dest =
                    rows.by_key.get(&new_key).filter(|r| r.is_tombstone()).cloned();
                let record = if let Some(tombstone) = tombstone_at_dest {
                    let mut record = tombstone;
                    record.content = String::new();
                    record.hash = empty_hash();
                    record.size = 0;
                    record.expires_at = None;
                    record.updated_at = now;
                    rows.by_key.insert(new_key, record.clone());
                    record
                } else {
                    let record = Self::new_record(tenant_id, new_path, "", now);
                    rows.by_key.insert(new_key, record.clone());
                    record
                };
                Ok(RenameOutcome { record, created: true })
            }
            Some(source) => {
                // Hard-delete any tombstone at new_path to free the unique key.
                rows.by_key.remove(&new_key);

                let mut record = source;
                record.path = new_path.to_string();
                record.updated_at = now;
                rows.by_key.insert(new_key, record.clone());
                rows.by_key.remove(&old_key);

                // Leave a tombstone at old_path so offline peers can tell
                // "renamed away" from "never existed".
                let mut source_tombstone =
                    Self::new_record(tenant_id, old_path, "", now);
                source_tombstone.expires_at = Some(expires_at_from_now(now));
                rows.by_key.insert(old_key, source_tombstone);

                Ok(RenameOutcome { record, created: false })
            }
        }
    }

    async fn cleanup_expired(&self) -> Result<u64, AppError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let before = rows.by_key.len();
        rows.by_key.retain(|_, r| r.expires_at.is_none_or(|exp| exp >= now));
        Ok((before - rows.by_key.len()) as u64)
    }

    async fn list(&self, tenant_id: Uuid, options: ListOptions) -> Result<ListPage, AppError> {
        let options = options.normalized();
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());

        let mut matches: Vec<FileRecord> = rows
            .by_key
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .filter(|r| options.include_deleted || r.expires_at.is_none())
            .filter(|r| {
                options.path_prefix.as_ref().is_none_or(|p| r.path.starts_with(p.as_str()))
            })
            .filter(|r| {
                options.path_contains.as_ref().is_none_or(|p| r.path.contains(p.as_str()))
            })
            .filter(|r| {
                options.extensions.is_empty()
                    || r.extension.as_deref().is_some_and(|e| options.extensions.iter().any(|x| x == e))
            })
            .filter(|r| {
                options.content_contains.as_ref().is_none_or(|needle| {
                    !r.is_binary && r.content.to_lowercase().contains(&needle.to_lowercase())
                })
            })
            .filter(|r| options.is_binary.is_none_or(|b| r.is_binary == b))
            .cloned()
            .collect();

        matches.sort_by(|a, b| a.path.cmp(&b.path));
        let total = matches.len() as i64;

        let start = (options.offset as usize).min(matches.len());
        let end = (start + options.limit as usize).min(matches.len());
        let page = matches[start..end].to_vec();

        Ok(ListPage { files: page, total, limit: options.limit, offset: options.offset })
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryFileStore {
        InMemoryFileStore::new()
    }

    #[tokio::test]
    async fn create_empty_is_idempotent_on_id() {
        let s = store();
        let t = Uuid::new_v4();
        let first = s.create_empty(t, "notes/a.md").await.unwrap();
        assert!(first.created);
        let second = s.create_empty(t, "notes/a.md").await.unwrap();
        assert!(!second.created);
        assert_eq!(first.record.id, second.record.id);
    }

    #[tokio::test]
    async fn upsert_over_tombstone_resurrects_same_id() {
        let s = store();
        let t = Uuid::new_v4();
        let created = s.upsert(t, "x.md", "hello").await.unwrap();
        let id = created.record.id;
        assert!(created.created);

        assert!(s.soft_delete(t, "x.md").await.unwrap());
        assert!(s.get(t, "x.md").await.unwrap().is_none());

        let resurrected = s.upsert(t, "x.md", "again").await.unwrap();
        assert!(resurrected.created, "resurrection reports created=true");
        assert_eq!(resurrected.record.id, id, "resurrection reuses the tombstone's id");
        assert!(resurrected.record.expires_at.is_none());
        assert_eq!(resurrected.record.content, "again");
    }

    #[tokio::test]
    async fn create_strict_conflicts_on_active_record_but_resurrects_tombstone() {
        let s = store();
        let t = Uuid::new_v4();
        s.create_strict(t, "a.txt", "one").await.unwrap();
        let err = s.create_strict(t, "a.txt", "two").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict));

        assert!(s.soft_delete(t, "a.txt").await.unwrap());
        let resurrected = s.create_strict(t, "a.txt", "three").await.unwrap();
        assert_eq!(resurrected.content, "three");
        assert!(resurrected.expires_at.is_none());
    }

    #[tokio::test]
    async fn soft_delete_is_idempotent_and_clears_content() {
        let s = store();
        let t = Uuid::new_v4();
        s.upsert(t, "a.txt", "payload").await.unwrap();
        assert!(s.soft_delete(t, "a.txt").await.unwrap());
        assert!(!s.soft_delete(t, "a.txt").await.unwrap(), "second call affects no row");

        let tombstone = s.get_including_tombstones(t, "a.txt").await.unwrap().unwrap();
        assert_eq!(tombstone.content, "");
        assert_eq!(tombstone.size, 0);
        assert_eq!(tombstone.hash, empty_hash());
        assert!(tombstone.expires_at.is_some());
    }

    #[tokio::test]
    async fn soft_delete_on_missing_path_reports_false() {
        let s = store();
        let t = Uuid::new_v4();
        assert!(!s.soft_delete(t, "missing.txt").await.unwrap());
    }

    #[tokio::test]
    async fn rename_over_active_destination_soft_deletes_it_and_tombstones_source() {
        let s = store();
        let t = Uuid::new_v4();
        s.upsert(t, "a.md", "A").await.unwrap();
        s.upsert(t, "b.md", "B").await.unwrap();

        let outcome = s.rename(t, "a.md", "b.md").await.unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.record.path, "b.md");
        assert_eq!(outcome.record.content, "A");

        assert!(s.get(t, "a.md").await.unwrap().is_none());
        let source_tombstone = s.get_including_tombstones(t, "a.md").await.unwrap();
        assert!(source_tombstone.is_some(), "source leaves a tombstone behind");

        let dest = s.get(t, "b.md").await.unwrap().unwrap();
        assert_eq!(dest.content, "A");

        // No tombstone survives at the destination: the unique key is
        // free for the renamed row to occupy.
        let dest_row = s.get_including_tombstones(t, "b.md").await.unwrap().unwrap();
        assert!(!dest_row.is_tombstone());
    }

    #[tokio::test]
    async fn rename_with_missing_source_creates_empty_destination() {
        let s = store();
        let t = Uuid::new_v4();
        let outcome = s.rename(t, "ghost.md", "real.md").await.unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.record.content, "");
        assert_eq!(outcome.record.path, "real.md");
    }

    #[tokio::test]
    async fn metadata_is_always_derived_never_accepted() {
        let s = store();
        let t = Uuid::new_v4();
        let outcome = s.upsert(t, "archive/photo.PNG", "ignored").await.unwrap();
        assert_eq!(outcome.record.extension.as_deref(), Some("png"));
        assert!(outcome.record.is_binary);
    }

    #[tokio::test]
    async fn listing_hides_tombstones_by_default_and_totals_match_filter() {
        let s = store();
        let t = Uuid::new_v4();
        for (path, content) in [("a.md", "recipe for soup"), ("b.png", "binarydata"), ("c.jpg", "binarydata2")] {
            s.upsert(t, path, content).await.unwrap();
        }
        s.soft_delete(t, "a.md").await.unwrap();

        let visible = s.list(t, ListOptions::default()).await.unwrap();
        assert_eq!(visible.total, 2);
        assert!(visible.files.iter().all(|f| f.path != "a.md"));

        let with_deleted =
            s.list(t, ListOptions { include_deleted: true, ..Default::default() }).await.unwrap();
        assert_eq!(with_deleted.total, 3);
    }

    #[tokio::test]
    async fn extension_filter_matches_comma_separated_set() {
        let s = store();
        let t = Uuid::new_v4();
        for path in ["a.md", "b.png", "c.jpg", "d.md"] {
            s.upsert(t, path, "x").await.unwrap();
        }
        let options = ListOptions { extensions: vec!["png".to_string(), "jpg".to_string()], ..Default::default() };
        let page = s.list(t, options).await.unwrap();
        assert_eq!(page.total, 2);
        assert!(page.files.iter().all(|f| f.is_binary));
    }

    #[tokio::test]
    async fn content_contains_excludes_binary_even_on_substring_match() {
        let s = store();
        let t = Uuid::new_v4();
        s.upsert(t, "notes.md", "has the word recipe in it").await.unwrap();
        s.upsert(t, "image.png", "recipe-looking-base64-junk").await.unwrap();

        let options = ListOptions { content_contains: Some("recipe".to_string()), ..Default::default() };
        let page = s.list(t, options).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.files[0].path, "notes.md");
    }

    #[tokio::test]
    async fn listing_is_ordered_by_path_ascending() {
        let s = store();
        let t = Uuid::new_v4();
        for path in ["z.txt", "a.txt", "m.txt"] {
            s.upsert(t, path, "x").await.unwrap();
        }
        let page = s.list(t, ListOptions::default()).await.unwrap();
        let paths: Vec<_> = page.files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, vec!["a.txt", "m.txt", "z.txt"]);
    }

    #[tokio::test]
    async fn list_is_scoped_per_tenant() {
        let s = store();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        s.upsert(t1, "a.txt", "x").await.unwrap();
        s.upsert(t2, "b.txt", "y").await.unwrap();

        let page = s.list(t1, ListOptions::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.files[0].path, "a.txt");
    }

    #[tokio::test]
    async fn soft_delete_all_affects_only_active_rows_for_tenant() {
        let s = store();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        s.upsert(t1, "a.txt", "x").await.unwrap();
        s.upsert(t1, "b.txt", "y").await.unwrap();
        s.upsert(t2, "c.txt", "z").await.unwrap();

        let deleted = s.soft_delete_all(t1).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(s.get(t1, "a.txt").await.unwrap().is_none());
        assert!(s.get(t2, "c.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_expired_removes_only_past_tombstones() {
        let s = store();
        let t = Uuid::new_v4();
        s.upsert(t, "a.txt", "x").await.unwrap();
        s.soft_delete(t, "a.txt").await.unwrap();

        // Freshly tombstoned: 30-day TTL means cleanup must not touch it yet.
        let removed = s.cleanup_expired().await.unwrap();
        assert_eq!(removed, 0);
        assert!(s.get_including_tombstones(t, "a.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn hash_and_size_invariants_hold_after_every_write() {
        let s = store();
        let t = Uuid::new_v4();
        let outcome = s.upsert(t, "a.txt", "hello world").await.unwrap();
        assert_eq!(outcome.record.hash, content_hash(&outcome.record.content));
        assert_eq!(outcome.record.size, outcome.record.content.len() as i64);
    }
}
