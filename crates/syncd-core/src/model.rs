// SPDX-License-Identifier: Apache-2.0
//! Data model: tenants, credentials, and file records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Lowercase-hex SHA-256 digest of `content`, prefixed with `sha256:`.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Hash of the empty string, used for tombstones.
#[must_use]
pub fn empty_hash() -> String {
    content_hash("")
}

/// A namespace of files and credentials.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tenant {
    /// Opaque tenant id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A persisted file record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileRecord {
    /// Row id, stable across resurrection.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Relative path, 1-1000 chars, grammar enforced by [`crate::validate`].
    pub path: String,
    /// Stored representation: plaintext for text, base64 for binary.
    pub content: String,
    /// `sha256:` + hex(SHA256(content)).
    pub hash: String,
    /// UTF-8 byte length of `content`.
    pub size: i64,
    /// Lowercase extension without leading dot, or absent.
    pub extension: Option<String>,
    /// True iff `extension` is a known binary extension.
    pub is_binary: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Non-null means this record is a tombstone, invisible to normal reads.
    pub expires_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Whether this record is a soft-deleted tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.expires_at.is_some()
    }
}

/// Summary projection returned by listings; omits `content`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    /// Row id.
    pub id: Uuid,
    /// Relative path.
    pub path: String,
    /// Content hash.
    pub hash: String,
    /// Byte size.
    pub size: i64,
    /// Binary classification.
    pub is_binary: bool,
    /// Extension, if any.
    pub extension: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Present only for tombstones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&FileRecord> for FileSummary {
    fn from(r: &FileRecord) -> Self {
        Self {
            id: r.id,
            path: r.path.clone(),
            hash: r.hash.clone(),
            size: r.size,
            is_binary: r.is_binary,
            extension: r.extension.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
            expires_at: r.expires_at,
        }
    }
}

/// Full projection returned for a single-file GET; includes `content`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetail {
    /// Relative path.
    pub path: String,
    /// Stored content.
    pub content: String,
    /// Content hash.
    pub hash: String,
    /// Byte size.
    pub size: i64,
    /// Binary classification.
    pub is_binary: bool,
    /// Extension, if any.
    pub extension: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl From<&FileRecord> for FileDetail {
    fn from(r: &FileRecord) -> Self {
        Self {
            path: r.path.clone(),
            content: r.content.clone(),
            hash: r.hash.clone(),
            size: r.size,
            is_binary: r.is_binary,
            extension: r.extension.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_hash_matches_known_sha256() {
        assert_eq!(
            empty_hash(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn content_hash_is_stable_and_prefixed() {
        let h = content_hash("hello");
        assert!(h.starts_with("sha256:"));
        assert_eq!(h.len(), 7 + 64);
        assert_eq!(h, content_hash("hello"));
        assert_ne!(h, content_hash("hellO"));
    }
}
