// SPDX-License-Identifier: Apache-2.0
//! Wire schema for the event channel gateway: inbound client events,
//! outbound broadcast events, and the acknowledgment envelope. Shared
//! between the gateway and the HTTP layer, which emits the same outbound
//! events on successful mutation, so both transports broadcast an
//! identical payload shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use syncd_core::{ErrorCode, FileRecord};

/// A client-originated frame: an ack correlation id plus the event payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    /// Echoed back on the corresponding [`AckEnvelope`] so the caller can
    /// match acks to the event it sent (events may complete out of order
    /// across connections, never within one).
    #[serde(rename = "ackId")]
    pub ack_id: String,
    /// The event itself.
    #[serde(flatten)]
    pub event: InboundEvent,
}

/// Events a peer may send on the channel. All four require the `write`
/// permission.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// `createEmpty` at `path`.
    CreatedFile {
        /// Target path.
        path: String,
    },
    /// `upsert` at `path` with `content`.
    ModifiedFile {
        /// Target path.
        path: String,
        /// New content.
        content: String,
    },
    /// `softDelete` at `path`.
    DeletedFile {
        /// Target path.
        path: String,
    },
    /// `rename` from `old_path` to `new_path`.
    #[serde(rename_all = "camelCase")]
    RenamedFile {
        /// Source path.
        old_path: String,
        /// Destination path.
        new_path: String,
    },
}

/// Events the server broadcasts to a tenant room, either with sender
/// exclusion (channel-originated mutation) or to the entire room
/// (REST-originated mutation).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// A file was created (including tombstone resurrection).
    #[serde(rename_all = "camelCase")]
    FileCreated {
        /// File path.
        path: String,
        /// Stored content.
        content: String,
        /// Content hash.
        hash: String,
        /// Byte size.
        size: i64,
        /// Binary classification.
        is_binary: bool,
        /// Extension, if any.
        extension: Option<String>,
        /// Creation time.
        created_at: DateTime<Utc>,
    },
    /// An existing active file was modified in place.
    #[serde(rename_all = "camelCase")]
    FileModified {
        /// File path.
        path: String,
        /// Stored content.
        content: String,
        /// Content hash.
        hash: String,
        /// Byte size.
        size: i64,
        /// Binary classification.
        is_binary: bool,
        /// Extension, if any.
        extension: Option<String>,
        /// Last mutation time.
        updated_at: DateTime<Utc>,
    },
    /// A file was soft-deleted.
    #[serde(rename_all = "camelCase")]
    FileDeleted {
        /// File path.
        path: String,
        /// Tombstone time.
        deleted_at: DateTime<Utc>,
    },
    /// A file was renamed onto a path with no active record at it.
    #[serde(rename_all = "camelCase")]
    FileRenamed {
        /// Source path.
        old_path: String,
        /// Destination path.
        new_path: String,
        /// Stored content.
        content: String,
        /// Content hash.
        hash: String,
        /// Byte size.
        size: i64,
        /// Binary classification.
        is_binary: bool,
        /// Extension, if any.
        extension: Option<String>,
        /// Last mutation time.
        updated_at: DateTime<Utc>,
    },
}

impl OutboundEvent {
    /// Build the `file-created` event from the record left behind by a
    /// create/upsert/rename that produced a new or resurrected row.
    #[must_use]
    pub fn created(record: &FileRecord) -> Self {
        Self::FileCreated {
            path: record.path.clone(),
            content: record.content.clone(),
            hash: record.hash.clone(),
            size: record.size,
            is_binary: record.is_binary,
            extension: record.extension.clone(),
            created_at: record.created_at,
        }
    }

    /// Build the `file-modified` event from an in-place update.
    #[must_use]
    pub fn modified(record: &FileRecord) -> Self {
        Self::FileModified {
            path: record.path.clone(),
            content: record.content.clone(),
            hash: record.hash.clone(),
            size: record.size,
            is_binary: record.is_binary,
            extension: record.extension.clone(),
            updated_at: record.updated_at,
        }
    }

    /// Build the `file-deleted` event from a soft-deleted record.
    #[must_use]
    pub fn deleted(path: &str, deleted_at: DateTime<Utc>) -> Self {
        Self::FileDeleted { path: path.to_string(), deleted_at }
    }

    /// Build the `file-renamed` event from the record now living at
    /// `new_path`.
    #[must_use]
    pub fn renamed(old_path: &str, record: &FileRecord) -> Self {
        Self::FileRenamed {
            old_path: old_path.to_string(),
            new_path: record.path.clone(),
            content: record.content.clone(),
            hash: record.hash.clone(),
            size: record.size,
            is_binary: record.is_binary,
            extension: record.extension.clone(),
            updated_at: record.updated_at,
        }
    }
}

/// The server's single-response acknowledgment for a client-originated
/// event: exactly one per `ackId`, success or error, never both.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEnvelope {
    /// Echoes [`InboundFrame::ack_id`].
    pub ack_id: String,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Present only on success, and only when the operation produced a
    /// content-bearing record (absent for e.g. a no-op delete of an
    /// already-tombstoned path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Present only on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
}

impl AckEnvelope {
    /// A successful ack carrying the resulting content hash.
    #[must_use]
    pub fn ok(ack_id: String, hash: impl Into<Option<String>>) -> Self {
        Self { ack_id, success: true, hash: hash.into(), error: None }
    }

    /// A failed ack. `code` is restricted to `FORBIDDEN`,
    /// `VALIDATION_ERROR`, or `INTERNAL_ERROR` — callers are expected to
    /// have already mapped other [`ErrorCode`] values (e.g. `NOT_FOUND`)
    /// to a non-error outcome per the channel's "missing path is not an
    /// error" semantics before reaching this constructor.
    #[must_use]
    pub fn err(ack_id: String, code: ErrorCode, message: String) -> Self {
        Self { ack_id, success: false, hash: None, error: Some(AckError { code, message }) }
    }
}

/// The error half of an [`AckEnvelope`].
#[derive(Debug, Clone, Serialize)]
pub struct AckError {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable message, safe to show to the caller.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frame_parses_created_file() {
        let json = r#"{"ackId":"1","event":"created-file","payload":{"path":"a.txt"}}"#;
        let frame: InboundFrame = serde_json::from_str(json).expect("parse");
        assert_eq!(frame.ack_id, "1");
        match frame.event {
            InboundEvent::CreatedFile { path } => assert_eq!(path, "a.txt"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn inbound_frame_parses_renamed_file_camel_case_fields() {
        let json = r#"{"ackId":"2","event":"renamed-file","payload":{"oldPath":"a","newPath":"b"}}"#;
        let frame: InboundFrame = serde_json::from_str(json).expect("parse");
        match frame.event {
            InboundEvent::RenamedFile { old_path, new_path } => {
                assert_eq!(old_path, "a");
                assert_eq!(new_path, "b");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn outbound_event_serializes_kebab_case_tag_camel_case_fields() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let event = OutboundEvent::FileDeleted { path: "a.txt".to_string(), deleted_at: now };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "file-deleted");
        assert_eq!(value["payload"]["path"], "a.txt");
        assert!(value["payload"].get("deletedAt").is_some());
    }

    #[test]
    fn ack_envelope_omits_absent_fields() {
        let ok = AckEnvelope::ok("1".to_string(), "sha256:abc".to_string());
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["success"], true);
        assert!(value.get("error").is_none());

        let err = AckEnvelope::err("2".to_string(), ErrorCode::Forbidden, "nope".to_string());
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["success"], false);
        assert!(value.get("hash").is_none());
        assert_eq!(value["error"]["code"], "FORBIDDEN");
    }
}
