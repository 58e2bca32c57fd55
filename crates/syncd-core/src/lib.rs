// SPDX-License-Identifier: Apache-2.0
//! Domain model, validation, error taxonomy, and persistence for the file
//! sync server. Transport-agnostic: no HTTP or WebSocket types live here.

pub mod error;
pub mod model;
pub mod store;
pub mod validate;

pub use error::{AppError, ErrorCode};
pub use model::{content_hash, empty_hash, FileDetail, FileRecord, FileSummary, Tenant};
pub use store::{FileStore, InMemoryFileStore, ListOptions, ListPage, PgFileStore, RenameOutcome, UpsertOutcome};
