// SPDX-License-Identifier: Apache-2.0
//! Shared fixtures for handler tests: an `InMemoryFileStore`-backed
//! `AppState` plus a static `CredentialLookup` test double, so the HTTP
//! and WebSocket handler tests never need a live Postgres instance.
#![cfg(test)]

use crate::state::AppState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use syncd_auth::{hash_plaintext, CredentialLookup, CredentialRow, Permission, Permissions};
use syncd_core::InMemoryFileStore;
use syncd_gateway::RoomRegistry;
use uuid::Uuid;

/// Plaintext admin key configured on the fixture `AppState`.
pub const ADMIN_HEADER: &str = "sk_admin_test-admin-secret";
/// Plaintext read-write tenant key resolvable by the fixture lookup.
pub const TENANT_HEADER: &str = "sk_store_aaaaaa_readwrite-secret";
/// Plaintext read-only tenant key resolvable by the fixture lookup.
pub const READONLY_HEADER: &str = "sk_store_aaaaaa_readonly-secret";

struct StaticLookup {
    rows: HashMap<String, CredentialRow>,
}

#[async_trait]
impl CredentialLookup for StaticLookup {
    async fn find_active_by_hash(&self, hash: &str) -> Option<CredentialRow> {
        self.rows.get(hash).cloned()
    }

    async fn touch_last_used(&self, _credential_id: Uuid) {}
}

/// An `AppState` wired to a fresh, empty `InMemoryFileStore` and a fixed
/// pair of read-write/read-only credentials for a single tenant, returned
/// alongside that tenant's id.
pub async fn test_state() -> (AppState, Uuid) {
    let tenant_id = Uuid::new_v4();

    let mut rows = HashMap::new();
    rows.insert(
        hash_plaintext(TENANT_HEADER),
        CredentialRow {
            id: Uuid::new_v4(),
            tenant_id,
            permissions: Permissions::READ_WRITE,
            revoked_at: None,
        },
    );
    rows.insert(
        hash_plaintext(READONLY_HEADER),
        CredentialRow {
            id: Uuid::new_v4(),
            tenant_id,
            permissions: Permissions::from_iter([Permission::Read]),
            revoked_at: None,
        },
    );

    let state = AppState {
        store: Arc::new(InMemoryFileStore::new()),
        lookup: Arc::new(StaticLookup { rows }),
        registry: Arc::new(RoomRegistry::new()),
        admin_api_key: ADMIN_HEADER.to_string(),
    };
    (state, tenant_id)
}
