// SPDX-License-Identifier: Apache-2.0
//! Shared application state threaded through every HTTP and WebSocket handler.

use std::sync::Arc;
use syncd_auth::CredentialLookup;
use syncd_core::FileStore;
use syncd_gateway::RoomRegistry;

/// Everything a request or connection handler needs: the store, the
/// credential lookup used to resolve bearer credentials, the room
/// registry backing channel and REST broadcast, and the admin key
/// against which `sk_admin_` bearers are compared.
#[derive(Clone)]
pub struct AppState {
    /// The file store.
    pub store: Arc<dyn FileStore>,
    /// The credential lookup.
    pub lookup: Arc<dyn CredentialLookup>,
    /// The room registry.
    pub registry: Arc<RoomRegistry>,
    /// Plaintext admin key, compared in constant time.
    pub admin_api_key: String,
}
