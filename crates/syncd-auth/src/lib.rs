// SPDX-License-Identifier: Apache-2.0
//! Credential parsing, hashing, and resolution for the sync server.
//!
//! Two credential shapes are recognized by prefix:
//! `sk_admin_<secret>` (process-wide, compared in constant time against
//! configuration, no lookup) and `sk_store_<tenant-prefix>_<secret>`
//! (tenant-scoped, resolved by exact hash match against persisted
//! credentials). This crate owns the parsing/hashing/identity types; the
//! actual row lookup is delegated to a `CredentialLookup` implementor so
//! this crate never depends on a concrete store.

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

const ADMIN_PREFIX: &str = "sk_admin_";
const TENANT_PREFIX: &str = "sk_store_";

/// A permission a credential may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// May read files and listings.
    Read,
    /// May mutate files (create/modify/delete/rename).
    Write,
}

/// The set of permissions carried by a resolved credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    bits: u8,
}

const READ_BIT: u8 = 0b01;
const WRITE_BIT: u8 = 0b10;

impl Permissions {
    /// Permission set with neither read nor write.
    pub const NONE: Self = Self { bits: 0 };
    /// Permission set with both read and write.
    pub const READ_WRITE: Self = Self { bits: READ_BIT | WRITE_BIT };

    /// Build a permission set from a slice of individual permissions.
    pub fn from_iter(perms: impl IntoIterator<Item = Permission>) -> Self {
        let mut bits = 0u8;
        for p in perms {
            bits |= match p {
                Permission::Read => READ_BIT,
                Permission::Write => WRITE_BIT,
            };
        }
        Self { bits }
    }

    /// Whether this set grants `perm`.
    #[must_use]
    pub fn has(&self, perm: Permission) -> bool {
        let bit = match perm {
            Permission::Read => READ_BIT,
            Permission::Write => WRITE_BIT,
        };
        self.bits & bit != 0
    }
}

/// Identity bound to a connection or request after successful authentication.
///
/// Assigned once at handshake/request-auth time and carried through handler
/// invocations as an immutable value — never monkey-patched onto the
/// transport object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The tenant this credential belongs to.
    pub tenant_id: Uuid,
    /// Permissions granted to this credential.
    pub permissions: Permissions,
    /// Id of the credential row that resolved this identity, or `None` for
    /// the process-global admin key (which has no row).
    pub credential_id: Option<Uuid>,
}

/// Failure modes for credential resolution.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented at all.
    #[error("missing credential")]
    Unauthorized,
    /// The credential was malformed, unknown, or revoked.
    #[error("invalid credential")]
    InvalidKey,
}

/// A row backing a tenant-scoped credential, as returned by a
/// `CredentialLookup` implementor.
#[derive(Debug, Clone)]
pub struct CredentialRow {
    /// Credential id.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Granted permissions.
    pub permissions: Permissions,
    /// Non-null means the credential has been revoked.
    pub revoked_at: Option<()>,
}

/// Store-agnostic lookup seam for tenant-scoped credentials.
///
/// Implemented by the persistence layer; this crate never talks to a
/// database directly.
#[async_trait]
pub trait CredentialLookup: Send + Sync {
    /// Look up an active (non-revoked) credential by its SHA-256 hash.
    async fn find_active_by_hash(&self, hash: &str) -> Option<CredentialRow>;
    /// Best-effort, fire-and-forget timestamp bump. Failures are the
    /// implementor's concern; this trait's caller never awaits completion.
    async fn touch_last_used(&self, credential_id: Uuid);
}

/// Lowercase hex SHA-256 of `plaintext`, with no prefix.
#[must_use]
pub fn hash_plaintext(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// First 16 characters of the plaintext, for display purposes only.
#[must_use]
pub fn display_prefix(plaintext: &str) -> String {
    plaintext.chars().take(16).collect()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    // Compare hashes, not raw lengths of the secrets, so overall timing
    // doesn't leak the configured key's length either.
    let ha = hash_plaintext(a);
    let hb = hash_plaintext(b);
    ha.as_bytes().ct_eq(hb.as_bytes()).into()
}

/// Authenticate a bearer token against the configured admin key and a
/// tenant-credential lookup.
///
/// Resolves `sk_admin_…` tokens via constant-time comparison against
/// `admin_key` (no store access); resolves `sk_store_…` tokens via
/// `lookup`. Absent tokens yield `Unauthorized`; anything malformed,
/// unknown, or revoked yields `InvalidKey` — deliberately uniform so a
/// caller cannot distinguish "wrong shape" from "revoked" by response
/// shape alone.
pub async fn authenticate(
    token: Option<&str>,
    admin_key: &str,
    lookup: &dyn CredentialLookup,
) -> Result<Identity, AuthError> {
    let token = token.ok_or(AuthError::Unauthorized)?;
    if token.is_empty() {
        return Err(AuthError::Unauthorized);
    }

    if token.starts_with(ADMIN_PREFIX) {
        return if constant_time_eq(token, admin_key) {
            Ok(Identity {
                // Admin identity has no tenant scope; callers that need a
                // tenant id for admin operations must supply one
                // out-of-band (admin CRUD itself is out of scope here).
                tenant_id: Uuid::nil(),
                permissions: Permissions::READ_WRITE,
                credential_id: None,
            })
        } else {
            Err(AuthError::InvalidKey)
        };
    }

    if token.starts_with(TENANT_PREFIX) {
        let hash = hash_plaintext(token);
        let row = lookup.find_active_by_hash(&hash).await.ok_or(AuthError::InvalidKey)?;
        if row.revoked_at.is_some() {
            return Err(AuthError::InvalidKey);
        }
        // Best-effort; never fails the caller.
        lookup.touch_last_used(row.id).await;
        return Ok(Identity {
            tenant_id: row.tenant_id,
            permissions: row.permissions,
            credential_id: Some(row.id),
        });
    }

    Err(AuthError::InvalidKey)
}

/// Whether `token` looks like a process-global admin key by shape alone
/// (used to route the request before a full `authenticate` call, e.g. to
/// skip tenant-store lookups entirely for admin traffic).
#[must_use]
pub fn looks_like_admin_key(token: &str) -> bool {
    token.starts_with(ADMIN_PREFIX)
}

/// A freshly generated tenant credential: the plaintext (shown exactly
/// once), its hash, and its display prefix.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// The plaintext bearer token. Must be shown to the caller exactly
    /// once and never persisted.
    pub plaintext: String,
    /// SHA-256 hex hash, persisted in place of the plaintext.
    pub hash: String,
    /// First 16 characters of the plaintext, persisted for display.
    pub prefix: String,
}

impl fmt::Debug for CredentialRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRow")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("revoked", &self.revoked_at.is_some())
            .finish()
    }
}

/// Generate a new tenant-scoped bearer token for `tenant_id`: 24 bytes of
/// CSPRNG output, base64url-encoded without padding, composed with the
/// first 6 hex characters of the tenant id (dashes stripped).
#[must_use]
pub fn generate_tenant_key(tenant_id: Uuid) -> GeneratedKey {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

    let mut secret_bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut secret_bytes);
    let secret = URL_SAFE_NO_PAD.encode(secret_bytes);

    let tenant_prefix: String = tenant_id.simple().to_string().chars().take(6).collect();
    let plaintext = format!("{TENANT_PREFIX}{tenant_prefix}_{secret}");
    let hash = hash_plaintext(&plaintext);
    let prefix = display_prefix(&plaintext);

    GeneratedKey { plaintext, hash, prefix }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeLookup {
        row: Option<CredentialRow>,
    }

    #[async_trait]
    impl CredentialLookup for FakeLookup {
        async fn find_active_by_hash(&self, _hash: &str) -> Option<CredentialRow> {
            self.row.clone()
        }
        async fn touch_last_used(&self, _credential_id: Uuid) {}
    }

    #[tokio::test]
    async fn admin_key_matches_constant_time() {
        let lookup = FakeLookup { row: None };
        let identity = authenticate(Some("sk_admin_secret"), "sk_admin_secret", &lookup)
            .await
            .expect("admin auth");
        assert_eq!(identity.tenant_id, Uuid::nil());
        assert!(identity.permissions.has(Permission::Write));
    }

    #[tokio::test]
    async fn admin_key_mismatch_is_invalid() {
        let lookup = FakeLookup { row: None };
        let err = authenticate(Some("sk_admin_wrong"), "sk_admin_secret", &lookup)
            .await
            .expect_err("expected invalid key");
        assert_eq!(err, AuthError::InvalidKey);
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let lookup = FakeLookup { row: None };
        let err = authenticate(None, "sk_admin_secret", &lookup).await.expect_err("unauthorized");
        assert_eq!(err, AuthError::Unauthorized);
    }

    #[tokio::test]
    async fn tenant_key_resolves_via_lookup() {
        let tenant_id = Uuid::new_v4();
        let generated = generate_tenant_key(tenant_id);
        let row = CredentialRow {
            id: Uuid::new_v4(),
            tenant_id,
            permissions: Permissions::from_iter([Permission::Read]),
            revoked_at: None,
        };
        let lookup = FakeLookup { row: Some(row) };
        let identity = authenticate(Some(&generated.plaintext), "sk_admin_secret", &lookup)
            .await
            .expect("tenant auth");
        assert_eq!(identity.tenant_id, tenant_id);
        assert!(identity.permissions.has(Permission::Read));
        assert!(!identity.permissions.has(Permission::Write));
    }

    #[tokio::test]
    async fn revoked_tenant_key_is_invalid() {
        let tenant_id = Uuid::new_v4();
        let generated = generate_tenant_key(tenant_id);
        let row = CredentialRow {
            id: Uuid::new_v4(),
            tenant_id,
            permissions: Permissions::READ_WRITE,
            revoked_at: Some(()),
        };
        let lookup = FakeLookup { row: Some(row) };
        let err = authenticate(Some(&generated.plaintext), "sk_admin_secret", &lookup)
            .await
            .expect_err("expected invalid key");
        assert_eq!(err, AuthError::InvalidKey);
    }

    #[tokio::test]
    async fn malformed_shape_is_invalid() {
        let lookup = FakeLookup { row: None };
        let err = authenticate(Some("not-a-key"), "sk_admin_secret", &lookup)
            .await
            .expect_err("expected invalid key");
        assert_eq!(err, AuthError::InvalidKey);
    }

    #[test]
    fn hash_is_deterministic_lowercase_hex() {
        let h1 = hash_plaintext("hello");
        let h2 = hash_plaintext("hello");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn generated_key_has_tenant_prefix() {
        let tenant_id = Uuid::new_v4();
        let generated = generate_tenant_key(tenant_id);
        assert!(generated.plaintext.starts_with(TENANT_PREFIX));
        assert_eq!(generated.prefix.len(), 16);
        assert_eq!(generated.hash, hash_plaintext(&generated.plaintext));
    }
}
