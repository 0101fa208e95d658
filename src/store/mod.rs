//! Credential store contract.
//!
//! Persistence for users, roles, refresh tokens, reset tokens, and
//! recovery codes lives behind this trait. Two backends are provided:
//! [`memory::MemoryCredentialStore`] for tests, seeding, and local
//! development, and [`postgres::PgCredentialStore`] for deployments.
//!
//! Single-use guarantees (refresh rotation, reset tokens, recovery codes,
//! TOTP step tracking) are expressed as *conditional consume* operations:
//! the call returns `Ok(true)` for exactly one winner no matter how many
//! callers race it.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

/// A user identity record.
///
/// Permissions are never stored here; they derive from the role set.
#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub two_factor_enabled: bool,
    /// Confirmed TOTP secret (base32). Present only when 2FA is enabled.
    pub totp_secret: Option<String>,
    /// Secret generated by setup but not yet confirmed.
    pub pending_totp_secret: Option<String>,
}

/// Fields required to create a user.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
}

/// A named bundle of permissions.
#[derive(Clone, Debug)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

/// One stored recovery code (hash only; the plaintext is shown once).
#[derive(Clone, Debug)]
pub struct RecoveryCodeRow {
    pub id: Uuid,
    pub code_hash: String,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>>;
    async fn create_user(&self, new_user: NewUser) -> Result<User>;
    async fn set_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<bool>;
    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool>;

    /// Store a fresh pending TOTP secret, replacing any prior pending one.
    async fn set_pending_totp_secret(&self, user_id: Uuid, secret_base32: &str) -> Result<bool>;
    /// Promote the pending secret to the confirmed slot and enable 2FA.
    /// Returns `false` when no pending secret exists.
    async fn promote_pending_totp_secret(&self, user_id: Uuid) -> Result<bool>;
    /// Clear both secrets and the enabled flag.
    async fn clear_totp(&self, user_id: Uuid) -> Result<bool>;
    /// Record a successfully used TOTP step. Returns `false` when `step`
    /// is not strictly greater than the last recorded step (replay).
    async fn consume_totp_step(&self, user_id: Uuid, step: u64) -> Result<bool>;

    async fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<()>;
    /// Revoke the matching live refresh token and commit its replacement
    /// in one atomic unit: either both happen or neither does, and there
    /// is no intermediate state where the chain has no live token.
    /// `Ok(true)` for exactly one caller; `Ok(false)` (nothing inserted)
    /// when the old token is absent, revoked, expired, or owned by
    /// another user.
    async fn rotate_refresh_token(
        &self,
        user_id: Uuid,
        old_hash: &[u8],
        new_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<bool>;
    async fn revoke_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64>;

    async fn insert_reset_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<()>;
    /// Single-use consume of a password-reset token.
    async fn consume_reset_token(&self, user_id: Uuid, token_hash: &[u8]) -> Result<bool>;

    /// Replace the whole batch; any previous codes become invalid.
    async fn replace_recovery_codes(&self, user_id: Uuid, code_hashes: &[String]) -> Result<()>;
    async fn list_recovery_codes(&self, user_id: Uuid) -> Result<Vec<RecoveryCodeRow>>;
    /// Single-use consume of one recovery code.
    async fn consume_recovery_code(&self, user_id: Uuid, code_id: Uuid) -> Result<bool>;
    async fn clear_recovery_codes(&self, user_id: Uuid) -> Result<()>;

    async fn create_role(
        &self,
        name: &str,
        description: &str,
        permissions: &[String],
    ) -> Result<Role>;
    async fn find_role(&self, name: &str) -> Result<Option<Role>>;
    async fn update_role(
        &self,
        name: &str,
        description: Option<&str>,
        permissions: Option<&[String]>,
    ) -> Result<bool>;
    async fn delete_role(&self, name: &str) -> Result<bool>;
    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<bool>;
    async fn unassign_role(&self, user_id: Uuid, role_name: &str) -> Result<bool>;
    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<String>>;
    async fn permissions_for_role(&self, role_name: &str) -> Result<Vec<String>>;
}
