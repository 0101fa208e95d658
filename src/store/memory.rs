//! In-memory credential store.
//!
//! Backs tests, seeding, and local development. All maps live behind a
//! single `RwLock` so every conditional consume is one atomic critical
//! section; two tasks racing `rotate_refresh_token` serialize on the
//! write lock and exactly one observes the unrevoked row.
//!
//! Not durable: all state is lost on process restart.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CredentialStore, NewUser, RecoveryCodeRow, Role, User};

struct TokenRow {
    user_id: Uuid,
    expires_at: SystemTime,
    revoked: bool,
}

struct RecoveryRow {
    id: Uuid,
    code_hash: String,
    used: bool,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    users_by_email: HashMap<String, Uuid>,
    roles: HashMap<String, Role>,
    role_permissions: HashMap<String, BTreeSet<String>>,
    user_roles: HashMap<Uuid, BTreeSet<String>>,
    refresh_tokens: HashMap<Vec<u8>, TokenRow>,
    reset_tokens: HashMap<Vec<u8>, TokenRow>,
    recovery_codes: HashMap<Uuid, Vec<RecoveryRow>>,
    last_totp_step: HashMap<Uuid, u64>,
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Inner>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn ttl_deadline(ttl_seconds: i64) -> SystemTime {
    SystemTime::now() + Duration::from_secs(ttl_seconds.max(0) as u64)
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users_by_email
            .get(email)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let mut inner = self.inner.write().await;
        if inner.users_by_email.contains_key(&new_user.email) {
            return Err(anyhow!("email already registered: {}", new_user.email));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email.clone(),
            password_hash: new_user.password_hash,
            full_name: new_user.full_name,
            avatar_url: new_user.avatar_url,
            is_active: true,
            two_factor_enabled: false,
            totp_secret: None,
            pending_totp_secret: None,
        };
        inner.users_by_email.insert(new_user.email, user.id);
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.users.get_mut(&user_id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                true
            }
            None => false,
        })
    }

    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.users.get_mut(&user_id) {
            Some(user) => {
                user.is_active = active;
                true
            }
            None => false,
        })
    }

    async fn set_pending_totp_secret(&self, user_id: Uuid, secret_base32: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.users.get_mut(&user_id) {
            Some(user) => {
                user.pending_totp_secret = Some(secret_base32.to_string());
                true
            }
            None => false,
        })
    }

    async fn promote_pending_totp_secret(&self, user_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.users.get_mut(&user_id) {
            Some(user) => match user.pending_totp_secret.take() {
                Some(secret) => {
                    user.totp_secret = Some(secret);
                    user.two_factor_enabled = true;
                    true
                }
                None => false,
            },
            None => false,
        })
    }

    async fn clear_totp(&self, user_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.users.get_mut(&user_id) {
            Some(user) => {
                user.totp_secret = None;
                user.pending_totp_secret = None;
                user.two_factor_enabled = false;
                true
            }
            None => false,
        })
    }

    async fn consume_totp_step(&self, user_id: Uuid, step: u64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let last = inner.last_totp_step.get(&user_id).copied().unwrap_or(0);
        if step <= last {
            return Ok(false);
        }
        inner.last_totp_step.insert(user_id, step);
        Ok(true)
    }

    async fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.refresh_tokens.insert(
            token_hash.to_vec(),
            TokenRow {
                user_id,
                expires_at: ttl_deadline(ttl_seconds),
                revoked: false,
            },
        );
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: Uuid,
        old_hash: &[u8],
        new_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<bool> {
        // Revoke and replacement happen inside one write-lock critical
        // section; a caller dropped mid-rotation can never observe a
        // revoked chain with no live token.
        let mut inner = self.inner.write().await;
        let revoked = match inner.refresh_tokens.get_mut(old_hash) {
            Some(row)
                if row.user_id == user_id
                    && !row.revoked
                    && row.expires_at > SystemTime::now() =>
            {
                row.revoked = true;
                true
            }
            _ => false,
        };
        if revoked {
            inner.refresh_tokens.insert(
                new_hash.to_vec(),
                TokenRow {
                    user_id,
                    expires_at: ttl_deadline(ttl_seconds),
                    revoked: false,
                },
            );
        }
        Ok(revoked)
    }

    async fn revoke_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut revoked = 0;
        for row in inner.refresh_tokens.values_mut() {
            if row.user_id == user_id && !row.revoked {
                row.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn insert_reset_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.reset_tokens.insert(
            token_hash.to_vec(),
            TokenRow {
                user_id,
                expires_at: ttl_deadline(ttl_seconds),
                revoked: false,
            },
        );
        Ok(())
    }

    async fn consume_reset_token(&self, user_id: Uuid, token_hash: &[u8]) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.reset_tokens.get_mut(token_hash) {
            Some(row)
                if row.user_id == user_id
                    && !row.revoked
                    && row.expires_at > SystemTime::now() =>
            {
                row.revoked = true;
                true
            }
            _ => false,
        })
    }

    async fn replace_recovery_codes(&self, user_id: Uuid, code_hashes: &[String]) -> Result<()> {
        let mut inner = self.inner.write().await;
        let rows = code_hashes
            .iter()
            .map(|hash| RecoveryRow {
                id: Uuid::new_v4(),
                code_hash: hash.clone(),
                used: false,
            })
            .collect();
        inner.recovery_codes.insert(user_id, rows);
        Ok(())
    }

    async fn list_recovery_codes(&self, user_id: Uuid) -> Result<Vec<RecoveryCodeRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .recovery_codes
            .get(&user_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| !row.used)
                    .map(|row| RecoveryCodeRow {
                        id: row.id,
                        code_hash: row.code_hash.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn consume_recovery_code(&self, user_id: Uuid, code_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .recovery_codes
            .get_mut(&user_id)
            .and_then(|rows| rows.iter_mut().find(|row| row.id == code_id && !row.used))
            .map(|row| {
                row.used = true;
                true
            })
            .unwrap_or(false))
    }

    async fn clear_recovery_codes(&self, user_id: Uuid) -> Result<()> {
        self.inner.write().await.recovery_codes.remove(&user_id);
        Ok(())
    }

    async fn create_role(
        &self,
        name: &str,
        description: &str,
        permissions: &[String],
    ) -> Result<Role> {
        let mut inner = self.inner.write().await;
        if inner.roles.contains_key(name) {
            return Err(anyhow!("role already exists: {name}"));
        }
        let role = Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
        };
        inner.roles.insert(name.to_string(), role.clone());
        inner
            .role_permissions
            .insert(name.to_string(), permissions.iter().cloned().collect());
        Ok(role)
    }

    async fn find_role(&self, name: &str) -> Result<Option<Role>> {
        Ok(self.inner.read().await.roles.get(name).cloned())
    }

    async fn update_role(
        &self,
        name: &str,
        description: Option<&str>,
        permissions: Option<&[String]>,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if !inner.roles.contains_key(name) {
            return Ok(false);
        }
        if let Some(description) = description {
            if let Some(role) = inner.roles.get_mut(name) {
                role.description = description.to_string();
            }
        }
        if let Some(permissions) = permissions {
            inner
                .role_permissions
                .insert(name.to_string(), permissions.iter().cloned().collect());
        }
        Ok(true)
    }

    async fn delete_role(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let existed = inner.roles.remove(name).is_some();
        inner.role_permissions.remove(name);
        for roles in inner.user_roles.values_mut() {
            roles.remove(name);
        }
        Ok(existed)
    }

    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if !inner.roles.contains_key(role_name) {
            return Ok(false);
        }
        inner
            .user_roles
            .entry(user_id)
            .or_default()
            .insert(role_name.to_string());
        Ok(true)
    }

    async fn unassign_role(&self, user_id: Uuid, role_name: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .user_roles
            .get_mut(&user_id)
            .map(|roles| roles.remove(role_name))
            .unwrap_or(false))
    }

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .user_roles
            .get(&user_id)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn permissions_for_role(&self, role_name: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .role_permissions
            .get(role_name)
            .map(|perms| perms.iter().cloned().collect())
            .unwrap_or_default())
    }
}
