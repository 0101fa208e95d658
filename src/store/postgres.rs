//! Postgres credential store.
//!
//! Expected schema: `users`, `roles`, `role_permissions`, `user_roles`,
//! `refresh_tokens`, `password_reset_tokens`, `recovery_codes`,
//! `user_totp_steps`. Token tables store SHA-256 hashes, never raw values.
//!
//! Single-use consumes are one conditional `UPDATE .. RETURNING` each, so
//! the database serializes racing callers and exactly one sees a row.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{CredentialStore, NewUser, RecoveryCodeRow, Role, User};

pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_span(operation: &str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        full_name: row.get("full_name"),
        avatar_url: row.get("avatar_url"),
        is_active: row.get("is_active"),
        two_factor_enabled: row.get("two_factor_enabled"),
        totp_secret: row.get("totp_secret"),
        pending_totp_secret: row.get("pending_totp_secret"),
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, full_name, avatar_url, \
     is_active, two_factor_enabled, totp_secret, pending_totp_secret";

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to lookup user by email")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to lookup user by id")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let query = format!(
            r"
            INSERT INTO users (id, email, password_hash, full_name, avatar_url)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .bind(&new_user.full_name)
            .bind(&new_user.avatar_url)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await
            .context("failed to insert user")?;
        Ok(user_from_row(&row))
    }

    async fn set_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<bool> {
        let query = "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update password hash")?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool> {
        let query = "UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(active)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update active flag")?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_pending_totp_secret(&self, user_id: Uuid, secret_base32: &str) -> Result<bool> {
        let query =
            "UPDATE users SET pending_totp_secret = $2, updated_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(secret_base32)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to store pending totp secret")?;
        Ok(result.rows_affected() > 0)
    }

    async fn promote_pending_totp_secret(&self, user_id: Uuid) -> Result<bool> {
        let query = r"
            UPDATE users
            SET totp_secret = pending_totp_secret,
                pending_totp_secret = NULL,
                two_factor_enabled = TRUE,
                updated_at = NOW()
            WHERE id = $1
              AND pending_totp_secret IS NOT NULL
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to promote totp secret")?;
        Ok(row.is_some())
    }

    async fn clear_totp(&self, user_id: Uuid) -> Result<bool> {
        let query = r"
            UPDATE users
            SET totp_secret = NULL,
                pending_totp_secret = NULL,
                two_factor_enabled = FALSE,
                updated_at = NOW()
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to clear totp state")?;
        Ok(result.rows_affected() > 0)
    }

    async fn consume_totp_step(&self, user_id: Uuid, step: u64) -> Result<bool> {
        // Upsert keeps one row per user; the WHERE arm rejects replays of
        // the same or an earlier step.
        let query = r"
            INSERT INTO user_totp_steps (user_id, last_step)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET last_step = $2
            WHERE user_totp_steps.last_step < $2
            RETURNING user_id
        ";
        let step = i64::try_from(step).context("totp step out of range")?;
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(step)
            .fetch_optional(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to record totp step")?;
        Ok(row.is_some())
    }

    async fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<()> {
        let query = r"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert refresh token")?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: Uuid,
        old_hash: &[u8],
        new_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<bool> {
        // Conditional revoke and replacement insert commit together; an
        // interrupted rotation rolls back to the pre-rotation state.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin refresh rotation transaction")?;

        let query = r"
            UPDATE refresh_tokens
            SET revoked = TRUE
            WHERE token_hash = $1
              AND user_id = $2
              AND revoked = FALSE
              AND expires_at > NOW()
            RETURNING user_id
        ";
        let row = sqlx::query(query)
            .bind(old_hash)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to revoke refresh token")?;
        if row.is_none() {
            return Ok(false);
        }

        let query = r"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(new_hash)
            .bind(ttl_seconds)
            .execute(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert replacement refresh token")?;

        tx.commit()
            .await
            .context("commit refresh rotation transaction")?;
        Ok(true)
    }

    async fn revoke_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked = TRUE
            WHERE user_id = $1
              AND revoked = FALSE
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to revoke refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn insert_reset_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<()> {
        let query = r"
            INSERT INTO password_reset_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert reset token")?;
        Ok(())
    }

    async fn consume_reset_token(&self, user_id: Uuid, token_hash: &[u8]) -> Result<bool> {
        let query = r"
            UPDATE password_reset_tokens
            SET consumed_at = NOW()
            WHERE token_hash = $1
              AND user_id = $2
              AND consumed_at IS NULL
              AND expires_at > NOW()
            RETURNING user_id
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to consume reset token")?;
        Ok(row.is_some())
    }

    async fn replace_recovery_codes(&self, user_id: Uuid, code_hashes: &[String]) -> Result<()> {
        // Old batch and new batch swap in one transaction; a failure leaves
        // the previous batch intact.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin recovery code transaction")?;

        let query = "DELETE FROM recovery_codes WHERE user_id = $1";
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete previous recovery codes")?;

        let query = r"
            INSERT INTO recovery_codes (id, user_id, code_hash)
            VALUES ($1, $2, $3)
        ";
        for hash in code_hashes {
            sqlx::query(query)
                .bind(Uuid::new_v4())
                .bind(user_id)
                .bind(hash)
                .execute(&mut *tx)
                .instrument(query_span("INSERT", query))
                .await
                .context("failed to insert recovery code")?;
        }

        tx.commit().await.context("commit recovery code transaction")?;
        Ok(())
    }

    async fn list_recovery_codes(&self, user_id: Uuid) -> Result<Vec<RecoveryCodeRow>> {
        let query = r"
            SELECT id, code_hash
            FROM recovery_codes
            WHERE user_id = $1
              AND used_at IS NULL
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list recovery codes")?;
        Ok(rows
            .into_iter()
            .map(|row| RecoveryCodeRow {
                id: row.get("id"),
                code_hash: row.get("code_hash"),
            })
            .collect())
    }

    async fn consume_recovery_code(&self, user_id: Uuid, code_id: Uuid) -> Result<bool> {
        let query = r"
            UPDATE recovery_codes
            SET used_at = NOW()
            WHERE id = $1
              AND user_id = $2
              AND used_at IS NULL
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(code_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to consume recovery code")?;
        Ok(row.is_some())
    }

    async fn clear_recovery_codes(&self, user_id: Uuid) -> Result<()> {
        let query = "DELETE FROM recovery_codes WHERE user_id = $1";
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to clear recovery codes")?;
        Ok(())
    }

    async fn create_role(
        &self,
        name: &str,
        description: &str,
        permissions: &[String],
    ) -> Result<Role> {
        let mut tx = self.pool.begin().await.context("begin role transaction")?;

        let query = r"
            INSERT INTO roles (id, name, description)
            VALUES ($1, $2, $3)
            RETURNING id, name, description
        ";
        let row = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(description)
            .fetch_one(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert role")?;

        let role = Role {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
        };

        let query = "INSERT INTO role_permissions (role_id, permission) VALUES ($1, $2)";
        for permission in permissions {
            sqlx::query(query)
                .bind(role.id)
                .bind(permission)
                .execute(&mut *tx)
                .instrument(query_span("INSERT", query))
                .await
                .context("failed to insert role permission")?;
        }

        tx.commit().await.context("commit role transaction")?;
        Ok(role)
    }

    async fn find_role(&self, name: &str) -> Result<Option<Role>> {
        let query = "SELECT id, name, description FROM roles WHERE name = $1";
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup role")?;
        Ok(row.map(|row| Role {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
        }))
    }

    async fn update_role(
        &self,
        name: &str,
        description: Option<&str>,
        permissions: Option<&[String]>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("begin role transaction")?;

        let query = "SELECT id FROM roles WHERE name = $1";
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&mut *tx)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup role for update")?;
        let Some(row) = row else {
            return Ok(false);
        };
        let role_id: Uuid = row.get("id");

        if let Some(description) = description {
            let query = "UPDATE roles SET description = $2 WHERE id = $1";
            sqlx::query(query)
                .bind(role_id)
                .bind(description)
                .execute(&mut *tx)
                .instrument(query_span("UPDATE", query))
                .await
                .context("failed to update role description")?;
        }

        if let Some(permissions) = permissions {
            let query = "DELETE FROM role_permissions WHERE role_id = $1";
            sqlx::query(query)
                .bind(role_id)
                .execute(&mut *tx)
                .instrument(query_span("DELETE", query))
                .await
                .context("failed to clear role permissions")?;

            let query = "INSERT INTO role_permissions (role_id, permission) VALUES ($1, $2)";
            for permission in permissions {
                sqlx::query(query)
                    .bind(role_id)
                    .bind(permission)
                    .execute(&mut *tx)
                    .instrument(query_span("INSERT", query))
                    .await
                    .context("failed to insert role permission")?;
            }
        }

        tx.commit().await.context("commit role transaction")?;
        Ok(true)
    }

    async fn delete_role(&self, name: &str) -> Result<bool> {
        // role_permissions and user_roles cascade via foreign keys.
        let query = "DELETE FROM roles WHERE name = $1";
        let result = sqlx::query(query)
            .bind(name)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete role")?;
        Ok(result.rows_affected() > 0)
    }

    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<bool> {
        let query = r"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, roles.id FROM roles WHERE roles.name = $2
            ON CONFLICT DO NOTHING
            RETURNING user_id
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(role_name)
            .fetch_optional(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to assign role")?;
        Ok(row.is_some())
    }

    async fn unassign_role(&self, user_id: Uuid, role_name: &str) -> Result<bool> {
        let query = r"
            DELETE FROM user_roles
            USING roles
            WHERE user_roles.role_id = roles.id
              AND user_roles.user_id = $1
              AND roles.name = $2
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(role_name)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to unassign role")?;
        Ok(result.rows_affected() > 0)
    }

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<String>> {
        let query = r"
            SELECT roles.name
            FROM user_roles
            JOIN roles ON roles.id = user_roles.role_id
            WHERE user_roles.user_id = $1
            ORDER BY roles.name
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list roles for user")?;
        Ok(rows.into_iter().map(|row| row.get("name")).collect())
    }

    async fn permissions_for_role(&self, role_name: &str) -> Result<Vec<String>> {
        let query = r"
            SELECT DISTINCT role_permissions.permission
            FROM role_permissions
            JOIN roles ON roles.id = role_permissions.role_id
            WHERE roles.name = $1
            ORDER BY role_permissions.permission
        ";
        let rows = sqlx::query(query)
            .bind(role_name)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list permissions for role")?;
        Ok(rows.into_iter().map(|row| row.get("permission")).collect())
    }
}
