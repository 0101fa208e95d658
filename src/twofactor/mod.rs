//! TOTP second factor: setup, confirmation, verification, and recovery.
//!
//! Setup is two-phase. [`TwoFactorController::begin_setup`] stores a
//! *pending* secret that changes nothing about how the user logs in;
//! only [`TwoFactorController::confirm_setup`], which proves the
//! authenticator actually holds the secret, promotes it and turns
//! enforcement on. Every accepted TOTP code burns its 30-second step so
//! an intercepted code cannot be replayed inside the same window.

pub mod recovery;

pub use recovery::RecoveryCodeBatch;

use std::sync::Arc;
use totp_rs::{Algorithm as TotpAlgorithm, Secret, TOTP};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::password::verify_password;
use crate::store::{CredentialStore, User};
use crate::token::now_unix;

const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECONDS: u64 = 30;

/// Everything the client needs to enroll an authenticator app.
#[derive(Clone, Debug)]
pub struct SetupDetails {
    /// Raw base32 secret, for clients that build their own URI.
    pub secret_base32: String,
    /// Secret in lowercase groups of four, for manual entry.
    pub formatted_key: String,
    /// `otpauth://` URI for QR-code rendering.
    pub otpauth_uri: String,
}

pub struct TwoFactorController {
    config: Arc<AuthConfig>,
    store: Arc<dyn CredentialStore>,
}

impl TwoFactorController {
    #[must_use]
    pub fn new(config: Arc<AuthConfig>, store: Arc<dyn CredentialStore>) -> Self {
        Self { config, store }
    }

    /// Generate a pending secret for the user and return the enrollment
    /// details. Works regardless of the enabled flag: repeating the call
    /// replaces the pending secret, and an already-confirmed secret stays
    /// live until the new one is confirmed.
    ///
    /// # Errors
    /// `Unexpected` when secret generation or storage fails.
    pub async fn begin_setup(&self, user: &User) -> AuthResult<SetupDetails> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| AuthError::Unexpected(anyhow::anyhow!("secret generation: {e:?}")))?;
        let totp = self.totp_from_bytes(secret_bytes, &user.email)?;
        let secret_base32 = totp.get_secret_base32();

        self.store
            .set_pending_totp_secret(user.id, &secret_base32)
            .await?;
        debug!("stored pending totp secret for user {}", user.id);

        Ok(SetupDetails {
            formatted_key: format_key(&secret_base32),
            otpauth_uri: totp.get_url(),
            secret_base32,
        })
    }

    /// Confirm the pending secret with a code from the authenticator.
    /// On success two-factor auth is enabled and a fresh batch of
    /// recovery codes is returned for one-time display.
    ///
    /// # Errors
    /// `Validation` when no setup is pending, `Unauthenticated` when the
    /// code does not match.
    pub async fn confirm_setup(&self, user: &User, code: &str) -> AuthResult<RecoveryCodeBatch> {
        let Some(pending) = user.pending_totp_secret.as_deref() else {
            return Err(AuthError::Validation(
                "no two-factor setup is pending".to_string(),
            ));
        };

        let step = self
            .match_code(pending, &user.email, code)?
            .ok_or_else(AuthError::invalid_code)?;
        if !self.store.consume_totp_step(user.id, step).await? {
            return Err(AuthError::invalid_code());
        }

        if !self.store.promote_pending_totp_secret(user.id).await? {
            // Setup was torn down between the fetch and the promote.
            return Err(AuthError::Validation(
                "no two-factor setup is pending".to_string(),
            ));
        }

        let batch = recovery::generate_batch()?;
        self.store
            .replace_recovery_codes(user.id, &batch.code_hashes)
            .await?;

        info!("two-factor authentication enabled for user {}", user.id);
        Ok(batch)
    }

    /// Turn two-factor auth off, deleting the secrets and all recovery
    /// codes. The password is re-checked so a hijacked session cannot
    /// silently weaken the account.
    ///
    /// # Errors
    /// `Unauthenticated` for a wrong password, `Conflict` when two-factor
    /// auth is not enabled.
    pub async fn disable(&self, user: &User, password: &str) -> AuthResult<()> {
        if !verify_password(password, &user.password_hash)? {
            return Err(AuthError::invalid_credentials());
        }
        if !user.two_factor_enabled {
            return Err(AuthError::Conflict(
                "two-factor authentication is not enabled".to_string(),
            ));
        }

        self.store.clear_totp(user.id).await?;
        self.store.clear_recovery_codes(user.id).await?;
        info!("two-factor authentication disabled for user {}", user.id);
        Ok(())
    }

    /// Verify a login-time TOTP code against the confirmed secret,
    /// burning its time step.
    ///
    /// # Errors
    /// `Unauthenticated` when the code is wrong or was already used in
    /// this window.
    pub async fn verify_code(&self, user: &User, code: &str) -> AuthResult<()> {
        let Some(secret) = user.totp_secret.as_deref() else {
            return Err(AuthError::invalid_code());
        };

        let step = self
            .match_code(secret, &user.email, code)?
            .ok_or_else(AuthError::invalid_code)?;
        if !self.store.consume_totp_step(user.id, step).await? {
            debug!("replayed totp step rejected for user {}", user.id);
            return Err(AuthError::invalid_code());
        }
        Ok(())
    }

    /// Redeem one recovery code. Each code works exactly once, even under
    /// concurrent submissions.
    ///
    /// # Errors
    /// `Unauthenticated` when no unused code matches.
    pub async fn redeem_recovery_code(&self, user: &User, code: &str) -> AuthResult<()> {
        let matched = self.find_matching_code(user.id, code).await?;
        let Some(code_id) = matched else {
            return Err(AuthError::invalid_code());
        };
        if !self.store.consume_recovery_code(user.id, code_id).await? {
            return Err(AuthError::invalid_code());
        }
        info!("recovery code redeemed for user {}", user.id);
        Ok(())
    }

    async fn find_matching_code(&self, user_id: Uuid, code: &str) -> AuthResult<Option<Uuid>> {
        let rows = self.store.list_recovery_codes(user_id).await?;
        for row in rows {
            if recovery::matches(code, &row.code_hash) {
                return Ok(Some(row.id));
            }
        }
        Ok(None)
    }

    /// Try the submitted code against the current window and one step on
    /// either side. Returns the matched step for replay tracking.
    fn match_code(
        &self,
        secret_base32: &str,
        account: &str,
        code: &str,
    ) -> AuthResult<Option<u64>> {
        let totp = self.build_totp(secret_base32, account)?;
        let submitted: String = code.chars().filter(|c| c.is_ascii_digit()).collect();
        if submitted.len() != TOTP_DIGITS {
            return Ok(None);
        }

        let now = now_unix().max(0) as u64;
        for candidate in [
            now.saturating_sub(TOTP_STEP_SECONDS),
            now,
            now + TOTP_STEP_SECONDS,
        ] {
            if totp.generate(candidate) == submitted {
                return Ok(Some(candidate / TOTP_STEP_SECONDS));
            }
        }
        Ok(None)
    }

    fn build_totp(&self, secret_base32: &str, account: &str) -> AuthResult<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| AuthError::Unexpected(anyhow::anyhow!("bad totp secret: {e:?}")))?;
        self.totp_from_bytes(secret_bytes, account)
    }

    fn totp_from_bytes(&self, secret_bytes: Vec<u8>, account: &str) -> AuthResult<TOTP> {
        TOTP::new(
            TotpAlgorithm::SHA1,
            TOTP_DIGITS,
            1,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.config.totp_issuer().to_string()),
            account.to_string(),
        )
        .map_err(|e| AuthError::Unexpected(anyhow::anyhow!("failed to build totp: {e}")))
    }
}

/// Present the base32 secret in lowercase groups of four for manual entry.
fn format_key(secret_base32: &str) -> String {
    secret_base32
        .to_lowercase()
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
