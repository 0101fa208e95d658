//! Auth orchestrator: login, refresh, password lifecycle, and the 2FA
//! endpoints, composed over the token service, two-factor controller,
//! permission resolver, and credential store.
//!
//! Credential failures are normalized: unknown email, wrong password, and
//! a deactivated account all produce the same `Unauthenticated` answer so
//! the login endpoint cannot be used to enumerate accounts.

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::TieredCache;
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::password::{hash_password, verify_password};
use crate::permissions::PermissionResolver;
use crate::store::CredentialStore;
use crate::token::{Session, TokenService, generate_opaque_token, hash_opaque_token};
use crate::twofactor::{RecoveryCodeBatch, SetupDetails, TwoFactorController};

const MIN_PASSWORD_LEN: usize = 8;

/// What a successful password check yields: either a full session, or a
/// challenge token when the account requires a second factor.
#[derive(Debug)]
pub enum LoginOutcome {
    Session(Session),
    TwoFactorRequired { challenge_token: String },
}

/// Delivery hook for password-reset tokens. The core never sends mail
/// itself; deployments plug in their transport here.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_reset_token(&self, email: &str, reset_token: &str) -> anyhow::Result<()>;
}

/// Default notifier that drops the token after logging the event. Useful
/// for tests and local development.
pub struct NoopResetNotifier;

#[async_trait]
impl ResetNotifier for NoopResetNotifier {
    async fn send_reset_token(&self, email: &str, _reset_token: &str) -> anyhow::Result<()> {
        debug!("reset token generated for {email} (noop notifier, not delivered)");
        Ok(())
    }
}

pub struct AuthService {
    config: Arc<AuthConfig>,
    store: Arc<dyn CredentialStore>,
    resolver: Arc<PermissionResolver>,
    tokens: TokenService,
    two_factor: TwoFactorController,
    notifier: Arc<dyn ResetNotifier>,
}

impl AuthService {
    #[must_use]
    pub fn new(
        config: Arc<AuthConfig>,
        store: Arc<dyn CredentialStore>,
        cache: Arc<TieredCache>,
    ) -> Self {
        let resolver = Arc::new(PermissionResolver::new(store.clone(), cache));
        let tokens = TokenService::new(config.clone(), store.clone(), resolver.clone());
        let two_factor = TwoFactorController::new(config.clone(), store.clone());
        Self {
            config,
            store,
            resolver,
            tokens,
            two_factor,
            notifier: Arc::new(NoopResetNotifier),
        }
    }

    #[must_use]
    pub fn with_reset_notifier(mut self, notifier: Arc<dyn ResetNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn permissions(&self) -> &PermissionResolver {
        &self.resolver
    }

    #[must_use]
    pub fn two_factor(&self) -> &TwoFactorController {
        &self.two_factor
    }

    /// Check email + password. Accounts with 2FA enabled get a challenge
    /// token instead of a session.
    ///
    /// # Errors
    /// `Validation` for empty inputs; `Unauthenticated` with one
    /// normalized message for every credential failure.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<LoginOutcome> {
        let email = email.trim();
        if password.is_empty() {
            return Err(AuthError::Validation(
                "email and password are required".to_string(),
            ));
        }
        if !is_valid_email(email) {
            return Err(AuthError::Validation("invalid email".to_string()));
        }

        let Some(user) = self.store.find_user_by_email(email).await? else {
            debug!("login rejected: unknown email");
            return Err(AuthError::invalid_credentials());
        };
        if !user.is_active || !verify_password(password, &user.password_hash)? {
            debug!("login rejected for user {}", user.id);
            return Err(AuthError::invalid_credentials());
        }

        if user.two_factor_enabled {
            let challenge_token = self.tokens.issue_challenge_token(user.id)?;
            debug!("second factor required for user {}", user.id);
            return Ok(LoginOutcome::TwoFactorRequired { challenge_token });
        }

        info!("user {} logged in", user.id);
        Ok(LoginOutcome::Session(self.tokens.issue_session(&user).await?))
    }

    /// Complete a 2FA login with an authenticator code.
    ///
    /// # Errors
    /// `Unauthenticated` for an invalid challenge token, wrong or replayed
    /// code, or an account deactivated since the password check.
    pub async fn verify_two_factor(
        &self,
        challenge_token: &str,
        code: &str,
    ) -> AuthResult<Session> {
        let user = self.challenged_user(challenge_token).await?;
        self.two_factor.verify_code(&user, code).await?;
        info!("user {} completed two-factor login", user.id);
        self.tokens.issue_session(&user).await
    }

    /// Complete a 2FA login with a one-time recovery code.
    ///
    /// # Errors
    /// Same taxonomy as [`Self::verify_two_factor`].
    pub async fn recovery_login(
        &self,
        challenge_token: &str,
        recovery_code: &str,
    ) -> AuthResult<Session> {
        let user = self.challenged_user(challenge_token).await?;
        self.two_factor.redeem_recovery_code(&user, recovery_code).await?;
        info!("user {} logged in with a recovery code", user.id);
        self.tokens.issue_session(&user).await
    }

    /// Exchange an access + refresh pair for a fresh session.
    ///
    /// # Errors
    /// `Validation` for empty inputs; otherwise delegates to
    /// [`TokenService::rotate_refresh_token`].
    pub async fn refresh_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> AuthResult<Session> {
        if access_token.trim().is_empty() {
            return Err(AuthError::Validation(
                "access token is required".to_string(),
            ));
        }
        self.tokens.rotate_refresh_token(access_token, refresh_token).await
    }

    /// Change the password after re-checking the current one, then revoke
    /// every outstanding refresh token so stolen refresh material dies
    /// with the old password.
    ///
    /// # Errors
    /// `NotFound` for an unknown user, `Unauthenticated` for a wrong
    /// current password, `Validation` for a weak new password.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        validate_new_password(new_password)?;
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("user not found".to_string()))?;
        if !verify_password(current_password, &user.password_hash)? {
            return Err(AuthError::invalid_credentials());
        }

        let new_hash = hash_password(new_password)?;
        self.store.set_password_hash(user.id, &new_hash).await?;
        let revoked = self.store.revoke_refresh_tokens_for_user(user.id).await?;
        info!(
            "password changed for user {}, {revoked} refresh token(s) revoked",
            user.id
        );
        Ok(())
    }

    /// Start a password reset. Externally this always succeeds; a reset
    /// token is generated and handed to the notifier only when the email
    /// belongs to an active account.
    ///
    /// # Errors
    /// `Unexpected` when the store or notifier fails.
    pub async fn forgot_password(&self, email: &str) -> AuthResult<()> {
        let email = email.trim();
        let Some(user) = self.store.find_user_by_email(email).await? else {
            debug!("reset requested for unknown email, ignoring");
            return Ok(());
        };
        if !user.is_active {
            debug!("reset requested for inactive user {}, ignoring", user.id);
            return Ok(());
        }

        let reset_token = generate_opaque_token()?;
        self.store
            .insert_reset_token(
                user.id,
                &hash_opaque_token(&reset_token),
                self.config.reset_token_ttl_seconds(),
            )
            .await?;
        self.notifier
            .send_reset_token(&user.email, &reset_token)
            .await
            .context("failed to deliver reset token")?;
        info!("reset token issued for user {}", user.id);
        Ok(())
    }

    /// Consume a reset token and set a new password, revoking all refresh
    /// tokens.
    ///
    /// # Errors
    /// `Validation` for a weak password, `Unauthenticated` for a wrong,
    /// expired, or already-used token.
    pub async fn reset_password(
        &self,
        email: &str,
        reset_token: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        // Validate before consuming so a weak password does not burn a
        // perfectly good token.
        validate_new_password(new_password)?;

        let Some(user) = self.store.find_user_by_email(email.trim()).await? else {
            return Err(AuthError::invalid_token());
        };
        let consumed = self
            .store
            .consume_reset_token(user.id, &hash_opaque_token(reset_token))
            .await?;
        if !consumed {
            debug!("reset token rejected for user {}", user.id);
            return Err(AuthError::invalid_token());
        }

        let new_hash = hash_password(new_password)?;
        self.store.set_password_hash(user.id, &new_hash).await?;
        self.store.revoke_refresh_tokens_for_user(user.id).await?;
        info!("password reset completed for user {}", user.id);
        Ok(())
    }

    /// Begin 2FA enrollment for a user.
    ///
    /// # Errors
    /// `NotFound` for an unknown user; otherwise per
    /// [`TwoFactorController::begin_setup`].
    pub async fn setup_two_factor(&self, user_id: Uuid) -> AuthResult<SetupDetails> {
        let user = self.required_user(user_id).await?;
        self.two_factor.begin_setup(&user).await
    }

    /// Confirm enrollment with an authenticator code, enabling 2FA and
    /// returning the recovery codes for one-time display.
    ///
    /// # Errors
    /// `NotFound` for an unknown user; otherwise per
    /// [`TwoFactorController::confirm_setup`].
    pub async fn enable_two_factor(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> AuthResult<RecoveryCodeBatch> {
        let user = self.required_user(user_id).await?;
        self.two_factor.confirm_setup(&user, code).await
    }

    /// Disable 2FA after re-checking the password.
    ///
    /// # Errors
    /// `NotFound` for an unknown user; otherwise per
    /// [`TwoFactorController::disable`].
    pub async fn disable_two_factor(&self, user_id: Uuid, password: &str) -> AuthResult<()> {
        let user = self.required_user(user_id).await?;
        self.two_factor.disable(&user, password).await
    }

    async fn challenged_user(&self, challenge_token: &str) -> AuthResult<crate::store::User> {
        let user_id = self.tokens.validate_challenge_token(challenge_token)?;
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(AuthError::invalid_token)?;
        if !user.is_active {
            return Err(AuthError::invalid_credentials());
        }
        Ok(user)
    }

    async fn required_user(&self, user_id: Uuid) -> AuthResult<crate::store::User> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("user not found".to_string()))
    }
}

fn is_valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

fn validate_new_password(new_password: &str) -> AuthResult<()> {
    if new_password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemorySharedCache;
    use crate::error::INVALID_CREDENTIALS;
    use crate::permissions::catalog;
    use crate::store::NewUser;
    use crate::store::memory::MemoryCredentialStore;
    use crate::token::now_unix;
    use secrecy::SecretString;
    use tokio::sync::Mutex;
    use totp_rs::{Algorithm as TotpAlgorithm, Secret, TOTP};

    const PASSWORD: &str = "initial-password-1";

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ResetNotifier for RecordingNotifier {
        async fn send_reset_token(&self, email: &str, reset_token: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .await
                .push((email.to_string(), reset_token.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        auth: AuthService,
        store: Arc<MemoryCredentialStore>,
        notifier: Arc<RecordingNotifier>,
        alice: Uuid,
    }

    async fn fixture() -> Fixture {
        let config = Arc::new(
            AuthConfig::new(SecretString::from("unit-test-signing-secret".to_string()))
                .with_clock_skew_seconds(0),
        );
        let store = Arc::new(MemoryCredentialStore::new());
        let cache = Arc::new(TieredCache::new(Arc::new(MemorySharedCache::new())));
        let notifier = Arc::new(RecordingNotifier::default());
        let auth = AuthService::new(config, store.clone(), cache)
            .with_reset_notifier(notifier.clone());

        store
            .create_role(
                "Admin",
                "Administrators",
                &[
                    catalog::BLOGS_EDIT.to_string(),
                    catalog::USERS_VIEW.to_string(),
                ],
            )
            .await
            .unwrap();
        let alice = store
            .create_user(NewUser {
                email: "alice@example.com".to_string(),
                password_hash: hash_password(PASSWORD).unwrap(),
                full_name: "Alice".to_string(),
                avatar_url: None,
            })
            .await
            .unwrap();
        store.assign_role(alice.id, "Admin").await.unwrap();

        Fixture {
            auth,
            store,
            notifier,
            alice: alice.id,
        }
    }

    fn expect_session(outcome: LoginOutcome) -> Session {
        match outcome {
            LoginOutcome::Session(session) => session,
            LoginOutcome::TwoFactorRequired { .. } => panic!("expected a full session"),
        }
    }

    fn expect_challenge(outcome: LoginOutcome) -> String {
        match outcome {
            LoginOutcome::TwoFactorRequired { challenge_token } => challenge_token,
            LoginOutcome::Session(_) => panic!("expected a two-factor challenge"),
        }
    }

    fn totp_code(secret_base32: &str, offset_steps: u64) -> String {
        let totp = TOTP::new(
            TotpAlgorithm::SHA1,
            6,
            1,
            30,
            Secret::Encoded(secret_base32.to_string()).to_bytes().unwrap(),
            Some("custodia".to_string()),
            "alice@example.com".to_string(),
        )
        .unwrap();
        totp.generate(now_unix().max(0) as u64 + offset_steps * 30)
    }

    async fn enable_two_factor(fx: &Fixture) -> RecoveryCodeBatch {
        let setup = fx.auth.setup_two_factor(fx.alice).await.unwrap();
        let code = totp_code(&setup.secret_base32, 0);
        fx.auth.enable_two_factor(fx.alice, &code).await.unwrap()
    }

    #[tokio::test]
    async fn login_yields_session_with_roles_and_permissions() {
        let fx = fixture().await;
        let session = expect_session(
            fx.auth.login("alice@example.com", PASSWORD).await.unwrap(),
        );

        assert_eq!(session.user.email, "alice@example.com");
        assert_eq!(session.user.roles, vec!["Admin"]);
        assert_eq!(
            session.user.permissions,
            vec![catalog::BLOGS_EDIT, catalog::USERS_VIEW]
        );

        let claims = fx
            .auth
            .tokens()
            .validate_access_token(&session.access_token)
            .unwrap();
        assert_eq!(claims.perms, session.user.permissions);
    }

    #[tokio::test]
    async fn credential_failures_are_indistinguishable() {
        let fx = fixture().await;

        let unknown = fx
            .auth
            .login("nobody@example.com", PASSWORD)
            .await
            .unwrap_err();
        let wrong = fx
            .auth
            .login("alice@example.com", "not-the-password")
            .await
            .unwrap_err();

        fx.store.set_active(fx.alice, false).await.unwrap();
        let inactive = fx
            .auth
            .login("alice@example.com", PASSWORD)
            .await
            .unwrap_err();

        for err in [unknown, wrong, inactive] {
            match err {
                AuthError::Unauthenticated(message) => {
                    assert_eq!(message, INVALID_CREDENTIALS);
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn empty_credentials_are_a_validation_error() {
        let fx = fixture().await;
        let err = fx.auth.login("  ", "").await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn malformed_email_is_a_validation_error() {
        let fx = fixture().await;
        for email in ["plainaddress", "two words@example.com", "no-domain@"] {
            let err = fx.auth.login(email, PASSWORD).await.unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)), "{email}");
        }
    }

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email("alice@example.com"));
        assert!(is_valid_email("a.b+c@sub.example.co"));
        assert!(!is_valid_email("alice@example"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email(""));
    }

    #[tokio::test]
    async fn two_factor_login_round_trip() {
        let fx = fixture().await;
        enable_two_factor(&fx).await;

        let challenge = expect_challenge(
            fx.auth.login("alice@example.com", PASSWORD).await.unwrap(),
        );

        // Challenge tokens never pass for access tokens.
        assert!(fx.auth.tokens().validate_access_token(&challenge).is_err());

        let secret = fx
            .store
            .find_user_by_id(fx.alice)
            .await
            .unwrap()
            .unwrap()
            .totp_secret
            .unwrap();
        // Enrollment burned the current step; use the next window.
        let code = totp_code(&secret, 1);
        let session = fx.auth.verify_two_factor(&challenge, &code).await.unwrap();
        assert!(session.user.two_factor_enabled);

        fx.auth
            .tokens()
            .validate_access_token(&session.access_token)
            .unwrap();
    }

    #[tokio::test]
    async fn wrong_code_does_not_complete_the_challenge() {
        let fx = fixture().await;
        enable_two_factor(&fx).await;
        let challenge = expect_challenge(
            fx.auth.login("alice@example.com", PASSWORD).await.unwrap(),
        );

        let err = fx
            .auth
            .verify_two_factor(&challenge, "000000")
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn recovery_login_spends_the_code() {
        let fx = fixture().await;
        let batch = enable_two_factor(&fx).await;
        let recovery_code = batch.plain_codes[0].clone();

        let challenge = expect_challenge(
            fx.auth.login("alice@example.com", PASSWORD).await.unwrap(),
        );
        let session = fx
            .auth
            .recovery_login(&challenge, &recovery_code)
            .await
            .unwrap();
        fx.auth
            .tokens()
            .validate_access_token(&session.access_token)
            .unwrap();

        // The same code on a fresh challenge must fail.
        let challenge = expect_challenge(
            fx.auth.login("alice@example.com", PASSWORD).await.unwrap(),
        );
        let err = fx
            .auth
            .recovery_login(&challenge, &recovery_code)
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn deactivation_invalidates_an_open_challenge() {
        let fx = fixture().await;
        enable_two_factor(&fx).await;
        let challenge = expect_challenge(
            fx.auth.login("alice@example.com", PASSWORD).await.unwrap(),
        );

        fx.store.set_active(fx.alice, false).await.unwrap();

        let secret = fx
            .store
            .find_user_by_id(fx.alice)
            .await
            .unwrap()
            .unwrap()
            .totp_secret
            .unwrap();
        let err = fx
            .auth
            .verify_two_factor(&challenge, &totp_code(&secret, 1))
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn refresh_rotates_and_retires_the_old_token() {
        let fx = fixture().await;
        let session = expect_session(
            fx.auth.login("alice@example.com", PASSWORD).await.unwrap(),
        );

        let rotated = fx
            .auth
            .refresh_session(&session.access_token, &session.refresh_token)
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, session.refresh_token);

        let err = fx
            .auth
            .refresh_session(&session.access_token, &session.refresh_token)
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn change_password_revokes_outstanding_refresh_tokens() {
        let fx = fixture().await;
        let session = expect_session(
            fx.auth.login("alice@example.com", PASSWORD).await.unwrap(),
        );

        fx.auth
            .change_password(fx.alice, PASSWORD, "brand-new-password-2")
            .await
            .unwrap();

        let err = fx
            .auth
            .refresh_session(&session.access_token, &session.refresh_token)
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());

        assert!(fx.auth.login("alice@example.com", PASSWORD).await.is_err());
        expect_session(
            fx.auth
                .login("alice@example.com", "brand-new-password-2")
                .await
                .unwrap(),
        );
    }

    #[tokio::test]
    async fn change_password_checks_the_current_one() {
        let fx = fixture().await;
        let err = fx
            .auth
            .change_password(fx.alice, "not-the-password", "brand-new-password-2")
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());

        let err = fx
            .auth
            .change_password(fx.alice, PASSWORD, "short")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn forgot_password_is_enumeration_safe() {
        let fx = fixture().await;

        fx.auth.forgot_password("nobody@example.com").await.unwrap();
        assert!(fx.notifier.sent.lock().await.is_empty());

        fx.store.set_active(fx.alice, false).await.unwrap();
        fx.auth.forgot_password("alice@example.com").await.unwrap();
        assert!(fx.notifier.sent.lock().await.is_empty());

        fx.store.set_active(fx.alice, true).await.unwrap();
        fx.auth.forgot_password("alice@example.com").await.unwrap();
        let sent = fx.notifier.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "alice@example.com");
    }

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let fx = fixture().await;
        fx.auth.forgot_password("alice@example.com").await.unwrap();
        let reset_token = fx.notifier.sent.lock().await[0].1.clone();

        fx.auth
            .reset_password("alice@example.com", &reset_token, "after-reset-password-3")
            .await
            .unwrap();

        assert!(fx.auth.login("alice@example.com", PASSWORD).await.is_err());
        expect_session(
            fx.auth
                .login("alice@example.com", "after-reset-password-3")
                .await
                .unwrap(),
        );

        let err = fx
            .auth
            .reset_password("alice@example.com", &reset_token, "yet-another-password-4")
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn weak_password_does_not_burn_the_reset_token() {
        let fx = fixture().await;
        fx.auth.forgot_password("alice@example.com").await.unwrap();
        let reset_token = fx.notifier.sent.lock().await[0].1.clone();

        let err = fx
            .auth
            .reset_password("alice@example.com", &reset_token, "short")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        // The token is still valid afterward.
        fx.auth
            .reset_password("alice@example.com", &reset_token, "after-reset-password-3")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bogus_reset_token_is_rejected() {
        let fx = fixture().await;
        let err = fx
            .auth
            .reset_password("alice@example.com", "made-up-token", "after-reset-password-3")
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn two_factor_endpoints_require_a_known_user() {
        let fx = fixture().await;
        let missing = Uuid::new_v4();

        assert!(matches!(
            fx.auth.setup_two_factor(missing).await.unwrap_err(),
            AuthError::NotFound(_)
        ));
        assert!(matches!(
            fx.auth.enable_two_factor(missing, "123456").await.unwrap_err(),
            AuthError::NotFound(_)
        ));
        assert!(matches!(
            fx.auth.disable_two_factor(missing, PASSWORD).await.unwrap_err(),
            AuthError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn disable_two_factor_returns_login_to_single_step() {
        let fx = fixture().await;
        enable_two_factor(&fx).await;

        fx.auth.disable_two_factor(fx.alice, PASSWORD).await.unwrap();
        expect_session(
            fx.auth.login("alice@example.com", PASSWORD).await.unwrap(),
        );
    }
}
