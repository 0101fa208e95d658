//! Token issuance, validation, and rotation.
//!
//! Access and challenge tokens are HS256 JWTs verified against a pinned
//! algorithm, issuer, and audience; a `purpose` claim keeps the two kinds
//! mutually unacceptable. Refresh tokens are opaque 64-byte random values;
//! only their SHA-256 hash is persisted, and rotation revokes the old row
//! and commits its replacement in one atomic store operation that also
//! decides the winner of a race.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::permissions::PermissionResolver;
use crate::store::{CredentialStore, User};

/// Purpose claim for a full session token.
pub const PURPOSE_SESSION: &str = "session";
/// Purpose claim for the "password verified, second factor pending" token.
pub const PURPOSE_TWO_FACTOR: &str = "two_factor";

const REFRESH_TOKEN_BYTES: usize = 64;

/// Claims carried by both token kinds; role/permission entries are only
/// populated on session tokens.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub perms: Vec<String>,
    pub purpose: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    /// Subject parsed as a user id.
    ///
    /// # Errors
    /// `Unauthenticated` when the subject is not a valid id.
    pub fn user_id(&self) -> AuthResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::invalid_token())
    }
}

/// Identity summary returned alongside a fresh session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub two_factor_enabled: bool,
}

/// A full authenticated session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp at which the access token expires.
    pub expires_at: i64,
    pub user: UserSummary,
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Generate an opaque token (refresh or reset) from the OS random source.
pub(crate) fn generate_opaque_token() -> AuthResult<String> {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::Unexpected(anyhow::anyhow!("rng failure: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a refresh or reset token so raw values never touch the store.
pub(crate) fn hash_opaque_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub struct TokenService {
    config: Arc<AuthConfig>,
    store: Arc<dyn CredentialStore>,
    resolver: Arc<PermissionResolver>,
}

impl TokenService {
    #[must_use]
    pub fn new(
        config: Arc<AuthConfig>,
        store: Arc<dyn CredentialStore>,
        resolver: Arc<PermissionResolver>,
    ) -> Self {
        Self {
            config,
            store,
            resolver,
        }
    }

    /// Issue a full access + refresh pair for an active user, embedding the
    /// resolved permissions in the access token.
    ///
    /// # Errors
    /// `Unauthenticated` for an inactive user; `Unexpected` when the store
    /// or resolver fails.
    pub async fn issue_session(&self, user: &User) -> AuthResult<Session> {
        if !user.is_active {
            return Err(AuthError::invalid_credentials());
        }

        let refresh_token = generate_opaque_token()?;
        self.store
            .insert_refresh_token(
                user.id,
                &hash_opaque_token(&refresh_token),
                self.config.refresh_token_ttl_seconds(),
            )
            .await?;

        debug!("issued session for user {}", user.id);
        self.build_session(user, refresh_token).await
    }

    /// Sign an access token for `user` and assemble the session around an
    /// already-persisted refresh token.
    async fn build_session(&self, user: &User, refresh_token: String) -> AuthResult<Session> {
        let roles = self.store.roles_for_user(user.id).await?;
        let permissions: Vec<String> = self
            .resolver
            .resolve(&roles)
            .await?
            .into_iter()
            .collect();

        let now = now_unix();
        let expires_at = now + self.config.access_token_ttl_seconds();
        let claims = Claims {
            iss: self.config.issuer().to_string(),
            aud: self.config.audience().to_string(),
            sub: user.id.to_string(),
            email: Some(user.email.clone()),
            name: Some(user.full_name.clone()),
            roles: roles.clone(),
            perms: permissions.clone(),
            purpose: PURPOSE_SESSION.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: expires_at,
        };
        let access_token = self.sign(&claims)?;

        Ok(Session {
            access_token,
            refresh_token,
            expires_at,
            user: UserSummary {
                id: user.id,
                email: user.email.clone(),
                full_name: user.full_name.clone(),
                avatar_url: user.avatar_url.clone(),
                roles,
                permissions,
                two_factor_enabled: user.two_factor_enabled,
            },
        })
    }

    /// Validate a bearer token as a full session token.
    ///
    /// Algorithm, signature, issuer, audience, and expiry are all checked;
    /// a challenge token is rejected by its purpose marker.
    ///
    /// # Errors
    /// `Unauthenticated` for any failed check.
    pub fn validate_access_token(&self, token: &str) -> AuthResult<Claims> {
        let claims = self.decode(token, true)?;
        if claims.purpose != PURPOSE_SESSION {
            return Err(AuthError::invalid_token());
        }
        Ok(claims)
    }

    /// Issue a short-lived challenge token marking "password verified,
    /// second factor pending".
    ///
    /// # Errors
    /// `Unexpected` when signing fails.
    pub fn issue_challenge_token(&self, user_id: Uuid) -> AuthResult<String> {
        let now = now_unix();
        let claims = Claims {
            iss: self.config.issuer().to_string(),
            aud: self.config.audience().to_string(),
            sub: user_id.to_string(),
            email: None,
            name: None,
            roles: Vec::new(),
            perms: Vec::new(),
            purpose: PURPOSE_TWO_FACTOR.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.config.challenge_token_ttl_seconds(),
        };
        self.sign(&claims)
    }

    /// Validate a challenge token and return its subject.
    ///
    /// # Errors
    /// `Unauthenticated` when the token is invalid, expired, or carries a
    /// session purpose.
    pub fn validate_challenge_token(&self, token: &str) -> AuthResult<Uuid> {
        let claims = self.decode(token, true)?;
        if claims.purpose != PURPOSE_TWO_FACTOR {
            return Err(AuthError::invalid_token());
        }
        claims.user_id()
    }

    /// Exchange an expired access token plus a live refresh token for a
    /// fresh session.
    ///
    /// The access token's signature, issuer, audience, and purpose are
    /// verified while its expiry is deliberately ignored. The old refresh
    /// token is revoked and its replacement committed in one atomic store
    /// operation: of two concurrent callers presenting the same token,
    /// exactly one succeeds, and an interrupted rotation never leaves a
    /// revoked chain without a live token.
    ///
    /// # Errors
    /// `Validation` for a missing refresh token, `Unauthenticated` for any
    /// invalid or already-consumed credential or an inactive user.
    pub async fn rotate_refresh_token(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> AuthResult<Session> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::Validation(
                "refresh token is required".to_string(),
            ));
        }

        let claims = self.decode(access_token, false)?;
        if claims.purpose != PURPOSE_SESSION {
            return Err(AuthError::invalid_token());
        }
        let user_id = claims.user_id()?;

        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(AuthError::invalid_token)?;
        if !user.is_active {
            return Err(AuthError::invalid_credentials());
        }

        // Atomic commit point: revoke-old plus insert-new in one store
        // operation decides the winner.
        let new_refresh_token = generate_opaque_token()?;
        let rotated = self
            .store
            .rotate_refresh_token(
                user_id,
                &hash_opaque_token(refresh_token),
                &hash_opaque_token(&new_refresh_token),
                self.config.refresh_token_ttl_seconds(),
            )
            .await?;
        if !rotated {
            debug!("refresh token rejected for user {user_id}");
            return Err(AuthError::invalid_token());
        }

        self.build_session(&user, new_refresh_token).await
    }

    /// Revoke every outstanding refresh token for a user.
    ///
    /// # Errors
    /// `Unexpected` when the store fails.
    pub async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> AuthResult<u64> {
        Ok(self.store.revoke_refresh_tokens_for_user(user_id).await?)
    }

    fn sign(&self, claims: &Claims) -> AuthResult<String> {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.config.signing_secret()),
        )
        .map_err(|e| AuthError::Unexpected(anyhow::anyhow!("failed to sign token: {e}")))
    }

    fn decode(&self, token: &str, validate_exp: bool) -> AuthResult<Claims> {
        // Algorithm is pinned to HS256; a token signed under any other
        // header algorithm fails before signature comparison.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer()]);
        validation.set_audience(&[self.config.audience()]);
        validation.leeway = self.config.clock_skew_seconds();
        validation.validate_exp = validate_exp;

        jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.signing_secret()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|_| AuthError::invalid_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemorySharedCache, TieredCache};
    use crate::permissions::catalog;
    use crate::store::NewUser;
    use crate::store::memory::MemoryCredentialStore;
    use secrecy::SecretString;

    const TEST_SECRET: &str = "unit-test-signing-secret";

    struct Fixture {
        store: Arc<MemoryCredentialStore>,
        tokens: TokenService,
        config: Arc<AuthConfig>,
    }

    async fn fixture() -> (Fixture, User) {
        let config = Arc::new(
            AuthConfig::new(SecretString::from(TEST_SECRET.to_string()))
                .with_clock_skew_seconds(0),
        );
        let store = Arc::new(MemoryCredentialStore::new());
        let cache = Arc::new(TieredCache::new(Arc::new(MemorySharedCache::new())));
        let resolver = Arc::new(PermissionResolver::new(store.clone(), cache));
        let tokens = TokenService::new(config.clone(), store.clone(), resolver);

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
        let user = store
            .create_user(NewUser {
                email: "alice@example.com".to_string(),
                password_hash: "$argon2id$test".to_string(),
                full_name: "Alice".to_string(),
                avatar_url: None,
            })
            .await
            .unwrap();
        store.assign_role(user.id, "Admin").await.unwrap();

        (
            Fixture {
                store,
                tokens,
                config,
            },
            user,
        )
    }

    fn sign_raw(config: &AuthConfig, claims: &Claims, algorithm: Algorithm) -> String {
        jsonwebtoken::encode(
            &Header::new(algorithm),
            claims,
            &EncodingKey::from_secret(config.signing_secret()),
        )
        .unwrap()
    }

    fn session_claims(config: &AuthConfig, user: &User, iat: i64, exp: i64) -> Claims {
        Claims {
            iss: config.issuer().to_string(),
            aud: config.audience().to_string(),
            sub: user.id.to_string(),
            email: Some(user.email.clone()),
            name: Some(user.full_name.clone()),
            roles: vec!["Admin".to_string()],
            perms: vec![catalog::BLOGS_EDIT.to_string()],
            purpose: PURPOSE_SESSION.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat,
            exp,
        }
    }

    #[tokio::test]
    async fn issued_session_carries_roles_and_permissions() {
        let (fx, user) = fixture().await;
        let session = fx.tokens.issue_session(&user).await.unwrap();

        let claims = fx.tokens.validate_access_token(&session.access_token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
        assert_eq!(claims.roles, vec!["Admin"]);
        assert_eq!(
            claims.perms,
            vec![catalog::BLOGS_EDIT, catalog::USERS_VIEW]
        );
        assert_eq!(session.user.permissions, claims.perms);
        assert!(session.expires_at > now_unix());
    }

    #[tokio::test]
    async fn inactive_user_cannot_get_a_session() {
        let (fx, user) = fixture().await;
        fx.store.set_active(user.id, false).await.unwrap();
        let user = fx.store.find_user_by_id(user.id).await.unwrap().unwrap();

        let err = fx.tokens.issue_session(&user).await.unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn tampered_token_is_rejected() {
        let (fx, user) = fixture().await;
        let session = fx.tokens.issue_session(&user).await.unwrap();

        let mut tampered = session.access_token.clone();
        tampered.pop();
        tampered.push('A');
        assert!(fx.tokens.validate_access_token(&tampered).is_err());
    }

    #[tokio::test]
    async fn unexpected_algorithm_is_rejected() {
        let (fx, user) = fixture().await;
        let now = now_unix();
        let claims = session_claims(&fx.config, &user, now, now + 600);

        // Same secret, different algorithm: must fail the pinned check.
        let hs384 = sign_raw(&fx.config, &claims, Algorithm::HS384);
        assert!(fx.tokens.validate_access_token(&hs384).is_err());
    }

    #[tokio::test]
    async fn expired_access_token_is_rejected() {
        let (fx, user) = fixture().await;
        let now = now_unix();
        let claims = session_claims(&fx.config, &user, now - 7200, now - 3600);
        let expired = sign_raw(&fx.config, &claims, Algorithm::HS256);

        assert!(fx.tokens.validate_access_token(&expired).is_err());
    }

    #[tokio::test]
    async fn wrong_issuer_is_rejected() {
        let (fx, user) = fixture().await;
        let now = now_unix();
        let mut claims = session_claims(&fx.config, &user, now, now + 600);
        claims.iss = "someone-else".to_string();
        let token = sign_raw(&fx.config, &claims, Algorithm::HS256);

        assert!(fx.tokens.validate_access_token(&token).is_err());
    }

    #[tokio::test]
    async fn purpose_isolation_both_ways() {
        let (fx, user) = fixture().await;
        let session = fx.tokens.issue_session(&user).await.unwrap();
        let challenge = fx.tokens.issue_challenge_token(user.id).unwrap();

        assert!(fx.tokens.validate_access_token(&challenge).is_err());
        assert!(fx.tokens.validate_challenge_token(&session.access_token).is_err());

        assert_eq!(
            fx.tokens.validate_challenge_token(&challenge).unwrap(),
            user.id
        );
    }

    #[tokio::test]
    async fn challenge_token_cannot_rotate() {
        let (fx, user) = fixture().await;
        let session = fx.tokens.issue_session(&user).await.unwrap();
        let challenge = fx.tokens.issue_challenge_token(user.id).unwrap();

        let err = fx
            .tokens
            .rotate_refresh_token(&challenge, &session.refresh_token)
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn rotation_accepts_expired_access_token() {
        let (fx, user) = fixture().await;
        let session = fx.tokens.issue_session(&user).await.unwrap();

        let now = now_unix();
        let claims = session_claims(&fx.config, &user, now - 7200, now - 3600);
        let expired_access = sign_raw(&fx.config, &claims, Algorithm::HS256);

        let rotated = fx
            .tokens
            .rotate_refresh_token(&expired_access, &session.refresh_token)
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, session.refresh_token);
        fx.tokens.validate_access_token(&rotated.access_token).unwrap();
    }

    #[tokio::test]
    async fn rotation_chains_through_replacements() {
        let (fx, user) = fixture().await;
        let first = fx.tokens.issue_session(&user).await.unwrap();

        // Each replacement commits with the revoke of its predecessor, so
        // the chain stays rotatable link by link.
        let second = fx
            .tokens
            .rotate_refresh_token(&first.access_token, &first.refresh_token)
            .await
            .unwrap();
        let third = fx
            .tokens
            .rotate_refresh_token(&second.access_token, &second.refresh_token)
            .await
            .unwrap();
        assert_ne!(third.refresh_token, second.refresh_token);
    }

    #[tokio::test]
    async fn inactive_user_rotation_fails_without_burning_the_token() {
        let (fx, user) = fixture().await;
        let session = fx.tokens.issue_session(&user).await.unwrap();

        fx.store.set_active(user.id, false).await.unwrap();
        let err = fx
            .tokens
            .rotate_refresh_token(&session.access_token, &session.refresh_token)
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());

        // Reactivation finds the token still live.
        fx.store.set_active(user.id, true).await.unwrap();
        fx.tokens
            .rotate_refresh_token(&session.access_token, &session.refresh_token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refresh_token_is_use_once() {
        let (fx, user) = fixture().await;
        let session = fx.tokens.issue_session(&user).await.unwrap();

        fx.tokens
            .rotate_refresh_token(&session.access_token, &session.refresh_token)
            .await
            .unwrap();

        let err = fx
            .tokens
            .rotate_refresh_token(&session.access_token, &session.refresh_token)
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn concurrent_rotation_has_single_winner() {
        let (fx, user) = fixture().await;
        let session = fx.tokens.issue_session(&user).await.unwrap();
        let tokens = Arc::new(fx.tokens);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let tokens = tokens.clone();
            let access = session.access_token.clone();
            let refresh = session.refresh_token.clone();
            handles.push(tokio::spawn(async move {
                tokens.rotate_refresh_token(&access, &refresh).await.is_ok()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn missing_refresh_token_is_a_validation_error() {
        let (fx, user) = fixture().await;
        let session = fx.tokens.issue_session(&user).await.unwrap();

        let err = fx
            .tokens
            .rotate_refresh_token(&session.access_token, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn rotation_rejects_foreign_refresh_token() {
        let (fx, user) = fixture().await;
        let session = fx.tokens.issue_session(&user).await.unwrap();

        let other = fx
            .store
            .create_user(NewUser {
                email: "bob@example.com".to_string(),
                password_hash: "$argon2id$test".to_string(),
                full_name: "Bob".to_string(),
                avatar_url: None,
            })
            .await
            .unwrap();
        let other_session = fx.tokens.issue_session(&other).await.unwrap();

        // Alice's access token with Bob's refresh token must not rotate.
        let err = fx
            .tokens
            .rotate_refresh_token(&session.access_token, &other_session.refresh_token)
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn rotation_fails_after_revoke_all() {
        let (fx, user) = fixture().await;
        let session = fx.tokens.issue_session(&user).await.unwrap();

        fx.tokens.revoke_all_refresh_tokens(user.id).await.unwrap();

        let err = fx
            .tokens
            .rotate_refresh_token(&session.access_token, &session.refresh_token)
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[test]
    fn refresh_tokens_are_long_and_random() {
        let first = generate_opaque_token().unwrap();
        let second = generate_opaque_token().unwrap();
        assert_ne!(first, second);
        assert_eq!(
            URL_SAFE_NO_PAD.decode(first.as_bytes()).unwrap().len(),
            REFRESH_TOKEN_BYTES
        );
    }
}
