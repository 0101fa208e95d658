//! Auth core configuration.

use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

const DEFAULT_ISSUER: &str = "custodia";
const DEFAULT_AUDIENCE: &str = "custodia-api";
const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: i64 = 15;
const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 7;
const DEFAULT_CHALLENGE_TOKEN_TTL_MINUTES: i64 = 5;
const DEFAULT_RESET_TOKEN_TTL_MINUTES: i64 = 24 * 60;
const DEFAULT_CLOCK_SKEW_SECONDS: u64 = 60;

const ENV_ISSUER: &str = "CUSTODIA_JWT_ISSUER";
const ENV_AUDIENCE: &str = "CUSTODIA_JWT_AUDIENCE";
const ENV_SECRET: &str = "CUSTODIA_JWT_SECRET";
const ENV_ACCESS_TTL_MINUTES: &str = "CUSTODIA_ACCESS_TOKEN_TTL_MINUTES";
const ENV_REFRESH_TTL_DAYS: &str = "CUSTODIA_REFRESH_TOKEN_TTL_DAYS";

/// Signing and lifetime settings for the token service and 2FA controller.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    issuer: String,
    audience: String,
    signing_secret: SecretString,
    access_token_ttl_minutes: i64,
    refresh_token_ttl_days: i64,
    challenge_token_ttl_minutes: i64,
    reset_token_ttl_minutes: i64,
    clock_skew_seconds: u64,
    totp_issuer: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(signing_secret: SecretString) -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            signing_secret,
            access_token_ttl_minutes: DEFAULT_ACCESS_TOKEN_TTL_MINUTES,
            refresh_token_ttl_days: DEFAULT_REFRESH_TOKEN_TTL_DAYS,
            challenge_token_ttl_minutes: DEFAULT_CHALLENGE_TOKEN_TTL_MINUTES,
            reset_token_ttl_minutes: DEFAULT_RESET_TOKEN_TTL_MINUTES,
            clock_skew_seconds: DEFAULT_CLOCK_SKEW_SECONDS,
            totp_issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Load configuration from `CUSTODIA_*` environment variables.
    ///
    /// # Errors
    /// Returns an error when the signing secret is missing or empty.
    pub fn from_env() -> anyhow::Result<Self> {
        let secret = std::env::var(ENV_SECRET)
            .map_err(|_| anyhow::anyhow!("{ENV_SECRET} is not set"))?;
        if secret.trim().is_empty() {
            return Err(anyhow::anyhow!("{ENV_SECRET} is empty"));
        }

        let mut config = Self::new(SecretString::from(secret));
        if let Ok(issuer) = std::env::var(ENV_ISSUER) {
            config = config.with_issuer(issuer);
        }
        if let Ok(audience) = std::env::var(ENV_AUDIENCE) {
            config = config.with_audience(audience);
        }
        if let Some(minutes) = parse_i64_env(ENV_ACCESS_TTL_MINUTES) {
            config = config.with_access_token_ttl_minutes(minutes);
        }
        if let Some(days) = parse_i64_env(ENV_REFRESH_TTL_DAYS) {
            config = config.with_refresh_token_ttl_days(days);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: String) -> Self {
        self.audience = audience;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_minutes(mut self, minutes: i64) -> Self {
        self.access_token_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_days(mut self, days: i64) -> Self {
        self.refresh_token_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_challenge_token_ttl_minutes(mut self, minutes: i64) -> Self {
        self.challenge_token_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_minutes(mut self, minutes: i64) -> Self {
        self.reset_token_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_clock_skew_seconds(mut self, seconds: u64) -> Self {
        self.clock_skew_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub(crate) fn signing_secret(&self) -> &[u8] {
        self.signing_secret.expose_secret().as_bytes()
    }

    #[must_use]
    pub fn access_token_ttl_minutes(&self) -> i64 {
        self.access_token_ttl_minutes
    }

    #[must_use]
    pub fn refresh_token_ttl_days(&self) -> i64 {
        self.refresh_token_ttl_days
    }

    #[must_use]
    pub fn challenge_token_ttl_minutes(&self) -> i64 {
        self.challenge_token_ttl_minutes
    }

    #[must_use]
    pub fn reset_token_ttl_minutes(&self) -> i64 {
        self.reset_token_ttl_minutes
    }

    #[must_use]
    pub fn clock_skew_seconds(&self) -> u64 {
        self.clock_skew_seconds
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    pub(crate) fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_minutes * 60
    }

    pub(crate) fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_days * 24 * 60 * 60
    }

    pub(crate) fn challenge_token_ttl_seconds(&self) -> i64 {
        self.challenge_token_ttl_minutes * 60
    }

    pub(crate) fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_minutes * 60
    }
}

fn parse_i64_env(key: &str) -> Option<i64> {
    let value = std::env::var(key).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring unparseable {key}={value}, keeping the default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig::new(SecretString::from("test-secret".to_string()))
    }

    #[test]
    fn defaults_and_overrides() {
        let config = test_config();
        assert_eq!(config.issuer(), DEFAULT_ISSUER);
        assert_eq!(config.audience(), DEFAULT_AUDIENCE);
        assert_eq!(
            config.access_token_ttl_minutes(),
            DEFAULT_ACCESS_TOKEN_TTL_MINUTES
        );
        assert_eq!(
            config.refresh_token_ttl_days(),
            DEFAULT_REFRESH_TOKEN_TTL_DAYS
        );
        assert_eq!(config.clock_skew_seconds(), DEFAULT_CLOCK_SKEW_SECONDS);

        let config = config
            .with_issuer("api.test".to_string())
            .with_audience("web.test".to_string())
            .with_access_token_ttl_minutes(5)
            .with_refresh_token_ttl_days(30)
            .with_challenge_token_ttl_minutes(2)
            .with_clock_skew_seconds(0);

        assert_eq!(config.issuer(), "api.test");
        assert_eq!(config.audience(), "web.test");
        assert_eq!(config.access_token_ttl_seconds(), 300);
        assert_eq!(config.refresh_token_ttl_seconds(), 30 * 24 * 60 * 60);
        assert_eq!(config.challenge_token_ttl_seconds(), 120);
        assert_eq!(config.clock_skew_seconds(), 0);
    }

    #[test]
    fn from_env_requires_secret() {
        temp_env::with_var(ENV_SECRET, None::<&str>, || {
            assert!(AuthConfig::from_env().is_err());
        });
    }

    #[test]
    fn from_env_keeps_defaults_on_unparseable_ttl() {
        temp_env::with_vars(
            [
                (ENV_SECRET, Some("env-secret")),
                (ENV_ACCESS_TTL_MINUTES, Some("fifteen")),
            ],
            || {
                let config = AuthConfig::from_env().unwrap();
                assert_eq!(
                    config.access_token_ttl_minutes(),
                    DEFAULT_ACCESS_TOKEN_TTL_MINUTES
                );
            },
        );
    }

    #[test]
    fn from_env_reads_overrides() {
        temp_env::with_vars(
            [
                (ENV_SECRET, Some("env-secret")),
                (ENV_ISSUER, Some("issuer.env")),
                (ENV_ACCESS_TTL_MINUTES, Some("7")),
                (ENV_REFRESH_TTL_DAYS, Some("14")),
            ],
            || {
                let config = AuthConfig::from_env().unwrap();
                assert_eq!(config.issuer(), "issuer.env");
                assert_eq!(config.access_token_ttl_minutes(), 7);
                assert_eq!(config.refresh_token_ttl_days(), 14);
            },
        );
    }
}
