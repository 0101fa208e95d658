//! custodia — identity, authentication, and permission-resolution core.
//!
//! The crate is transport-agnostic: it exposes the services an HTTP layer
//! composes into endpoints, without owning routes, sessions, or delivery.
//!
//! - [`auth::AuthService`] — login, refresh, password lifecycle, 2FA
//!   endpoints.
//! - [`token::TokenService`] — JWT access/challenge tokens and use-once
//!   refresh-token rotation.
//! - [`twofactor::TwoFactorController`] — TOTP enrollment, verification
//!   with replay protection, recovery codes.
//! - [`permissions::PermissionResolver`] — role-set to permission-set
//!   resolution through the tiered cache.
//! - [`cache::TieredCache`] — local + shared read-through cache; the
//!   shared layer is never a correctness dependency.
//! - [`store::CredentialStore`] — persistence contract with in-memory and
//!   Postgres backends.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod password;
pub mod permissions;
pub mod store;
pub mod token;
pub mod twofactor;

pub use auth::{AuthService, LoginOutcome, NoopResetNotifier, ResetNotifier};
pub use cache::{MemorySharedCache, SharedCacheStore, TieredCache};
pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use permissions::{PermissionResolver, RoleAdmin};
pub use store::CredentialStore;
pub use token::{Claims, Session, TokenService, UserSummary};
pub use twofactor::{SetupDetails, TwoFactorController};
