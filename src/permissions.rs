//! Permission catalog, role → permission resolution, role administration.
//!
//! The catalog is fixed at deploy time; the API surface only assigns
//! catalog entries to roles, never creates new ones. Resolution is backed
//! by the tiered cache with one entry per role, so editing a role evicts
//! exactly one key and every other cached role survives.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::TieredCache;
use crate::error::{AuthError, AuthResult};
use crate::store::{CredentialStore, Role};

/// Fixed permission catalog, seeded at deploy time.
pub mod catalog {
    pub const DASHBOARD_VIEW: &str = "Dashboard.View";

    pub const BLOGS_VIEW: &str = "Blogs.View";
    pub const BLOGS_CREATE: &str = "Blogs.Create";
    pub const BLOGS_EDIT: &str = "Blogs.Edit";
    pub const BLOGS_DELETE: &str = "Blogs.Delete";

    pub const PROJECTS_VIEW: &str = "Projects.View";
    pub const PROJECTS_CREATE: &str = "Projects.Create";
    pub const PROJECTS_EDIT: &str = "Projects.Edit";
    pub const PROJECTS_DELETE: &str = "Projects.Delete";

    pub const LEADS_VIEW: &str = "Leads.View";
    pub const LEADS_MARK_READ: &str = "Leads.MarkRead";

    pub const USERS_VIEW: &str = "Users.View";
    pub const USERS_CREATE: &str = "Users.Create";
    pub const USERS_EDIT: &str = "Users.Edit";
    pub const USERS_DELETE: &str = "Users.Delete";
    pub const USERS_RESET_PASSWORD: &str = "Users.ResetPassword";

    pub const SITE_CONTENT_VIEW: &str = "SiteContent.View";
    pub const SITE_CONTENT_EDIT: &str = "SiteContent.Edit";

    pub const SETTINGS_VIEW: &str = "Settings.View";
    pub const SETTINGS_EDIT: &str = "Settings.Edit";

    pub const LOGS_VIEW: &str = "Logs.View";
    pub const LOGS_DELETE: &str = "Logs.Delete";

    pub const SECURITY_VIEW: &str = "Security.View";
    pub const SECURITY_MANAGE: &str = "Security.Manage";

    pub const FILES_MANAGE: &str = "Files.Manage";

    pub const AI_CONTENT_GENERATE: &str = "AiContent.Generate";
    pub const AI_CONTENT_VIEW: &str = "AiContent.View";

    /// Every catalog entry.
    #[must_use]
    pub fn all() -> &'static [&'static str] {
        &[
            DASHBOARD_VIEW,
            BLOGS_VIEW,
            BLOGS_CREATE,
            BLOGS_EDIT,
            BLOGS_DELETE,
            PROJECTS_VIEW,
            PROJECTS_CREATE,
            PROJECTS_EDIT,
            PROJECTS_DELETE,
            LEADS_VIEW,
            LEADS_MARK_READ,
            USERS_VIEW,
            USERS_CREATE,
            USERS_EDIT,
            USERS_DELETE,
            USERS_RESET_PASSWORD,
            SITE_CONTENT_VIEW,
            SITE_CONTENT_EDIT,
            SETTINGS_VIEW,
            SETTINGS_EDIT,
            LOGS_VIEW,
            LOGS_DELETE,
            SECURITY_VIEW,
            SECURITY_MANAGE,
            FILES_MANAGE,
            AI_CONTENT_GENERATE,
            AI_CONTENT_VIEW,
        ]
    }

    #[must_use]
    pub fn contains(name: &str) -> bool {
        all().contains(&name)
    }
}

const ROLE_KEY_PREFIX: &str = "permissions:role:";
const PERMISSIONS_TAG: &str = "permissions";

const DEFAULT_LOCAL_TTL: Duration = Duration::from_secs(60);
const DEFAULT_SHARED_TTL: Duration = Duration::from_secs(5 * 60);

fn role_cache_key(role_name: &str) -> String {
    format!("{ROLE_KEY_PREFIX}{role_name}")
}

/// Resolves the permission set granted by a set of role names.
pub struct PermissionResolver {
    store: Arc<dyn CredentialStore>,
    cache: Arc<TieredCache>,
    local_ttl: Duration,
    shared_ttl: Duration,
}

impl PermissionResolver {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, cache: Arc<TieredCache>) -> Self {
        Self {
            store,
            cache,
            local_ttl: DEFAULT_LOCAL_TTL,
            shared_ttl: DEFAULT_SHARED_TTL,
        }
    }

    #[must_use]
    pub fn with_ttls(mut self, local_ttl: Duration, shared_ttl: Duration) -> Self {
        self.local_ttl = local_ttl;
        self.shared_ttl = shared_ttl;
        self
    }

    /// Union of the permissions granted by `role_names`.
    ///
    /// Deterministic in the *set* of names: ordering and duplicates do not
    /// affect the result. A failed lookup fails the whole call; no partial
    /// set is ever returned for an authorization decision.
    ///
    /// # Errors
    /// `Unexpected` when the underlying store lookup fails.
    pub async fn resolve(&self, role_names: &[String]) -> AuthResult<BTreeSet<String>> {
        let canonical: BTreeSet<&str> = role_names.iter().map(String::as_str).collect();

        let mut resolved = BTreeSet::new();
        for role_name in canonical {
            let store = self.store.clone();
            let owned_name = role_name.to_string();
            let permissions: Vec<String> = self
                .cache
                .get_or_create_tagged(
                    &role_cache_key(role_name),
                    PERMISSIONS_TAG,
                    self.local_ttl,
                    self.shared_ttl,
                    move || async move { store.permissions_for_role(&owned_name).await },
                )
                .await?;
            resolved.extend(permissions);
        }
        Ok(resolved)
    }

    /// The single authorization check consumed by protected endpoints.
    pub async fn has_permission(
        &self,
        role_names: &[String],
        permission: &str,
    ) -> AuthResult<bool> {
        Ok(self.resolve(role_names).await?.contains(permission))
    }

    /// Evict the cached permission subset of one role.
    pub async fn invalidate_role(&self, role_name: &str) {
        self.cache.remove(&role_cache_key(role_name)).await;
    }

    /// Evict every cached permission entry on this instance.
    pub async fn invalidate_all(&self) {
        self.cache.remove_by_tag(PERMISSIONS_TAG).await;
    }
}

/// Administrative role edits. Every mutation validates permission names
/// against the catalog and evicts the affected cache entries.
pub struct RoleAdmin {
    store: Arc<dyn CredentialStore>,
    resolver: Arc<PermissionResolver>,
}

impl RoleAdmin {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, resolver: Arc<PermissionResolver>) -> Self {
        Self { store, resolver }
    }

    /// # Errors
    /// `Validation` for an empty name or a permission outside the catalog,
    /// `Conflict` when the role already exists.
    pub async fn create_role(
        &self,
        name: &str,
        description: &str,
        permissions: &[String],
    ) -> AuthResult<Role> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::Validation("role name is required".to_string()));
        }
        validate_permissions(permissions)?;
        if self.store.find_role(name).await?.is_some() {
            return Err(AuthError::Conflict(format!("role already exists: {name}")));
        }
        let role = self
            .store
            .create_role(name, description, permissions)
            .await?;
        self.resolver.invalidate_role(name).await;
        info!("created role {name}");
        Ok(role)
    }

    /// # Errors
    /// `NotFound` when the role does not exist, `Validation` for a
    /// permission outside the catalog.
    pub async fn update_role(
        &self,
        name: &str,
        description: Option<&str>,
        permissions: Option<&[String]>,
    ) -> AuthResult<()> {
        if let Some(permissions) = permissions {
            validate_permissions(permissions)?;
        }
        if !self.store.update_role(name, description, permissions).await? {
            return Err(AuthError::NotFound(format!("role: {name}")));
        }
        self.resolver.invalidate_role(name).await;
        Ok(())
    }

    /// # Errors
    /// `NotFound` when the role does not exist.
    pub async fn delete_role(&self, name: &str) -> AuthResult<()> {
        if !self.store.delete_role(name).await? {
            return Err(AuthError::NotFound(format!("role: {name}")));
        }
        // Deleting a role also changes every member's effective role set.
        self.resolver.invalidate_all().await;
        info!("deleted role {name}");
        Ok(())
    }
}

fn validate_permissions(permissions: &[String]) -> AuthResult<()> {
    for permission in permissions {
        if !catalog::contains(permission) {
            return Err(AuthError::Validation(format!(
                "unknown permission: {permission}"
            )));
        }
    }
    Ok(())
}
