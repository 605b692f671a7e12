//! Persistence contract for the identity schema.
//!
//! The store owns all storage I/O: schema definition, migration, row
//! CRUD, cascade deletes, and the stamp-guarded atomic update that
//! serializes concurrent writers to the same user row.

use crate::entities::{Role, RoleClaim, User, UserClaim, UserLogin, UserToken};
use crate::error::IdentityError;
use async_trait::async_trait;
use std::sync::Arc;

pub mod migrations;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a new user row.
    async fn create_user(&self, user: &User) -> Result<(), IdentityError>;

    /// Load the full user record, including extended profile fields and
    /// the current concurrency stamp.
    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, IdentityError>;

    /// Look up a user by normalized username.
    async fn find_user_by_name(&self, normalized: &str) -> Result<Option<User>, IdentityError>;

    /// Look up a user by normalized email.
    async fn find_user_by_email(&self, normalized: &str) -> Result<Option<User>, IdentityError>;

    /// Atomically persist the full record, guarded by the record's
    /// concurrency stamp. On success the store mints a fresh stamp and
    /// writes it back into `user`; a stale stamp yields
    /// [`IdentityError::Concurrency`], a vanished row
    /// [`IdentityError::NotFound`].
    async fn update_user(&self, user: &mut User) -> Result<(), IdentityError>;

    /// Delete a user; all of its roles, claims, logins, and tokens go
    /// with it (storage-enforced cascade).
    async fn delete_user(&self, id: &str) -> Result<(), IdentityError>;

    async fn create_role(&self, role: &Role) -> Result<(), IdentityError>;

    async fn find_role_by_id(&self, id: &str) -> Result<Option<Role>, IdentityError>;

    async fn find_role_by_name(&self, normalized: &str) -> Result<Option<Role>, IdentityError>;

    /// Delete a role; cascades its memberships and role claims.
    async fn delete_role(&self, id: &str) -> Result<(), IdentityError>;

    async fn add_to_role(&self, user_id: &str, role_id: &str) -> Result<(), IdentityError>;

    async fn remove_from_role(&self, user_id: &str, role_id: &str) -> Result<(), IdentityError>;

    /// Roles the user is a member of.
    async fn user_roles(&self, user_id: &str) -> Result<Vec<Role>, IdentityError>;

    async fn add_user_claim(
        &self,
        user_id: &str,
        claim_type: &str,
        claim_value: Option<&str>,
    ) -> Result<UserClaim, IdentityError>;

    async fn user_claims(&self, user_id: &str) -> Result<Vec<UserClaim>, IdentityError>;

    async fn add_role_claim(
        &self,
        role_id: &str,
        claim_type: &str,
        claim_value: Option<&str>,
    ) -> Result<RoleClaim, IdentityError>;

    async fn role_claims(&self, role_id: &str) -> Result<Vec<RoleClaim>, IdentityError>;

    async fn add_user_login(&self, login: &UserLogin) -> Result<(), IdentityError>;

    async fn user_logins(&self, user_id: &str) -> Result<Vec<UserLogin>, IdentityError>;

    /// Resolve the owner of an external-provider credential.
    async fn find_user_by_login(
        &self,
        login_provider: &str,
        provider_key: &str,
    ) -> Result<Option<User>, IdentityError>;

    /// Store or replace a token value for (user, provider, name).
    async fn set_user_token(&self, token: &UserToken) -> Result<(), IdentityError>;

    async fn get_user_token(
        &self,
        user_id: &str,
        login_provider: &str,
        name: &str,
    ) -> Result<Option<UserToken>, IdentityError>;

    async fn remove_user_token(
        &self,
        user_id: &str,
        login_provider: &str,
        name: &str,
    ) -> Result<(), IdentityError>;
}

pub type DynStore = Arc<dyn IdentityStore>;

/// Create an identity store from a connection URI.
///
/// # Errors
///
/// Returns an error if the URI scheme is unknown, the connection fails,
/// or schema definition/migration fails.
pub async fn open(uri: &str) -> Result<DynStore, IdentityError> {
    if uri.starts_with("sqlite:") {
        Ok(Arc::new(sqlite::SqliteIdentityStore::new(uri).await?))
    } else if uri.starts_with("postgres:") {
        #[cfg(feature = "postgres")]
        {
            Ok(Arc::new(postgres::PostgresIdentityStore::new(uri).await?))
        }
        #[cfg(not(feature = "postgres"))]
        {
            Err(IdentityError::Config(crate::error::ConfigError::Invalid(
                "postgres backend not enabled".into(),
            )))
        }
    } else {
        Err(IdentityError::Config(crate::error::ConfigError::Invalid(
            format!("unknown identity store backend: {uri}"),
        )))
    }
}
