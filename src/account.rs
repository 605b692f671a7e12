//! Account mutation service
//!
//! Applies validated partial updates to a user's extended profile data
//! as single atomic units. Every operation is a read-modify-write
//! against one row: the current persisted state is loaded immediately
//! before mutating, so fields an operation does not touch are never
//! silently discarded, and the store's stamp-guarded update rejects the
//! losing writer in a concurrent race.

use crate::config::IdentityConfig;
use crate::entities::{ProfileImage, User, new_stamp, normalize};
use crate::error::{IdentityError, ValidationErrors};
use crate::store::DynStore;

pub struct AccountService {
    store: DynStore,
    config: IdentityConfig,
}

impl AccountService {
    /// Build a service over `store` with explicit policy configuration.
    #[must_use]
    pub fn new(store: DynStore, config: IdentityConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Construct a user record with the configured username-change
    /// allowance. The caller persists it via the store.
    #[must_use]
    pub fn new_user(&self, user_name: &str, email: Option<&str>) -> User {
        User::new(user_name, email).with_change_limit(self.config.default_username_change_limit)
    }

    /// Reload the persisted record behind `user` and check the handle
    /// is still current.
    async fn load_current(&self, user: &User) -> Result<User, IdentityError> {
        let current =
            self.store
                .find_user_by_id(&user.id)
                .await?
                .ok_or_else(|| IdentityError::NotFound {
                    kind: "user",
                    id: user.id.clone(),
                })?;
        if current.concurrency_stamp != user.concurrency_stamp {
            return Err(IdentityError::Concurrency {
                kind: "user",
                id: user.id.clone(),
            });
        }
        Ok(current)
    }

    /// Assign first name, last name, and phone number, then persist the
    /// record atomically. No phone-number format validation happens
    /// here; that is the caller's responsibility.
    ///
    /// On success `user` reflects the committed state, including the
    /// store-issued concurrency stamp.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Concurrency`] if the record changed
    /// since the handle was loaded, [`IdentityError::NotFound`] if it
    /// was deleted.
    pub async fn set_profile_fields(
        &self,
        user: &mut User,
        first_name: Option<&str>,
        last_name: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<(), IdentityError> {
        let mut current = self.load_current(user).await?;
        current.profile.first_name = first_name.map(str::to_owned);
        current.profile.last_name = last_name.map(str::to_owned);
        current.phone_number = phone_number.map(str::to_owned);
        self.store.update_user(&mut current).await?;
        *user = current;
        Ok(())
    }

    /// Assign the profile-image payload, then persist atomically.
    ///
    /// The payload is stored verbatim; no size or format validation is
    /// performed, so callers are expected to bound payloads themselves.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::set_profile_fields`].
    pub async fn set_profile_image(
        &self,
        user: &mut User,
        image: Option<ProfileImage>,
    ) -> Result<(), IdentityError> {
        let mut current = self.load_current(user).await?;
        current.profile.picture = image;
        self.store.update_user(&mut current).await?;
        *user = current;
        Ok(())
    }

    /// Change the username, consuming one unit of the user's
    /// username-change allowance.
    ///
    /// Changing the username regenerates the security stamp so existing
    /// sessions are invalidated. A rename to the current name is a
    /// no-op and does not consume the allowance.
    ///
    /// # Errors
    ///
    /// Returns a field-level [`IdentityError::Validation`] when the new
    /// name is empty or the allowance is exhausted, and the usual
    /// concurrency/not-found failures from the persist step. A name
    /// already taken surfaces as a unique-constraint violation.
    pub async fn set_username(
        &self,
        user: &mut User,
        new_username: &str,
    ) -> Result<(), IdentityError> {
        let trimmed = new_username.trim();
        let mut errors = ValidationErrors::new();
        if trimmed.is_empty() {
            errors.push("userName", "user name must not be empty");
        }

        let mut current = self.load_current(user).await?;
        if current.profile.username_change_limit <= 0 {
            errors.push("userName", "user name change limit exhausted");
        }
        if !errors.is_empty() {
            return Err(errors.into());
        }
        if trimmed == current.user_name {
            *user = current;
            return Ok(());
        }

        current.user_name = trimmed.to_string();
        current.normalized_user_name = normalize(trimmed);
        current.profile.username_change_limit -= 1;
        // credential-affecting change: invalidate existing sessions
        current.security_stamp = new_stamp();
        self.store.update_user(&mut current).await?;
        *user = current;
        Ok(())
    }
}
