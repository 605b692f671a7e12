//! Persisted identity entities
//!
//! The user record mirrors the shape the storage backends persist under
//! the `Identity` namespace: the core account fields plus an embedded
//! [`UserProfile`] carrying the application-specific extensions. Child
//! records (roles, claims, logins, tokens) reference their parent by id
//! and are removed by the storage layer's cascade rules.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of times a user may change their username.
pub const DEFAULT_USERNAME_CHANGE_LIMIT: i32 = 10;

/// Produce the canonical uppercased form of a username, email, or role
/// name used for case-insensitive uniqueness checks and lookups.
#[must_use]
pub fn normalize(value: &str) -> String {
    value.trim().to_uppercase()
}

/// Generate a fresh opaque stamp (security or concurrency).
#[must_use]
pub fn new_stamp() -> String {
    Uuid::new_v4().to_string()
}

/// Application-specific profile extensions to the core account record.
///
/// Kept as a separate structure embedded in [`User`] so profile storage
/// stays decoupled from the base account contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub picture: Option<ProfileImage>,
    /// Remaining username changes. Decremented by the account service,
    /// which refuses further changes at zero.
    pub username_change_limit: i32,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            first_name: None,
            last_name: None,
            picture: None,
            username_change_limit: DEFAULT_USERNAME_CHANGE_LIMIT,
        }
    }
}

/// A base64-encoded raster image payload.
///
/// Stored and returned verbatim; no size or format validation happens
/// in this layer, so callers are expected to bound payloads themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileImage(String);

impl ProfileImage {
    /// Wrap an already base64-encoded payload, unchecked.
    #[must_use]
    pub fn from_base64(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Encode raw image bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(BASE64.encode(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode back to raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid base64.
    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.0)
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// A user account record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub user_name: String,
    pub normalized_user_name: String,
    pub email: Option<String>,
    pub normalized_email: Option<String>,
    pub email_confirmed: bool,
    /// Opaque password digest; hashing is the auth collaborator's job.
    pub password_hash: Option<String>,
    pub phone_number: Option<String>,
    pub phone_number_confirmed: bool,
    pub two_factor_enabled: bool,
    pub lockout_end: Option<DateTime<Utc>>,
    pub lockout_enabled: bool,
    pub access_failed_count: i32,
    /// Invalidated when credentials change, so existing sessions die.
    pub security_stamp: String,
    /// Regenerated by the store on every successful update; a stale
    /// stamp makes the next update fail with a concurrency conflict.
    pub concurrency_stamp: String,
    pub profile: UserProfile,
}

impl User {
    /// Create a new account record with fresh id and stamps.
    #[must_use]
    pub fn new(user_name: &str, email: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_name: user_name.to_string(),
            normalized_user_name: normalize(user_name),
            email: email.map(str::to_owned),
            normalized_email: email.map(normalize),
            email_confirmed: false,
            password_hash: None,
            phone_number: None,
            phone_number_confirmed: false,
            two_factor_enabled: false,
            lockout_end: None,
            lockout_enabled: false,
            access_failed_count: 0,
            security_stamp: new_stamp(),
            concurrency_stamp: new_stamp(),
            profile: UserProfile::default(),
        }
    }

    /// Override the default username-change allowance.
    #[must_use]
    pub fn with_change_limit(mut self, limit: i32) -> Self {
        self.profile.username_change_limit = limit;
        self
    }
}

/// A role record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
}

impl Role {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            normalized_name: normalize(name),
        }
    }
}

/// Many-to-many join between users and roles, keyed by both ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: String,
    pub role_id: String,
}

/// A claim attached to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaim {
    pub id: i64,
    pub user_id: String,
    pub claim_type: String,
    pub claim_value: Option<String>,
}

/// A claim attached to every member of a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleClaim {
    pub id: i64,
    pub role_id: String,
    pub claim_type: String,
    pub claim_value: Option<String>,
}

/// An external-provider credential linked to a user, keyed by
/// (provider, provider key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLogin {
    pub login_provider: String,
    pub provider_key: String,
    pub provider_display_name: Option<String>,
    pub user_id: String,
}

/// An auxiliary token scoped to a user, keyed by
/// (user, provider, name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserToken {
    pub user_id: String,
    pub login_provider: String,
    pub name: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize("  ada@example.com "), "ADA@EXAMPLE.COM");
        assert_eq!(normalize("Grace"), "GRACE");
    }

    #[test]
    fn new_user_defaults() {
        let user = User::new("ada", Some("ada@example.com"));
        assert_eq!(user.normalized_user_name, "ADA");
        assert_eq!(user.normalized_email.as_deref(), Some("ADA@EXAMPLE.COM"));
        assert_eq!(
            user.profile.username_change_limit,
            DEFAULT_USERNAME_CHANGE_LIMIT
        );
        assert!(!user.security_stamp.is_empty());
        assert_ne!(user.security_stamp, user.concurrency_stamp);
    }

    #[test]
    fn new_user_without_email() {
        let user = User::new("grace", None);
        assert!(user.email.is_none());
        assert!(user.normalized_email.is_none());
    }

    #[test]
    fn profile_image_round_trips_bytes() {
        let bytes = [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a];
        let image = ProfileImage::from_bytes(&bytes);
        assert_eq!(image.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn profile_image_keeps_payload_verbatim() {
        let image = ProfileImage::from_base64("iVBORw0KGgo=");
        assert_eq!(image.as_str(), "iVBORw0KGgo=");
    }

    #[test]
    fn user_record_round_trips_through_json() {
        let mut user = User::new("ada", Some("ada@example.com"));
        user.profile.first_name = Some("Ada".into());
        user.profile.picture = Some(ProfileImage::from_bytes(b"png"));

        let json = serde_json::to_string(&user).unwrap();
        let decoded: User = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, user);
    }

    #[test]
    fn with_change_limit_overrides_default() {
        let user = User::new("ada", None).with_change_limit(3);
        assert_eq!(user.profile.username_change_limit, 3);
    }
}
