//! Identity configuration
//!
//! Policy values the surrounding framework would otherwise read from
//! ambient global state. The account service takes an [`IdentityConfig`]
//! explicitly at construction time.

use crate::entities::DEFAULT_USERNAME_CHANGE_LIMIT;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;

fn default_min_password_length() -> usize {
    8
}

fn default_require_digit() -> bool {
    true
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lockout_duration_secs() -> u64 {
    300
}

fn default_username_change_limit() -> i32 {
    DEFAULT_USERNAME_CHANGE_LIMIT
}

/// Password policy carried for the external auth collaborator. This
/// layer never hashes or verifies passwords itself.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordPolicy {
    #[serde(default = "default_min_password_length")]
    pub min_length: usize,
    #[serde(default = "default_require_digit")]
    pub require_digit: bool,
    #[serde(default)]
    pub require_uppercase: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: default_min_password_length(),
            require_digit: default_require_digit(),
            require_uppercase: false,
        }
    }
}

/// Lockout thresholds applied by the auth collaborator when it bumps
/// `access_failed_count` and sets `lockout_end`.
#[derive(Debug, Clone, Deserialize)]
pub struct LockoutPolicy {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    #[serde(default = "default_lockout_duration_secs")]
    pub lockout_duration_secs: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lockout_duration_secs: default_lockout_duration_secs(),
        }
    }
}

/// Process-wide identity policy values.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub password: PasswordPolicy,
    #[serde(default)]
    pub lockout: LockoutPolicy,
    /// Username-change allowance granted to newly provisioned users.
    #[serde(default = "default_username_change_limit")]
    pub default_username_change_limit: i32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            password: PasswordPolicy::default(),
            lockout: LockoutPolicy::default(),
            default_username_change_limit: default_username_change_limit(),
        }
    }
}

impl IdentityConfig {
    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or a policy value
    /// is out of range.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_username_change_limit < 0 {
            return Err(ConfigError::Invalid(
                "default_username_change_limit must be non-negative".into(),
            ));
        }
        if self.password.min_length == 0 {
            return Err(ConfigError::Invalid(
                "password.min_length must be at least 1".into(),
            ));
        }
        if self.lockout.max_failed_attempts == 0 {
            return Err(ConfigError::Invalid(
                "lockout.max_failed_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_declared_policy() {
        let config = IdentityConfig::default();
        assert_eq!(config.default_username_change_limit, 10);
        assert_eq!(config.password.min_length, 8);
        assert_eq!(config.lockout.max_failed_attempts, 5);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = IdentityConfig::from_toml_str(
            r#"
            default_username_change_limit = 3

            [lockout]
            max_failed_attempts = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.default_username_change_limit, 3);
        assert_eq!(config.lockout.max_failed_attempts, 10);
        // untouched sections keep their defaults
        assert_eq!(config.password.min_length, 8);
        assert_eq!(config.lockout.lockout_duration_secs, 300);
    }

    #[test]
    fn rejects_negative_change_limit() {
        let err = IdentityConfig::from_toml_str("default_username_change_limit = -1").unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn rejects_zero_password_length() {
        let err = IdentityConfig::from_toml_str("[password]\nmin_length = 0").unwrap_err();
        assert!(err.to_string().contains("min_length"));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = IdentityConfig::from_file("/nonexistent/identity.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
