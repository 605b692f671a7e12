//! Domain error types for the identity data layer
//!
//! Constraint and concurrency failures are surfaced to callers as
//! structured values and never retried internally. Migration failures
//! abort the whole run and leave the schema at its pre-step version.

use thiserror::Error;

/// Top-level error type returned by the store and the account service.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("constraint violation: {0}")]
    Constraint(#[from] ConstraintViolation),

    #[error("migration failed: {0}")]
    Migration(#[from] MigrationError),

    #[error("concurrent update detected for {kind} {id}")]
    Concurrency { kind: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

/// The class of storage constraint an operation would have violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintKind::Unique => write!(f, "unique"),
            ConstraintKind::ForeignKey => write!(f, "foreign key"),
            ConstraintKind::NotNull => write!(f, "not null"),
        }
    }
}

/// A uniqueness, referential-integrity, or nullability violation
/// reported by the storage layer. Never partially applied.
#[derive(Error, Debug)]
#[error("{kind} constraint: {detail}")]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    /// Backend message naming the violated constraint.
    pub detail: String,
}

/// A structural migration step failed. The step's transaction is rolled
/// back, so the schema stays at its pre-step version.
#[derive(Error, Debug)]
#[error("migration {name} (version {version}): {source}")]
pub struct MigrationError {
    pub name: String,
    pub version: u32,
    #[source]
    pub source: anyhow::Error,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Field-level failures for domain rules not enforced by storage
/// (e.g. an exhausted username-change limit).
#[derive(Debug, Default)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl std::error::Error for ValidationErrors {}

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for err in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", err.field, err.message)?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<sqlx::Error> for IdentityError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            let kind = match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
                sqlx::error::ErrorKind::ForeignKeyViolation => Some(ConstraintKind::ForeignKey),
                sqlx::error::ErrorKind::NotNullViolation => Some(ConstraintKind::NotNull),
                _ => None,
            };
            if let Some(kind) = kind {
                return IdentityError::Constraint(ConstraintViolation {
                    kind,
                    detail: db.message().to_string(),
                });
            }
        }
        IdentityError::Database(err)
    }
}

impl IdentityError {
    /// True when the failure is a lost-update conflict the caller can
    /// resolve by reloading and retrying.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, IdentityError::Concurrency { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, IdentityError::NotFound { .. })
    }

    /// True when the failure is a uniqueness violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            IdentityError::Constraint(ConstraintViolation {
                kind: ConstraintKind::Unique,
                ..
            })
        )
    }
}
