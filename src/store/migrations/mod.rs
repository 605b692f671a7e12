//! Backend-specific migrators for the identity schema.
//!
//! Version 1 is the legacy layout (`AspNetUsers`, `AspNetRoles`, ...,
//! no namespace, no extended profile columns). Version 2 relocates the
//! tables into the `Identity` namespace and adds the profile columns.

pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

/// The schema version fresh databases are created at.
pub const LATEST_VERSION: u32 = 2;

/// Name of the rename-and-relocate step, stable across forward and
/// backward application.
pub const CURRENT_MIGRATION_NAME: &str = "20231204175041_rename_identity_tables";

/// (legacy name, relocated name) for every table, parents first.
pub(crate) const TABLE_RENAMES: [(&str, &str); 7] = [
    ("AspNetUsers", "Identity.User"),
    ("AspNetRoles", "Identity.Role"),
    ("AspNetUserRoles", "Identity.UserRoles"),
    ("AspNetUserClaims", "Identity.UserClaims"),
    ("AspNetUserLogins", "Identity.UserLogins"),
    ("AspNetRoleClaims", "Identity.RoleClaims"),
    ("AspNetUserTokens", "Identity.UserTokens"),
];

/// Profile columns added to the user table in version 2, with the DDL
/// fragment used for the forward step.
pub(crate) const PROFILE_COLUMNS: [(&str, &str); 4] = [
    ("FirstName", "TEXT"),
    ("LastName", "TEXT"),
    ("ProfilePictureBase64", "TEXT"),
    ("UsernameChangeLimit", "INTEGER NOT NULL DEFAULT 10"),
];
