use super::IdentityStore;
use super::migrations::sqlite::SqliteIdentityMigrator;
use super::migrations::{CURRENT_MIGRATION_NAME, LATEST_VERSION};
use crate::entities::{Role, RoleClaim, User, UserClaim, UserLogin, UserProfile, UserToken};
use crate::entities::{ProfileImage, new_stamp};
use crate::error::{IdentityError, MigrationError};
use crate::migrations::Migrator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

// SQLite has no native schemas, so the Identity namespace is encoded in
// the quoted table identifier ("Identity.User" is a single name).
const CREATE_USER_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS "Identity.User" (
        Id TEXT PRIMARY KEY,
        UserName TEXT NOT NULL UNIQUE,
        NormalizedUserName TEXT NOT NULL UNIQUE,
        Email TEXT UNIQUE,
        NormalizedEmail TEXT UNIQUE,
        EmailConfirmed INTEGER NOT NULL DEFAULT 0,
        PasswordHash TEXT,
        PhoneNumber TEXT,
        PhoneNumberConfirmed INTEGER NOT NULL DEFAULT 0,
        TwoFactorEnabled INTEGER NOT NULL DEFAULT 0,
        LockoutEnd TEXT,
        LockoutEnabled INTEGER NOT NULL DEFAULT 0,
        AccessFailedCount INTEGER NOT NULL DEFAULT 0,
        SecurityStamp TEXT NOT NULL,
        ConcurrencyStamp TEXT NOT NULL,
        FirstName TEXT,
        LastName TEXT,
        ProfilePictureBase64 TEXT,
        UsernameChangeLimit INTEGER NOT NULL DEFAULT 10
    )"#;

const CREATE_ROLE_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS "Identity.Role" (
        Id TEXT PRIMARY KEY,
        Name TEXT NOT NULL UNIQUE,
        NormalizedName TEXT NOT NULL UNIQUE
    )"#;

const CREATE_USER_ROLES_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS "Identity.UserRoles" (
        UserId TEXT NOT NULL REFERENCES "Identity.User"(Id) ON DELETE CASCADE,
        RoleId TEXT NOT NULL REFERENCES "Identity.Role"(Id) ON DELETE CASCADE,
        PRIMARY KEY (UserId, RoleId)
    )"#;

const CREATE_USER_CLAIMS_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS "Identity.UserClaims" (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        UserId TEXT NOT NULL REFERENCES "Identity.User"(Id) ON DELETE CASCADE,
        ClaimType TEXT NOT NULL,
        ClaimValue TEXT
    )"#;

const CREATE_USER_LOGINS_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS "Identity.UserLogins" (
        LoginProvider TEXT NOT NULL,
        ProviderKey TEXT NOT NULL,
        ProviderDisplayName TEXT,
        UserId TEXT NOT NULL REFERENCES "Identity.User"(Id) ON DELETE CASCADE,
        PRIMARY KEY (LoginProvider, ProviderKey)
    )"#;

const CREATE_ROLE_CLAIMS_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS "Identity.RoleClaims" (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        RoleId TEXT NOT NULL REFERENCES "Identity.Role"(Id) ON DELETE CASCADE,
        ClaimType TEXT NOT NULL,
        ClaimValue TEXT
    )"#;

const CREATE_USER_TOKENS_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS "Identity.UserTokens" (
        UserId TEXT NOT NULL REFERENCES "Identity.User"(Id) ON DELETE CASCADE,
        LoginProvider TEXT NOT NULL,
        Name TEXT NOT NULL,
        Value TEXT NOT NULL,
        PRIMARY KEY (UserId, LoginProvider, Name)
    )"#;

const INSERT_USER: &str = r#"INSERT INTO "Identity.User" (
        Id, UserName, NormalizedUserName, Email, NormalizedEmail, EmailConfirmed,
        PasswordHash, PhoneNumber, PhoneNumberConfirmed, TwoFactorEnabled,
        LockoutEnd, LockoutEnabled, AccessFailedCount, SecurityStamp,
        ConcurrencyStamp, FirstName, LastName, ProfilePictureBase64, UsernameChangeLimit
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#;

const UPDATE_USER: &str = r#"UPDATE "Identity.User" SET
        UserName = ?, NormalizedUserName = ?, Email = ?, NormalizedEmail = ?,
        EmailConfirmed = ?, PasswordHash = ?, PhoneNumber = ?,
        PhoneNumberConfirmed = ?, TwoFactorEnabled = ?, LockoutEnd = ?,
        LockoutEnabled = ?, AccessFailedCount = ?, SecurityStamp = ?,
        ConcurrencyStamp = ?, FirstName = ?, LastName = ?,
        ProfilePictureBase64 = ?, UsernameChangeLimit = ?
    WHERE Id = ? AND ConcurrencyStamp = ?"#;

/// Declare the full identity schema. Safe to re-run: every statement is
/// `CREATE TABLE IF NOT EXISTS` and re-declaration produces the same
/// structure.
///
/// # Errors
///
/// Returns an error if any DDL statement fails.
pub async fn define_schema(pool: &SqlitePool) -> Result<(), IdentityError> {
    for ddl in [
        CREATE_USER_TABLE,
        CREATE_ROLE_TABLE,
        CREATE_USER_ROLES_TABLE,
        CREATE_USER_CLAIMS_TABLE,
        CREATE_USER_LOGINS_TABLE,
        CREATE_ROLE_CLAIMS_TABLE,
        CREATE_USER_TOKENS_TABLE,
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

impl SqliteIdentityStore {
    /// Open (and if necessary create) an identity database.
    ///
    /// A fresh database is initialized with the current schema and
    /// stamped at the latest version; an existing one has any pending
    /// migrations applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, schema definition, or a
    /// migration fails.
    pub async fn new(uri: &str) -> Result<Self, IdentityError> {
        let options = SqliteConnectOptions::from_str(uri)
            .map_err(IdentityError::Database)?
            .create_if_missing(true)
            // cascade deletes depend on FK enforcement
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(IdentityError::Database)?;

        let migrator = SqliteIdentityMigrator::new(pool.clone());
        if migrator.is_fresh_database().await {
            tracing::info!("initializing fresh identity database at {uri}");
            define_schema(&pool).await?;
            migrator
                .set_version(LATEST_VERSION, CURRENT_MIGRATION_NAME)
                .await
                .map_err(|e| migration_error(LATEST_VERSION, e))?;
        } else {
            migrator
                .migrate_to_latest()
                .await
                .map_err(|e| migration_error(LATEST_VERSION, e))?;
        }

        Ok(Self { pool })
    }

    /// Re-declare the schema; a no-op on an initialized database.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub async fn define_schema(&self) -> Result<(), IdentityError> {
        define_schema(&self.pool).await
    }

    async fn user_exists(&self, id: &str) -> Result<bool, IdentityError> {
        let row = sqlx::query(r#"SELECT 1 FROM "Identity.User" WHERE Id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn fetch_user(&self, sql: &str, bind: &str) -> Result<Option<User>, IdentityError> {
        let row = sqlx::query(sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }
}

fn migration_error(version: u32, source: anyhow::Error) -> IdentityError {
    IdentityError::Migration(MigrationError {
        name: CURRENT_MIGRATION_NAME.to_string(),
        version,
        source,
    })
}

fn parse_timestamp(text: Option<String>) -> Result<Option<DateTime<Utc>>, IdentityError> {
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| IdentityError::Database(sqlx::Error::Decode(Box::new(e))))
    })
    .transpose()
}

fn user_from_row(row: &SqliteRow) -> Result<User, IdentityError> {
    let lockout_end = parse_timestamp(row.try_get("LockoutEnd")?)?;
    let picture: Option<String> = row.try_get("ProfilePictureBase64")?;
    Ok(User {
        id: row.try_get("Id")?,
        user_name: row.try_get("UserName")?,
        normalized_user_name: row.try_get("NormalizedUserName")?,
        email: row.try_get("Email")?,
        normalized_email: row.try_get("NormalizedEmail")?,
        email_confirmed: row.try_get("EmailConfirmed")?,
        password_hash: row.try_get("PasswordHash")?,
        phone_number: row.try_get("PhoneNumber")?,
        phone_number_confirmed: row.try_get("PhoneNumberConfirmed")?,
        two_factor_enabled: row.try_get("TwoFactorEnabled")?,
        lockout_end,
        lockout_enabled: row.try_get("LockoutEnabled")?,
        access_failed_count: row.try_get("AccessFailedCount")?,
        security_stamp: row.try_get("SecurityStamp")?,
        concurrency_stamp: row.try_get("ConcurrencyStamp")?,
        profile: UserProfile {
            first_name: row.try_get("FirstName")?,
            last_name: row.try_get("LastName")?,
            picture: picture.map(ProfileImage::from_base64),
            username_change_limit: row.try_get("UsernameChangeLimit")?,
        },
    })
}

fn role_from_row(row: &SqliteRow) -> Result<Role, IdentityError> {
    Ok(Role {
        id: row.try_get("Id")?,
        name: row.try_get("Name")?,
        normalized_name: row.try_get("NormalizedName")?,
    })
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn create_user(&self, user: &User) -> Result<(), IdentityError> {
        sqlx::query(INSERT_USER)
            .bind(&user.id)
            .bind(&user.user_name)
            .bind(&user.normalized_user_name)
            .bind(&user.email)
            .bind(&user.normalized_email)
            .bind(user.email_confirmed)
            .bind(&user.password_hash)
            .bind(&user.phone_number)
            .bind(user.phone_number_confirmed)
            .bind(user.two_factor_enabled)
            .bind(user.lockout_end.map(|t| t.to_rfc3339()))
            .bind(user.lockout_enabled)
            .bind(user.access_failed_count)
            .bind(&user.security_stamp)
            .bind(&user.concurrency_stamp)
            .bind(&user.profile.first_name)
            .bind(&user.profile.last_name)
            .bind(user.profile.picture.as_ref().map(ProfileImage::as_str))
            .bind(user.profile.username_change_limit)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, IdentityError> {
        self.fetch_user(r#"SELECT * FROM "Identity.User" WHERE Id = ?"#, id)
            .await
    }

    async fn find_user_by_name(&self, normalized: &str) -> Result<Option<User>, IdentityError> {
        self.fetch_user(
            r#"SELECT * FROM "Identity.User" WHERE NormalizedUserName = ?"#,
            normalized,
        )
        .await
    }

    async fn find_user_by_email(&self, normalized: &str) -> Result<Option<User>, IdentityError> {
        self.fetch_user(
            r#"SELECT * FROM "Identity.User" WHERE NormalizedEmail = ?"#,
            normalized,
        )
        .await
    }

    async fn update_user(&self, user: &mut User) -> Result<(), IdentityError> {
        // stamp-guarded atomic update; the store mints the new stamp
        let next_stamp = new_stamp();
        let result = sqlx::query(UPDATE_USER)
            .bind(&user.user_name)
            .bind(&user.normalized_user_name)
            .bind(&user.email)
            .bind(&user.normalized_email)
            .bind(user.email_confirmed)
            .bind(&user.password_hash)
            .bind(&user.phone_number)
            .bind(user.phone_number_confirmed)
            .bind(user.two_factor_enabled)
            .bind(user.lockout_end.map(|t| t.to_rfc3339()))
            .bind(user.lockout_enabled)
            .bind(user.access_failed_count)
            .bind(&user.security_stamp)
            .bind(&next_stamp)
            .bind(&user.profile.first_name)
            .bind(&user.profile.last_name)
            .bind(user.profile.picture.as_ref().map(ProfileImage::as_str))
            .bind(user.profile.username_change_limit)
            .bind(&user.id)
            .bind(&user.concurrency_stamp)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            if self.user_exists(&user.id).await? {
                return Err(IdentityError::Concurrency {
                    kind: "user",
                    id: user.id.clone(),
                });
            }
            return Err(IdentityError::NotFound {
                kind: "user",
                id: user.id.clone(),
            });
        }

        user.concurrency_stamp = next_stamp;
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> Result<(), IdentityError> {
        let result = sqlx::query(r#"DELETE FROM "Identity.User" WHERE Id = ?"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound {
                kind: "user",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn create_role(&self, role: &Role) -> Result<(), IdentityError> {
        sqlx::query(r#"INSERT INTO "Identity.Role" (Id, Name, NormalizedName) VALUES (?, ?, ?)"#)
            .bind(&role.id)
            .bind(&role.name)
            .bind(&role.normalized_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_role_by_id(&self, id: &str) -> Result<Option<Role>, IdentityError> {
        let row = sqlx::query(r#"SELECT * FROM "Identity.Role" WHERE Id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn find_role_by_name(&self, normalized: &str) -> Result<Option<Role>, IdentityError> {
        let row = sqlx::query(r#"SELECT * FROM "Identity.Role" WHERE NormalizedName = ?"#)
            .bind(normalized)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn delete_role(&self, id: &str) -> Result<(), IdentityError> {
        let result = sqlx::query(r#"DELETE FROM "Identity.Role" WHERE Id = ?"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound {
                kind: "role",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn add_to_role(&self, user_id: &str, role_id: &str) -> Result<(), IdentityError> {
        sqlx::query(r#"INSERT INTO "Identity.UserRoles" (UserId, RoleId) VALUES (?, ?)"#)
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_from_role(&self, user_id: &str, role_id: &str) -> Result<(), IdentityError> {
        sqlx::query(r#"DELETE FROM "Identity.UserRoles" WHERE UserId = ? AND RoleId = ?"#)
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn user_roles(&self, user_id: &str) -> Result<Vec<Role>, IdentityError> {
        let rows = sqlx::query(
            r#"SELECT r.* FROM "Identity.Role" r
               JOIN "Identity.UserRoles" ur ON ur.RoleId = r.Id
               WHERE ur.UserId = ?
               ORDER BY r.NormalizedName"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(role_from_row).collect()
    }

    async fn add_user_claim(
        &self,
        user_id: &str,
        claim_type: &str,
        claim_value: Option<&str>,
    ) -> Result<UserClaim, IdentityError> {
        let result = sqlx::query(
            r#"INSERT INTO "Identity.UserClaims" (UserId, ClaimType, ClaimValue) VALUES (?, ?, ?)"#,
        )
        .bind(user_id)
        .bind(claim_type)
        .bind(claim_value)
        .execute(&self.pool)
        .await?;
        Ok(UserClaim {
            id: result.last_insert_rowid(),
            user_id: user_id.to_string(),
            claim_type: claim_type.to_string(),
            claim_value: claim_value.map(str::to_owned),
        })
    }

    async fn user_claims(&self, user_id: &str) -> Result<Vec<UserClaim>, IdentityError> {
        let rows =
            sqlx::query(r#"SELECT * FROM "Identity.UserClaims" WHERE UserId = ? ORDER BY Id"#)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| {
                Ok(UserClaim {
                    id: row.try_get("Id")?,
                    user_id: row.try_get("UserId")?,
                    claim_type: row.try_get("ClaimType")?,
                    claim_value: row.try_get("ClaimValue")?,
                })
            })
            .collect()
    }

    async fn add_role_claim(
        &self,
        role_id: &str,
        claim_type: &str,
        claim_value: Option<&str>,
    ) -> Result<RoleClaim, IdentityError> {
        let result = sqlx::query(
            r#"INSERT INTO "Identity.RoleClaims" (RoleId, ClaimType, ClaimValue) VALUES (?, ?, ?)"#,
        )
        .bind(role_id)
        .bind(claim_type)
        .bind(claim_value)
        .execute(&self.pool)
        .await?;
        Ok(RoleClaim {
            id: result.last_insert_rowid(),
            role_id: role_id.to_string(),
            claim_type: claim_type.to_string(),
            claim_value: claim_value.map(str::to_owned),
        })
    }

    async fn role_claims(&self, role_id: &str) -> Result<Vec<RoleClaim>, IdentityError> {
        let rows =
            sqlx::query(r#"SELECT * FROM "Identity.RoleClaims" WHERE RoleId = ? ORDER BY Id"#)
                .bind(role_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| {
                Ok(RoleClaim {
                    id: row.try_get("Id")?,
                    role_id: row.try_get("RoleId")?,
                    claim_type: row.try_get("ClaimType")?,
                    claim_value: row.try_get("ClaimValue")?,
                })
            })
            .collect()
    }

    async fn add_user_login(&self, login: &UserLogin) -> Result<(), IdentityError> {
        sqlx::query(
            r#"INSERT INTO "Identity.UserLogins"
               (LoginProvider, ProviderKey, ProviderDisplayName, UserId)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(&login.login_provider)
        .bind(&login.provider_key)
        .bind(&login.provider_display_name)
        .bind(&login.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user_logins(&self, user_id: &str) -> Result<Vec<UserLogin>, IdentityError> {
        let rows = sqlx::query(
            r#"SELECT * FROM "Identity.UserLogins" WHERE UserId = ? ORDER BY LoginProvider"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(UserLogin {
                    login_provider: row.try_get("LoginProvider")?,
                    provider_key: row.try_get("ProviderKey")?,
                    provider_display_name: row.try_get("ProviderDisplayName")?,
                    user_id: row.try_get("UserId")?,
                })
            })
            .collect()
    }

    async fn find_user_by_login(
        &self,
        login_provider: &str,
        provider_key: &str,
    ) -> Result<Option<User>, IdentityError> {
        let row = sqlx::query(
            r#"SELECT u.* FROM "Identity.User" u
               JOIN "Identity.UserLogins" l ON l.UserId = u.Id
               WHERE l.LoginProvider = ? AND l.ProviderKey = ?"#,
        )
        .bind(login_provider)
        .bind(provider_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn set_user_token(&self, token: &UserToken) -> Result<(), IdentityError> {
        sqlx::query(
            r#"INSERT INTO "Identity.UserTokens" (UserId, LoginProvider, Name, Value)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(UserId, LoginProvider, Name) DO UPDATE SET Value = excluded.Value"#,
        )
        .bind(&token.user_id)
        .bind(&token.login_provider)
        .bind(&token.name)
        .bind(&token.value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user_token(
        &self,
        user_id: &str,
        login_provider: &str,
        name: &str,
    ) -> Result<Option<UserToken>, IdentityError> {
        let row = sqlx::query(
            r#"SELECT * FROM "Identity.UserTokens"
               WHERE UserId = ? AND LoginProvider = ? AND Name = ?"#,
        )
        .bind(user_id)
        .bind(login_provider)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(UserToken {
                user_id: row.try_get("UserId")?,
                login_provider: row.try_get("LoginProvider")?,
                name: row.try_get("Name")?,
                value: row.try_get("Value")?,
            })
        })
        .transpose()
    }

    async fn remove_user_token(
        &self,
        user_id: &str,
        login_provider: &str,
        name: &str,
    ) -> Result<(), IdentityError> {
        sqlx::query(
            r#"DELETE FROM "Identity.UserTokens"
               WHERE UserId = ? AND LoginProvider = ? AND Name = ?"#,
        )
        .bind(user_id)
        .bind(login_provider)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
