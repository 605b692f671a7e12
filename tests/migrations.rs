//! Forward/backward application of the rename-and-relocate migration.

use idhaven::IdentityStore;
use idhaven::migrations::{BASELINE_NAME, Migrator};
use idhaven::store::migrations::sqlite::SqliteIdentityMigrator;
use idhaven::store::sqlite::SqliteIdentityStore;
use sqlx::{Row, SqlitePool};
use tempfile::NamedTempFile;

/// Legacy (version 1) layout: AspNet* names, no namespace, no extended
/// profile columns.
const LEGACY_SCHEMA: [&str; 7] = [
    "CREATE TABLE AspNetUsers (
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
        ConcurrencyStamp TEXT NOT NULL
    )",
    "CREATE TABLE AspNetRoles (
        Id TEXT PRIMARY KEY,
        Name TEXT NOT NULL UNIQUE,
        NormalizedName TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE AspNetUserRoles (
        UserId TEXT NOT NULL REFERENCES AspNetUsers(Id) ON DELETE CASCADE,
        RoleId TEXT NOT NULL REFERENCES AspNetRoles(Id) ON DELETE CASCADE,
        PRIMARY KEY (UserId, RoleId)
    )",
    "CREATE TABLE AspNetUserClaims (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        UserId TEXT NOT NULL REFERENCES AspNetUsers(Id) ON DELETE CASCADE,
        ClaimType TEXT NOT NULL,
        ClaimValue TEXT
    )",
    "CREATE TABLE AspNetUserLogins (
        LoginProvider TEXT NOT NULL,
        ProviderKey TEXT NOT NULL,
        ProviderDisplayName TEXT,
        UserId TEXT NOT NULL REFERENCES AspNetUsers(Id) ON DELETE CASCADE,
        PRIMARY KEY (LoginProvider, ProviderKey)
    )",
    "CREATE TABLE AspNetRoleClaims (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        RoleId TEXT NOT NULL REFERENCES AspNetRoles(Id) ON DELETE CASCADE,
        ClaimType TEXT NOT NULL,
        ClaimValue TEXT
    )",
    "CREATE TABLE AspNetUserTokens (
        UserId TEXT NOT NULL REFERENCES AspNetUsers(Id) ON DELETE CASCADE,
        LoginProvider TEXT NOT NULL,
        Name TEXT NOT NULL,
        Value TEXT NOT NULL,
        PRIMARY KEY (UserId, LoginProvider, Name)
    )",
];

async fn seed_legacy_database(pool: &SqlitePool) {
    for ddl in LEGACY_SCHEMA {
        sqlx::query(ddl).execute(pool).await.unwrap();
    }
    sqlx::query(
        "INSERT INTO AspNetUsers
         (Id, UserName, NormalizedUserName, Email, NormalizedEmail, SecurityStamp, ConcurrencyStamp)
         VALUES ('u1', 'ada', 'ADA', 'ada@example.com', 'ADA@EXAMPLE.COM', 'sec-1', 'conc-1')",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO AspNetRoles (Id, Name, NormalizedName) VALUES ('r1', 'admin', 'ADMIN')")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO AspNetUserRoles (UserId, RoleId) VALUES ('u1', 'r1')")
        .execute(pool)
        .await
        .unwrap();
}

async fn table_names(pool: &SqlitePool) -> Vec<String> {
    sqlx::query("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect()
}

async fn column_names(pool: &SqlitePool, table: &str) -> Vec<String> {
    sqlx::query("SELECT name FROM pragma_table_info(?) ORDER BY cid")
        .bind(table)
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect()
}

#[tokio::test]
async fn rename_migration_round_trips() {
    let file = NamedTempFile::new().unwrap();
    let uri = format!("sqlite://{}", file.path().display());
    let pool = SqlitePool::connect(&uri).await.unwrap();

    seed_legacy_database(&pool).await;
    let migrator = SqliteIdentityMigrator::new(pool.clone());
    migrator.set_version(1, BASELINE_NAME).await.unwrap();

    // forward: relocate into the Identity namespace
    migrator.migrate_to_latest().await.unwrap();
    assert_eq!(migrator.current_version().await.unwrap(), 2);

    let tables = table_names(&pool).await;
    assert!(tables.contains(&"Identity.User".to_string()));
    assert!(tables.contains(&"Identity.Role".to_string()));
    assert!(tables.contains(&"Identity.UserTokens".to_string()));
    assert!(!tables.iter().any(|t| t.starts_with("AspNet")));

    let columns = column_names(&pool, "Identity.User").await;
    for added in [
        "FirstName",
        "LastName",
        "ProfilePictureBase64",
        "UsernameChangeLimit",
    ] {
        assert!(columns.contains(&added.to_string()), "missing {added}");
    }

    // existing rows survive the rename and pick up the declared default
    let row = sqlx::query(
        r#"SELECT UserName, UsernameChangeLimit FROM "Identity.User" WHERE Id = 'u1'"#,
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.get::<String, _>("UserName"), "ada");
    assert_eq!(row.get::<i32, _>("UsernameChangeLimit"), 10);

    // relationships carried across the rename
    let memberships: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM "Identity.UserRoles" ur
           JOIN "Identity.User" u ON u.Id = ur.UserId
           WHERE u.UserName = 'ada'"#,
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(memberships, 1);

    // backward: the inverse reproduces the legacy structure
    migrator.migrate_to(1).await.unwrap();
    assert_eq!(migrator.current_version().await.unwrap(), 1);

    let tables = table_names(&pool).await;
    assert!(tables.contains(&"AspNetUsers".to_string()));
    assert!(tables.contains(&"AspNetRoles".to_string()));
    assert!(!tables.iter().any(|t| t.starts_with("Identity.")));

    let columns = column_names(&pool, "AspNetUsers").await;
    for dropped in [
        "FirstName",
        "LastName",
        "ProfilePictureBase64",
        "UsernameChangeLimit",
    ] {
        assert!(!columns.contains(&dropped.to_string()), "{dropped} kept");
    }

    // retained columns keep their data
    let name: String = sqlx::query_scalar("SELECT UserName FROM AspNetUsers WHERE Id = 'u1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(name, "ada");
    let memberships: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM AspNetUserRoles")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(memberships, 1);
}

#[tokio::test]
async fn step_identity_survives_both_directions() {
    let file = NamedTempFile::new().unwrap();
    let uri = format!("sqlite://{}", file.path().display());
    let pool = SqlitePool::connect(&uri).await.unwrap();

    seed_legacy_database(&pool).await;
    let migrator = SqliteIdentityMigrator::new(pool.clone());
    migrator.set_version(1, BASELINE_NAME).await.unwrap();

    migrator.migrate_to_latest().await.unwrap();
    let name: String = sqlx::query_scalar("SELECT name FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(name, "20231204175041_rename_identity_tables");

    migrator.migrate_to(1).await.unwrap();
    let name: String = sqlx::query_scalar("SELECT name FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(name, BASELINE_NAME);
}

#[tokio::test]
async fn failed_step_leaves_no_partial_change() {
    let file = NamedTempFile::new().unwrap();
    let uri = format!("sqlite://{}", file.path().display());
    let pool = SqlitePool::connect(&uri).await.unwrap();

    // seed a broken legacy layout: the last table is missing, so the
    // rename step fails partway through
    for ddl in &LEGACY_SCHEMA[..6] {
        sqlx::query(ddl).execute(&pool).await.unwrap();
    }
    let migrator = SqliteIdentityMigrator::new(pool.clone());
    migrator.set_version(1, BASELINE_NAME).await.unwrap();

    assert!(migrator.migrate_to_latest().await.is_err());

    // the whole step rolled back: earlier renames were undone and the
    // version did not advance
    let tables = table_names(&pool).await;
    assert!(tables.contains(&"AspNetUsers".to_string()));
    assert!(!tables.iter().any(|t| t.starts_with("Identity.")));
    assert_eq!(migrator.current_version().await.unwrap(), 1);
}

#[tokio::test]
async fn store_opens_and_migrates_a_legacy_database() {
    let file = NamedTempFile::new().unwrap();
    let uri = format!("sqlite://{}", file.path().display());
    let pool = SqlitePool::connect(&uri).await.unwrap();

    seed_legacy_database(&pool).await;
    SqliteIdentityMigrator::new(pool.clone())
        .set_version(1, BASELINE_NAME)
        .await
        .unwrap();
    pool.close().await;

    // opening the store applies the pending migration
    let store = SqliteIdentityStore::new(&uri).await.unwrap();
    let user = store.find_user_by_id("u1").await.unwrap().unwrap();
    assert_eq!(user.user_name, "ada");
    assert_eq!(user.profile.username_change_limit, 10);
    assert!(user.profile.first_name.is_none());
}

#[tokio::test]
async fn fresh_store_starts_at_the_latest_version() {
    let file = NamedTempFile::new().unwrap();
    let uri = format!("sqlite://{}", file.path().display());

    let _store = SqliteIdentityStore::new(&uri).await.unwrap();

    let pool = SqlitePool::connect(&uri).await.unwrap();
    let migrator = SqliteIdentityMigrator::new(pool.clone());
    assert_eq!(migrator.current_version().await.unwrap(), 2);

    let tables = table_names(&pool).await;
    assert!(tables.contains(&"Identity.User".to_string()));
    assert!(!tables.iter().any(|t| t.starts_with("AspNet")));
}
