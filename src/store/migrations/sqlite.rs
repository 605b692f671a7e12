use super::{CURRENT_MIGRATION_NAME, PROFILE_COLUMNS, TABLE_RENAMES};
use crate::migrations::{Migration, Migrator};
use crate::prelude::Result;
use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

const CREATE_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

/// Version 2: rename the legacy `AspNet*` tables into the `Identity`
/// namespace and add the extended profile columns to the user table.
///
/// Both directions run in a single transaction, so a mid-step failure
/// leaves the schema at its pre-step version. Renames carry all rows
/// and their relationships along unchanged.
struct RenameIdentityTables {
    pool: SqlitePool,
}

impl RenameIdentityTables {
    fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Migration for RenameIdentityTables {
    fn version(&self) -> u32 {
        2
    }

    fn name(&self) -> &str {
        CURRENT_MIGRATION_NAME
    }

    fn description(&self) -> &str {
        "relocate identity tables into the Identity namespace and add profile columns"
    }

    async fn apply(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (old, new) in TABLE_RENAMES {
            sqlx::query(&format!(r#"ALTER TABLE {old} RENAME TO "{new}""#))
                .execute(&mut *tx)
                .await?;
        }
        for (column, ddl) in PROFILE_COLUMNS {
            sqlx::query(&format!(
                r#"ALTER TABLE "Identity.User" ADD COLUMN {column} {ddl}"#
            ))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn revert(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        // data in the profile columns is lost here, which is the
        // documented cost of going backward
        for (column, _) in PROFILE_COLUMNS {
            sqlx::query(&format!(
                r#"ALTER TABLE "Identity.User" DROP COLUMN {column}"#
            ))
            .execute(&mut *tx)
            .await?;
        }
        for (old, new) in TABLE_RENAMES {
            sqlx::query(&format!(r#"ALTER TABLE "{new}" RENAME TO {old}"#))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// SQLite migrator for the identity schema.
pub struct SqliteIdentityMigrator {
    pool: SqlitePool,
}

impl SqliteIdentityMigrator {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Migrator for SqliteIdentityMigrator {
    async fn current_version(&self) -> Result<u32> {
        let row = sqlx::query("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(Some(row)) => {
                let version: i64 = row.try_get("version")?;
                Ok(u32::try_from(version)?)
            }
            // table exists but holds no row: legacy baseline
            Ok(None) => Ok(1),
            Err(_) => Err(anyhow!("version table does not exist")),
        }
    }

    async fn set_version(&self, version: u32, name: &str) -> Result<()> {
        sqlx::query(CREATE_VERSION_TABLE)
            .execute(&self.pool)
            .await?;

        sqlx::query("DELETE FROM schema_version")
            .execute(&self.pool)
            .await?;

        sqlx::query("INSERT INTO schema_version (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(i64::from(version))
            .bind(name)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn migrations(&self) -> Vec<Box<dyn Migration>> {
        vec![Box::new(RenameIdentityTables::new(self.pool.clone()))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::BASELINE_NAME;
    use tempfile::NamedTempFile;

    async fn temp_pool(file: &NamedTempFile) -> SqlitePool {
        let uri = format!("sqlite://{}", file.path().display());
        SqlitePool::connect(&uri).await.unwrap()
    }

    #[tokio::test]
    async fn fresh_database_has_no_version() {
        let file = NamedTempFile::new().unwrap();
        let pool = temp_pool(&file).await;
        let migrator = SqliteIdentityMigrator::new(pool);

        assert!(migrator.is_fresh_database().await);

        migrator.set_version(1, BASELINE_NAME).await.unwrap();
        assert!(!migrator.is_fresh_database().await);
        assert_eq!(migrator.current_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_version_records_step_name() {
        let file = NamedTempFile::new().unwrap();
        let pool = temp_pool(&file).await;
        let migrator = SqliteIdentityMigrator::new(pool.clone());

        migrator
            .set_version(2, CURRENT_MIGRATION_NAME)
            .await
            .unwrap();

        let row = sqlx::query("SELECT version, name FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        let version: i64 = row.try_get("version").unwrap();
        let name: String = row.try_get("name").unwrap();
        assert_eq!(version, 2);
        assert_eq!(name, CURRENT_MIGRATION_NAME);
    }

    #[tokio::test]
    async fn empty_version_table_reads_as_baseline() {
        let file = NamedTempFile::new().unwrap();
        let pool = temp_pool(&file).await;
        sqlx::query(CREATE_VERSION_TABLE)
            .execute(&pool)
            .await
            .unwrap();

        let migrator = SqliteIdentityMigrator::new(pool);
        assert_eq!(migrator.current_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rename_step_is_listed() {
        let file = NamedTempFile::new().unwrap();
        let pool = temp_pool(&file).await;
        let migrator = SqliteIdentityMigrator::new(pool);

        let migrations = migrator.migrations();
        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].version(), 2);
        assert_eq!(migrations[0].name(), CURRENT_MIGRATION_NAME);
    }
}
