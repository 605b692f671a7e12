use super::{CURRENT_MIGRATION_NAME, PROFILE_COLUMNS, TABLE_RENAMES};
use crate::migrations::{Migration, Migrator};
use crate::prelude::Result;
use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

const CREATE_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version BIGINT PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

/// Split a namespaced table name (`Identity.User`) into schema and
/// bare table.
fn split_namespaced(name: &str) -> Result<(&str, &str)> {
    name.split_once('.')
        .ok_or_else(|| anyhow!("table name {name} is not namespaced"))
}

/// Version 2 on PostgreSQL: move the legacy `AspNet*` tables into a
/// real `Identity` schema and add the profile columns.
struct RenameIdentityTables {
    pool: PgPool,
}

impl RenameIdentityTables {
    fn new(pool: PgPool) -> Self {
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
        "relocate identity tables into the Identity schema and add profile columns"
    }

    async fn apply(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(r#"CREATE SCHEMA IF NOT EXISTS "Identity""#)
            .execute(&mut *tx)
            .await?;
        for (old, new) in TABLE_RENAMES {
            let (schema, table) = split_namespaced(new)?;
            sqlx::query(&format!(r#"ALTER TABLE "{old}" RENAME TO "{table}""#))
                .execute(&mut *tx)
                .await?;
            sqlx::query(&format!(r#"ALTER TABLE "{table}" SET SCHEMA "{schema}""#))
                .execute(&mut *tx)
                .await?;
        }
        for (column, ddl) in PROFILE_COLUMNS {
            sqlx::query(&format!(
                r#"ALTER TABLE "Identity"."User" ADD COLUMN "{column}" {ddl}"#
            ))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn revert(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (column, _) in PROFILE_COLUMNS {
            sqlx::query(&format!(
                r#"ALTER TABLE "Identity"."User" DROP COLUMN "{column}""#
            ))
            .execute(&mut *tx)
            .await?;
        }
        for (old, new) in TABLE_RENAMES {
            let (schema, table) = split_namespaced(new)?;
            sqlx::query(&format!(
                r#"ALTER TABLE "{schema}"."{table}" SET SCHEMA public"#
            ))
            .execute(&mut *tx)
            .await?;
            sqlx::query(&format!(r#"ALTER TABLE "{table}" RENAME TO "{old}""#))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(r#"DROP SCHEMA IF EXISTS "Identity""#)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// PostgreSQL migrator for the identity schema.
pub struct PostgresIdentityMigrator {
    pool: PgPool,
}

impl PostgresIdentityMigrator {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Migrator for PostgresIdentityMigrator {
    async fn current_version(&self) -> Result<u32> {
        let row = sqlx::query("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(Some(row)) => {
                let version: i64 = row.try_get("version")?;
                Ok(u32::try_from(version)?)
            }
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

        sqlx::query("INSERT INTO schema_version (version, name, applied_at) VALUES ($1, $2, $3)")
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
