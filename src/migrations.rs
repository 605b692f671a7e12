//! Versioned, reversible schema migrations.
//!
//! Each migration is a named structural step from one schema version to
//! the next with a defined inverse. Applying a step forward and then
//! backward must reproduce the original structure, except for data in
//! explicitly dropped columns.

use crate::prelude::Result;
use anyhow::{anyhow, bail};
use async_trait::async_trait;

/// Name recorded for the initial (pre-migration) schema version.
pub const BASELINE_NAME: &str = "baseline";

/// A single reversible migration step.
///
/// Steps must be transactional: a failure mid-step rolls the whole step
/// back, leaving the schema at its pre-step version.
#[async_trait]
pub trait Migration: Send + Sync {
    /// The target version this migration upgrades to.
    fn version(&self) -> u32;

    /// The step's stable identity (timestamped name). Preserved across
    /// forward and backward application.
    fn name(&self) -> &str;

    /// A human-readable description of what this migration does.
    fn description(&self) -> &str;

    /// Apply this migration, taking the schema from `version() - 1` to
    /// `version()`.
    async fn apply(&self) -> Result<()>;

    /// Revert this migration, taking the schema from `version()` back
    /// to `version() - 1`. Data in columns the forward step added is
    /// lost; everything else must match the pre-step structure.
    async fn revert(&self) -> Result<()>;
}

/// Tracks the current schema version and drives migration steps in
/// either direction.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Get the current schema version stored in the backend.
    async fn current_version(&self) -> Result<u32>;

    /// Record `version` (and the name of the step that produced it) as
    /// the current schema version.
    async fn set_version(&self, version: u32, name: &str) -> Result<()>;

    /// All available migrations, ordered by target version.
    fn migrations(&self) -> Vec<Box<dyn Migration>>;

    /// Check if this is a fresh database that needs initialization.
    ///
    /// Attempts to read the version table; if that fails, we assume a
    /// fresh database.
    async fn is_fresh_database(&self) -> bool {
        self.current_version().await.is_err()
    }

    /// The highest version any available migration reaches, or 1 (the
    /// baseline) when no migrations exist.
    fn latest_version(&self) -> u32 {
        self.migrations()
            .iter()
            .map(|m| m.version())
            .max()
            .unwrap_or(1)
    }

    /// Move the schema to `target`, applying pending steps forward or
    /// reverting applied steps backward as needed.
    ///
    /// # Errors
    ///
    /// Fails if the target is outside the known version range, if the
    /// stored version is newer than this build understands, or if any
    /// step fails (in which case that step is rolled back and the run
    /// aborts at the last fully applied version).
    async fn migrate_to(&self, target: u32) -> Result<()> {
        let current = self.current_version().await?;
        let migrations = self.migrations();
        let latest = self.latest_version();

        if target < 1 || target > latest {
            bail!("target schema version {target} is outside the known range 1..={latest}");
        }
        if current > latest {
            bail!(
                "stored schema version {current} is higher than latest available version {latest}; \
                 this usually means an older build is running against a newer database"
            );
        }
        if current == target {
            tracing::info!("database schema already at version {current}");
            return Ok(());
        }

        if target > current {
            tracing::info!("migrating schema forward from version {current} to {target}");
            for migration in &migrations {
                let version = migration.version();
                if version <= current || version > target {
                    continue;
                }
                tracing::info!(
                    "applying migration {} to version {}: {}",
                    migration.name(),
                    version,
                    migration.description()
                );
                migration
                    .apply()
                    .await
                    .map_err(|e| anyhow!("failed to apply {}: {e}", migration.name()))?;
                self.set_version(version, migration.name()).await?;
            }
        } else {
            tracing::info!("reverting schema from version {current} back to {target}");
            for migration in migrations.iter().rev() {
                let version = migration.version();
                if version > current || version <= target {
                    continue;
                }
                tracing::info!(
                    "reverting migration {} from version {}",
                    migration.name(),
                    version
                );
                migration
                    .revert()
                    .await
                    .map_err(|e| anyhow!("failed to revert {}: {e}", migration.name()))?;
                let prior = migrations
                    .iter()
                    .find(|m| m.version() == version - 1)
                    .map_or(BASELINE_NAME, |m| m.name());
                self.set_version(version - 1, prior).await?;
            }
        }

        tracing::info!("schema migration completed at version {target}");
        Ok(())
    }

    /// Apply all pending migrations to reach the latest version.
    async fn migrate_to_latest(&self) -> Result<()> {
        self.migrate_to(self.latest_version()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct MockMigration {
        version: u32,
        name: String,
        should_fail: Arc<AtomicBool>,
        apply_count: Arc<AtomicU32>,
        revert_count: Arc<AtomicU32>,
    }

    impl MockMigration {
        fn new(version: u32) -> Self {
            Self {
                version,
                name: format!("step_v{version}"),
                should_fail: Arc::new(AtomicBool::new(false)),
                apply_count: Arc::new(AtomicU32::new(0)),
                revert_count: Arc::new(AtomicU32::new(0)),
            }
        }

        fn with_failure(self) -> Self {
            self.should_fail.store(true, Ordering::SeqCst);
            self
        }
    }

    #[async_trait]
    impl Migration for MockMigration {
        fn version(&self) -> u32 {
            self.version
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "mock migration"
        }

        async fn apply(&self) -> Result<()> {
            self.apply_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                bail!("mock migration failure");
            }
            Ok(())
        }

        async fn revert(&self) -> Result<()> {
            self.revert_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                bail!("mock migration failure");
            }
            Ok(())
        }
    }

    struct MockMigrator {
        version: Arc<AtomicU32>,
        last_name: std::sync::Mutex<String>,
        can_read_version: Arc<AtomicBool>,
        steps: Vec<u32>,
        failing: Vec<u32>,
    }

    impl MockMigrator {
        fn new(initial: u32, steps: Vec<u32>) -> Self {
            Self {
                version: Arc::new(AtomicU32::new(initial)),
                last_name: std::sync::Mutex::new(BASELINE_NAME.to_string()),
                can_read_version: Arc::new(AtomicBool::new(true)),
                steps,
                failing: Vec::new(),
            }
        }

        fn with_fresh_database(self) -> Self {
            self.can_read_version.store(false, Ordering::SeqCst);
            self
        }

        fn with_failing_step(mut self, version: u32) -> Self {
            self.failing.push(version);
            self
        }
    }

    #[async_trait]
    impl Migrator for MockMigrator {
        async fn current_version(&self) -> Result<u32> {
            if self.can_read_version.load(Ordering::SeqCst) {
                Ok(self.version.load(Ordering::SeqCst))
            } else {
                bail!("cannot read version table");
            }
        }

        async fn set_version(&self, version: u32, name: &str) -> Result<()> {
            self.version.store(version, Ordering::SeqCst);
            *self.last_name.lock().unwrap() = name.to_string();
            self.can_read_version.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn migrations(&self) -> Vec<Box<dyn Migration>> {
            self.steps
                .iter()
                .map(|&v| {
                    let m = MockMigration::new(v);
                    let m = if self.failing.contains(&v) {
                        m.with_failure()
                    } else {
                        m
                    };
                    Box::new(m) as Box<dyn Migration>
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn no_migrations_is_a_noop() {
        let migrator = MockMigrator::new(1, vec![]);
        migrator.migrate_to_latest().await.unwrap();
        assert_eq!(migrator.current_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn up_to_date_is_a_noop() {
        let migrator = MockMigrator::new(3, vec![2, 3]);
        migrator.migrate_to_latest().await.unwrap();
        assert_eq!(migrator.current_version().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn fresh_database_detection() {
        let migrator = MockMigrator::new(0, vec![]).with_fresh_database();
        assert!(migrator.is_fresh_database().await);

        migrator.set_version(1, BASELINE_NAME).await.unwrap();
        assert!(!migrator.is_fresh_database().await);
    }

    #[tokio::test]
    async fn applies_pending_steps_in_order() {
        let migrator = MockMigrator::new(1, vec![2, 3]);
        migrator.migrate_to_latest().await.unwrap();
        assert_eq!(migrator.current_version().await.unwrap(), 3);
        assert_eq!(*migrator.last_name.lock().unwrap(), "step_v3");
    }

    #[tokio::test]
    async fn reverts_back_to_target() {
        let migrator = MockMigrator::new(3, vec![2, 3]);
        migrator.migrate_to(1).await.unwrap();
        assert_eq!(migrator.current_version().await.unwrap(), 1);
        assert_eq!(*migrator.last_name.lock().unwrap(), BASELINE_NAME);
    }

    #[tokio::test]
    async fn partial_revert_records_prior_step_name() {
        let migrator = MockMigrator::new(3, vec![2, 3]);
        migrator.migrate_to(2).await.unwrap();
        assert_eq!(migrator.current_version().await.unwrap(), 2);
        assert_eq!(*migrator.last_name.lock().unwrap(), "step_v2");
    }

    #[tokio::test]
    async fn failing_step_aborts_the_run() {
        let migrator = MockMigrator::new(1, vec![2, 3]).with_failing_step(3);
        let err = migrator.migrate_to_latest().await.unwrap_err();
        assert!(err.to_string().contains("step_v3"));
        // the run stopped at the last fully applied version
        assert_eq!(migrator.current_version().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stored_version_newer_than_build_is_rejected() {
        let migrator = MockMigrator::new(9, vec![2]);
        let err = migrator.migrate_to_latest().await.unwrap_err();
        assert!(err.to_string().contains("stored schema version 9"));
    }

    #[tokio::test]
    async fn target_outside_range_is_rejected() {
        let migrator = MockMigrator::new(1, vec![2]);
        assert!(migrator.migrate_to(0).await.is_err());
        assert!(migrator.migrate_to(5).await.is_err());
    }
}
