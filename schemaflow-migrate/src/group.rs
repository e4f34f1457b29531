//! Grouping of pending migrations into transactional units and their
//! execution.

use std::time::Instant;

use schemaflow_sql::{Dialect, SqlExecutor};
use tracing::{debug, error, info, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::history::SchemaHistory;
use crate::info::MigrationInfo;
use crate::migration::{HistoryEntry, MigrationType, ResolvedMigration};
use crate::version::MigrationVersion;

/// Migrations executed together in one mode.
#[derive(Debug, Clone)]
pub struct ExecutionGroup<'a> {
    /// Migrations in execution order.
    pub migrations: Vec<&'a MigrationInfo>,
    /// Whether the group runs in a single transaction.
    pub transactional: bool,
}

/// A migration that was applied successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedMigration {
    /// Version, `None` for repeatable migrations.
    pub version: Option<MigrationVersion>,
    /// Description.
    pub description: String,
    /// Script name.
    pub script: String,
    /// Migration kind.
    pub migration_type: MigrationType,
    /// Execution time in milliseconds.
    pub execution_time_ms: i32,
}

/// Where a group runs and who it is recorded as.
#[derive(Clone, Copy)]
pub struct GroupTarget<'a> {
    /// Session the statements run on.
    pub connection: &'a dyn SqlExecutor,
    /// History table receiving the rows.
    pub history: &'a dyn SchemaHistory,
    /// Capabilities of the database.
    pub dialect: &'a Dialect,
    /// Recorded as `installed_by`.
    pub installed_by: &'a str,
    /// Schema name for log messages.
    pub schema: &'a str,
}

/// Splits pending migrations into groups and runs them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionGrouper {
    group: bool,
    mixed: bool,
}

impl ExecutionGrouper {
    /// Create a grouper.
    ///
    /// With `group`, all pending migrations run in one unit. With `mixed`,
    /// transactional and non-transactional migrations may be combined; the
    /// run then degrades to one unit per migration.
    pub fn new(group: bool, mixed: bool) -> Self {
        Self { group, mixed }
    }

    /// Plan the execution units for `pending`, which must already be in
    /// execution order.
    pub fn plan<'a>(&self, pending: &[&'a MigrationInfo]) -> MigrateResult<Vec<ExecutionGroup<'a>>> {
        let Some(first) = pending.first() else {
            return Ok(Vec::new());
        };

        let singles = || {
            pending
                .iter()
                .map(|info| ExecutionGroup {
                    migrations: vec![*info],
                    transactional: info.can_execute_in_transaction(),
                })
                .collect::<Vec<_>>()
        };

        if !self.group {
            return Ok(singles());
        }

        let transactional = first.can_execute_in_transaction();
        let uniform = pending
            .iter()
            .all(|info| info.can_execute_in_transaction() == transactional);
        if uniform {
            return Ok(vec![ExecutionGroup {
                migrations: pending.to_vec(),
                transactional,
            }]);
        }

        if !self.mixed {
            let offender = pending
                .iter()
                .find(|info| info.can_execute_in_transaction() != transactional)
                .unwrap_or(first);
            return Err(MigrationError::MixedGroup(offender.script().to_string()));
        }

        debug!(
            migrations = pending.len(),
            "Mixed transactional modes in group, executing migrations one at a time"
        );
        Ok(singles())
    }

    /// Execute one group, appending a history row per migration.
    pub async fn execute_group(
        &self,
        group: &ExecutionGroup<'_>,
        target: GroupTarget<'_>,
    ) -> MigrateResult<Vec<ExecutedMigration>> {
        if group.transactional {
            self.execute_in_transaction(group, target).await
        } else {
            let mut executed = Vec::with_capacity(group.migrations.len());
            for info in &group.migrations {
                let resolved = resolved_of(info)?;
                let started = Instant::now();
                match run_migration(info, resolved, target).await {
                    Ok(()) => {
                        executed.push(record_success(resolved, target, elapsed_ms(started)).await?);
                    }
                    Err(err) => {
                        record_failure(resolved, target, elapsed_ms(started)).await?;
                        return Err(err);
                    }
                }
            }
            Ok(executed)
        }
    }

    async fn execute_in_transaction(
        &self,
        group: &ExecutionGroup<'_>,
        target: GroupTarget<'_>,
    ) -> MigrateResult<Vec<ExecutedMigration>> {
        target.connection.begin().await?;

        // rows are written once the transaction has committed
        let mut completed: Vec<(&ResolvedMigration, i32)> = Vec::with_capacity(group.migrations.len());
        for info in &group.migrations {
            let resolved = resolved_of(info)?;
            let started = Instant::now();
            if let Err(err) = run_migration(info, resolved, target).await {
                if let Err(rollback_err) = target.connection.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                // without DDL transactions the earlier migrations stay applied
                if !target.dialect.supports_ddl_transactions {
                    for (done, execution_time_ms) in &completed {
                        record_success(done, target, *execution_time_ms).await?;
                    }
                    record_failure(resolved, target, elapsed_ms(started)).await?;
                }
                return Err(err);
            }
            completed.push((resolved, elapsed_ms(started)));
        }

        target.connection.commit().await?;

        let mut executed = Vec::with_capacity(completed.len());
        for (resolved, execution_time_ms) in completed {
            executed.push(record_success(resolved, target, execution_time_ms).await?);
        }
        Ok(executed)
    }
}

fn resolved_of<'a>(info: &'a MigrationInfo) -> MigrateResult<&'a ResolvedMigration> {
    info.resolved().ok_or_else(|| {
        MigrationError::other(format!(
            "Cannot execute {}: no resolved migration",
            info.script()
        ))
    })
}

fn elapsed_ms(started: Instant) -> i32 {
    i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX)
}

async fn run_migration(
    info: &MigrationInfo,
    resolved: &ResolvedMigration,
    target: GroupTarget<'_>,
) -> MigrateResult<()> {
    match &resolved.version {
        Some(version) => info!(
            schema = target.schema,
            version = %version,
            description = %resolved.description,
            out_of_order = info.context().out_of_order,
            "Migrating schema to version {} - {}",
            version,
            resolved.description
        ),
        None => info!(
            schema = target.schema,
            description = %resolved.description,
            "Migrating schema with repeatable migration {}",
            resolved.description
        ),
    }

    resolved
        .executor
        .execute(target.connection)
        .await
        .map_err(|err| {
            error!(script = %resolved.script, error = %err, "Migration failed");
            MigrationError::migration_failed(resolved.script.clone(), err)
        })
}

async fn record_success(
    resolved: &ResolvedMigration,
    target: GroupTarget<'_>,
    execution_time_ms: i32,
) -> MigrateResult<ExecutedMigration> {
    target
        .history
        .append_applied(HistoryEntry::for_migration(
            resolved,
            target.installed_by,
            execution_time_ms,
            true,
        ))
        .await?;
    debug!(script = %resolved.script, execution_time_ms, "Recorded migration");
    Ok(ExecutedMigration {
        version: resolved.version.clone(),
        description: resolved.description.clone(),
        script: resolved.script.clone(),
        migration_type: resolved.migration_type,
        execution_time_ms,
    })
}

async fn record_failure(
    resolved: &ResolvedMigration,
    target: GroupTarget<'_>,
    execution_time_ms: i32,
) -> MigrateResult<()> {
    target
        .history
        .append_applied(HistoryEntry::for_migration(
            resolved,
            target.installed_by,
            execution_time_ms,
            false,
        ))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemorySchemaHistory, RecordingExecutor, resolved_sql};
    use crate::service::{InfoOptions, MigrationInfoService};
    use pretty_assertions::assert_eq;

    fn service(scripts: &[(&str, &str)]) -> MigrationInfoService {
        let resolved = scripts
            .iter()
            .map(|(version, sql)| resolved_sql(version, sql, &Dialect::postgresql()))
            .collect();
        MigrationInfoService::refresh(resolved, vec![], &InfoOptions::new()).unwrap()
    }

    fn target<'a>(
        connection: &'a RecordingExecutor,
        history: &'a InMemorySchemaHistory,
        dialect: &'a Dialect,
    ) -> GroupTarget<'a> {
        GroupTarget {
            connection,
            history,
            dialect,
            installed_by: "tester",
            schema: "public",
        }
    }

    #[test]
    fn test_plan_without_grouping() {
        let service = service(&[("1", "CREATE TABLE a (id INT);"), ("2", "VACUUM;")]);
        let pending = service.pending();
        let groups = ExecutionGrouper::new(false, false).plan(&pending).unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].transactional);
        assert!(!groups[1].transactional);
    }

    #[test]
    fn test_plan_grouped() {
        let service = service(&[("1", "CREATE TABLE a (id INT);"), ("2", "CREATE TABLE b (id INT);")]);
        let pending = service.pending();
        let groups = ExecutionGrouper::new(true, false).plan(&pending).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].migrations.len(), 2);
    }

    #[test]
    fn test_plan_mixed_group() {
        let service = service(&[("1", "CREATE TABLE a (id INT);"), ("2", "VACUUM;")]);
        let pending = service.pending();
        let err = ExecutionGrouper::new(true, false).plan(&pending).unwrap_err();
        assert!(matches!(err, MigrationError::MixedGroup(ref s) if s == "V2__migration.sql"));

        let groups = ExecutionGrouper::new(true, true).plan(&pending).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_mixed_group_blames_first_differing_mode() {
        let service = service(&[("1", "VACUUM;"), ("2", "CREATE TABLE b (id INT);")]);
        let pending = service.pending();
        let err = ExecutionGrouper::new(true, false).plan(&pending).unwrap_err();
        assert!(matches!(err, MigrationError::MixedGroup(ref s) if s == "V2__migration.sql"));
    }

    #[tokio::test]
    async fn test_transactional_group_commits() {
        let service = service(&[("1", "CREATE TABLE a (id INT);"), ("2", "CREATE TABLE b (id INT);")]);
        let pending = service.pending();
        let grouper = ExecutionGrouper::new(true, false);
        let groups = grouper.plan(&pending).unwrap();

        let connection = RecordingExecutor::new();
        let history = InMemorySchemaHistory::new();
        let dialect = Dialect::postgresql();
        let executed = grouper
            .execute_group(&groups[0], target(&connection, &history, &dialect))
            .await
            .unwrap();

        assert_eq!(executed.len(), 2);
        assert_eq!(
            connection.log(),
            vec![
                "BEGIN",
                "CREATE TABLE a (id INT)",
                "CREATE TABLE b (id INT)",
                "COMMIT",
            ]
        );
        assert_eq!(history.rows().len(), 2);
    }

    #[tokio::test]
    async fn test_transactional_failure_rolls_back() {
        let service = service(&[("1", "CREATE TABLE a (id INT);"), ("2", "SELEC 1;")]);
        let pending = service.pending();
        let grouper = ExecutionGrouper::new(true, false);
        let groups = grouper.plan(&pending).unwrap();

        let connection = RecordingExecutor::new().fail_on("SELEC");
        let history = InMemorySchemaHistory::new();
        let dialect = Dialect::postgresql();
        let err = grouper
            .execute_group(&groups[0], target(&connection, &history, &dialect))
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::MigrationFailed { ref migration, .. } if migration == "V2__migration.sql"));
        assert_eq!(connection.log().last().map(String::as_str), Some("ROLLBACK"));
        assert!(history.rows().is_empty());

        // nothing was recorded, so both are still pending
        let resolved = pending.iter().filter_map(|i| i.resolved().cloned()).collect();
        let after = MigrationInfoService::refresh(resolved, history.rows(), &InfoOptions::new()).unwrap();
        assert_eq!(after.pending().len(), 2);
    }

    #[tokio::test]
    async fn test_grouped_failure_without_ddl_transactions_keeps_earlier_rows() {
        let resolved = vec![
            resolved_sql("1", "CREATE TABLE a (id INT);", &Dialect::mysql()),
            resolved_sql("2", "SELEC 1;", &Dialect::mysql()),
        ];
        let service = MigrationInfoService::refresh(resolved, vec![], &InfoOptions::new()).unwrap();
        let pending = service.pending();
        let grouper = ExecutionGrouper::new(true, false);
        let groups = grouper.plan(&pending).unwrap();
        assert!(groups[0].transactional);

        let connection = RecordingExecutor::new().fail_on("SELEC");
        let history = InMemorySchemaHistory::new();
        let dialect = Dialect::mysql();
        grouper
            .execute_group(&groups[0], target(&connection, &history, &dialect))
            .await
            .unwrap_err();

        let rows = history.rows();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].success);
        assert!(!rows[1].success);
    }

    #[tokio::test]
    async fn test_failure_without_ddl_transactions_records_failed_row() {
        let service = service(&[("1", "SELEC 1;")]);
        let pending = service.pending();
        let grouper = ExecutionGrouper::new(false, false);
        let groups = grouper.plan(&pending).unwrap();

        let connection = RecordingExecutor::new().fail_on("SELEC");
        let history = InMemorySchemaHistory::new();
        let dialect = Dialect::mysql();
        grouper
            .execute_group(&groups[0], target(&connection, &history, &dialect))
            .await
            .unwrap_err();

        let rows = history.rows();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].success);
    }

    #[tokio::test]
    async fn test_non_transactional_failure_records_failed_row() {
        let service = service(&[("1", "VACUUM;"), ("2", "VACUUM FULL bad;")]);
        let pending = service.pending();
        let grouper = ExecutionGrouper::new(true, false);
        let groups = grouper.plan(&pending).unwrap();
        assert!(!groups[0].transactional);

        let connection = RecordingExecutor::new().fail_on("bad");
        let history = InMemorySchemaHistory::new();
        let dialect = Dialect::postgresql();
        grouper
            .execute_group(&groups[0], target(&connection, &history, &dialect))
            .await
            .unwrap_err();

        let rows = history.rows();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].success);
        assert!(!rows[1].success);
        assert!(!connection.log().iter().any(|s| s == "BEGIN"));
    }
}
