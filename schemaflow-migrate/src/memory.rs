//! In-memory implementations of the storage, lock, executor and script
//! source interfaces.
//!
//! Useful for tests and for dry runs that only need to see what would be
//! executed.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use schemaflow_sql::{Dialect, SqlError, SqlExecutor, SqlResult, SqlScript, Statement};

use crate::error::{MigrateResult, MigrationError};
use crate::history::SchemaHistory;
use crate::lock::{LockPrimitive, LockScope};
use crate::migration::{
    AppliedMigration, HistoryEntry, MigrationType, ResolvedMigration, SqlMigrationExecutor,
};
use crate::resolver::{ScriptResource, ScriptSource, calculate_checksum};
use crate::version::MigrationVersion;

/// Schema history kept in a vector.
#[derive(Debug, Default)]
pub struct InMemorySchemaHistory {
    table: Mutex<Option<Vec<AppliedMigration>>>,
}

impl InMemorySchemaHistory {
    /// Create a store whose table does not exist yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `rows`.
    pub fn with_rows(rows: Vec<AppliedMigration>) -> Self {
        Self {
            table: Mutex::new(Some(rows)),
        }
    }

    /// Snapshot of every row in rank order.
    pub fn rows(&self) -> Vec<AppliedMigration> {
        let mut rows = self.table.lock().clone().unwrap_or_default();
        rows.sort_by_key(|row| row.installed_rank);
        rows
    }
}

#[async_trait]
impl SchemaHistory for InMemorySchemaHistory {
    async fn exists(&self) -> MigrateResult<bool> {
        Ok(self.table.lock().is_some())
    }

    async fn create(&self) -> MigrateResult<()> {
        let mut table = self.table.lock();
        if table.is_some() {
            return Err(MigrationError::database("history table already exists"));
        }
        *table = Some(Vec::new());
        Ok(())
    }

    async fn all_applied(&self) -> MigrateResult<Vec<AppliedMigration>> {
        Ok(self.rows())
    }

    async fn append_applied(&self, entry: HistoryEntry) -> MigrateResult<AppliedMigration> {
        let mut table = self.table.lock();
        let rows = table.get_or_insert_with(Vec::new);
        let installed_rank = rows.iter().map(|r| r.installed_rank).max().unwrap_or(0) + 1;
        let row = AppliedMigration {
            installed_rank,
            version: entry.version,
            description: entry.description,
            migration_type: entry.migration_type,
            script: entry.script,
            checksum: entry.checksum,
            installed_on: Utc::now(),
            installed_by: entry.installed_by,
            execution_time: entry.execution_time,
            success: entry.success,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn delete_failed(&self) -> MigrateResult<usize> {
        let mut table = self.table.lock();
        let Some(rows) = table.as_mut() else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| row.success);
        Ok(before - rows.len())
    }

    async fn update_applied(
        &self,
        installed_rank: i32,
        description: &str,
        migration_type: MigrationType,
        checksum: Option<i32>,
    ) -> MigrateResult<()> {
        let mut table = self.table.lock();
        let row = table
            .as_mut()
            .and_then(|rows| rows.iter_mut().find(|row| row.installed_rank == installed_rank))
            .ok_or_else(|| {
                MigrationError::database(format!("no history row with installed rank {installed_rank}"))
            })?;
        row.description = description.to_string();
        row.migration_type = migration_type;
        row.checksum = checksum;
        Ok(())
    }
}

/// Process-local lock table.
///
/// Sharing one instance between several coordinators behaves like several
/// processes racing on the same database.
#[derive(Debug, Default)]
pub struct InMemoryLock {
    held: Mutex<HashSet<LockScope>>,
    acquisitions: AtomicUsize,
}

impl InMemoryLock {
    const POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `scope` is currently locked.
    pub fn is_held(&self, scope: &LockScope) -> bool {
        self.held.lock().contains(scope)
    }

    /// How many times a lock was successfully taken.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockPrimitive for InMemoryLock {
    async fn try_acquire(&self, scope: &LockScope) -> MigrateResult<bool> {
        let taken = self.held.lock().insert(scope.clone());
        if taken {
            self.acquisitions.fetch_add(1, Ordering::SeqCst);
        }
        Ok(taken)
    }

    async fn acquire(&self, scope: &LockScope) -> MigrateResult<()> {
        while !self.try_acquire(scope).await? {
            tokio::time::sleep(Self::POLL_INTERVAL).await;
        }
        Ok(())
    }

    async fn release(&self, scope: &LockScope) -> MigrateResult<()> {
        if !self.held.lock().remove(scope) {
            return Err(MigrationError::lock_failed(format!("{scope} is not locked")));
        }
        Ok(())
    }
}

/// Executor that records statements instead of running them.
///
/// Transaction calls are logged as `BEGIN`, `COMMIT` and `ROLLBACK`.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    log: Mutex<Vec<String>>,
    fail_on: Vec<String>,
}

impl RecordingExecutor {
    /// Create an executor that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every statement containing `fragment`.
    pub fn fail_on(mut self, fragment: impl Into<String>) -> Self {
        self.fail_on.push(fragment.into());
        self
    }

    /// Everything executed so far.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Executed statements, without transaction control.
    pub fn statements(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|entry| !matches!(entry.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SqlExecutor for RecordingExecutor {
    async fn execute(&self, statement: &Statement) -> SqlResult<()> {
        if let Some(fragment) = self.fail_on.iter().find(|f| statement.sql.contains(f.as_str())) {
            return Err(SqlError::database(format!(
                "syntax error at or near \"{fragment}\""
            )));
        }
        self.log.lock().push(statement.sql.clone());
        Ok(())
    }

    async fn begin(&self) -> SqlResult<()> {
        self.log.lock().push("BEGIN".to_string());
        Ok(())
    }

    async fn commit(&self) -> SqlResult<()> {
        self.log.lock().push("COMMIT".to_string());
        Ok(())
    }

    async fn rollback(&self) -> SqlResult<()> {
        self.log.lock().push("ROLLBACK".to_string());
        Ok(())
    }
}

/// Scripts held in memory. Scripts can be added while the source is shared.
#[derive(Debug, Default)]
pub struct InMemoryScriptSource {
    scripts: Mutex<Vec<ScriptResource>>,
}

impl InMemoryScriptSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script, builder style.
    pub fn with_script(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.add(ScriptResource::new(name, text));
        self
    }

    /// Add or replace a script.
    pub fn add(&self, script: ScriptResource) {
        let mut scripts = self.scripts.lock();
        scripts.retain(|s| s.name != script.name);
        scripts.push(script);
    }

    /// Remove a script by name.
    pub fn remove(&self, name: &str) -> bool {
        let mut scripts = self.scripts.lock();
        let before = scripts.len();
        scripts.retain(|s| s.name != name);
        before != scripts.len()
    }
}

#[async_trait]
impl ScriptSource for InMemoryScriptSource {
    async fn list_scripts(&self) -> MigrateResult<Vec<ScriptResource>> {
        let mut scripts = self.scripts.lock().clone();
        scripts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(scripts)
    }
}

fn parse_version(version: &str) -> Option<MigrationVersion> {
    MigrationVersion::parse(version).ok()
}

fn empty_executor() -> Arc<SqlMigrationExecutor> {
    Arc::new(SqlMigrationExecutor::new(SqlScript::from_statements(Vec::new())))
}

/// A successful or failed SQL history row.
pub fn applied(
    installed_rank: i32,
    version: Option<&str>,
    description: &str,
    checksum: i32,
    success: bool,
) -> AppliedMigration {
    let script = match version {
        Some(v) => format!("V{v}__{}.sql", description.replace(' ', "_")),
        None => format!("R__{}.sql", description.replace(' ', "_")),
    };
    AppliedMigration {
        installed_rank,
        version: version.and_then(parse_version),
        description: description.to_string(),
        migration_type: MigrationType::Sql,
        script,
        checksum: Some(checksum),
        installed_on: Utc::now(),
        installed_by: "schemaflow".to_string(),
        execution_time: 0,
        success,
    }
}

/// A versioned SQL migration with an empty body.
pub fn resolved(version: &str, description: &str, checksum: i32) -> ResolvedMigration {
    let script = format!("V{version}__{}.sql", description.replace(' ', "_"));
    ResolvedMigration {
        version: parse_version(version),
        description: description.to_string(),
        migration_type: MigrationType::Sql,
        checksum: Some(checksum),
        physical_location: script.clone(),
        script,
        executor: empty_executor(),
    }
}

/// A repeatable SQL migration with an empty body.
pub fn resolved_repeatable(description: &str, checksum: i32) -> ResolvedMigration {
    let script = format!("R__{}.sql", description.replace(' ', "_"));
    ResolvedMigration {
        version: None,
        description: description.to_string(),
        migration_type: MigrationType::Sql,
        checksum: Some(checksum),
        physical_location: script.clone(),
        script,
        executor: empty_executor(),
    }
}

/// A versioned migration running `sql`, named `V<version>__migration.sql`.
///
/// # Panics
///
/// Panics if `sql` does not parse under `dialect`.
pub fn resolved_sql(version: &str, sql: &str, dialect: &Dialect) -> ResolvedMigration {
    let script = format!("V{version}__migration.sql");
    let parsed = match SqlScript::parse(sql, dialect, false) {
        Ok(parsed) => parsed,
        Err(err) => panic!("fixture script {script} does not parse: {err}"),
    };
    ResolvedMigration {
        version: parse_version(version),
        description: "migration".to_string(),
        migration_type: MigrationType::Sql,
        checksum: Some(calculate_checksum(sql)),
        physical_location: script.clone(),
        script,
        executor: Arc::new(SqlMigrationExecutor::new(parsed)),
    }
}
