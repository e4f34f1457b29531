//! Resolved and applied migration records.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemaflow_sql::{SqlExecutor, SqlScript};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};
use crate::version::MigrationVersion;

/// Description stored for migrations that have none.
pub const NO_DESCRIPTION_MARKER: &str = "<< no description >>";

/// Kind of migration, stored in the history table by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationType {
    /// Marker row recording that the engine created the schema.
    Schema,
    /// Marker row for a baselined pre-existing schema.
    Baseline,
    /// Marker row recording that a migration was deleted from history.
    Delete,
    /// Versioned or repeatable SQL script.
    Sql,
    /// SQL script that builds the whole schema at its version.
    SqlBaseline,
    /// SQL script that reverses a versioned migration.
    UndoSql,
    /// Programmatic migration.
    Script,
    /// Programmatic undo migration.
    UndoScript,
}

impl MigrationType {
    /// Name as stored in the history table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "SCHEMA",
            Self::Baseline => "BASELINE",
            Self::Delete => "DELETE",
            Self::Sql => "SQL",
            Self::SqlBaseline => "SQL_BASELINE",
            Self::UndoSql => "UNDO_SQL",
            Self::Script => "SCRIPT",
            Self::UndoScript => "UNDO_SCRIPT",
        }
    }

    /// Rows written by the engine itself rather than by a migration.
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Schema | Self::Baseline | Self::Delete)
    }

    /// Undo migrations.
    pub fn is_undo(&self) -> bool {
        matches!(self, Self::UndoSql | Self::UndoScript)
    }

    /// Baseline markers and baseline migrations.
    pub fn is_baseline(&self) -> bool {
        matches!(self, Self::Baseline | Self::SqlBaseline)
    }

    /// Baseline migrations only.
    pub fn is_baseline_migration(&self) -> bool {
        matches!(self, Self::SqlBaseline)
    }
}

impl fmt::Display for MigrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationType {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "SCHEMA" => Self::Schema,
            "BASELINE" | "INIT" => Self::Baseline,
            "DELETE" => Self::Delete,
            "SQL" => Self::Sql,
            "SQL_BASELINE" => Self::SqlBaseline,
            "UNDO_SQL" => Self::UndoSql,
            "SCRIPT" => Self::Script,
            "UNDO_SCRIPT" => Self::UndoScript,
            other => {
                return Err(MigrationError::invalid_migration(format!(
                    "Unknown migration type: {other}"
                )));
            }
        })
    }
}

/// Runs the body of one migration.
#[async_trait]
pub trait MigrationExecutor: Send + Sync + fmt::Debug {
    /// Execute the migration on `connection`.
    async fn execute(&self, connection: &dyn SqlExecutor) -> MigrateResult<()>;

    /// Whether the migration may run inside a transaction.
    fn can_execute_in_transaction(&self) -> bool;

    /// Whether the migration should run at all. Conditional migrations that
    /// return `false` are reported as IGNORED.
    fn should_execute(&self) -> bool {
        true
    }
}

/// Executes a parsed [`SqlScript`].
#[derive(Debug, Clone)]
pub struct SqlMigrationExecutor {
    script: SqlScript,
    execute_in_transaction: Option<bool>,
    should_execute: bool,
}

impl SqlMigrationExecutor {
    /// Create an executor for a parsed script.
    pub fn new(script: SqlScript) -> Self {
        Self {
            script,
            execute_in_transaction: None,
            should_execute: true,
        }
    }

    /// Force the transaction mode instead of deriving it from the script.
    pub fn with_execute_in_transaction(mut self, value: bool) -> Self {
        self.execute_in_transaction = Some(value);
        self
    }

    /// Mark the migration as conditionally skipped.
    pub fn with_should_execute(mut self, value: bool) -> Self {
        self.should_execute = value;
        self
    }

    /// The parsed script.
    pub fn script(&self) -> &SqlScript {
        &self.script
    }
}

#[async_trait]
impl MigrationExecutor for SqlMigrationExecutor {
    async fn execute(&self, connection: &dyn SqlExecutor) -> MigrateResult<()> {
        self.script.execute(connection).await?;
        Ok(())
    }

    fn can_execute_in_transaction(&self) -> bool {
        self.execute_in_transaction
            .unwrap_or_else(|| self.script.execute_in_transaction())
    }

    fn should_execute(&self) -> bool {
        self.should_execute
    }
}

/// A migration discovered in a source location.
#[derive(Debug, Clone)]
pub struct ResolvedMigration {
    /// Version, `None` for repeatable migrations.
    pub version: Option<MigrationVersion>,
    /// Human readable description.
    pub description: String,
    /// Migration kind.
    pub migration_type: MigrationType,
    /// Content checksum.
    pub checksum: Option<i32>,
    /// Script name as recorded in the history table.
    pub script: String,
    /// Where the migration was found.
    pub physical_location: String,
    /// Runs the migration body.
    pub executor: Arc<dyn MigrationExecutor>,
}

impl ResolvedMigration {
    /// Whether this migration is repeatable.
    pub fn is_repeatable(&self) -> bool {
        self.version.is_none()
    }

    /// Whether `checksum` matches this migration's checksum.
    pub fn checksum_matches(&self, checksum: Option<i32>) -> bool {
        self.checksum == checksum
    }

    /// Version, or description for repeatable migrations, for messages.
    pub fn identifier(&self) -> String {
        match &self.version {
            Some(version) => version.to_string(),
            None => self.description.clone(),
        }
    }
}

/// A row of the schema history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    /// Position in application order, assigned by the history store.
    pub installed_rank: i32,
    /// Version, `None` for repeatable migrations.
    pub version: Option<MigrationVersion>,
    /// Description.
    pub description: String,
    /// Migration kind.
    pub migration_type: MigrationType,
    /// Script name.
    pub script: String,
    /// Checksum at the time of application.
    pub checksum: Option<i32>,
    /// When the row was written.
    pub installed_on: DateTime<Utc>,
    /// Who ran the migration.
    pub installed_by: String,
    /// Execution time in milliseconds.
    pub execution_time: i32,
    /// Whether the migration succeeded.
    pub success: bool,
}

impl AppliedMigration {
    /// Whether this row is for a repeatable migration.
    pub fn is_repeatable(&self) -> bool {
        self.version.is_none()
    }

    /// Version, or description for repeatable migrations, for messages.
    pub fn identifier(&self) -> String {
        match &self.version {
            Some(version) => version.to_string(),
            None => self.description.clone(),
        }
    }
}

/// A history row about to be written. The store assigns rank and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Version, `None` for repeatable migrations.
    pub version: Option<MigrationVersion>,
    /// Description.
    pub description: String,
    /// Migration kind.
    pub migration_type: MigrationType,
    /// Script name.
    pub script: String,
    /// Checksum.
    pub checksum: Option<i32>,
    /// Who ran the migration.
    pub installed_by: String,
    /// Execution time in milliseconds.
    pub execution_time: i32,
    /// Whether the migration succeeded.
    pub success: bool,
}

impl HistoryEntry {
    /// Entry recording the outcome of a resolved migration.
    pub fn for_migration(
        migration: &ResolvedMigration,
        installed_by: &str,
        execution_time: i32,
        success: bool,
    ) -> Self {
        Self {
            version: migration.version.clone(),
            description: migration.description.clone(),
            migration_type: migration.migration_type,
            script: migration.script.clone(),
            checksum: migration.checksum,
            installed_by: installed_by.to_string(),
            execution_time,
            success,
        }
    }

    /// Synthetic entry with no script body.
    pub fn marker(
        migration_type: MigrationType,
        version: Option<MigrationVersion>,
        description: impl Into<String>,
        script: impl Into<String>,
        installed_by: &str,
    ) -> Self {
        Self {
            version,
            description: description.into(),
            migration_type,
            script: script.into(),
            checksum: None,
            installed_by: installed_by.to_string(),
            execution_time: 0,
            success: true,
        }
    }
}
