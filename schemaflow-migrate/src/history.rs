//! Schema history table access.

use async_trait::async_trait;

use crate::error::MigrateResult;
use crate::migration::{AppliedMigration, HistoryEntry, MigrationType};

/// Default name of the history table.
pub const DEFAULT_HISTORY_TABLE: &str = "flyway_schema_history";

/// Storage for the schema history table.
///
/// Implementations assign `installed_rank` and `installed_on` on insert.
/// Mutating calls are only made while the migration lock is held.
#[async_trait]
pub trait SchemaHistory: Send + Sync {
    /// Whether the history table exists.
    async fn exists(&self) -> MigrateResult<bool>;

    /// Create the history table.
    async fn create(&self) -> MigrateResult<()>;

    /// Every row, ordered by installed rank.
    async fn all_applied(&self) -> MigrateResult<Vec<AppliedMigration>>;

    /// Insert a row and return it as stored.
    async fn append_applied(&self, entry: HistoryEntry) -> MigrateResult<AppliedMigration>;

    /// Delete every failed row, returning how many were removed.
    async fn delete_failed(&self) -> MigrateResult<usize>;

    /// Overwrite the description, type and checksum of one row.
    async fn update_applied(
        &self,
        installed_rank: i32,
        description: &str,
        migration_type: MigrationType,
        checksum: Option<i32>,
    ) -> MigrateResult<()>;
}

/// DDL of the history table (PostgreSQL flavour).
pub fn history_table_sql(schema: &str, table: &str) -> String {
    format!(
        r#"CREATE TABLE "{schema}"."{table}" (
    installed_rank INT NOT NULL,
    version VARCHAR(50),
    description VARCHAR(200) NOT NULL,
    type VARCHAR(20) NOT NULL,
    script VARCHAR(1000) NOT NULL,
    checksum INTEGER,
    installed_by VARCHAR(100) NOT NULL,
    installed_on TIMESTAMP NOT NULL DEFAULT now(),
    execution_time INTEGER NOT NULL,
    success BOOLEAN NOT NULL,
    CONSTRAINT "{table}_pk" PRIMARY KEY (installed_rank)
);
CREATE INDEX "{table}_s_idx" ON "{schema}"."{table}" (success);"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_table_sql() {
        let sql = history_table_sql("public", DEFAULT_HISTORY_TABLE);
        assert!(sql.contains(r#""public"."flyway_schema_history""#));
        for column in [
            "installed_rank",
            "version",
            "description",
            "type",
            "script",
            "checksum",
            "installed_by",
            "installed_on",
            "execution_time",
            "success",
        ] {
            assert!(sql.contains(column), "missing {column}");
        }
    }
}
