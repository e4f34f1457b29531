//! Error types for the migration engine.

use schemaflow_sql::SqlError;
use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Script parsing or execution error.
    #[error(transparent)]
    Sql(#[from] SqlError),

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// A version string could not be parsed.
    #[error(
        "Invalid version containing non-numeric characters. Only 0..9 and . are allowed. Invalid version: {0}"
    )]
    InvalidVersion(String),

    /// Invalid migration script or name.
    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    /// Two resolved migrations share a version and type.
    #[error("Found more than one migration with version {version}\nOffenders:\n-> {first}\n-> {second}")]
    DuplicateMigration {
        /// The shared version.
        version: String,
        /// Location of the first migration.
        first: String,
        /// Location of the second migration.
        second: String,
    },

    /// Validation found one or more problems.
    #[error("Validate failed: Migrations have failed validation\n{}", format_validation(.0))]
    Validation(Vec<ValidationError>),

    /// Lock acquisition failed.
    #[error("Failed to acquire migration lock: {0}")]
    LockFailed(String),

    /// A migration failed while executing.
    #[error("Migration {migration} failed\n{source}")]
    MigrationFailed {
        /// Script name of the failed migration.
        migration: String,
        /// Underlying error.
        #[source]
        source: Box<MigrationError>,
    },

    /// The schema history contains a failed migration.
    #[error(
        "Schema contains a failed migration to {0} ! Please remove any half-completed changes then run repair to fix the schema history."
    )]
    FailedMigrationPresent(String),

    /// Transactional and non-transactional migrations in one group.
    #[error(
        "Detected both transactional and non-transactional migrations within the same migration group \
         (even though mixed is false). First offending migration: {0}"
    )]
    MixedGroup(String),

    /// The configured target version does not exist.
    #[error("No migration with a target version {0} could be found. Ensure target is specified correctly and the migration exists.")]
    TargetNotFound(String),

    /// The history table is in an impossible state.
    #[error("Corrupted schema history: {0}")]
    CorruptedHistory(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// General migration error.
    #[error("Migration error: {0}")]
    Other(String),
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an invalid migration error.
    pub fn invalid_migration(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Create a lock failed error.
    pub fn lock_failed(msg: impl Into<String>) -> Self {
        Self::LockFailed(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a corrupted history error.
    pub fn corrupted_history(msg: impl Into<String>) -> Self {
        Self::CorruptedHistory(msg.into())
    }

    /// Create an other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Wrap an error raised while executing a migration.
    pub fn migration_failed(migration: impl Into<String>, source: MigrationError) -> Self {
        Self::MigrationFailed {
            migration: migration.into(),
            source: Box::new(source),
        }
    }

    /// Check if retrying the operation later could succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LockFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationErrorKind;

    #[test]
    fn test_invalid_version_display() {
        let err = MigrationError::InvalidVersion("1.a".to_string());
        assert!(err.to_string().ends_with("Invalid version: 1.a"));
    }

    #[test]
    fn test_validation_display_lists_messages() {
        let err = MigrationError::Validation(vec![
            ValidationError::new(ValidationErrorKind::ChecksumMismatch, None, "a", "V1__a.sql", "first"),
            ValidationError::new(ValidationErrorKind::DescriptionMismatch, None, "b", "V2__b.sql", "second"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("first\nsecond"));
    }

    #[test]
    fn test_migration_failed_wraps_source() {
        let err = MigrationError::migration_failed(
            "V2__add.sql",
            MigrationError::Sql(SqlError::statement_failed(4, "SELEC", "syntax error")),
        );
        let msg = err.to_string();
        assert!(msg.contains("V2__add.sql"));
        assert!(msg.contains("line 4"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(MigrationError::lock_failed("timeout").is_recoverable());
        assert!(!MigrationError::database("connection").is_recoverable());
    }
}
