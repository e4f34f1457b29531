//! # Schemaflow
//!
//! Versioned database schema migrations for Rust.
//!
//! Schemaflow provides:
//! - A dialect-aware SQL splitter for PostgreSQL, MySQL, Oracle, SQL Server, DB2 and SQLite
//! - Flyway-compatible migration naming, checksums and schema history
//! - Validation, baselining and repair of the schema history
//! - Exclusive locking and transactional grouping of migration runs
//!
//! The database itself is reached through small async traits
//! ([`SqlExecutor`](sql::SqlExecutor), [`SchemaHistory`](migrate::SchemaHistory),
//! [`LockPrimitive`](migrate::LockPrimitive)), so any driver can be plugged in.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use schemaflow::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), MigrationError> {
//! let source = InMemoryScriptSource::new()
//!     .with_script("V1__create_users.sql", "CREATE TABLE users (id INT);")
//!     .with_script("V2__add_email.sql", "ALTER TABLE users ADD email TEXT;");
//!
//! let migrator = Migrator::new(
//!     MigrateConfig::new(),
//!     Dialect::postgresql(),
//!     Arc::new(source),
//!     Arc::new(InMemorySchemaHistory::new()),
//!     Arc::new(InMemoryLock::new()),
//!     Arc::new(RecordingExecutor::new()),
//! )?;
//!
//! let outcome = migrator.migrate().await?;
//! assert_eq!(outcome.migrations_executed, 2);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod logging;

/// SQL script splitting and execution.
pub mod sql {
    pub use schemaflow_sql::*;
}

/// Migration reconciliation, locking and execution.
pub mod migrate {
    pub use schemaflow_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        FileSystemScriptSource, InMemoryLock, InMemorySchemaHistory, InMemoryScriptSource,
        LockPrimitive, MigrateConfig, MigrateOutcome, MigrateResult, MigrationError,
        MigrationInfoService, MigrationState, MigrationVersion, Migrator, RecordingExecutor,
        SchemaHistory, ScriptSource,
    };
    pub use crate::sql::{Dialect, SqlExecutor, SqlScript, Statement};
}

// Re-export key types at the crate root
pub use schemaflow_migrate::{MigrateConfig, MigrationError, Migrator};
pub use schemaflow_sql::{Dialect, SqlError, SqlScript};
