//! # schemaflow-migrate
//!
//! Versioned schema migrations with Flyway-compatible history semantics.
//!
//! This crate provides:
//! - Resolution of `V`/`U`/`B`/`R` SQL scripts into migrations with CRC32 checksums
//! - Reconciliation of resolved migrations against the schema history table
//! - Validation with configurable ignore patterns (`*:future`, `repeatable:missing`, ...)
//! - Exclusive locking of the history table during a run
//! - Transactional grouping and execution of pending migrations
//! - `info`, `validate`, `migrate`, `baseline` and `repair` commands
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐
//! │ ScriptSource │────▶│ Resolver       │──┐
//! └──────────────┘     └────────────────┘  │   ┌──────────────────────┐
//!                                          ├──▶│ MigrationInfoService │
//! ┌──────────────┐                         │   └──────────────────────┘
//! │ History Tbl  │─────────────────────────┘              │
//! └──────────────┘                                        ▼
//!        ▲            ┌────────────────┐          ┌──────────────────┐
//!        └────────────│ ExecutionGroup │◀─────────│ LockCoordinator  │
//!                     └────────────────┘          └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use schemaflow_migrate::{FileSystemScriptSource, MigrateConfig, Migrator};
//!
//! async fn run(
//!     history: Arc<dyn schemaflow_migrate::SchemaHistory>,
//!     lock: Arc<dyn schemaflow_migrate::LockPrimitive>,
//!     connection: Arc<dyn schemaflow_sql::SqlExecutor>,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MigrateConfig::load("schemaflow.toml").await?;
//!     let source = Arc::new(FileSystemScriptSource::new(config.locations.iter().map(String::as_str)));
//!     let migrator = Migrator::from_config(config, source, history, lock, connection)?;
//!
//!     let outcome = migrator.migrate().await?;
//!     println!("{}", outcome.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Migration Files
//!
//! ```text
//! migrations/
//! ├── V1__create_users.sql
//! ├── V1_1__add_email.sql
//! ├── V2__create_index.sql
//! ├── V2__create_index.sql.conf   # executeInTransaction=false
//! ├── U2__create_index.sql
//! └── R__refresh_views.sql
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod history;
pub mod info;
pub mod lock;
pub mod memory;
pub mod migration;
pub mod resolver;
pub mod service;
pub mod state;
pub mod validation;
pub mod version;

// Re-exports
pub use config::MigrateConfig;
pub use engine::{BaselineOutcome, MigrateOutcome, Migrator, RepairOutcome};
pub use error::{MigrateResult, MigrationError};
pub use group::{ExecutedMigration, ExecutionGroup, ExecutionGrouper, GroupTarget};
pub use history::{DEFAULT_HISTORY_TABLE, SchemaHistory, history_table_sql};
pub use info::{MigrationInfo, ReconciliationContext};
pub use lock::{LockCoordinator, LockPrimitive, LockScope};
pub use memory::{InMemoryLock, InMemorySchemaHistory, InMemoryScriptSource, RecordingExecutor};
pub use migration::{
    AppliedMigration, HistoryEntry, MigrationExecutor, MigrationType, ResolvedMigration,
    SqlMigrationExecutor,
};
pub use resolver::{
    FileSystemScriptSource, MigrationNaming, ScriptResource, ScriptSource, SqlMigrationResolver,
    calculate_checksum,
};
pub use service::{InfoOptions, MigrationInfoService};
pub use state::MigrationState;
pub use validation::{
    MigrationPattern, ValidatePattern, ValidationError, ValidationErrorKind, ValidationPolicy,
};
pub use version::MigrationVersion;
