//! The migration command surface: info, validate, migrate, baseline and
//! repair.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use schemaflow_sql::{Dialect, SqlExecutor};
use tracing::{debug, info, warn};

use crate::config::MigrateConfig;
use crate::error::{MigrateResult, MigrationError};
use crate::group::{ExecutedMigration, ExecutionGrouper, GroupTarget};
use crate::history::SchemaHistory;
use crate::info::MigrationInfo;
use crate::lock::{LockCoordinator, LockPrimitive, LockScope};
use crate::migration::{HistoryEntry, MigrationType, NO_DESCRIPTION_MARKER, ResolvedMigration};
use crate::resolver::{ScriptSource, SqlMigrationResolver};
use crate::service::{InfoOptions, MigrationInfoService};
use crate::state::MigrationState;
use crate::version::MigrationVersion;

/// Result of a `migrate` run.
#[derive(Debug, Clone, Default)]
pub struct MigrateOutcome {
    /// Schema name.
    pub schema: String,
    /// Version before the run.
    pub initial_version: Option<MigrationVersion>,
    /// Version after the run.
    pub target_version: Option<MigrationVersion>,
    /// Number of migrations applied.
    pub migrations_executed: usize,
    /// Applied migrations in execution order.
    pub executed: Vec<ExecutedMigration>,
    /// Total duration in milliseconds.
    pub elapsed_ms: u64,
    /// Warnings raised during the run.
    pub warnings: Vec<String>,
}

impl MigrateOutcome {
    /// Check if anything was applied.
    pub fn has_changes(&self) -> bool {
        self.migrations_executed > 0
    }

    /// One-line description of the run.
    pub fn summary(&self) -> String {
        if self.migrations_executed == 0 {
            let version = self
                .target_version
                .as_ref()
                .map_or_else(|| "<< Empty Schema >>".to_string(), |v| format!("v{v}"));
            return format!(
                "Schema \"{}\" is up to date ({version}). No migration necessary.",
                self.schema
            );
        }

        let noun = if self.migrations_executed == 1 { "migration" } else { "migrations" };
        let mut summary = format!(
            "Successfully applied {} {noun} to schema \"{}\"",
            self.migrations_executed, self.schema
        );
        if let Some(version) = &self.target_version {
            summary.push_str(&format!(", now at version v{version}"));
        }
        summary.push_str(&format!(" (execution time {}ms)", self.elapsed_ms));
        summary
    }
}

/// Result of a `repair` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Failed rows removed.
    pub removed_failed: usize,
    /// Rows whose checksum, description or type were realigned.
    pub aligned: Vec<String>,
    /// Versions marked as deleted.
    pub deleted: Vec<String>,
}

impl RepairOutcome {
    /// Check if the history was changed.
    pub fn has_changes(&self) -> bool {
        self.removed_failed > 0 || !self.aligned.is_empty() || !self.deleted.is_empty()
    }
}

impl fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_changes() {
            return f.write_str("Schema history is in sync, nothing to repair");
        }
        write!(
            f,
            "{} failed removed, {} realigned, {} marked as deleted",
            self.removed_failed,
            self.aligned.len(),
            self.deleted.len()
        )
    }
}

/// Result of a `baseline` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineOutcome {
    /// Baseline version.
    pub version: MigrationVersion,
    /// Baseline description.
    pub description: String,
    /// Whether a row was written. `false` when the same baseline existed.
    pub created: bool,
}

/// Runs migration commands against one schema.
pub struct Migrator {
    config: MigrateConfig,
    dialect: Dialect,
    resolver: SqlMigrationResolver,
    source: Arc<dyn ScriptSource>,
    history: Arc<dyn SchemaHistory>,
    connection: Arc<dyn SqlExecutor>,
    coordinator: LockCoordinator,
    scope: LockScope,
    warned_unlocked: AtomicBool,
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("schema", &self.config.schema)
            .field("table", &self.config.table)
            .field("dialect", &self.dialect.kind)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl Migrator {
    /// Create a migrator.
    pub fn new(
        config: MigrateConfig,
        dialect: Dialect,
        source: Arc<dyn ScriptSource>,
        history: Arc<dyn SchemaHistory>,
        lock: Arc<dyn LockPrimitive>,
        connection: Arc<dyn SqlExecutor>,
    ) -> MigrateResult<Self> {
        let resolver = SqlMigrationResolver::new(dialect.clone())
            .naming(config.naming.clone())
            .placeholders(config.placeholder_replacer()?)
            .mixed(config.mixed)
            .strict_naming(config.validate_migration_naming);
        let coordinator = LockCoordinator::new(lock, dialect.lock_mode)
            .retry_interval(config.lock_retry_interval())
            .max_attempts(config.lock_max_attempts);
        let scope = LockScope::table(config.schema.clone(), config.table.clone());

        Ok(Self {
            config,
            dialect,
            resolver,
            source,
            history,
            connection,
            coordinator,
            scope,
            warned_unlocked: AtomicBool::new(false),
        })
    }

    /// Create a migrator using the dialect named in `config`.
    pub fn from_config(
        config: MigrateConfig,
        source: Arc<dyn ScriptSource>,
        history: Arc<dyn SchemaHistory>,
        lock: Arc<dyn LockPrimitive>,
        connection: Arc<dyn SqlExecutor>,
    ) -> MigrateResult<Self> {
        let dialect = config.resolve_dialect()?;
        Self::new(config, dialect, source, history, lock, connection)
    }

    /// The configuration.
    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    /// The dialect.
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Reconciled state of every migration.
    ///
    /// Takes no lock; the result is a snapshot.
    pub async fn info(&self) -> MigrateResult<MigrationInfoService> {
        let resolved = self.resolve().await?;
        self.refresh(resolved, &self.config.info_options()).await
    }

    /// Fail with every validation error found.
    pub async fn validate(&self) -> MigrateResult<()> {
        let started = Instant::now();
        let service = self.info().await?;
        let errors = service.validate();
        if !errors.is_empty() {
            for error in &errors {
                debug!(code = error.kind.code(), script = %error.script, "{}", error.message);
            }
            return Err(MigrationError::Validation(errors));
        }
        info!(
            migrations = service.all().len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Successfully validated {} migrations",
            service.all().len()
        );
        Ok(())
    }

    /// Apply pending migrations until none are left.
    pub async fn migrate(&self) -> MigrateResult<MigrateOutcome> {
        let started = Instant::now();
        let resolved = self.resolve().await?;
        let options = self
            .config
            .info_options()
            .policy(self.config.migrate_policy());

        let mut outcome = MigrateOutcome {
            schema: self.config.schema.clone(),
            ..Default::default()
        };
        let mut first_round = true;

        loop {
            self.warn_if_unlocked(&mut outcome.warnings);
            let round = self
                .coordinator
                .with_lock(&self.scope, || {
                    self.migrate_round(&resolved, &options, first_round, &mut outcome.warnings)
                })
                .await?;

            if first_round {
                outcome.initial_version = round.current.clone();
                first_round = false;
            }
            outcome.target_version = round.current;
            if round.executed.is_empty() {
                break;
            }
            outcome.executed.extend(round.executed);
        }

        outcome.migrations_executed = outcome.executed.len();
        outcome.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            schema = %self.config.schema,
            migrations = outcome.migrations_executed,
            elapsed_ms = outcome.elapsed_ms,
            "{}",
            outcome.summary()
        );
        Ok(outcome)
    }

    /// Record the configured baseline in an empty history.
    pub async fn baseline(&self) -> MigrateResult<BaselineOutcome> {
        self.coordinator
            .with_lock(&self.scope, || async {
                self.ensure_history_table().await?;
                let version = self.config.baseline_version.clone();
                let description = self.config.baseline_description.clone();
                let rows = self.history.all_applied().await?;

                let baseline = rows
                    .iter()
                    .find(|row| row.migration_type == MigrationType::Baseline);
                if let Some(existing) = baseline {
                    if existing.version.as_ref() == Some(&version) && existing.description == description {
                        info!(version = %version, "Schema history table is already baselined");
                        return Ok(BaselineOutcome {
                            version,
                            description,
                            created: false,
                        });
                    }
                    return Err(MigrationError::other(format!(
                        "Unable to baseline schema history table {} with ({version},{description}) as it has already been baselined with ({},{})",
                        self.scope,
                        existing.identifier(),
                        existing.description
                    )));
                }
                if rows.iter().any(|row| row.migration_type != MigrationType::Schema) {
                    return Err(MigrationError::other(format!(
                        "Unable to baseline schema history table {} as it already contains migrations",
                        self.scope
                    )));
                }

                self.history
                    .append_applied(HistoryEntry::marker(
                        MigrationType::Baseline,
                        Some(version.clone()),
                        description.clone(),
                        description.clone(),
                        &self.config.installed_by,
                    ))
                    .await?;
                info!(version = %version, "Successfully baselined schema with version: {}", version);
                Ok(BaselineOutcome {
                    version,
                    description,
                    created: true,
                })
            })
            .await
    }

    /// Remove failed rows, realign changed migrations and mark missing ones
    /// as deleted.
    pub async fn repair(&self) -> MigrateResult<RepairOutcome> {
        let resolved = self.resolve().await?;
        self.coordinator
            .with_lock(&self.scope, move || async move {
                let mut outcome = RepairOutcome::default();
                if !self.history.exists().await? {
                    info!(table = %self.scope, "Schema history table does not exist, nothing to repair");
                    return Ok(outcome);
                }

                outcome.removed_failed = self.history.delete_failed().await?;

                let options = self
                    .config
                    .info_options()
                    .fail_on_missing_target(false);
                let service = self.refresh(resolved, &options).await?;
                let installed_by = self.config.installed_by.as_str();

                for info in service.all() {
                    let (Some(resolved), Some(applied)) = (info.resolved(), info.applied()) else {
                        continue;
                    };
                    if applied.version.is_none()
                        || applied.migration_type.is_synthetic()
                        || applied.migration_type.is_undo()
                        || info.state() == MigrationState::Deleted
                    {
                        continue;
                    }
                    let description = if resolved.description.is_empty() {
                        NO_DESCRIPTION_MARKER.to_string()
                    } else {
                        crate::info::abbreviate_description(&resolved.description)
                    };
                    if applied.checksum == resolved.checksum
                        && applied.description == description
                        && applied.migration_type == resolved.migration_type
                    {
                        continue;
                    }
                    self.history
                        .update_applied(
                            applied.installed_rank,
                            &description,
                            resolved.migration_type,
                            resolved.checksum,
                        )
                        .await?;
                    debug!(version = %applied.identifier(), "Realigned applied migration");
                    outcome.aligned.push(applied.identifier());
                }

                for info in service.all() {
                    if info.state() != MigrationState::MissingSuccess {
                        continue;
                    }
                    let Some(applied) = info.applied() else {
                        continue;
                    };
                    if applied.version.is_none() || applied.migration_type.is_synthetic() {
                        continue;
                    }
                    let mut entry = HistoryEntry::marker(
                        MigrationType::Delete,
                        applied.version.clone(),
                        applied.description.clone(),
                        applied.script.clone(),
                        installed_by,
                    );
                    entry.checksum = applied.checksum;
                    self.history.append_applied(entry).await?;
                    outcome.deleted.push(applied.identifier());
                }

                info!(
                    removed_failed = outcome.removed_failed,
                    aligned = outcome.aligned.len(),
                    deleted = outcome.deleted.len(),
                    "Repair of schema history table {} completed: {}",
                    self.scope,
                    outcome
                );
                Ok(outcome)
            })
            .await
    }

    async fn resolve(&self) -> MigrateResult<Vec<ResolvedMigration>> {
        self.resolver.resolve_from(self.source.as_ref()).await
    }

    async fn refresh(
        &self,
        resolved: Vec<ResolvedMigration>,
        options: &InfoOptions,
    ) -> MigrateResult<MigrationInfoService> {
        let applied = if self.history.exists().await? {
            self.history.all_applied().await?
        } else {
            Vec::new()
        };
        MigrationInfoService::refresh(resolved, applied, options)
    }

    async fn ensure_history_table(&self) -> MigrateResult<()> {
        if !self.history.exists().await? {
            info!(table = %self.scope, "Creating schema history table {}", self.scope);
            self.history.create().await?;
        }
        Ok(())
    }

    fn warn_if_unlocked(&self, warnings: &mut Vec<String>) {
        if self.coordinator.is_supported() || self.warned_unlocked.swap(true, Ordering::SeqCst) {
            return;
        }
        let message = format!(
            "{:?} does not support locking. No concurrent migration protection is available.",
            self.dialect.kind
        );
        warn!("{}", message);
        warnings.push(message);
    }

    async fn migrate_round(
        &self,
        resolved: &[ResolvedMigration],
        options: &InfoOptions,
        first_round: bool,
        warnings: &mut Vec<String>,
    ) -> MigrateResult<Round> {
        self.ensure_history_table().await?;
        let service = self.refresh(resolved.to_vec(), options).await?;

        if first_round && self.config.validate_on_migrate {
            let errors = service.validate();
            if !errors.is_empty() {
                return Err(MigrationError::Validation(errors));
            }
        }

        for failed in service.failed() {
            if failed.state() == MigrationState::FutureFailed && options.policy.future {
                let message = format!(
                    "Schema \"{}\" contains a failed future migration to version {} !",
                    self.config.schema,
                    describe(failed)
                );
                if first_round {
                    warn!("{}", message);
                    warnings.push(message);
                }
                continue;
            }
            return Err(MigrationError::FailedMigrationPresent(describe(failed)));
        }

        let current = service.current().and_then(|info| info.version().cloned());
        if first_round {
            if let Some(future) = service.future().first() {
                let message = format!(
                    "Schema \"{}\" has a version ({}) that is newer than the latest available migration ({}) !",
                    self.config.schema,
                    describe(future),
                    service.context().last_resolved
                );
                warn!("{}", message);
                warnings.push(message);
            }
        }

        let pending: Vec<&MigrationInfo> = service
            .pending()
            .into_iter()
            .filter(|info| {
                self.config.cherry_pick.is_empty()
                    || self
                        .config
                        .cherry_pick
                        .iter()
                        .any(|p| p.matches(info.version(), info.description()))
            })
            .collect();
        if pending.is_empty() {
            return Ok(Round {
                executed: Vec::new(),
                current,
            });
        }

        let selected = if self.config.group { &pending[..] } else { &pending[..1] };
        for info in selected {
            let out_of_order = info
                .version()
                .is_some_and(|version| current.as_ref().is_some_and(|c| version < c));
            if out_of_order {
                let message = format!(
                    "Migrating schema \"{}\" to version {} [out of order]",
                    self.config.schema,
                    describe(info)
                );
                warn!("{}", message);
                warnings.push(message);
            }
        }

        let grouper = ExecutionGrouper::new(self.config.group, self.config.mixed);
        let target = GroupTarget {
            connection: self.connection.as_ref(),
            history: self.history.as_ref(),
            dialect: &self.dialect,
            installed_by: &self.config.installed_by,
            schema: &self.config.schema,
        };
        let mut executed = Vec::new();
        for group in grouper.plan(selected)? {
            executed.extend(grouper.execute_group(&group, target).await?);
        }
        Ok(Round { executed, current })
    }
}

struct Round {
    executed: Vec<ExecutedMigration>,
    current: Option<MigrationVersion>,
}

fn describe(info: &MigrationInfo) -> String {
    match info.version() {
        Some(version) => format!("{version} ({})", info.description()),
        None => info.description().to_string(),
    }
}
