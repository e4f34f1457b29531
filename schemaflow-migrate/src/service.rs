//! Reconciliation of resolved migrations against the schema history.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::info::{AppliedAttributes, MigrationInfo, ReconciliationContext};
use crate::migration::{AppliedMigration, MigrationType, ResolvedMigration};
use crate::state::MigrationState;
use crate::validation::{MigrationPattern, ValidatePattern, ValidationError, ValidationPolicy};
use crate::version::MigrationVersion;

/// Inputs to a refresh besides the migrations themselves.
#[derive(Debug, Clone, Default)]
pub struct InfoOptions {
    /// Highest version to consider. `None` means latest; `CURRENT` means the
    /// last applied version.
    pub target: Option<MigrationVersion>,
    /// Allow migrations older than the last applied one to run.
    pub out_of_order: bool,
    /// Restrict migrate to these migrations.
    pub cherry_pick: Vec<MigrationPattern>,
    /// Ignore validation errors for migrations matching these.
    pub ignore_patterns: Vec<ValidatePattern>,
    /// Fail when a concrete target matches no migration.
    pub fail_on_missing_target: bool,
    /// Tolerated discrepancies.
    pub policy: ValidationPolicy,
}

impl InfoOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target version.
    pub fn target(mut self, target: Option<MigrationVersion>) -> Self {
        self.target = target;
        self
    }

    /// Allow out-of-order migrations.
    pub fn out_of_order(mut self, out_of_order: bool) -> Self {
        self.out_of_order = out_of_order;
        self
    }

    /// Set cherry-pick patterns.
    pub fn cherry_pick(mut self, patterns: Vec<MigrationPattern>) -> Self {
        self.cherry_pick = patterns;
        self
    }

    /// Set ignore patterns. The policy is derived from them.
    pub fn ignore_patterns(mut self, patterns: Vec<ValidatePattern>) -> Self {
        self.policy = ValidationPolicy::from_patterns(&patterns);
        self.ignore_patterns = patterns;
        self
    }

    /// Fail on a missing target.
    pub fn fail_on_missing_target(mut self, fail: bool) -> Self {
        self.fail_on_missing_target = fail;
        self
    }

    /// Override the validation policy.
    pub fn policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug)]
struct AppliedRow {
    migration: AppliedMigration,
    attributes: AppliedAttributes,
}

/// The reconciled state of every known migration.
#[derive(Debug, Clone)]
pub struct MigrationInfoService {
    infos: Vec<MigrationInfo>,
    context: Arc<ReconciliationContext>,
}

impl MigrationInfoService {
    /// Reconcile `resolved` against `applied`.
    ///
    /// A pure function of its inputs: the same inputs always produce the
    /// same infos in the same order.
    pub fn refresh(
        resolved: Vec<ResolvedMigration>,
        applied: Vec<AppliedMigration>,
        options: &InfoOptions,
    ) -> MigrateResult<Self> {
        let mut ctx = ReconciliationContext {
            target: options.target.clone(),
            out_of_order: options.out_of_order,
            cherry_pick: options.cherry_pick.clone(),
            ignore_patterns: options.ignore_patterns.clone(),
            policy: options.policy,
            ..Default::default()
        };

        let mut resolved_versioned: BTreeMap<(MigrationVersion, MigrationType), ResolvedMigration> =
            BTreeMap::new();
        let mut resolved_repeatable: BTreeMap<String, ResolvedMigration> = BTreeMap::new();
        for migration in resolved {
            match migration.version.clone() {
                Some(version) => {
                    if version > ctx.last_resolved {
                        ctx.last_resolved = version.clone();
                    }
                    resolved_versioned.insert((version, migration.migration_type), migration);
                }
                None => {
                    resolved_repeatable.insert(migration.description.clone(), migration);
                }
            }
        }

        let mut applied = applied;
        applied.sort_by_key(|a| a.installed_rank);
        let (mut versioned_rows, repeatable_rows) = walk_history(applied, &mut ctx)?;
        mark_out_of_order(&mut versioned_rows, &mut ctx);

        if ctx.target.as_ref().is_some_and(MigrationVersion::is_current) {
            ctx.target = Some(ctx.last_applied.clone());
        }

        if options.fail_on_missing_target {
            if let Some(target) = options.target.as_ref().filter(|t| t.is_concrete()) {
                let found = versioned_rows
                    .iter()
                    .any(|row| row.migration.version.as_ref() == Some(target))
                    || resolved_versioned.keys().any(|(version, _)| version == target);
                if !found {
                    return Err(MigrationError::TargetNotFound(target.to_string()));
                }
            }
        }

        let has_applied_migration = versioned_rows
            .iter()
            .any(|row| !row.migration.migration_type.is_synthetic());
        if !has_applied_migration {
            if let Some((version, _)) = resolved_versioned
                .keys()
                .filter(|(_, ty)| ty.is_baseline_migration())
                .next_back()
            {
                ctx.latest_baseline_migration = version.clone();
            }
        }

        let mut latest_runs: HashMap<String, i32> = HashMap::new();
        for row in &repeatable_rows {
            if row.migration.migration_type == MigrationType::Delete {
                continue;
            }
            let rank = latest_runs
                .entry(row.migration.description.clone())
                .or_insert(row.migration.installed_rank);
            *rank = (*rank).max(row.migration.installed_rank);
        }
        ctx.latest_repeatable_runs = latest_runs;

        let context = Arc::new(ctx);
        let mut infos = Vec::with_capacity(versioned_rows.len() + repeatable_rows.len());
        let mut pending_versioned = resolved_versioned.clone();

        for row in versioned_rows {
            let key = (
                row.migration.version.clone().unwrap_or(MigrationVersion::EMPTY),
                row.migration.migration_type,
            );
            let resolved = resolved_versioned.get(&key).cloned();
            let live = !row.attributes.deleted
                && !row.attributes.undone
                && row.migration.migration_type != MigrationType::Delete;
            if resolved.is_some() && live {
                pending_versioned.remove(&key);
            }
            infos.push(MigrationInfo::new(
                resolved,
                Some(row.migration),
                context.clone(),
                row.attributes,
            ));
        }
        for migration in pending_versioned.into_values() {
            infos.push(MigrationInfo::new(
                Some(migration),
                None,
                context.clone(),
                AppliedAttributes::default(),
            ));
        }

        let mut pending_repeatable = resolved_repeatable.clone();
        for row in repeatable_rows {
            let description = &row.migration.description;
            let resolved = resolved_repeatable.get(description).cloned();
            let is_latest = context.latest_repeatable_runs.get(description) == Some(&row.migration.installed_rank);
            let live = !row.attributes.deleted && row.migration.migration_type != MigrationType::Delete;
            if live
                && is_latest
                && resolved.as_ref().is_some_and(|r| r.checksum_matches(row.migration.checksum))
            {
                pending_repeatable.remove(description);
            }
            infos.push(MigrationInfo::new(
                resolved,
                Some(row.migration),
                context.clone(),
                row.attributes,
            ));
        }
        for migration in pending_repeatable.into_values() {
            infos.push(MigrationInfo::new(
                Some(migration),
                None,
                context.clone(),
                AppliedAttributes::default(),
            ));
        }

        infos.sort_by(MigrationInfo::display_order);

        debug!(
            migrations = infos.len(),
            last_applied = %context.last_applied,
            last_resolved = %context.last_resolved,
            "Refreshed migration info"
        );

        Ok(Self { infos, context })
    }

    /// Every migration in display order.
    pub fn all(&self) -> &[MigrationInfo] {
        &self.infos
    }

    /// Migrations waiting to be applied.
    pub fn pending(&self) -> Vec<&MigrationInfo> {
        self.filter(|state| state == MigrationState::Pending)
    }

    /// Migrations with a history row.
    pub fn applied(&self) -> Vec<&MigrationInfo> {
        self.filter(|state| state.is_applied())
    }

    /// Migrations with a resolved side.
    pub fn resolved(&self) -> Vec<&MigrationInfo> {
        self.filter(|state| state.is_resolved())
    }

    /// Failed migrations.
    pub fn failed(&self) -> Vec<&MigrationInfo> {
        self.filter(|state| state.is_failed())
    }

    /// Applied migrations newer than every resolved one.
    pub fn future(&self) -> Vec<&MigrationInfo> {
        self.filter(|state| {
            matches!(
                state,
                MigrationState::FutureSuccess | MigrationState::FutureFailed
            )
        })
    }

    /// Migrations applied out of order.
    pub fn out_of_order(&self) -> Vec<&MigrationInfo> {
        self.filter(|state| state == MigrationState::OutOfOrder)
    }

    /// The current schema version: the highest applied live versioned
    /// migration, else the last applied live repeatable one.
    pub fn current(&self) -> Option<&MigrationInfo> {
        let is_live = |info: &&MigrationInfo| {
            info.state().is_applied()
                && info.state() != MigrationState::Deleted
                && info.state() != MigrationState::Undone
                && info.migration_type() != MigrationType::Delete
                && !info.migration_type().is_undo()
        };

        let versioned = self
            .infos
            .iter()
            .filter(is_live)
            .filter(|info| info.version().is_some())
            .max_by(|a, b| a.version().cmp(&b.version()));
        if versioned.is_some() {
            return versioned;
        }
        self.infos.iter().rev().find(is_live)
    }

    /// Validation errors of every migration, in display order.
    pub fn validate(&self) -> Vec<ValidationError> {
        self.infos.iter().filter_map(MigrationInfo::validate).collect()
    }

    /// Shared refresh context.
    pub fn context(&self) -> &ReconciliationContext {
        &self.context
    }

    fn filter(&self, predicate: impl Fn(MigrationState) -> bool) -> Vec<&MigrationInfo> {
        self.infos.iter().filter(|info| predicate(info.state())).collect()
    }
}

/// Split the history into versioned and repeatable rows, recording markers,
/// baselines, deletions and undos.
fn walk_history(
    applied: Vec<AppliedMigration>,
    ctx: &mut ReconciliationContext,
) -> MigrateResult<(Vec<AppliedRow>, Vec<AppliedRow>)> {
    let mut versioned: Vec<AppliedRow> = Vec::new();
    let mut repeatable: Vec<AppliedRow> = Vec::new();

    for migration in applied {
        let ty = migration.migration_type;
        match migration.version.clone() {
            Some(version) => {
                if ty == MigrationType::Schema {
                    ctx.schema_marker = Some(version.clone());
                }
                if ty.is_baseline() && version > ctx.baseline {
                    ctx.baseline = version.clone();
                }
                if migration.success && ty == MigrationType::Delete {
                    let target = versioned.iter_mut().rev().find(|row| {
                        !row.migration.migration_type.is_synthetic()
                            && row.migration.version.as_ref() == Some(&version)
                    });
                    if let Some(row) = target {
                        if row.attributes.deleted {
                            return Err(MigrationError::corrupted_history(format!(
                                "multiple delete entries for version {version}"
                            )));
                        }
                        row.attributes.deleted = true;
                    }
                }
                if migration.success && ty.is_undo() {
                    let target = versioned.iter_mut().rev().find(|row| {
                        !row.migration.migration_type.is_synthetic()
                            && !row.migration.migration_type.is_undo()
                            && !row.attributes.deleted
                            && row.migration.version.as_ref() == Some(&version)
                    });
                    if let Some(row) = target {
                        row.attributes.undone = true;
                    }
                }
                versioned.push(AppliedRow {
                    migration,
                    attributes: AppliedAttributes::default(),
                });
            }
            None => {
                let description = migration.description.clone();
                let deletes = migration.success && ty == MigrationType::Delete;
                repeatable.push(AppliedRow {
                    migration,
                    attributes: AppliedAttributes::default(),
                });
                if deletes {
                    let target = repeatable.iter_mut().rev().find(|row| {
                        !row.migration.migration_type.is_synthetic()
                            && row.migration.description == description
                    });
                    if let Some(row) = target {
                        row.attributes.deleted = true;
                    }
                }
            }
        }
    }

    Ok((versioned, repeatable))
}

/// Flag rows applied after a newer version and compute the last applied
/// version.
fn mark_out_of_order(rows: &mut [AppliedRow], ctx: &mut ReconciliationContext) {
    for row in rows.iter_mut() {
        if row.migration.migration_type.is_undo() {
            continue;
        }
        let Some(version) = row.migration.version.as_ref() else {
            continue;
        };
        if *version > ctx.last_applied {
            let live = row.migration.migration_type != MigrationType::Delete
                && !row.attributes.deleted
                && !row.attributes.undone;
            if live {
                ctx.last_applied = version.clone();
            }
        } else {
            row.attributes.out_of_order = true;
        }
    }
}
