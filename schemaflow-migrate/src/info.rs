//! Per-migration view combining the resolved and applied sides.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::migration::{AppliedMigration, MigrationType, NO_DESCRIPTION_MARKER, ResolvedMigration};
use crate::state::MigrationState;
use crate::validation::{
    MigrationPattern, ValidatePattern, ValidationError, ValidationErrorKind, ValidationPolicy,
};
use crate::version::MigrationVersion;

/// Longest description stored in the history table.
pub const MAX_DESCRIPTION_LENGTH: usize = 200;

/// Shorten a description to fit the history table.
pub fn abbreviate_description(description: &str) -> String {
    if description.chars().count() <= MAX_DESCRIPTION_LENGTH {
        return description.to_string();
    }
    let mut short: String = description.chars().take(MAX_DESCRIPTION_LENGTH - 3).collect();
    short.push_str("...");
    short
}

/// Facts shared by every [`MigrationInfo`] of one refresh.
#[derive(Debug, Clone)]
pub struct ReconciliationContext {
    /// Target version after resolving `CURRENT`. `None` means no limit.
    pub target: Option<MigrationVersion>,
    /// Whether migrations older than the last applied one may still run.
    pub out_of_order: bool,
    /// Migrations selected for cherry-picking. Empty selects all.
    pub cherry_pick: Vec<MigrationPattern>,
    /// Validation errors for migrations matching these are ignored.
    pub ignore_patterns: Vec<ValidatePattern>,
    /// Highest applied baseline version.
    pub baseline: MigrationVersion,
    /// Highest resolved baseline migration when nothing has been applied yet.
    pub latest_baseline_migration: MigrationVersion,
    /// Highest resolved version.
    pub last_resolved: MigrationVersion,
    /// Highest live applied version.
    pub last_applied: MigrationVersion,
    /// Version of the schema-creation marker, if any.
    pub schema_marker: Option<MigrationVersion>,
    /// Highest installed rank per repeatable description.
    pub latest_repeatable_runs: HashMap<String, i32>,
    /// Which discrepancies validation tolerates.
    pub policy: ValidationPolicy,
}

impl Default for ReconciliationContext {
    fn default() -> Self {
        Self {
            target: None,
            out_of_order: false,
            cherry_pick: Vec::new(),
            ignore_patterns: Vec::new(),
            baseline: MigrationVersion::EMPTY,
            latest_baseline_migration: MigrationVersion::EMPTY,
            last_resolved: MigrationVersion::EMPTY,
            last_applied: MigrationVersion::EMPTY,
            schema_marker: None,
            latest_repeatable_runs: HashMap::new(),
            policy: ValidationPolicy::default(),
        }
    }
}

/// Markers computed for an applied row while walking the history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AppliedAttributes {
    pub(crate) out_of_order: bool,
    pub(crate) deleted: bool,
    pub(crate) undone: bool,
}

/// The reconciled view of one migration.
///
/// At least one of the resolved and applied sides is present. Accessors
/// prefer the applied side, since that is what the database recorded.
#[derive(Debug, Clone)]
pub struct MigrationInfo {
    resolved: Option<ResolvedMigration>,
    applied: Option<AppliedMigration>,
    context: Arc<ReconciliationContext>,
    attributes: AppliedAttributes,
    state: MigrationState,
}

impl MigrationInfo {
    pub(crate) fn new(
        resolved: Option<ResolvedMigration>,
        applied: Option<AppliedMigration>,
        context: Arc<ReconciliationContext>,
        attributes: AppliedAttributes,
    ) -> Self {
        debug_assert!(resolved.is_some() || applied.is_some());
        let state = compute_state(resolved.as_ref(), applied.as_ref(), &context, attributes);
        Self {
            resolved,
            applied,
            context,
            attributes,
            state,
        }
    }

    /// The resolved side.
    pub fn resolved(&self) -> Option<&ResolvedMigration> {
        self.resolved.as_ref()
    }

    /// The applied side.
    pub fn applied(&self) -> Option<&AppliedMigration> {
        self.applied.as_ref()
    }

    /// Shared refresh context.
    pub fn context(&self) -> &ReconciliationContext {
        &self.context
    }

    /// Reconciled state.
    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Version, `None` for repeatable migrations.
    pub fn version(&self) -> Option<&MigrationVersion> {
        match (&self.applied, &self.resolved) {
            (Some(applied), _) => applied.version.as_ref(),
            (None, Some(resolved)) => resolved.version.as_ref(),
            (None, None) => None,
        }
    }

    /// Description.
    pub fn description(&self) -> &str {
        match (&self.applied, &self.resolved) {
            (Some(applied), _) => &applied.description,
            (None, Some(resolved)) => &resolved.description,
            (None, None) => "",
        }
    }

    /// Migration type.
    pub fn migration_type(&self) -> MigrationType {
        match (&self.applied, &self.resolved) {
            (Some(applied), _) => applied.migration_type,
            (None, Some(resolved)) => resolved.migration_type,
            (None, None) => MigrationType::Sql,
        }
    }

    /// Checksum.
    pub fn checksum(&self) -> Option<i32> {
        match (&self.applied, &self.resolved) {
            (Some(applied), _) => applied.checksum,
            (None, Some(resolved)) => resolved.checksum,
            (None, None) => None,
        }
    }

    /// Script name.
    pub fn script(&self) -> &str {
        match (&self.applied, &self.resolved) {
            (Some(applied), _) => &applied.script,
            (None, Some(resolved)) => &resolved.script,
            (None, None) => "",
        }
    }

    /// Installed rank, if applied.
    pub fn installed_rank(&self) -> Option<i32> {
        self.applied.as_ref().map(|a| a.installed_rank)
    }

    /// Installation time, if applied.
    pub fn installed_on(&self) -> Option<DateTime<Utc>> {
        self.applied.as_ref().map(|a| a.installed_on)
    }

    /// Installing user, if applied.
    pub fn installed_by(&self) -> Option<&str> {
        self.applied.as_ref().map(|a| a.installed_by.as_str())
    }

    /// Execution time in milliseconds, if applied.
    pub fn execution_time(&self) -> Option<i32> {
        self.applied.as_ref().map(|a| a.execution_time)
    }

    /// Where the resolved migration was found, empty if unresolved.
    pub fn physical_location(&self) -> &str {
        self.resolved
            .as_ref()
            .map(|r| r.physical_location.as_str())
            .unwrap_or("")
    }

    /// Whether the migration can run inside a transaction.
    pub fn can_execute_in_transaction(&self) -> bool {
        self.resolved
            .as_ref()
            .is_some_and(|r| r.executor.can_execute_in_transaction())
    }

    /// Whether the applied row was marked deleted.
    pub fn is_deleted(&self) -> bool {
        self.attributes.deleted
    }

    fn is_conditionally_skipped(&self) -> bool {
        is_conditionally_skipped(self.resolved.as_ref())
    }

    /// Check this migration, returning the first problem found.
    pub fn validate(&self) -> Option<ValidationError> {
        let state = self.state;
        let ctx = &self.context;
        let policy = ctx.policy;
        let versioned = self.version().is_some();

        if matches!(
            state,
            MigrationState::Undone
                | MigrationState::AboveTarget
                | MigrationState::Deleted
                | MigrationState::Available
        ) {
            return None;
        }
        if ctx.ignore_patterns.iter().any(|p| p.matches(versioned, state)) {
            return None;
        }

        if state.is_failed() && (!policy.future || state != MigrationState::FutureFailed) {
            return Some(match self.version() {
                None => self.error(
                    ValidationErrorKind::FailedRepeatableMigration,
                    format!(
                        "Detected failed repeatable migration: {}. Please remove any half-completed changes then run repair to fix the schema history.",
                        self.description()
                    ),
                ),
                Some(version) => self.error(
                    ValidationErrorKind::FailedVersionedMigration,
                    format!(
                        "Detected failed migration to version {} ({}). Please remove any half-completed changes then run repair to fix the schema history.",
                        version,
                        self.description()
                    ),
                ),
            });
        }

        if let (None, Some(applied)) = (&self.resolved, &self.applied) {
            let tolerated_missing = policy.missing
                && matches!(state, MigrationState::MissingSuccess | MigrationState::MissingFailed);
            let tolerated_future = policy.future
                && matches!(state, MigrationState::FutureSuccess | MigrationState::FutureFailed);
            if !applied.migration_type.is_synthetic()
                && !applied.migration_type.is_undo()
                && state != MigrationState::Superseded
                && !tolerated_missing
                && !tolerated_future
            {
                return Some(match &applied.version {
                    Some(version) => self.error(
                        ValidationErrorKind::AppliedVersionedMigrationNotResolved,
                        format!(
                            "Detected applied migration not resolved locally: {version}. If you removed this migration intentionally, run repair to mark the migration as deleted."
                        ),
                    ),
                    None => self.error(
                        ValidationErrorKind::AppliedRepeatableMigrationNotResolved,
                        format!(
                            "Detected applied migration not resolved locally: {}. If you removed this migration intentionally, run repair to mark the migration as deleted.",
                            applied.description
                        ),
                    ),
                });
            }
        }

        if !policy.ignored && state == MigrationState::Ignored {
            if self.is_conditionally_skipped() {
                return None;
            }
            return Some(match self.version() {
                Some(version) => self.error(
                    ValidationErrorKind::ResolvedVersionedMigrationNotApplied,
                    format!(
                        "Detected resolved migration not applied to database: {version}. To ignore this migration, add '*:ignored' to the ignore migration patterns. To allow executing this migration, enable out of order."
                    ),
                ),
                None => self.error(
                    ValidationErrorKind::ResolvedRepeatableMigrationNotApplied,
                    format!(
                        "Detected resolved repeatable migration not applied to database: {}. To ignore this migration, add '*:ignored' to the ignore migration patterns.",
                        self.description()
                    ),
                ),
            });
        }

        if !policy.pending && state == MigrationState::Pending {
            return Some(match self.version() {
                Some(version) => self.error(
                    ValidationErrorKind::ResolvedVersionedMigrationNotApplied,
                    format!(
                        "Detected resolved migration not applied to database: {version}. To fix this error, either run migrate, or add '*:pending' to the ignore migration patterns."
                    ),
                ),
                None => self.error(
                    ValidationErrorKind::ResolvedRepeatableMigrationNotApplied,
                    format!(
                        "Detected resolved repeatable migration not applied to database: {}. To fix this error, either run migrate, or add '*:pending' to the ignore migration patterns.",
                        self.description()
                    ),
                ),
            });
        }

        if !policy.pending && state == MigrationState::Outdated {
            return Some(self.error(
                ValidationErrorKind::OutdatedRepeatableMigration,
                format!(
                    "Detected outdated resolved repeatable migration that should be re-applied to database: {}. Run migrate to execute this migration.",
                    self.description()
                ),
            ));
        }

        if let (Some(resolved), Some(applied)) = (&self.resolved, &self.applied) {
            if applied.migration_type == MigrationType::Delete || applied.migration_type.is_undo() {
                return None;
            }
            let above_baseline = applied
                .version
                .as_ref()
                .is_none_or(|v| v.is_newer_than(&ctx.baseline));
            if !above_baseline {
                return None;
            }

            let identifier = match &applied.version {
                Some(version) => format!("version {version}"),
                None => applied.script.clone(),
            };

            if resolved.migration_type != applied.migration_type {
                return Some(self.error(
                    ValidationErrorKind::TypeMismatch,
                    mismatch_message(
                        "type",
                        &identifier,
                        applied.migration_type,
                        resolved.migration_type,
                    ),
                ));
            }

            let check_checksum = resolved.version.is_some()
                || (policy.pending
                    && !matches!(state, MigrationState::Outdated | MigrationState::Superseded));
            if check_checksum && !resolved.checksum_matches(applied.checksum) {
                return Some(self.error(
                    ValidationErrorKind::ChecksumMismatch,
                    mismatch_message(
                        "checksum",
                        &identifier,
                        display_checksum(applied.checksum),
                        display_checksum(resolved.checksum),
                    ),
                ));
            }

            if description_mismatch(resolved, applied) {
                return Some(self.error(
                    ValidationErrorKind::DescriptionMismatch,
                    mismatch_message("description", &identifier, &applied.description, &resolved.description),
                ));
            }
        }

        None
    }

    fn error(&self, kind: ValidationErrorKind, message: String) -> ValidationError {
        ValidationError::new(
            kind,
            self.version().cloned(),
            self.description(),
            self.script(),
            message,
        )
    }

    fn sort_group(&self) -> u8 {
        if self.installed_rank().is_some() {
            1
        } else if matches!(
            self.state,
            MigrationState::BelowBaseline | MigrationState::BaselineIgnored
        ) {
            0
        } else {
            2
        }
    }

    /// Compare by version, forward before undo, then repeatables by
    /// description.
    pub fn compare_version(&self, other: &Self) -> Ordering {
        match (self.version(), other.version()) {
            (Some(a), Some(b)) => a.cmp(b).then_with(|| {
                self.migration_type()
                    .is_undo()
                    .cmp(&other.migration_type().is_undo())
            }),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.description().cmp(other.description()),
        }
    }

    /// Total display order: skipped baselined migrations, then the history
    /// by installed rank, then everything not yet applied.
    pub fn display_order(&self, other: &Self) -> Ordering {
        self.sort_group()
            .cmp(&other.sort_group())
            .then_with(|| match (self.installed_rank(), other.installed_rank()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => self.compare_version(other),
            })
    }
}

fn is_conditionally_skipped(resolved: Option<&ResolvedMigration>) -> bool {
    resolved.is_some_and(|r| !r.executor.should_execute())
}

fn compute_state(
    resolved: Option<&ResolvedMigration>,
    applied: Option<&AppliedMigration>,
    ctx: &ReconciliationContext,
    attributes: AppliedAttributes,
) -> MigrationState {
    if attributes.undone {
        return MigrationState::Undone;
    }
    if attributes.deleted {
        return MigrationState::Deleted;
    }

    let Some(applied) = applied else {
        return pending_state(resolved, ctx);
    };

    match applied.migration_type {
        MigrationType::Delete => return MigrationState::Success,
        MigrationType::Baseline => return MigrationState::Baseline,
        _ => {}
    }

    if resolved.is_none() && is_latest_run(applied, ctx) {
        if applied.migration_type == MigrationType::Schema {
            return MigrationState::Success;
        }
        let missing = applied
            .version
            .as_ref()
            .is_none_or(|v| *v < ctx.last_resolved);
        return match (missing, applied.success) {
            (true, true) => MigrationState::MissingSuccess,
            (true, false) => MigrationState::MissingFailed,
            (false, true) => MigrationState::FutureSuccess,
            (false, false) => MigrationState::FutureFailed,
        };
    }

    if !applied.success {
        return MigrationState::Failed;
    }

    if applied.version.is_none() {
        let latest = ctx.latest_repeatable_runs.get(&applied.description).copied();
        if latest == Some(applied.installed_rank) {
            if resolved.is_some_and(|r| r.checksum_matches(applied.checksum)) {
                return MigrationState::Success;
            }
            return MigrationState::Outdated;
        }
        return MigrationState::Superseded;
    }

    if attributes.out_of_order {
        return MigrationState::OutOfOrder;
    }
    MigrationState::Success
}

fn pending_state(resolved: Option<&ResolvedMigration>, ctx: &ReconciliationContext) -> MigrationState {
    let Some(resolved) = resolved else {
        return MigrationState::Pending;
    };
    if resolved.migration_type.is_undo() {
        return MigrationState::Available;
    }
    if !resolved.executor.should_execute() {
        return MigrationState::Ignored;
    }
    let Some(version) = &resolved.version else {
        return MigrationState::Pending;
    };

    if *version < ctx.baseline {
        return MigrationState::BelowBaseline;
    }
    if ctx.target.as_ref().is_some_and(|target| version > target) {
        return MigrationState::AboveTarget;
    }
    if *version < ctx.last_applied && !ctx.out_of_order {
        return MigrationState::Ignored;
    }
    let latest_baseline = &ctx.latest_baseline_migration;
    if *version < *latest_baseline
        || (*version == *latest_baseline && !resolved.migration_type.is_baseline_migration())
    {
        return MigrationState::BaselineIgnored;
    }
    MigrationState::Pending
}

fn is_latest_run(applied: &AppliedMigration, ctx: &ReconciliationContext) -> bool {
    if applied.version.is_some() {
        return true;
    }
    ctx.latest_repeatable_runs
        .get(&applied.description)
        .is_none_or(|rank| *rank == applied.installed_rank)
}

fn description_mismatch(resolved: &ResolvedMigration, applied: &AppliedMigration) -> bool {
    if applied.description == NO_DESCRIPTION_MARKER {
        return !resolved.description.is_empty();
    }
    abbreviate_description(&resolved.description) != applied.description
}

fn display_checksum(checksum: Option<i32>) -> String {
    checksum.map_or_else(|| "null".to_string(), |c| c.to_string())
}

fn mismatch_message(
    what: &str,
    identifier: &str,
    applied: impl std::fmt::Display,
    resolved: impl std::fmt::Display,
) -> String {
    format!(
        "Migration {what} mismatch for migration {identifier}\n\
         -> Applied to database : {applied}\n\
         -> Resolved locally    : {resolved}. \
         Either revert the changes to the migration, or run repair to update the schema history."
    )
}
