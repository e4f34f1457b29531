//! Migration configuration.
//!
//! Configuration is usually read from a TOML file:
//!
//! ```toml
//! dialect = "postgresql"
//! locations = ["filesystem:db/migrations"]
//! schema = "app"
//! out_of_order = true
//! ignore_migration_patterns = ["*:future", "repeatable:missing"]
//!
//! [placeholders]
//! owner = "${APP_OWNER}"
//! ```
//!
//! `${VAR}` references to environment variables are expanded before
//! parsing. References to unset variables are left as they are, so script
//! placeholders using the same syntax survive.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex_lite::Regex;
use schemaflow_sql::{Dialect, PlaceholderReplacer};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};
use crate::history::DEFAULT_HISTORY_TABLE;
use crate::resolver::MigrationNaming;
use crate::service::InfoOptions;
use crate::validation::{MigrationPattern, ValidatePattern, ValidationPolicy};
use crate::version::MigrationVersion;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static env pattern"));

/// Settings for a migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Database dialect name.
    pub dialect: String,
    /// Directories to read migrations from.
    pub locations: Vec<String>,
    /// Name of the schema history table.
    pub table: String,
    /// Schema holding the history table.
    pub schema: String,
    /// Highest version to migrate to. `current` and `latest` are accepted.
    pub target: Option<MigrationVersion>,
    /// Allow migrations older than the last applied one to run.
    pub out_of_order: bool,
    /// Only migrate these versions or repeatable descriptions.
    pub cherry_pick: Vec<MigrationPattern>,
    /// Validation errors for migrations matching these are ignored.
    pub ignore_migration_patterns: Vec<ValidatePattern>,
    /// Validate before migrating.
    pub validate_on_migrate: bool,
    /// Fail when `target` matches no migration.
    pub fail_on_missing_target: bool,
    /// Run all pending migrations in one transaction.
    pub group: bool,
    /// Allow transactional and non-transactional statements together.
    pub mixed: bool,
    /// Version recorded by `baseline`.
    pub baseline_version: MigrationVersion,
    /// Description recorded by `baseline`.
    pub baseline_description: String,
    /// Recorded as `installed_by`.
    pub installed_by: String,
    /// Delay between lock attempts in milliseconds.
    pub lock_retry_interval_ms: u64,
    /// Give up after this many lock attempts. Unbounded when unset.
    pub lock_max_attempts: Option<u32>,
    /// Script placeholder values.
    pub placeholders: BTreeMap<String, String>,
    /// Placeholder prefix.
    pub placeholder_prefix: String,
    /// Placeholder suffix.
    pub placeholder_suffix: String,
    /// Whether placeholders are replaced at all.
    pub placeholder_replacement: bool,
    /// Fail on malformed migration file names instead of skipping them.
    pub validate_migration_naming: bool,
    /// File naming conventions.
    pub naming: MigrationNaming,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            dialect: "postgresql".to_string(),
            locations: vec!["migrations".to_string()],
            table: DEFAULT_HISTORY_TABLE.to_string(),
            schema: "public".to_string(),
            target: None,
            out_of_order: false,
            cherry_pick: Vec::new(),
            ignore_migration_patterns: ValidatePattern::parse("*:future").into_iter().collect(),
            validate_on_migrate: true,
            fail_on_missing_target: true,
            group: false,
            mixed: false,
            baseline_version: MigrationVersion::parse("1").unwrap_or(MigrationVersion::EMPTY),
            baseline_description: "<< Baseline >>".to_string(),
            installed_by: "schemaflow".to_string(),
            lock_retry_interval_ms: 100,
            lock_max_attempts: None,
            placeholders: BTreeMap::new(),
            placeholder_prefix: "${".to_string(),
            placeholder_suffix: "}".to_string(),
            placeholder_replacement: true,
            validate_migration_naming: false,
            naming: MigrationNaming::default(),
        }
    }
}

impl MigrateConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML, expanding `${VAR}` environment references first.
    pub fn from_toml_str(content: &str) -> MigrateResult<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)
            .map_err(|e| MigrationError::config(format!("Failed to parse configuration: {e}")))?;
        config.check()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            MigrationError::config(format!(
                "Failed to read configuration file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> MigrateResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MigrationError::config(format!("Failed to serialize configuration: {e}")))
    }

    fn check(&self) -> MigrateResult<()> {
        if !self.baseline_version.is_concrete() {
            return Err(MigrationError::config(format!(
                "baseline_version must be a concrete version, got {}",
                self.baseline_version
            )));
        }
        if self.table.trim().is_empty() {
            return Err(MigrationError::config("table must not be empty"));
        }
        self.resolve_dialect()?;
        Ok(())
    }

    /// The configured dialect.
    pub fn resolve_dialect(&self) -> MigrateResult<Dialect> {
        Dialect::from_name(&self.dialect)
            .ok_or_else(|| MigrationError::config(format!("Unknown dialect: {}", self.dialect)))
    }

    /// Placeholder replacer including the built-in `schemaflow:*` values.
    pub fn placeholder_replacer(&self) -> MigrateResult<PlaceholderReplacer> {
        if !self.placeholder_replacement {
            return Ok(PlaceholderReplacer::disabled());
        }
        let replacer = PlaceholderReplacer::with_syntax(
            self.placeholders.clone(),
            &self.placeholder_prefix,
            &self.placeholder_suffix,
        )?;
        Ok(replacer
            .with_placeholder("schemaflow:defaultSchema", self.schema.clone())
            .with_placeholder("schemaflow:table", self.table.clone())
            .with_placeholder("schemaflow:user", self.installed_by.clone()))
    }

    /// Options for reconciliation and validation.
    pub fn info_options(&self) -> InfoOptions {
        InfoOptions::new()
            .target(self.target.clone())
            .out_of_order(self.out_of_order)
            .cherry_pick(self.cherry_pick.clone())
            .ignore_patterns(self.ignore_migration_patterns.clone())
            .fail_on_missing_target(self.fail_on_missing_target)
    }

    /// Validation policy used by `migrate`, which tolerates pending
    /// migrations.
    pub fn migrate_policy(&self) -> ValidationPolicy {
        ValidationPolicy::from_patterns(&self.ignore_migration_patterns).allow_pending(true)
    }

    /// Delay between lock attempts.
    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }

    /// Set the dialect name.
    pub fn dialect(mut self, dialect: impl Into<String>) -> Self {
        self.dialect = dialect.into();
        self
    }

    /// Set the migration locations.
    pub fn locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locations = locations.into_iter().map(Into::into).collect();
        self
    }

    /// Set the history table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Set the schema name.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
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

    /// Only migrate the given versions or descriptions.
    pub fn cherry_pick<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cherry_pick = patterns.into_iter().map(MigrationPattern::new).collect();
        self
    }

    /// Set ignore patterns.
    pub fn ignore_migration_patterns(mut self, patterns: Vec<ValidatePattern>) -> Self {
        self.ignore_migration_patterns = patterns;
        self
    }

    /// Validate before migrating.
    pub fn validate_on_migrate(mut self, validate: bool) -> Self {
        self.validate_on_migrate = validate;
        self
    }

    /// Fail on a missing target.
    pub fn fail_on_missing_target(mut self, fail: bool) -> Self {
        self.fail_on_missing_target = fail;
        self
    }

    /// Run pending migrations in one transaction.
    pub fn group(mut self, group: bool) -> Self {
        self.group = group;
        self
    }

    /// Allow mixed transactional modes.
    pub fn mixed(mut self, mixed: bool) -> Self {
        self.mixed = mixed;
        self
    }

    /// Set the baseline version and description.
    pub fn baseline(mut self, version: MigrationVersion, description: impl Into<String>) -> Self {
        self.baseline_version = version;
        self.baseline_description = description.into();
        self
    }

    /// Set the installing user.
    pub fn installed_by(mut self, user: impl Into<String>) -> Self {
        self.installed_by = user.into();
        self
    }

    /// Configure lock retries.
    pub fn lock_retry(mut self, interval_ms: u64, max_attempts: Option<u32>) -> Self {
        self.lock_retry_interval_ms = interval_ms;
        self.lock_max_attempts = max_attempts;
        self
    }

    /// Add a placeholder value.
    pub fn placeholder(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.placeholders.insert(name.into(), value.into());
        self
    }

    /// Enable or disable placeholder replacement.
    pub fn placeholder_replacement(mut self, enabled: bool) -> Self {
        self.placeholder_replacement = enabled;
        self
    }
}

/// Expand `${VAR}` references to set environment variables.
fn expand_env_vars(content: &str) -> String {
    ENV_VAR
        .replace_all(content, |caps: &regex_lite::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
