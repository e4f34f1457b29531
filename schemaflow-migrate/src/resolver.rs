//! Discovery of SQL migration scripts and their conversion into resolved
//! migrations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use schemaflow_sql::{Dialect, PlaceholderReplacer, SqlScript};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::migration::{MigrationType, ResolvedMigration, SqlMigrationExecutor};
use crate::version::MigrationVersion;

/// Extension of per-script configuration sidecars.
pub const SCRIPT_CONFIG_SUFFIX: &str = ".conf";

/// A script found in a source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResource {
    /// Name relative to its location, with `/` separators.
    pub name: String,
    /// Unmodified script text.
    pub raw_text: String,
    /// Where the script was found.
    pub physical_path: String,
    /// Contents of the `<script>.conf` sidecar, if present.
    pub config_text: Option<String>,
}

impl ScriptResource {
    /// Create a resource without a sidecar.
    pub fn new(name: impl Into<String>, raw_text: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            physical_path: name.clone(),
            name,
            raw_text: raw_text.into(),
            config_text: None,
        }
    }

    /// Attach sidecar configuration.
    pub fn with_config(mut self, config_text: impl Into<String>) -> Self {
        self.config_text = Some(config_text.into());
        self
    }

    /// The file name without directories.
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Lists migration scripts.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    /// Every script, in a deterministic order.
    async fn list_scripts(&self) -> MigrateResult<Vec<ScriptResource>>;
}

/// Reads scripts from directories on the local file system.
#[derive(Debug, Clone)]
pub struct FileSystemScriptSource {
    locations: Vec<PathBuf>,
    suffixes: Vec<String>,
}

impl FileSystemScriptSource {
    /// Create a source over `locations`. A `filesystem:` prefix is accepted.
    pub fn new<I, P>(locations: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        Self {
            locations: locations
                .into_iter()
                .map(|l| {
                    let l = l.as_ref();
                    PathBuf::from(l.strip_prefix("filesystem:").unwrap_or(l))
                })
                .collect(),
            suffixes: vec![".sql".to_string()],
        }
    }

    /// Only pick up files with one of these suffixes.
    pub fn suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.suffixes = suffixes;
        self
    }

    fn is_script(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }

    async fn scan_location(&self, root: &Path) -> MigrateResult<Vec<ScriptResource>> {
        let mut found = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(MigrationError::Io)?;
            while let Some(entry) = entries.next_entry().await.map_err(MigrationError::Io)? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(MigrationError::Io)?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !self.is_script(&path) {
                    continue;
                }

                let raw_text = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(MigrationError::Io)?;
                let mut sidecar = path.clone().into_os_string();
                sidecar.push(SCRIPT_CONFIG_SUFFIX);
                let sidecar = PathBuf::from(sidecar);
                let config_text = if tokio::fs::try_exists(&sidecar).await.map_err(MigrationError::Io)? {
                    Some(
                        tokio::fs::read_to_string(&sidecar)
                            .await
                            .map_err(MigrationError::Io)?,
                    )
                } else {
                    None
                };

                found.push(ScriptResource {
                    name: relative_name(root, &path),
                    raw_text,
                    physical_path: path.display().to_string(),
                    config_text,
                });
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl ScriptSource for FileSystemScriptSource {
    async fn list_scripts(&self) -> MigrateResult<Vec<ScriptResource>> {
        let mut scripts = Vec::new();
        for location in &self.locations {
            if !tokio::fs::try_exists(location).await.map_err(MigrationError::Io)? {
                warn!(location = %location.display(), "Skipping filesystem location (not found)");
                continue;
            }
            let mut found = self.scan_location(location).await?;
            found.sort_by(|a, b| a.name.cmp(&b.name));
            debug!(location = %location.display(), scripts = found.len(), "Scanned location");
            scripts.extend(found);
        }
        Ok(scripts)
    }
}

fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// File name conventions for SQL migrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationNaming {
    /// Prefix of versioned migrations.
    pub versioned_prefix: String,
    /// Prefix of undo migrations.
    pub undo_prefix: String,
    /// Prefix of baseline migrations.
    pub baseline_prefix: String,
    /// Prefix of repeatable migrations.
    pub repeatable_prefix: String,
    /// Separator between version and description.
    pub separator: String,
    /// Accepted file suffixes.
    pub suffixes: Vec<String>,
}

impl Default for MigrationNaming {
    fn default() -> Self {
        Self {
            versioned_prefix: "V".to_string(),
            undo_prefix: "U".to_string(),
            baseline_prefix: "B".to_string(),
            repeatable_prefix: "R".to_string(),
            separator: "__".to_string(),
            suffixes: vec![".sql".to_string()],
        }
    }
}

/// The parts of a migration file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Kind implied by the prefix.
    pub migration_type: MigrationType,
    /// Version, `None` for repeatable migrations.
    pub version: Option<MigrationVersion>,
    /// Description with `_` turned into spaces.
    pub description: String,
}

impl MigrationNaming {
    /// Parse a file name. Returns `Ok(None)` when the name does not look like
    /// a migration at all, and an error when it does but is malformed.
    pub fn parse(&self, file_name: &str) -> MigrateResult<Option<ParsedName>> {
        let Some(stem) = self
            .suffixes
            .iter()
            .find_map(|suffix| file_name.strip_suffix(suffix.as_str()))
        else {
            return Ok(None);
        };

        let prefixes = [
            (&self.versioned_prefix, MigrationType::Sql),
            (&self.undo_prefix, MigrationType::UndoSql),
            (&self.baseline_prefix, MigrationType::SqlBaseline),
            (&self.repeatable_prefix, MigrationType::Sql),
        ];
        let mut candidates: Vec<_> = prefixes
            .iter()
            .filter(|(prefix, _)| !prefix.is_empty() && stem.starts_with(prefix.as_str()))
            .collect();
        candidates.sort_by_key(|(prefix, _)| std::cmp::Reverse(prefix.len()));
        let Some((prefix, migration_type)) = candidates.first() else {
            return Ok(None);
        };
        let repeatable = *prefix == &self.repeatable_prefix;

        let rest = &stem[prefix.len()..];
        let Some((version, description)) = rest.split_once(self.separator.as_str()) else {
            return Err(MigrationError::invalid_migration(format!(
                "Invalid SQL migration name: {file_name}. Missing separator '{}'",
                self.separator
            )));
        };
        let description = description.replace('_', " ").trim().to_string();

        if repeatable {
            if !version.is_empty() {
                return Err(MigrationError::invalid_migration(format!(
                    "Invalid repeatable migration name: {file_name}. Repeatable migrations must not have a version"
                )));
            }
            return Ok(Some(ParsedName {
                migration_type: MigrationType::Sql,
                version: None,
                description,
            }));
        }

        if version.is_empty() {
            return Err(MigrationError::invalid_migration(format!(
                "Invalid versioned migration name: {file_name}. A version is required"
            )));
        }
        let version = MigrationVersion::parse(version)?;
        Ok(Some(ParsedName {
            migration_type: *migration_type,
            version: Some(version),
            description,
        }))
    }
}

/// Per-script settings read from a `.conf` sidecar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptSettings {
    /// Overrides the transaction mode derived from the statements.
    pub execute_in_transaction: Option<bool>,
    /// When `false`, the migration is skipped and reported as IGNORED.
    pub should_execute: Option<bool>,
}

impl ScriptSettings {
    /// Parse `key=value` lines. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str, script: &str) -> MigrateResult<Self> {
        let mut settings = Self::default();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(MigrationError::invalid_migration(format!(
                    "Invalid line in configuration of {script}: {line}"
                )));
            };
            let flag = parse_bool(value.trim()).ok_or_else(|| {
                MigrationError::invalid_migration(format!(
                    "Invalid value for {} in configuration of {script}: {}",
                    key.trim(),
                    value.trim()
                ))
            })?;
            match key.trim() {
                "executeInTransaction" => settings.execute_in_transaction = Some(flag),
                "shouldExecute" => settings.should_execute = Some(flag),
                other => {
                    return Err(MigrationError::invalid_migration(format!(
                        "Unknown script configuration property '{other}' for {script}"
                    )));
                }
            }
        }
        Ok(settings)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Checksum of a script: CRC32 over its lines without terminators, with a
/// leading byte order mark removed.
pub fn calculate_checksum(text: &str) -> i32 {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut hasher = crc32fast::Hasher::new();
    for line in text.lines() {
        hasher.update(line.trim_end_matches('\r').as_bytes());
    }
    hasher.finalize() as i32
}

/// Turns SQL script resources into resolved migrations.
#[derive(Debug, Clone)]
pub struct SqlMigrationResolver {
    dialect: Dialect,
    naming: MigrationNaming,
    placeholders: PlaceholderReplacer,
    mixed: bool,
    strict_naming: bool,
}

impl SqlMigrationResolver {
    /// Create a resolver with default naming and no placeholders.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            naming: MigrationNaming::default(),
            placeholders: PlaceholderReplacer::new(Default::default()),
            mixed: false,
            strict_naming: false,
        }
    }

    /// Set the naming conventions.
    pub fn naming(mut self, naming: MigrationNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Set the placeholder replacer.
    pub fn placeholders(mut self, placeholders: PlaceholderReplacer) -> Self {
        self.placeholders = placeholders;
        self
    }

    /// Allow transactional and non-transactional statements in one script.
    pub fn mixed(mut self, mixed: bool) -> Self {
        self.mixed = mixed;
        self
    }

    /// Fail on malformed names instead of skipping them.
    pub fn strict_naming(mut self, strict: bool) -> Self {
        self.strict_naming = strict;
        self
    }

    /// List and resolve every script in `source`.
    pub async fn resolve_from(&self, source: &dyn ScriptSource) -> MigrateResult<Vec<ResolvedMigration>> {
        self.resolve(source.list_scripts().await?)
    }

    /// Resolve scripts, sorted by version with repeatables last.
    pub fn resolve(&self, scripts: Vec<ScriptResource>) -> MigrateResult<Vec<ResolvedMigration>> {
        let mut migrations: Vec<ResolvedMigration> = Vec::new();
        let mut versioned: HashMap<(MigrationVersion, MigrationType), String> = HashMap::new();
        let mut repeatable: HashMap<String, String> = HashMap::new();

        for script in scripts {
            let parsed = match self.naming.parse(script.file_name()) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => continue,
                Err(err) if !self.strict_naming => {
                    warn!(script = %script.name, error = %err, "Skipping script with invalid name");
                    continue;
                }
                Err(err) => return Err(err),
            };

            match &parsed.version {
                Some(version) => {
                    let key = (version.clone(), parsed.migration_type);
                    if let Some(first) = versioned.insert(key, script.physical_path.clone()) {
                        return Err(MigrationError::DuplicateMigration {
                            version: version.to_string(),
                            first,
                            second: script.physical_path.clone(),
                        });
                    }
                }
                None => {
                    if let Some(first) =
                        repeatable.insert(parsed.description.clone(), script.physical_path.clone())
                    {
                        return Err(MigrationError::invalid_migration(format!(
                            "Found more than one repeatable migration with description {}\nOffenders:\n-> {first}\n-> {}",
                            parsed.description, script.physical_path
                        )));
                    }
                }
            }

            migrations.push(self.resolve_script(script, parsed)?);
        }

        migrations.sort_by(|a, b| match (&a.version, &b.version) {
            (Some(x), Some(y)) => x.cmp(y).then(a.migration_type.cmp(&b.migration_type)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.description.cmp(&b.description),
        });
        debug!(migrations = migrations.len(), "Resolved SQL migrations");
        Ok(migrations)
    }

    fn resolve_script(&self, script: ScriptResource, parsed: ParsedName) -> MigrateResult<ResolvedMigration> {
        let checksum = calculate_checksum(&script.raw_text);
        let settings = match &script.config_text {
            Some(text) => ScriptSettings::parse(text, &script.name)?,
            None => ScriptSettings::default(),
        };

        let replacer = self
            .placeholders
            .clone()
            .with_placeholder("schemaflow:filename", script.file_name());
        let text = replacer.replace(&script.raw_text)?;
        let sql = SqlScript::parse(&text, &self.dialect, self.mixed)
            .map_err(|err| MigrationError::migration_failed(script.name.clone(), err.into()))?;

        let mut executor = SqlMigrationExecutor::new(sql);
        if let Some(in_transaction) = settings.execute_in_transaction {
            executor = executor.with_execute_in_transaction(in_transaction);
        }
        if let Some(should_execute) = settings.should_execute {
            executor = executor.with_should_execute(should_execute);
        }

        Ok(ResolvedMigration {
            version: parsed.version,
            description: parsed.description,
            migration_type: parsed.migration_type,
            checksum: Some(checksum),
            script: script.name,
            physical_location: script.physical_path,
            executor: Arc::new(executor),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(s: &str) -> MigrationVersion {
        MigrationVersion::parse(s).unwrap()
    }

    #[test]
    fn test_parse_names() {
        let naming = MigrationNaming::default();
        let parsed = naming.parse("V1_2__add_users_table.sql").unwrap().unwrap();
        assert_eq!(parsed.version, Some(v("1.2")));
        assert_eq!(parsed.description, "add users table");
        assert_eq!(parsed.migration_type, MigrationType::Sql);

        let repeatable = naming.parse("R__refresh_views.sql").unwrap().unwrap();
        assert_eq!(repeatable.version, None);
        assert_eq!(repeatable.description, "refresh views");

        let undo = naming.parse("U3__drop.sql").unwrap().unwrap();
        assert_eq!(undo.migration_type, MigrationType::UndoSql);

        let baseline = naming.parse("B5__all.sql").unwrap().unwrap();
        assert_eq!(baseline.migration_type, MigrationType::SqlBaseline);
    }

    #[test]
    fn test_parse_names_rejects_malformed() {
        let naming = MigrationNaming::default();
        assert_eq!(naming.parse("notes.txt").unwrap(), None);
        assert_eq!(naming.parse("init.sql").unwrap(), None);
        assert!(naming.parse("V1_add.sql").is_err());
        assert!(naming.parse("V__add.sql").is_err());
        assert!(naming.parse("R1__views.sql").is_err());
        assert!(matches!(
            naming.parse("V1.a__x.sql"),
            Err(MigrationError::InvalidVersion(_))
        ));
    }

    #[test]
    fn test_checksum_ignores_line_endings_and_bom() {
        let unix = calculate_checksum("SELECT 1;\nSELECT 2;\n");
        let windows = calculate_checksum("SELECT 1;\r\nSELECT 2;\r\n");
        let bom = calculate_checksum("\u{feff}SELECT 1;\nSELECT 2;\n");
        assert_eq!(unix, windows);
        assert_eq!(unix, bom);
        assert_ne!(unix, calculate_checksum("SELECT 1;\nSELECT 3;\n"));
        assert_eq!(calculate_checksum(""), 0);
    }

    #[test]
    fn test_script_settings() {
        let settings = ScriptSettings::parse(
            "# settings\nexecuteInTransaction=false\nshouldExecute = true\n",
            "V1__x.sql",
        )
        .unwrap();
        assert_eq!(settings.execute_in_transaction, Some(false));
        assert_eq!(settings.should_execute, Some(true));
        assert!(ScriptSettings::parse("encoding=UTF-8", "V1__x.sql").is_err());
        assert!(ScriptSettings::parse("shouldExecute=maybe", "V1__x.sql").is_err());
    }

    #[test]
    fn test_resolve_sorted_with_checksums() {
        let resolver = SqlMigrationResolver::new(Dialect::postgresql());
        let migrations = resolver
            .resolve(vec![
                ScriptResource::new("R__views.sql", "CREATE VIEW v AS SELECT 1;"),
                ScriptResource::new("V2__second.sql", "SELECT 2;"),
                ScriptResource::new("V1__first.sql", "SELECT 1;"),
                ScriptResource::new("README.md", "docs"),
            ])
            .unwrap();
        let names: Vec<_> = migrations.iter().map(|m| m.script.as_str()).collect();
        assert_eq!(names, vec!["V1__first.sql", "V2__second.sql", "R__views.sql"]);
        assert_eq!(migrations[0].checksum, Some(calculate_checksum("SELECT 1;")));
        assert!(migrations[2].is_repeatable());
    }

    #[test]
    fn test_duplicate_versions() {
        let resolver = SqlMigrationResolver::new(Dialect::postgresql());
        let err = resolver
            .resolve(vec![
                ScriptResource::new("V1__a.sql", "SELECT 1;"),
                ScriptResource::new("sub/V1.0__b.sql", "SELECT 1;"),
            ])
            .unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateMigration { ref version, .. } if version == "1.0"));

        let undo = resolver.resolve(vec![
            ScriptResource::new("V1__a.sql", "SELECT 1;"),
            ScriptResource::new("U1__a.sql", "SELECT 1;"),
        ]);
        assert_eq!(undo.unwrap().len(), 2);
    }

    #[test]
    fn test_placeholders_after_checksum() {
        let replacer = PlaceholderReplacer::new(Default::default()).with_placeholder("owner", "app");
        let resolver = SqlMigrationResolver::new(Dialect::postgresql()).placeholders(replacer);
        let raw = "ALTER TABLE t OWNER TO ${owner}; -- ${schemaflow:filename}";
        let migrations = resolver.resolve(vec![ScriptResource::new("V1__own.sql", raw)]).unwrap();
        assert_eq!(migrations[0].checksum, Some(calculate_checksum(raw)));

        let missing = SqlMigrationResolver::new(Dialect::postgresql())
            .resolve(vec![ScriptResource::new("V1__own.sql", raw)]);
        assert!(missing.is_err());
    }

    #[test]
    fn test_sidecar_overrides() {
        let resolver = SqlMigrationResolver::new(Dialect::postgresql());
        let migrations = resolver
            .resolve(vec![
                ScriptResource::new("V1__a.sql", "CREATE TABLE a (id INT);")
                    .with_config("executeInTransaction=false\nshouldExecute=false"),
            ])
            .unwrap();
        assert!(!migrations[0].executor.can_execute_in_transaction());
        assert!(!migrations[0].executor.should_execute());
    }

    #[test]
    fn test_parse_errors_surface_at_resolve() {
        let resolver = SqlMigrationResolver::new(Dialect::postgresql());
        let err = resolver
            .resolve(vec![ScriptResource::new("V1__a.sql", "SELECT 'unterminated;")])
            .unwrap_err();
        assert!(matches!(err, MigrationError::MigrationFailed { ref migration, .. } if migration == "V1__a.sql"));
    }

    #[tokio::test]
    async fn test_file_system_source() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        tokio::fs::create_dir_all(root.join("nested")).await.unwrap();
        tokio::fs::write(root.join("V1__init.sql"), "CREATE TABLE a (id INT);").await.unwrap();
        tokio::fs::write(root.join("nested/V2__more.sql"), "CREATE TABLE b (id INT);").await.unwrap();
        tokio::fs::write(root.join("nested/V2__more.sql.conf"), "executeInTransaction=false").await.unwrap();
        tokio::fs::write(root.join("notes.txt"), "ignore me").await.unwrap();

        let location = root.display().to_string();
        let source = FileSystemScriptSource::new([location.as_str(), "/does/not/exist"]);
        let scripts = source.list_scripts().await.unwrap();
        let names: Vec<_> = scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["V1__init.sql", "nested/V2__more.sql"]);
        assert_eq!(scripts[1].config_text.as_deref(), Some("executeInTransaction=false"));
        assert_eq!(scripts[1].file_name(), "V2__more.sql");
    }
}
