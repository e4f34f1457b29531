//! Validation errors, ignore patterns and cherry-pick patterns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MigrationError;
use crate::state::MigrationState;
use crate::version::MigrationVersion;

/// Category of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    /// A repeatable migration failed.
    FailedRepeatableMigration,
    /// A versioned migration failed.
    FailedVersionedMigration,
    /// A repeatable migration is in the history but not resolved.
    AppliedRepeatableMigrationNotResolved,
    /// A versioned migration is in the history but not resolved.
    AppliedVersionedMigrationNotResolved,
    /// A repeatable migration is resolved but not applied.
    ResolvedRepeatableMigrationNotApplied,
    /// A versioned migration is resolved but not applied.
    ResolvedVersionedMigrationNotApplied,
    /// A repeatable migration changed and must be re-applied.
    OutdatedRepeatableMigration,
    /// Applied and resolved types differ.
    TypeMismatch,
    /// Applied and resolved checksums differ.
    ChecksumMismatch,
    /// Applied and resolved descriptions differ.
    DescriptionMismatch,
}

impl ValidationErrorKind {
    /// Stable upper-snake code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::FailedRepeatableMigration => "FAILED_REPEATABLE_MIGRATION",
            Self::FailedVersionedMigration => "FAILED_VERSIONED_MIGRATION",
            Self::AppliedRepeatableMigrationNotResolved => "APPLIED_REPEATABLE_MIGRATION_NOT_RESOLVED",
            Self::AppliedVersionedMigrationNotResolved => "APPLIED_VERSIONED_MIGRATION_NOT_RESOLVED",
            Self::ResolvedRepeatableMigrationNotApplied => "RESOLVED_REPEATABLE_MIGRATION_NOT_APPLIED",
            Self::ResolvedVersionedMigrationNotApplied => "RESOLVED_VERSIONED_MIGRATION_NOT_APPLIED",
            Self::OutdatedRepeatableMigration => "OUTDATED_REPEATABLE_MIGRATION",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::DescriptionMismatch => "DESCRIPTION_MISMATCH",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One validation failure with a remediation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Failure category.
    pub kind: ValidationErrorKind,
    /// Version of the offending migration, if versioned.
    pub version: Option<MigrationVersion>,
    /// Description of the offending migration.
    pub description: String,
    /// Script of the offending migration.
    pub script: String,
    /// Human readable message.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error.
    pub fn new(
        kind: ValidationErrorKind,
        version: Option<MigrationVersion>,
        description: impl Into<String>,
        script: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            version,
            description: description.into(),
            script: script.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternType {
    Any,
    Repeatable,
    Versioned,
}

/// A `type:state` pattern of migrations whose validation errors are ignored,
/// e.g. `*:future` or `repeatable:missing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatePattern {
    migration_type: PatternType,
    state: Option<String>,
}

impl ValidatePattern {
    const VALID_STATES: [&'static str; 6] = ["*", "missing", "pending", "ignored", "future", "failed"];

    /// Parse a pattern.
    pub fn parse(pattern: &str) -> Result<Self, MigrationError> {
        let invalid = || {
            MigrationError::config(format!(
                "Invalid pattern '{pattern}'. Pattern must be of the form <migration_type>:<migration_state>. \
                 Valid types: [*, repeatable, versioned]. Valid states: [*, missing, pending, ignored, future, failed]"
            ))
        };

        let (ty, state) = pattern.trim().split_once(':').ok_or_else(invalid)?;
        let migration_type = match ty.trim().to_ascii_lowercase().as_str() {
            "*" => PatternType::Any,
            "repeatable" => PatternType::Repeatable,
            "versioned" => PatternType::Versioned,
            _ => return Err(invalid()),
        };
        let state = state.trim().to_ascii_lowercase();
        if !Self::VALID_STATES.contains(&state.as_str()) {
            return Err(invalid());
        }

        Ok(Self {
            migration_type,
            state: (state != "*").then_some(state),
        })
    }

    /// Whether a migration of this kind and state is covered.
    pub fn matches(&self, versioned: bool, state: MigrationState) -> bool {
        if let Some(expected) = &self.state {
            if !state.display_name().eq_ignore_ascii_case(expected) {
                return false;
            }
        }
        match self.migration_type {
            PatternType::Any => true,
            PatternType::Versioned => versioned,
            PatternType::Repeatable => !versioned,
        }
    }

    /// Whether this pattern covers `state` for both migration kinds.
    pub fn covers_all(&self, state: MigrationState) -> bool {
        self.migration_type == PatternType::Any && self.matches(true, state)
    }
}

impl FromStr for ValidatePattern {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ValidatePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ty = match self.migration_type {
            PatternType::Any => "*",
            PatternType::Repeatable => "repeatable",
            PatternType::Versioned => "versioned",
        };
        write!(f, "{}:{}", ty, self.state.as_deref().unwrap_or("*"))
    }
}

impl Serialize for ValidatePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ValidatePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Which kinds of discrepancy validation tolerates. `true` means tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidationPolicy {
    /// Resolved migrations that are not yet applied.
    pub pending: bool,
    /// Resolved migrations that were skipped.
    pub ignored: bool,
    /// Applied migrations that are no longer resolved.
    pub missing: bool,
    /// Applied migrations newer than every resolved migration.
    pub future: bool,
}

impl ValidationPolicy {
    /// Derive the policy from ignore patterns that apply to every migration.
    pub fn from_patterns(patterns: &[ValidatePattern]) -> Self {
        let covered = |state| patterns.iter().any(|p| p.covers_all(state));
        Self {
            pending: covered(MigrationState::Pending),
            ignored: covered(MigrationState::Ignored),
            missing: covered(MigrationState::MissingSuccess),
            future: covered(MigrationState::FutureSuccess),
        }
    }

    /// Tolerate pending migrations.
    pub fn allow_pending(mut self, value: bool) -> Self {
        self.pending = value;
        self
    }
}

/// A version or description selecting migrations for cherry-picking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPattern {
    pattern: String,
    version: Option<MigrationVersion>,
}

impl MigrationPattern {
    /// Create a pattern.
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into().trim().to_string();
        let version = MigrationVersion::parse(&pattern)
            .ok()
            .filter(MigrationVersion::is_concrete);
        Self { pattern, version }
    }

    /// Whether a migration with this version or description matches.
    pub fn matches(&self, version: Option<&MigrationVersion>, description: &str) -> bool {
        match (version, &self.version) {
            (Some(version), Some(expected)) => version == expected,
            (Some(_), None) => false,
            (None, _) => self.pattern.replace('_', " ") == description,
        }
    }
}

impl fmt::Display for MigrationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl Serialize for MigrationPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for MigrationPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::new(String::deserialize(deserializer)?))
    }
}
