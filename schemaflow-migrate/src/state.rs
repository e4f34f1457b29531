//! Migration states.

use std::fmt;

/// The state of one migration after reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationState {
    /// Resolved and waiting to be applied.
    Pending,
    /// Resolved but newer than the target version.
    AboveTarget,
    /// Resolved but older than the applied baseline.
    BelowBaseline,
    /// Resolved but superseded by a baseline migration.
    BaselineIgnored,
    /// The baseline marker row.
    Baseline,
    /// Resolved but skipped: older than the last applied version without
    /// out-of-order, or conditionally disabled.
    Ignored,
    /// Applied successfully but no longer resolved, older than the newest
    /// resolved version.
    MissingSuccess,
    /// Applied with failure and no longer resolved, older than the newest
    /// resolved version.
    MissingFailed,
    /// Applied successfully.
    Success,
    /// Applied, then reversed by an undo migration.
    Undone,
    /// An undo migration that could be applied.
    Available,
    /// Applied with failure.
    Failed,
    /// Applied successfully after a newer version had been applied.
    OutOfOrder,
    /// Applied successfully and newer than every resolved migration.
    FutureSuccess,
    /// Applied with failure and newer than every resolved migration.
    FutureFailed,
    /// A repeatable migration whose checksum changed since its last run.
    Outdated,
    /// An older run of a repeatable migration.
    Superseded,
    /// Marked as deleted in the history.
    Deleted,
}

impl MigrationState {
    /// Display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::AboveTarget => "Above Target",
            Self::BelowBaseline => "Below Baseline",
            Self::BaselineIgnored => "Ignored (Baseline)",
            Self::Baseline => "Baseline",
            Self::Ignored => "Ignored",
            Self::MissingSuccess => "Missing",
            Self::MissingFailed => "Failed (Missing)",
            Self::Success => "Success",
            Self::Undone => "Undone",
            Self::Available => "Available",
            Self::Failed => "Failed",
            Self::OutOfOrder => "Out of Order",
            Self::FutureSuccess => "Future",
            Self::FutureFailed => "Failed (Future)",
            Self::Outdated => "Outdated",
            Self::Superseded => "Superseded",
            Self::Deleted => "Deleted",
        }
    }

    /// Whether a resolved migration exists for this state.
    pub fn is_resolved(&self) -> bool {
        !matches!(
            self,
            Self::MissingSuccess
                | Self::MissingFailed
                | Self::FutureSuccess
                | Self::FutureFailed
                | Self::Deleted
        )
    }

    /// Whether a history row exists for this state.
    pub fn is_applied(&self) -> bool {
        !matches!(
            self,
            Self::Pending
                | Self::AboveTarget
                | Self::BelowBaseline
                | Self::BaselineIgnored
                | Self::Ignored
                | Self::Available
        )
    }

    /// Whether the migration failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::MissingFailed | Self::Failed | Self::FutureFailed)
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
