use std::fmt;

use crate::legacy::LegacyError;
use crate::model::{ChangeId, ProjectName};
use crate::notes::rebuild::RebuildError;
use crate::repo::RepoError;

/// Machine-readable error codes for callers that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ChangeNotFound,
    ProjectMismatch,
    MalformedLogData,
    RebuildFailed,
    RepositoryFailure,
    LegacyStoreFailure,
    InvalidState,
    ExecutorFailure,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ChangeNotFound => "E2001",
            Self::ProjectMismatch => "E2002",
            Self::MalformedLogData => "E3001",
            Self::RebuildFailed => "E4001",
            Self::RepositoryFailure => "E5001",
            Self::LegacyStoreFailure => "E5002",
            Self::InvalidState => "E9001",
            Self::ExecutorFailure => "E9002",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ChangeNotFound => "Change not found",
            Self::ProjectMismatch => "Change belongs to a different project",
            Self::MalformedLogData => "Malformed notes log data",
            Self::RebuildFailed => "Notes rebuild failed",
            Self::RepositoryFailure => "Notes repository failure",
            Self::LegacyStoreFailure => "Legacy store failure",
            Self::InvalidState => "Internal invariant violated",
            Self::ExecutorFailure => "Background load failed",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ChangeNotFound | Self::ProjectMismatch => None,
            Self::MalformedLogData => {
                Some("Inspect the change meta ref; the log content failed validation.")
            }
            Self::RebuildFailed => Some("Retry the read; concurrent rebuilds settle on retry."),
            Self::RepositoryFailure => Some("Check that the project repository exists."),
            Self::LegacyStoreFailure => Some("Check legacy database connectivity."),
            Self::InvalidState | Self::ExecutorFailure => {
                Some("Retry once. If persistent, report a bug with logs.")
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors surfaced by loading change notes and by the factory.
#[derive(Debug, thiserror::Error)]
pub enum NotesError {
    /// No legacy record, or more than one, matched the requested id.
    #[error("change {0} not found")]
    NotFound(ChangeId),

    /// The caller asserted a project that does not own the change.
    #[error("passed project {expected} when loading change {change_id}, but actual project is {actual}")]
    ProjectMismatch {
        change_id: ChangeId,
        expected: ProjectName,
        actual: ProjectName,
    },

    /// Log content failed structural validation.
    #[error("change {change_id}: {reason}")]
    MalformedLogData { change_id: ChangeId, reason: String },

    /// Rebuilding from the legacy store failed and the recheck did not
    /// find the change up to date.
    #[error("rebuild of change notes failed: {0}")]
    Rebuild(#[source] RebuildError),

    #[error(transparent)]
    Repository(#[from] RepoError),

    #[error(transparent)]
    Legacy(#[from] LegacyError),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("background load failed: {0}")]
    Executor(String),
}

impl NotesError {
    pub(crate) fn malformed(change_id: ChangeId, reason: impl Into<String>) -> Self {
        Self::MalformedLogData {
            change_id,
            reason: reason.into(),
        }
    }

    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ChangeNotFound,
            Self::ProjectMismatch { .. } => ErrorCode::ProjectMismatch,
            Self::MalformedLogData { .. } => ErrorCode::MalformedLogData,
            Self::Rebuild(_) => ErrorCode::RebuildFailed,
            Self::Repository(_) => ErrorCode::RepositoryFailure,
            Self::Legacy(_) => ErrorCode::LegacyStoreFailure,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::Executor(_) => ErrorCode::ExecutorFailure,
        }
    }

    /// Whether this is the per-item "omit from result" case for bulk reads.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
