//! Exit codes for the oa-core CLI.
//!
//! Exit codes communicate the outcome of a stage without requiring output
//! parsing. External schedulers key their retry and alerting policy on them.
//!
//! Exit code ranges:
//! - 0-2: Operational outcomes
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal and infrastructure errors

use oa_common::{Error, ErrorCategory};

/// Exit codes for oa-core operations.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-2)
    // ========================================================================
    /// Every block handled, or nothing to do
    Clean = 0,

    /// Some blocks failed; rerunning may succeed
    PartialFail = 1,

    /// An archive failed verification; needs an operator
    IntegrityFailure = 2,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments or configuration
    ArgsError = 10,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O or database error
    IoError = 21,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    /// Check if this is an operational outcome (0-2).
    pub fn is_operational(self) -> bool {
        (self as i32) <= 2
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Stable symbolic name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::PartialFail => "OK_PARTIAL_FAIL",
            ExitCode::IntegrityFailure => "ERR_INTEGRITY",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }

    /// Exit code for an error that aborted a whole command.
    pub fn from_error(err: &Error) -> Self {
        match err.category() {
            ErrorCategory::Config => ExitCode::ArgsError,
            ErrorCategory::Integrity => ExitCode::IntegrityFailure,
            ErrorCategory::Store | ErrorCategory::Io => ExitCode::IoError,
            ErrorCategory::Archive => ExitCode::PartialFail,
            ErrorCategory::Scheduling => ExitCode::Clean,
        }
    }

    /// The more severe of two outcomes.
    pub fn worst(self, other: ExitCode) -> ExitCode {
        self.max(other)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Clean.as_i32(), 0);
        assert_eq!(ExitCode::PartialFail.as_i32(), 1);
        assert_eq!(ExitCode::IntegrityFailure.as_i32(), 2);
        assert_eq!(ExitCode::ArgsError.as_i32(), 10);
        assert_eq!(ExitCode::InternalError.as_i32(), 20);
        assert_eq!(ExitCode::IoError.as_i32(), 21);
    }

    #[test]
    fn test_classification() {
        assert!(ExitCode::Clean.is_success());
        assert!(ExitCode::PartialFail.is_operational());
        assert!(!ExitCode::IntegrityFailure.is_error());
        assert!(ExitCode::ArgsError.is_error());
    }

    #[test]
    fn test_worst_prefers_integrity_over_partial() {
        assert_eq!(
            ExitCode::PartialFail.worst(ExitCode::IntegrityFailure),
            ExitCode::IntegrityFailure
        );
        assert_eq!(ExitCode::Clean.worst(ExitCode::PartialFail), ExitCode::PartialFail);
    }

    #[test]
    fn test_from_error() {
        assert_eq!(
            ExitCode::from_error(&Error::Config("bad".into())),
            ExitCode::ArgsError
        );
        assert_eq!(
            ExitCode::from_error(&Error::Store("locked".into())),
            ExitCode::IoError
        );
        assert_eq!(
            ExitCode::from_error(&Error::ChecksumMismatch {
                key: "k".into(),
                expected: "a".into(),
                actual: "b".into(),
            }),
            ExitCode::IntegrityFailure
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitCode::IoError.to_string(), "ERR_IO (21)");
    }
}
