//! Configuration validation errors and semantic validation.

use crate::settings::{ArchiveBackend, Settings};
use thiserror::Error;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("{} configuration issues: {}", .0.len(), join_issues(.0))]
    Multiple(Vec<ValidationError>),
}

fn join_issues(issues: &[ValidationError]) -> String {
    issues
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::MissingField(_) => 64,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::Multiple(_) => 10,
        }
    }

    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<ValidationError> for oa_common::Error {
    fn from(err: ValidationError) -> Self {
        oa_common::Error::Config(err.to_string())
    }
}

/// Longest retention window accepted, in days.
pub const MAX_DAYS_OLD: u32 = 36_500;

/// Collect every semantic issue in `settings`.
pub fn check_settings(settings: &Settings) -> Vec<ValidationError> {
    let mut issues = Vec::new();

    if settings.database.path.as_os_str().is_empty() {
        issues.push(ValidationError::MissingField("database.path".to_string()));
    }

    if settings.schedule.batch == 0 {
        issues.push(ValidationError::invalid("schedule.batch", "Must be positive, got 0"));
    }
    if settings.write.limit == 0 {
        issues.push(ValidationError::invalid("write.limit", "Must be positive, got 0"));
    }
    if settings.sweep.batch == 0 {
        issues.push(ValidationError::invalid("sweep.batch", "Must be positive, got 0"));
    }
    if settings.sweep.days_old > MAX_DAYS_OLD {
        issues.push(ValidationError::invalid(
            "sweep.days_old",
            format!(
                "Must be at most {}, got {}",
                MAX_DAYS_OLD, settings.sweep.days_old
            ),
        ));
    }

    let archive = &settings.archive;
    if archive.bucket.is_empty() {
        issues.push(ValidationError::MissingField("archive.bucket".to_string()));
    } else if archive.bucket.contains('/') || archive.bucket.contains("..") {
        issues.push(ValidationError::invalid(
            "archive.bucket",
            format!("Must be a single path segment, got '{}'", archive.bucket),
        ));
    }

    match archive.backend {
        ArchiveBackend::Fs => {
            if archive.root.as_os_str().is_empty() {
                issues.push(ValidationError::MissingField("archive.root".to_string()));
            }
        }
        ArchiveBackend::Http => match archive.endpoint.as_deref() {
            None | Some("") => {
                issues.push(ValidationError::MissingField(
                    "archive.endpoint".to_string(),
                ));
            }
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                issues.push(ValidationError::invalid(
                    "archive.endpoint",
                    format!("Must be an http(s) URL, got '{}'", url),
                ));
            }
            Some(_) => {}
        },
    }

    if archive.token_env.as_deref() == Some("") {
        issues.push(ValidationError::invalid(
            "archive.token_env",
            "Must name an environment variable",
        ));
    }

    issues
}

/// Validate settings semantically.
///
/// A single issue is returned as itself; several are wrapped in
/// [`ValidationError::Multiple`].
pub fn validate_settings(settings: &Settings) -> ValidationResult<()> {
    let mut issues = check_settings(settings);
    match issues.len() {
        0 => Ok(()),
        1 => Err(issues.remove(0)),
        _ => Err(ValidationError::Multiple(issues)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_settings(&Settings::default()).is_ok());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let mut settings = Settings::default();
        settings.schedule.batch = 0;

        let err = validate_settings(&settings).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidValue {
                field: "schedule.batch".to_string(),
                message: "Must be positive, got 0".to_string(),
            }
        );
    }

    #[test]
    fn test_http_requires_endpoint() {
        let mut settings = Settings::default();
        settings.archive.backend = ArchiveBackend::Http;
        assert!(matches!(
            validate_settings(&settings),
            Err(ValidationError::MissingField(_))
        ));

        settings.archive.endpoint = Some("ftp://example".to_string());
        assert!(matches!(
            validate_settings(&settings),
            Err(ValidationError::InvalidValue { .. })
        ));

        settings.archive.endpoint = Some("https://archive.example".to_string());
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_all_issues_reported() {
        let mut settings = Settings::default();
        settings.write.limit = 0;
        settings.sweep.batch = 0;
        settings.archive.bucket = "a/b".to_string();

        let issues = check_settings(&settings);
        assert_eq!(issues.len(), 3);

        let err = validate_settings(&settings).unwrap_err();
        assert!(matches!(err, ValidationError::Multiple(ref v) if v.len() == 3));
        assert!(err.to_string().starts_with("3 configuration issues"));
    }

    #[test]
    fn test_converts_to_config_error() {
        let err: oa_common::Error = ValidationError::ParseError("bad".to_string()).into();
        assert_eq!(err.code(), 10);
    }
}
