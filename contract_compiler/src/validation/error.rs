//! Error types for document loading and contract validation

use crate::logging::codes;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while reading or parsing an input document
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Document not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Document too large: {path} ({size} bytes > {limit} bytes)")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Unsupported document format: {path} (expected .yml, .yaml or .json)")]
    UnsupportedFormat { path: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Too many documents in one batch: {count} > {limit}")]
    TooManyDocuments { count: usize, limit: usize },

    #[error("Document {path} must contain a mapping at the top level")]
    NotAMapping { path: PathBuf },
}

impl InputError {
    pub fn error_code(&self) -> codes::Code {
        match self {
            Self::NotFound { .. } => codes::input::DOCUMENT_NOT_FOUND,
            Self::TooLarge { .. } => codes::input::DOCUMENT_TOO_LARGE,
            Self::Parse { .. } | Self::NotAMapping { .. } => codes::input::DOCUMENT_PARSE_ERROR,
            Self::UnsupportedFormat { .. } => codes::input::UNSUPPORTED_FORMAT,
            Self::Io { .. } => codes::input::IO_ERROR,
            Self::TooManyDocuments { .. } => codes::input::BATCH_LIMIT_EXCEEDED,
        }
    }

    pub fn severity(&self) -> &'static str {
        codes::get_severity(self.error_code().as_str()).as_str()
    }

    pub fn document(&self) -> Option<&PathBuf> {
        match self {
            Self::NotFound { path }
            | Self::TooLarge { path, .. }
            | Self::Parse { path, .. }
            | Self::UnsupportedFormat { path }
            | Self::Io { path, .. }
            | Self::NotAMapping { path } => Some(path),
            Self::TooManyDocuments { .. } => None,
        }
    }
}

/// One malformed or inconsistent contract field
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("{service_id}: missing required field '{field}'")]
    MissingField { service_id: String, field: String },

    #[error("{service_id}: field '{field}' must be {expected}, found {found}")]
    InvalidType {
        service_id: String,
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{service_id}: field '{field}' has invalid value: {message}")]
    InvalidValue {
        service_id: String,
        field: String,
        message: String,
    },

    #[error("{service_id}: {message} (at '{field}')")]
    InvariantViolation {
        service_id: String,
        field: String,
        message: String,
    },

    #[error("{service_id}: service_id already declared by {first_document}")]
    DuplicateServiceId {
        service_id: String,
        field: String,
        first_document: String,
    },

    #[error("{service_id}: secrets are declared but service_namespace is not set")]
    MissingSecretScope { service_id: String, field: String },

    #[error("{service_id}: '{field}' has {count} entries, limit is {limit}")]
    LimitExceeded {
        service_id: String,
        field: String,
        count: usize,
        limit: usize,
    },
}

impl SchemaError {
    pub fn missing(service_id: &str, field: &str) -> Self {
        Self::MissingField {
            service_id: service_id.to_string(),
            field: field.to_string(),
        }
    }

    pub fn invalid_value(service_id: &str, field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            service_id: service_id.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn invariant(service_id: &str, field: &str, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            service_id: service_id.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> codes::Code {
        match self {
            Self::MissingField { .. } => codes::schema::MISSING_FIELD,
            Self::InvalidType { .. } => codes::schema::INVALID_TYPE,
            Self::InvalidValue { .. } => codes::schema::INVALID_VALUE,
            Self::InvariantViolation { .. } => codes::schema::INVARIANT_VIOLATION,
            Self::DuplicateServiceId { .. } => codes::schema::DUPLICATE_SERVICE_ID,
            Self::MissingSecretScope { .. } => codes::schema::SECRET_SCOPE_MISSING,
            Self::LimitExceeded { .. } => codes::schema::LIMIT_EXCEEDED,
        }
    }

    pub fn severity(&self) -> &'static str {
        codes::get_severity(self.error_code().as_str()).as_str()
    }

    pub fn service_id(&self) -> &str {
        match self {
            Self::MissingField { service_id, .. }
            | Self::InvalidType { service_id, .. }
            | Self::InvalidValue { service_id, .. }
            | Self::InvariantViolation { service_id, .. }
            | Self::DuplicateServiceId { service_id, .. }
            | Self::MissingSecretScope { service_id, .. }
            | Self::LimitExceeded { service_id, .. } => service_id,
        }
    }

    pub fn field_path(&self) -> &str {
        match self {
            Self::MissingField { field, .. }
            | Self::InvalidType { field, .. }
            | Self::InvalidValue { field, .. }
            | Self::InvariantViolation { field, .. }
            | Self::DuplicateServiceId { field, .. }
            | Self::MissingSecretScope { field, .. }
            | Self::LimitExceeded { field, .. } => field,
        }
    }
}

/// All schema errors for one document
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub document: PathBuf,
    pub service_id: String,
    pub errors: Vec<SchemaError>,
}

/// Every failing document in a batch
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ValidationReport {
    pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    pub fn error_count(&self) -> usize {
        self.failures.iter().map(|f| f.errors.len()).sum()
    }

    pub fn errors(&self) -> impl Iterator<Item = &SchemaError> {
        self.failures.iter().flat_map(|f| f.errors.iter())
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} validation error(s) in {} document(s)",
            self.error_count(),
            self.failures.len()
        )?;
        for failure in &self.failures {
            for error in &failure.errors {
                write!(f, "\n  {}: {}", failure.document.display(), error)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_accessors() {
        let err = SchemaError::missing("web", "health.cmd");
        assert_eq!(err.service_id(), "web");
        assert_eq!(err.field_path(), "health.cmd");
        assert_eq!(err.error_code(), codes::schema::MISSING_FIELD);
        assert_eq!(err.to_string(), "web: missing required field 'health.cmd'");
    }

    #[test]
    fn test_report_display_lists_every_error() {
        let report = ValidationReport {
            failures: vec![ValidationFailure {
                document: PathBuf::from("web.yml"),
                service_id: "web".to_string(),
                errors: vec![
                    SchemaError::missing("web", "image"),
                    SchemaError::invariant("web", "volumes[0].host_path", "must be absolute"),
                ],
            }],
        };
        let text = report.to_string();
        assert!(text.starts_with("2 validation error(s) in 1 document(s)"));
        assert!(text.contains("web.yml: web: missing required field 'image'"));
    }

    #[test]
    fn test_input_error_codes() {
        let err = InputError::UnsupportedFormat {
            path: PathBuf::from("web.toml"),
        };
        assert_eq!(err.error_code(), codes::input::UNSUPPORTED_FORMAT);
        assert_eq!(err.document(), Some(&PathBuf::from("web.toml")));
    }
}
