use crate::logging::codes;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("{service_id}: required service '{dependency}' is not in the registry or batch")]
    Missing {
        service_id: String,
        dependency: String,
        field: String,
    },

    #[error("{service_id}: service '{dependency}' does not export '{export}'")]
    MissingExport {
        service_id: String,
        dependency: String,
        export: String,
        field: String,
    },

    #[error("{service_id}: environment references '{dependency}' which is not declared in requires")]
    Undeclared {
        service_id: String,
        dependency: String,
        field: String,
    },

    #[error("{service_id}: '{dependency}' version {required} required, registry has {available}")]
    VersionMismatch {
        service_id: String,
        dependency: String,
        required: String,
        available: String,
        field: String,
    },

    #[error("{service_id}: exports hash of '{dependency}' is {actual}, contract pins {expected}")]
    ExportsHashMismatch {
        service_id: String,
        dependency: String,
        expected: String,
        actual: String,
        field: String,
    },

    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("invalid dependency registry: {message}")]
    InvalidRegistry { message: String },

    #[error("dependency graph has {count} nodes, limit is {limit}")]
    GraphTooLarge { count: usize, limit: usize },
}

impl DependencyError {
    pub fn error_code(&self) -> codes::Code {
        match self {
            Self::Missing { .. } => codes::dependency::MISSING_DEPENDENCY,
            Self::MissingExport { .. } => codes::dependency::MISSING_EXPORT,
            Self::Undeclared { .. } => codes::dependency::UNDECLARED_DEPENDENCY,
            Self::VersionMismatch { .. } => codes::dependency::VERSION_MISMATCH,
            Self::ExportsHashMismatch { .. } => codes::dependency::EXPORTS_HASH_MISMATCH,
            Self::Cycle { .. } => codes::dependency::DEPENDENCY_CYCLE,
            Self::InvalidRegistry { .. } => codes::dependency::INVALID_REGISTRY,
            Self::GraphTooLarge { .. } => codes::dependency::GRAPH_LIMIT_EXCEEDED,
        }
    }

    pub fn severity(&self) -> &'static str {
        codes::get_severity(self.error_code().as_str()).as_str()
    }

    /// Coarse classification used in reports: missing, cycle, mismatch or registry
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Missing { .. } | Self::MissingExport { .. } | Self::Undeclared { .. } => "missing",
            Self::Cycle { .. } => "cycle",
            Self::VersionMismatch { .. } | Self::ExportsHashMismatch { .. } => "mismatch",
            Self::InvalidRegistry { .. } | Self::GraphTooLarge { .. } => "registry",
        }
    }

    pub fn service_id(&self) -> Option<&str> {
        match self {
            Self::Missing { service_id, .. }
            | Self::MissingExport { service_id, .. }
            | Self::Undeclared { service_id, .. }
            | Self::VersionMismatch { service_id, .. }
            | Self::ExportsHashMismatch { service_id, .. } => Some(service_id),
            Self::Cycle { path } => path.first().map(String::as_str),
            Self::InvalidRegistry { .. } | Self::GraphTooLarge { .. } => None,
        }
    }

    pub fn field_path(&self) -> Option<&str> {
        match self {
            Self::Missing { field, .. }
            | Self::MissingExport { field, .. }
            | Self::Undeclared { field, .. }
            | Self::VersionMismatch { field, .. }
            | Self::ExportsHashMismatch { field, .. } => Some(field),
            Self::Cycle { .. } => Some("requires"),
            Self::InvalidRegistry { .. } | Self::GraphTooLarge { .. } => None,
        }
    }
}

/// Every dependency error of a batch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} dependency error(s): {}", .errors.len(), summarize(.errors))]
pub struct DependencyFailure {
    pub errors: Vec<DependencyError>,
}

fn summarize(errors: &[DependencyError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
