//! Consolidated error codes and classification system
//!
//! Single source of truth for every code the compiler emits, together with
//! its behavioral metadata.

use std::collections::HashMap;
use std::sync::OnceLock;

// ============================================================================
// CODE WRAPPER TYPE
// ============================================================================

/// Universal code wrapper for both error and success codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(&'static str);

impl Code {
    pub const fn new(code: &'static str) -> Self {
        Self(code)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for Code {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

// ============================================================================
// ERROR CLASSIFICATION TYPES
// ============================================================================

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Critical" => Some(Severity::Critical),
            "High" => Some(Severity::High),
            "Medium" => Some(Severity::Medium),
            "Low" => Some(Severity::Low),
            _ => None,
        }
    }
}

/// Complete metadata for an error code
#[derive(Debug, Clone)]
pub struct ErrorMetadata {
    pub code: &'static str,
    pub category: &'static str,
    pub severity: Severity,
    pub recoverable: bool,
    pub requires_halt: bool,
    pub description: &'static str,
    pub recommended_action: &'static str,
}

impl ErrorMetadata {
    pub const fn new(
        code: &'static str,
        category: &'static str,
        severity: Severity,
        recoverable: bool,
        requires_halt: bool,
        description: &'static str,
        recommended_action: &'static str,
    ) -> Self {
        Self {
            code,
            category,
            severity,
            recoverable,
            requires_halt,
            description,
            recommended_action,
        }
    }
}

// ============================================================================
// ERROR CODE CONSTANTS
// ============================================================================

/// System error codes
pub mod system {
    use super::Code;

    pub const INTERNAL_ERROR: Code = Code::new("ERR001");
    pub const INITIALIZATION_FAILURE: Code = Code::new("ERR002");
    pub const WORKER_FAILURE: Code = Code::new("ERR003");
}

/// Document loading error codes
pub mod input {
    use super::Code;

    pub const DOCUMENT_NOT_FOUND: Code = Code::new("E005");
    pub const DOCUMENT_TOO_LARGE: Code = Code::new("E006");
    pub const DOCUMENT_PARSE_ERROR: Code = Code::new("E007");
    pub const UNSUPPORTED_FORMAT: Code = Code::new("E008");
    pub const IO_ERROR: Code = Code::new("E009");
    pub const BATCH_LIMIT_EXCEEDED: Code = Code::new("E010");
}

/// Contract schema and semantic validation codes
pub mod schema {
    use super::Code;

    pub const MISSING_FIELD: Code = Code::new("E020");
    pub const INVALID_TYPE: Code = Code::new("E021");
    pub const INVALID_VALUE: Code = Code::new("E022");
    pub const INVARIANT_VIOLATION: Code = Code::new("E023");
    pub const DUPLICATE_SERVICE_ID: Code = Code::new("E024");
    pub const SECRET_SCOPE_MISSING: Code = Code::new("E025");
    pub const LIMIT_EXCEEDED: Code = Code::new("E026");
}

/// Dependency resolution codes
pub mod dependency {
    use super::Code;

    pub const MISSING_DEPENDENCY: Code = Code::new("E040");
    pub const MISSING_EXPORT: Code = Code::new("E041");
    pub const VERSION_MISMATCH: Code = Code::new("E042");
    pub const EXPORTS_HASH_MISMATCH: Code = Code::new("E043");
    pub const DEPENDENCY_CYCLE: Code = Code::new("E044");
    pub const UNDECLARED_DEPENDENCY: Code = Code::new("E045");
    pub const INVALID_REGISTRY: Code = Code::new("E046");
    pub const GRAPH_LIMIT_EXCEEDED: Code = Code::new("E047");
}

/// Policy evaluation codes
pub mod policy {
    use super::Code;

    pub const DENY_VIOLATION: Code = Code::new("E060");
    pub const WARN_VIOLATION: Code = Code::new("E061");
    pub const INVALID_RULE_SET: Code = Code::new("E062");
}

/// Backend rendering codes
pub mod render {
    use super::Code;

    pub const INCOMPATIBLE_FIELD: Code = Code::new("E080");
    pub const MISSING_BACKEND_FIELD: Code = Code::new("E081");
    pub const SERIALIZATION_FAILURE: Code = Code::new("E082");
}

/// Secrets lifecycle codes
pub mod secrets {
    use super::Code;

    pub const STAGING_FAILURE: Code = Code::new("E100");
    pub const SHRED_FAILURE: Code = Code::new("E101");
    pub const UNSUPPORTED_TRANSPORT: Code = Code::new("E102");
}

// ============================================================================
// SUCCESS CODE CONSTANTS
// ============================================================================

/// Success codes
pub mod success {
    use super::Code;

    pub const OPERATION_COMPLETED_SUCCESSFULLY: Code = Code::new("I001");
    pub const SYSTEM_INITIALIZATION_COMPLETED: Code = Code::new("I004");
    pub const DOCUMENT_LOADED: Code = Code::new("I006");
    pub const VALIDATION_PASSED: Code = Code::new("I020");
    pub const DEPENDENCIES_RESOLVED: Code = Code::new("I040");
    pub const POLICY_PASSED: Code = Code::new("I060");
    pub const ARTIFACT_RENDERED: Code = Code::new("I080");
    pub const SECRETS_STAGED: Code = Code::new("I100");
    pub const SECRETS_SHREDDED: Code = Code::new("I101");
    pub const SECRETS_PERSISTED: Code = Code::new("I102");
    pub const BATCH_COMPLETED: Code = Code::new("I110");
}

// ============================================================================
// ERROR METADATA REGISTRY
// ============================================================================

use Severity::{Critical, High, Low, Medium};

const ERROR_TABLE: &[ErrorMetadata] = &[
    // System errors
    ErrorMetadata::new("ERR001", "System", Critical, false, true,
        "Critical internal compiler error",
        "File a bug report with the failing contract batch"),
    ErrorMetadata::new("ERR002", "System", Critical, false, true,
        "Compiler initialization failure",
        "Check build profile and runtime configuration"),
    ErrorMetadata::new("ERR003", "System", Critical, false, true,
        "Render worker terminated unexpectedly",
        "Re-run with a single worker thread to isolate the failing target"),
    // Input errors
    ErrorMetadata::new("E005", "Input", Medium, false, true,
        "Contract or registry document not found",
        "Check the document path"),
    ErrorMetadata::new("E006", "Input", Medium, false, true,
        "Document exceeds maximum size limit",
        "Split the document or raise input.max_document_size"),
    ErrorMetadata::new("E007", "Input", Medium, false, true,
        "Document is not valid YAML or JSON",
        "Fix the document syntax at the reported location"),
    ErrorMetadata::new("E008", "Input", Low, false, true,
        "Unsupported document extension",
        "Use .yml, .yaml or .json"),
    ErrorMetadata::new("E009", "Input", Medium, false, true,
        "I/O error while reading a document",
        "Check permissions and file system integrity"),
    ErrorMetadata::new("E010", "Input", Medium, false, true,
        "Too many documents in one batch",
        "Compile in smaller batches or raise input.max_documents_per_batch"),
    // Schema errors
    ErrorMetadata::new("E020", "Schema", Medium, false, true,
        "Required contract field is missing",
        "Add the field at the reported path"),
    ErrorMetadata::new("E021", "Schema", Medium, false, true,
        "Contract field has the wrong type",
        "Use the documented type for the field"),
    ErrorMetadata::new("E022", "Schema", Medium, false, true,
        "Contract field has an invalid value",
        "Use one of the accepted values"),
    ErrorMetadata::new("E023", "Schema", High, false, true,
        "Cross-field contract invariant violated",
        "Make the related fields consistent"),
    ErrorMetadata::new("E024", "Schema", High, false, true,
        "service_id is declared by more than one contract in the batch",
        "Rename one of the services"),
    ErrorMetadata::new("E025", "Schema", High, false, true,
        "Secrets declared without service_namespace",
        "Set service_namespace for contracts that carry secrets"),
    ErrorMetadata::new("E026", "Schema", Medium, false, true,
        "Contract exceeds a compile-time collection limit",
        "Reduce the collection size or raise the contract limits"),
    // Dependency errors
    ErrorMetadata::new("E040", "Dependency", High, false, true,
        "Required service not found in registry or batch",
        "Register the service or remove the requirement"),
    ErrorMetadata::new("E041", "Dependency", High, false, true,
        "Required service does not export a referenced key",
        "Export the key from the dependency or drop the reference"),
    ErrorMetadata::new("E042", "Dependency", High, false, true,
        "Required version does not match the registry",
        "Align the requirement with the published version"),
    ErrorMetadata::new("E043", "Dependency", High, false, true,
        "Exports hash does not match the registry",
        "Refresh the pinned exports hash"),
    ErrorMetadata::new("E044", "Dependency", High, false, true,
        "Dependency cycle detected",
        "Break the cycle by removing one requirement"),
    ErrorMetadata::new("E045", "Dependency", Medium, false, true,
        "Environment references a dependency that is not required",
        "Declare the service under requires"),
    ErrorMetadata::new("E046", "Dependency", Medium, false, true,
        "Dependency registry document is malformed",
        "Fix the registry entry at the reported path"),
    ErrorMetadata::new("E047", "Dependency", High, false, true,
        "Dependency graph exceeds node limit",
        "Compile fewer services or raise dependency.max_graph_nodes"),
    // Policy
    ErrorMetadata::new("E060", "Policy", High, false, true,
        "Deny rule violated",
        "Change the contract to satisfy the rule"),
    ErrorMetadata::new("E061", "Policy", Low, true, false,
        "Warn rule violated",
        "Review the finding"),
    ErrorMetadata::new("E062", "Policy", Medium, false, true,
        "Policy rule document is malformed",
        "Fix the rule definition"),
    // Render
    ErrorMetadata::new("E080", "Render", Medium, true, false,
        "Contract field cannot be expressed by the backend",
        "Drop the target or change the field"),
    ErrorMetadata::new("E081", "Render", Medium, true, false,
        "Backend requires a field the contract does not set",
        "Add the backend-specific field"),
    ErrorMetadata::new("E082", "Render", High, true, false,
        "Artifact serialization failed",
        "File a bug report with the contract"),
    // Secrets
    ErrorMetadata::new("E100", "Secrets", Critical, false, true,
        "Failed to stage secret material",
        "Check staging root permissions and free space"),
    ErrorMetadata::new("E101", "Secrets", Critical, false, true,
        "Failed to shred staged secret material",
        "Remove the reported files manually and rotate the secrets"),
    ErrorMetadata::new("E102", "Secrets", High, false, true,
        "Backend has no transport for this secret kind",
        "Use a backend that supports the secret kind"),
];

static ERROR_REGISTRY: OnceLock<HashMap<&'static str, ErrorMetadata>> = OnceLock::new();

fn get_error_registry() -> &'static HashMap<&'static str, ErrorMetadata> {
    ERROR_REGISTRY.get_or_init(|| {
        ERROR_TABLE
            .iter()
            .map(|metadata| (metadata.code, metadata.clone()))
            .collect()
    })
}

pub fn get_error_metadata(code: &str) -> Option<&'static ErrorMetadata> {
    get_error_registry().get(code)
}

/// Get error severity from error code
pub fn get_severity(code: &str) -> Severity {
    get_error_registry()
        .get(code)
        .map(|metadata| metadata.severity)
        .unwrap_or(Severity::Medium)
}

pub fn is_recoverable(code: &str) -> bool {
    get_error_registry()
        .get(code)
        .map(|metadata| metadata.recoverable)
        .unwrap_or(true)
}

pub fn requires_halt(code: &str) -> bool {
    get_error_registry()
        .get(code)
        .map(|metadata| metadata.requires_halt)
        .unwrap_or(false)
}

pub fn get_description(code: &str) -> &'static str {
    get_error_registry()
        .get(code)
        .map(|metadata| metadata.description)
        .unwrap_or("Unknown error")
}

pub fn get_action(code: &str) -> &'static str {
    get_error_registry()
        .get(code)
        .map(|metadata| metadata.recommended_action)
        .unwrap_or("No specific action available")
}

pub fn get_category(code: &str) -> &'static str {
    get_error_registry()
        .get(code)
        .map(|metadata| metadata.category)
        .unwrap_or("Unknown")
}

/// Every error code with registry metadata
pub fn all_error_codes() -> impl Iterator<Item = &'static str> {
    ERROR_TABLE.iter().map(|metadata| metadata.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_stage_code_is_registered() {
        for code in [
            input::DOCUMENT_NOT_FOUND,
            schema::SECRET_SCOPE_MISSING,
            dependency::DEPENDENCY_CYCLE,
            policy::DENY_VIOLATION,
            render::INCOMPATIBLE_FIELD,
            secrets::SHRED_FAILURE,
            system::INTERNAL_ERROR,
        ] {
            assert!(
                get_error_metadata(code.as_str()).is_some(),
                "{} missing from registry",
                code
            );
        }
    }

    #[test]
    fn test_registry_codes_are_unique() {
        let count = all_error_codes().count();
        assert_eq!(get_error_registry().len(), count);
    }

    #[test]
    fn test_secrets_failures_halt() {
        assert!(requires_halt(secrets::STAGING_FAILURE.as_str()));
        assert_eq!(get_severity(secrets::SHRED_FAILURE.as_str()), Severity::Critical);
        assert!(!requires_halt(render::INCOMPATIBLE_FIELD.as_str()));
    }

    #[test]
    fn test_unknown_code_defaults() {
        assert_eq!(get_severity("Z999"), Severity::Medium);
        assert_eq!(get_category("Z999"), "Unknown");
        assert!(is_recoverable("Z999"));
    }
}
