use crate::batch::BatchError;
use crate::dependency::DependencyFailure;
use crate::logging::codes;
use crate::policy::{PolicyError, PolicyViolation};
use crate::secrets::SecretsError;
use crate::validation::{InputError, ValidationReport};

pub const EXIT_OK: i32 = 0;
pub const EXIT_INVALID: i32 = 1;
pub const EXIT_POLICY_DENY: i32 = 2;
pub const EXIT_DEPENDENCY: i32 = 3;
pub const EXIT_RENDER: i32 = 4;
pub const EXIT_SECRETS: i32 = 5;

/// Batch-level compile failures
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Input failed: {0}")]
    Input(#[from] InputError),

    #[error("Contract discovery failed: {0}")]
    Discovery(#[from] BatchError),

    #[error("Rule set failed to load: {0}")]
    Rules(#[from] PolicyError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationReport),

    #[error("Dependency resolution failed: {0}")]
    Dependency(#[from] DependencyFailure),

    #[error("Policy denied {} violation(s)", .violations.iter().filter(|v| v.is_deny()).count())]
    PolicyDenied { violations: Vec<PolicyViolation> },

    #[error("Secrets handling failed: {source}")]
    Secrets {
        #[source]
        source: SecretsError,
        /// Post-render violations gathered before the abort
        violations: Vec<PolicyViolation>,
    },
}

impl PipelineError {
    /// Exit code by stage: 1 > 3 > 2 > 5 > 4
    ///
    /// A failed shred always reports 5, even alongside a deny.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Input(_) | PipelineError::Rules(_) | PipelineError::Validation(_) => EXIT_INVALID,
            PipelineError::Discovery(BatchError::WorkerPanicked { .. }) => EXIT_RENDER,
            PipelineError::Discovery(_) => EXIT_INVALID,
            PipelineError::Dependency(_) => EXIT_DEPENDENCY,
            PipelineError::PolicyDenied { .. } => EXIT_POLICY_DENY,
            PipelineError::Secrets {
                source: SecretsError::ShredFailed { .. },
                ..
            } => EXIT_SECRETS,
            PipelineError::Secrets { violations, .. } => {
                if violations.iter().any(PolicyViolation::is_deny) {
                    EXIT_POLICY_DENY
                } else {
                    EXIT_SECRETS
                }
            }
        }
    }

    pub fn error_code(&self) -> codes::Code {
        match self {
            PipelineError::Input(e) => e.error_code(),
            PipelineError::Discovery(e) => e.error_code(),
            PipelineError::Rules(e) => e.error_code(),
            PipelineError::Validation(report) => report
                .errors()
                .next()
                .map(|e| e.error_code())
                .unwrap_or(codes::schema::INVALID_VALUE),
            PipelineError::Dependency(failure) => failure
                .errors
                .first()
                .map(|e| e.error_code())
                .unwrap_or(codes::dependency::MISSING_DEPENDENCY),
            PipelineError::PolicyDenied { .. } => codes::policy::DENY_VIOLATION,
            PipelineError::Secrets { source, .. } => source.error_code(),
        }
    }

    pub fn severity(&self) -> &'static str {
        codes::get_severity(self.error_code().as_str()).as_str()
    }

    pub fn violations(&self) -> &[PolicyViolation] {
        match self {
            PipelineError::PolicyDenied { violations } | PipelineError::Secrets { violations, .. } => violations,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::RenderTarget;
    use crate::policy::{Severity, Subject};
    use std::path::PathBuf;

    fn deny() -> PolicyViolation {
        PolicyViolation {
            rule_id: "artifact.non_root_user".to_string(),
            message: "workload runs as user 0:0".to_string(),
            subject: Subject::Artifact {
                service_id: "web".to_string(),
                target: RenderTarget::ContainerCompose,
            },
            severity: Severity::Deny,
            field_path: "services.web.user".to_string(),
        }
    }

    #[test]
    fn test_secrets_exit_codes() {
        let staging = || SecretsError::Staging {
            service_id: "web".to_string(),
            target: RenderTarget::ContainerCompose,
            path: PathBuf::from("/tmp/staging/web"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let shred = SecretsError::ShredFailed {
            service_id: "web".to_string(),
            target: RenderTarget::ContainerCompose,
            paths: vec![PathBuf::from("/tmp/staging/web/env")],
        };

        let plain = PipelineError::Secrets { source: staging(), violations: Vec::new() };
        assert_eq!(plain.exit_code(), EXIT_SECRETS);

        let staging_with_deny = PipelineError::Secrets { source: staging(), violations: vec![deny()] };
        assert_eq!(staging_with_deny.exit_code(), EXIT_POLICY_DENY);

        let shred_with_deny = PipelineError::Secrets { source: shred, violations: vec![deny()] };
        assert_eq!(shred_with_deny.exit_code(), EXIT_SECRETS);
        assert_eq!(shred_with_deny.error_code(), codes::secrets::SHRED_FAILURE);
        assert_eq!(shred_with_deny.violations().len(), 1);
    }
}
