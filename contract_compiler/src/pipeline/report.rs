use super::error::{EXIT_OK, EXIT_POLICY_DENY, EXIT_RENDER};
use crate::contract::RenderTarget;
use crate::logging::codes;
use crate::policy::PolicyViolation;
use crate::render::{RenderError, RenderedArtifact};
use crate::secrets::{ShredReport, StagedSecrets};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

#[derive(Debug)]
pub enum TargetStatus {
    /// Ready for apply; staged secrets travel with the outcome
    Rendered {
        artifact: RenderedArtifact,
        violations: Vec<PolicyViolation>,
    },
    /// A post-render deny; never handed to apply
    Blocked {
        artifact: RenderedArtifact,
        violations: Vec<PolicyViolation>,
        shred: Option<ShredReport>,
    },
    Failed { error: RenderError },
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Rendered { .. } => "rendered",
            TargetStatus::Blocked { .. } => "blocked",
            TargetStatus::Failed { .. } => "failed",
        }
    }
}

/// Result of one (service_id, target) work item
#[derive(Debug)]
pub struct TargetOutcome {
    pub service_id: String,
    pub target: RenderTarget,
    pub status: TargetStatus,
    staged: Option<StagedSecrets>,
}

impl TargetOutcome {
    pub(crate) fn new(service_id: &str, target: RenderTarget, status: TargetStatus, staged: Option<StagedSecrets>) -> Self {
        Self {
            service_id: service_id.to_string(),
            target,
            status,
            staged,
        }
    }

    pub fn artifact(&self) -> Option<&RenderedArtifact> {
        match &self.status {
            TargetStatus::Rendered { artifact, .. } | TargetStatus::Blocked { artifact, .. } => Some(artifact),
            TargetStatus::Failed { .. } => None,
        }
    }

    pub fn violations(&self) -> &[PolicyViolation] {
        match &self.status {
            TargetStatus::Rendered { violations, .. } | TargetStatus::Blocked { violations, .. } => violations,
            TargetStatus::Failed { .. } => &[],
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status, TargetStatus::Rendered { .. })
    }

    pub fn staged(&self) -> Option<&StagedSecrets> {
        self.staged.as_ref()
    }

    /// Hand the staged secrets to the apply step
    pub fn take_staged(&mut self) -> Option<StagedSecrets> {
        self.staged.take()
    }

    fn to_json(&self) -> Value {
        let mut entry = json!({
            "service_id": self.service_id,
            "target": self.target.as_str(),
            "status": self.status.as_str(),
            "violations": self.violations(),
        });
        match &self.status {
            TargetStatus::Rendered { artifact, .. } | TargetStatus::Blocked { artifact, .. } => {
                entry["file_name"] = json!(artifact.metadata.file_name);
                entry["metadata"] = json!(artifact.metadata);
                entry["text"] = json!(artifact.text);
            }
            TargetStatus::Failed { error } => {
                entry["error"] = json!({
                    "code": error.error_code().as_str(),
                    "message": error.to_string(),
                    "field": error.field_path(),
                });
            }
        }
        if let TargetStatus::Blocked { shred: Some(shred), .. } = &self.status {
            entry["shred"] = json!(shred);
        }
        entry
    }
}

/// Outcome of a compile that got past the batch-level stages
#[derive(Debug)]
pub struct CompileReport {
    pub compiled_at: DateTime<Utc>,
    pub contracts: usize,
    /// Non-blocking pre-render findings
    pub contract_violations: Vec<PolicyViolation>,
    pub outcomes: Vec<TargetOutcome>,
}

impl CompileReport {
    pub fn outcome(&self, service_id: &str, target: RenderTarget) -> Option<&TargetOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.service_id == service_id && o.target == target)
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &RenderedArtifact> {
        self.outcomes
            .iter()
            .filter(|o| o.is_ready())
            .filter_map(TargetOutcome::artifact)
    }

    pub fn blocked_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, TargetStatus::Blocked { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, TargetStatus::Failed { .. }))
            .count()
    }

    /// A deny outranks a render error
    pub fn exit_code(&self) -> i32 {
        if self.blocked_count() > 0 {
            EXIT_POLICY_DENY
        } else if self.failed_count() > 0 {
            EXIT_RENDER
        } else {
            EXIT_OK
        }
    }

    pub fn violations(&self) -> impl Iterator<Item = &PolicyViolation> {
        self.contract_violations
            .iter()
            .chain(self.outcomes.iter().flat_map(|o| o.violations().iter()))
    }

    pub fn to_json(&self) -> Value {
        json!({
            "compiled_at": self.compiled_at.to_rfc3339(),
            "contracts": self.contracts,
            "exit_code": self.exit_code(),
            "contract_violations": self.contract_violations,
            "outcomes": self.outcomes.iter().map(TargetOutcome::to_json).collect::<Vec<_>>(),
        })
    }

    pub(crate) fn log_summary(&self) {
        crate::log_success!(codes::success::BATCH_COMPLETED, "Compile batch completed",
            "contracts" => self.contracts,
            "outcomes" => self.outcomes.len(),
            "blocked" => self.blocked_count(),
            "failed" => self.failed_count(),
            "exit_code" => self.exit_code());
    }
}
