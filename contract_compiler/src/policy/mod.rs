//! Policy evaluator
//!
//! Rules are data: a rule set is a list of [`Rule`] values and evaluation is
//! one loop over them. Every rule runs and every violation is kept.

pub mod error;
pub mod predicates;
pub mod rules;
pub mod types;

pub use error::PolicyError;
pub use rules::RuleSet;
pub use types::{
    render_message, Finding, PolicyViolation, Predicate, Rule, RuleScope, Severity, Subject,
};

use crate::config::compile_time::policy::MAX_VIOLATIONS;
use crate::contract::{ResolvedContract, ServiceContract};
use crate::logging::codes;
use crate::render::RenderedArtifact;
use crate::{log_debug, log_error, log_success, log_warning};

fn violations_for(rule: &Rule, subject: &Subject, findings: Vec<Finding>) -> Vec<PolicyViolation> {
    findings
        .into_iter()
        .map(|mut finding| {
            finding
                .bindings
                .entry("service_id".to_string())
                .or_insert_with(|| subject.service_id().to_string());
            if let Some(target) = subject.target() {
                finding
                    .bindings
                    .entry("target".to_string())
                    .or_insert_with(|| target.to_string());
            }
            PolicyViolation {
                rule_id: rule.id.clone(),
                message: render_message(&rule.message, &finding.bindings),
                subject: subject.clone(),
                severity: rule.severity,
                field_path: finding.field_path,
            }
        })
        .collect()
}

fn report(violations: &[PolicyViolation], subject: &Subject) {
    for violation in violations {
        match violation.severity {
            Severity::Deny => log_error!(codes::policy::DENY_VIOLATION, &violation.message,
                "rule" => violation.rule_id,
                "subject" => subject,
                "field" => violation.field_path),
            Severity::Warn => log_warning!(code = codes::policy::WARN_VIOLATION, &violation.message,
                "rule" => violation.rule_id,
                "subject" => subject,
                "field" => violation.field_path),
        }
    }
    if !violations.iter().any(PolicyViolation::is_deny) {
        log_success!(codes::success::POLICY_PASSED, "Policy evaluation passed",
            "subject" => subject,
            "warnings" => violations.len());
    }
}

fn evaluate<F>(rules: &RuleSet, scope: RuleScope, subject: Subject, mut check: F) -> Vec<PolicyViolation>
where
    F: FnMut(&Predicate) -> Vec<Finding>,
{
    let mut violations = Vec::new();
    for rule in rules.scoped(scope) {
        let found = violations_for(rule, &subject, check(&rule.predicate));
        log_debug!("Rule evaluated", "rule" => rule.id, "findings" => found.len());
        violations.extend(found);
    }
    let violations = cap_violations(violations, MAX_VIOLATIONS);
    report(&violations, &subject);
    violations
}

/// Keep every deny; warn entries fill whatever room is left under `limit`
fn cap_violations(mut violations: Vec<PolicyViolation>, limit: usize) -> Vec<PolicyViolation> {
    if violations.len() <= limit {
        return violations;
    }
    let denies = violations.iter().filter(|v| v.is_deny()).count();
    let mut warn_room = limit.saturating_sub(denies);
    let before = violations.len();
    violations.retain(|v| {
        if v.is_deny() {
            return true;
        }
        let keep = warn_room > 0;
        warn_room = warn_room.saturating_sub(1);
        keep
    });
    log_warning!("Warn violations truncated",
        "dropped" => before - violations.len(),
        "kept" => violations.len(),
        "limit" => limit);
    violations
}

/// Pre-render pass over one validated contract
pub fn evaluate_contract(rules: &RuleSet, contract: &ServiceContract) -> Vec<PolicyViolation> {
    let subject = Subject::Contract {
        service_id: contract.service_id.clone(),
    };
    evaluate(rules, RuleScope::Contract, subject, |predicate| {
        predicates::check_contract(predicate, contract)
    })
}

/// Post-render pass over one artifact
pub fn evaluate_artifact(
    rules: &RuleSet,
    resolved: &ResolvedContract,
    artifact: &RenderedArtifact,
) -> Vec<PolicyViolation> {
    let subject = Subject::Artifact {
        service_id: artifact.service_id.clone(),
        target: artifact.target,
    };
    evaluate(rules, RuleScope::Artifact, subject, |predicate| {
        predicates::check_artifact(predicate, resolved, artifact)
    })
}

/// Whether a set of violations blocks, given the warn handling
pub fn is_blocking(violations: &[PolicyViolation], fail_on_warn: bool) -> bool {
    violations
        .iter()
        .any(|v| v.is_deny() || (fail_on_warn && v.severity == Severity::Warn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ImageReference, RenderTarget};
    use crate::render::{fixtures, renderer_for};
    use serde_json::json;

    #[test]
    fn test_latest_image_yields_single_deny() {
        let _ = crate::logging::init_global_logging();
        let mut resolved = fixtures::resolved(json!({}));
        resolved.contract.image = ImageReference::parse("registry/x:latest").unwrap();

        let violations = evaluate_contract(&RuleSet::builtin(), &resolved.contract);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule_id, "image.digest_pinned");
        assert_eq!(violations[0].field_path, "service_image");
        assert!(violations[0].is_deny());
        assert_eq!(
            violations[0].message,
            "image 'registry/x:latest' must carry a content digest or a non-latest tag"
        );
    }

    #[test]
    fn test_every_rule_runs_without_short_circuit() {
        let _ = crate::logging::init_global_logging();
        let resolved = fixtures::resolved(json!({
            "image": "registry/x",
            "resources": {"memory_mb": 32, "cpu_cores": 128},
            "ports": [{"target": 80, "host_ip": "0.0.0.0"}],
            "security": {"capabilities_add": ["NET_ADMIN"]}
        }));
        let violations = evaluate_contract(&RuleSet::builtin(), &resolved.contract);
        let ids: Vec<&str> = violations.iter().map(|v| v.rule_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "image.digest_pinned",
                "resources.memory_bounds",
                "resources.cpu_bounds",
                "ports.privileged_published",
                "ports.wildcard_host_ip",
                "security.capabilities_added"
            ]
        );
        assert!(is_blocking(&violations, false));
        let warns: Vec<_> = violations.iter().filter(|v| !v.is_deny()).cloned().collect();
        assert!(!is_blocking(&warns, false));
        assert!(is_blocking(&warns, true));
    }

    #[test]
    fn test_noisy_warn_rule_cannot_hide_a_deny() {
        let _ = crate::logging::init_global_logging();
        // Two manifest lines per entry, enough to exceed the cap
        let environment: Vec<_> = (0..500)
            .map(|i| json!({"name": format!("VAR_{}", i), "value": "x"}))
            .collect();
        let resolved = fixtures::resolved(json!({"environment": environment}));
        let mut rules = RuleSet::empty();
        let text_rule = |id: &str, severity, pattern: &str| {
            Rule::new(
                id,
                severity,
                "line {line} matches {pattern}",
                Predicate::ForbiddenText {
                    pattern: pattern.to_string(),
                    targets: Vec::new(),
                },
            )
        };
        rules.insert(text_rule("text.any_line", Severity::Warn, ".")).unwrap();
        rules.insert(text_rule("text.deployment", Severity::Deny, "kind: Deployment")).unwrap();

        let target = RenderTarget::OrchestratorManifest;
        let artifact = renderer_for(target)
            .render(&resolved, &fixtures::plan_for(&resolved, target))
            .unwrap();
        let violations = evaluate_artifact(&rules, &resolved, &artifact);

        assert_eq!(violations.len(), MAX_VIOLATIONS);
        assert_eq!(violations.iter().filter(|v| v.is_deny()).count(), 1);
        assert!(is_blocking(&violations, false));
    }

    #[test]
    fn test_cap_keeps_order_and_all_denies() {
        let _ = crate::logging::init_global_logging();
        let violation = |id: &str, severity| PolicyViolation {
            rule_id: id.to_string(),
            message: String::new(),
            subject: Subject::Contract {
                service_id: "web".to_string(),
            },
            severity,
            field_path: String::new(),
        };
        let input = vec![
            violation("w1", Severity::Warn),
            violation("w2", Severity::Warn),
            violation("d1", Severity::Deny),
            violation("w3", Severity::Warn),
            violation("d2", Severity::Deny),
        ];
        let ids = |list: &[PolicyViolation]| list.iter().map(|v| v.rule_id.clone()).collect::<Vec<_>>();

        assert_eq!(ids(&cap_violations(input.clone(), 3)), vec!["w1", "d1", "d2"]);
        assert_eq!(ids(&cap_violations(input.clone(), 1)), vec!["d1", "d2"]);
        assert_eq!(cap_violations(input, 10).len(), 5);
    }

    #[test]
    fn test_clean_artifacts_have_no_violations() {
        let _ = crate::logging::init_global_logging();
        let resolved = fixtures::resolved(json!({"command": ["/usr/bin/web"], "address": "10.0.0.5"}));
        let rules = RuleSet::builtin();
        for target in RenderTarget::ALL {
            let artifact = renderer_for(target)
                .render(&resolved, &fixtures::plan_for(&resolved, target))
                .unwrap();
            let violations = evaluate_artifact(&rules, &resolved, &artifact);
            assert!(violations.is_empty(), "{}: {:?}", target, violations);
        }
    }

    #[test]
    fn test_artifact_subject_binds_target() {
        let _ = crate::logging::init_global_logging();
        let resolved = fixtures::resolved(json!({"security": {"run_as_user": 0}}));
        let mut rules = RuleSet::empty();
        rules
            .insert(Rule::new(
                "custom.root",
                Severity::Warn,
                "{target} runs {service_id} as {user}",
                Predicate::NonRootUser,
            ))
            .unwrap();
        let target = RenderTarget::ContainerCompose;
        let artifact = renderer_for(target)
            .render(&resolved, &fixtures::plan_for(&resolved, target))
            .unwrap();
        let violations = evaluate_artifact(&rules, &resolved, &artifact);
        assert_eq!(violations[0].message, "container-compose runs web as 0:0");
        assert_eq!(violations[0].subject.target(), Some(target));
    }
}
