//! Staged compile of one batch
//!
//! Load, validate, resolve and the pre-render policy pass run once for the
//! whole batch and stop it on failure. Rendering, secrets staging and the
//! post-render pass then run per (service_id, target) on the worker pool.

mod error;
mod report;
mod request;

pub use error::{
    PipelineError, EXIT_DEPENDENCY, EXIT_INVALID, EXIT_OK, EXIT_POLICY_DENY, EXIT_RENDER, EXIT_SECRETS,
};
pub use report::{CompileReport, TargetOutcome, TargetStatus};
pub use request::{CompileRequest, TargetSelection};

use crate::batch::{self, BatchConfig};
use crate::config::compile_time::input::MAX_DOCUMENTS_PER_BATCH;
use crate::contract::{RenderTarget, ResolvedContract, ServiceContract};
use crate::dependency::{self, DependencyFailure, DependencyRegistry};
use crate::logging::{self, codes};
use crate::policy::{self, PolicyViolation, RuleSet};
use crate::render::renderer_for;
use crate::secrets::{self, SecretsError, SecretsManager};
use crate::validation::{self, ContractDocument, InputError};
use crate::{log_error, log_info, log_success};
use std::path::Path;

/// Load every input document of the request
pub fn load_documents(request: &CompileRequest) -> Result<Vec<ContractDocument>, PipelineError> {
    let config = BatchConfig {
        max_files: MAX_DOCUMENTS_PER_BATCH,
        ..BatchConfig::with_threads(request.worker_threads)
    };
    let paths = if request.inputs.is_empty() {
        Vec::new()
    } else {
        batch::collect_inputs(&request.inputs, &config)?
    };

    let mut documents = Vec::with_capacity(paths.len() + request.documents.len());
    for path in &paths {
        documents.push(validation::load_document(path)?);
    }
    documents.extend(request.documents.iter().cloned());

    if documents.len() > MAX_DOCUMENTS_PER_BATCH {
        return Err(InputError::TooManyDocuments {
            count: documents.len(),
            limit: MAX_DOCUMENTS_PER_BATCH,
        }
        .into());
    }
    Ok(documents)
}

/// Built-ins or the request's base set, then each rule document
pub fn effective_rules(request: &CompileRequest) -> Result<RuleSet, PipelineError> {
    let mut rules = request.rules.clone().unwrap_or_else(RuleSet::builtin);
    for path in &request.rule_paths {
        rules.extend(RuleSet::load(path)?)?;
    }
    Ok(rules)
}

fn load_registry(request: &CompileRequest) -> Result<DependencyRegistry, PipelineError> {
    let mut fragments = Vec::with_capacity(request.registry_paths.len() + request.registry_fragments.len());
    for path in &request.registry_paths {
        fragments.push(validation::load_value(path)?);
    }
    fragments.extend(request.registry_fragments.iter().cloned());

    DependencyRegistry::from_fragments(&fragments).map_err(|error| {
        log_error!(error.error_code(), &error.to_string());
        PipelineError::Dependency(DependencyFailure { errors: vec![error] })
    })
}

/// Load and validate without resolving or rendering
pub fn validate_only(request: &CompileRequest) -> Result<Vec<ServiceContract>, PipelineError> {
    let documents = load_documents(request)?;
    Ok(validation::validate_batch(&documents)?)
}

/// Run the whole pipeline for one batch
pub fn compile(request: &CompileRequest) -> Result<CompileReport, PipelineError> {
    log_info!("Starting contract compile",
        "inputs" => request.inputs.len(),
        "inline_documents" => request.documents.len(),
        "staging_root" => request.staging_root.display());

    let documents = load_documents(request)?;
    let rules = effective_rules(request)?;
    let contracts = validation::validate_batch(&documents)?;
    let registry = load_registry(request)?;
    let resolved = dependency::resolve_batch(contracts, &registry)?;

    let mut contract_violations = Vec::new();
    for entry in &resolved {
        contract_violations.extend(policy::evaluate_contract(&rules, &entry.contract));
    }
    if policy::is_blocking(&contract_violations, request.fail_on_warn) {
        log_error!(codes::policy::DENY_VIOLATION, "Pre-render policy denied the batch",
            "violations" => contract_violations.len());
        return Err(PipelineError::PolicyDenied {
            violations: contract_violations,
        });
    }

    let items = work_items(&resolved, &request.targets);
    let manager = SecretsManager::new();
    let results = batch::run_parallel(&items, request.worker_threads, |_, &(index, target)| {
        let entry = &resolved[index];
        let document = source_document(&documents, entry.service_id());
        logging::with_contract_context(entry.service_id(), document, || {
            compile_target(entry, target, &rules, request, &manager)
        })
    })?;

    let mut outcomes = Vec::with_capacity(results.len());
    let mut failure = None;
    for result in results {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) if failure.is_none() => failure = Some(err),
            Err(err) => log_error!(err.source.error_code(), &err.source.to_string(),
                "violations" => err.violations.len()),
        }
    }

    if let Some(TargetFailure { source, mut violations }) = failure {
        log_error!(source.error_code(), &source.to_string(),
            "service_id" => source.service_id(),
            "target" => source.target());
        for outcome in &outcomes {
            violations.extend(outcome.violations().iter().cloned());
        }
        // Dropping the outcomes shreds everything already staged
        drop(outcomes);
        return Err(PipelineError::Secrets { source, violations });
    }

    let report = CompileReport {
        compiled_at: chrono::Utc::now(),
        contracts: resolved.len(),
        contract_violations,
        outcomes,
    };
    report.log_summary();
    Ok(report)
}

fn work_items(resolved: &[ResolvedContract], selection: &TargetSelection) -> Vec<(usize, RenderTarget)> {
    let mut items: Vec<(usize, RenderTarget)> = resolved
        .iter()
        .enumerate()
        .flat_map(|(index, entry)| {
            selection
                .targets_for(&entry.contract)
                .into_iter()
                .map(move |target| (index, target))
        })
        .collect();
    items.sort_by(|a, b| {
        resolved[a.0]
            .service_id()
            .cmp(resolved[b.0].service_id())
            .then(a.1.cmp(&b.1))
    });
    items
}

fn source_document<'a>(documents: &'a [ContractDocument], service_id: &str) -> &'a Path {
    documents
        .iter()
        .find(|d| d.service_id_hint() == service_id)
        .map(|d| d.path.as_path())
        .unwrap_or_else(|| Path::new("-"))
}

struct TargetFailure {
    source: SecretsError,
    violations: Vec<PolicyViolation>,
}

impl From<SecretsError> for TargetFailure {
    fn from(source: SecretsError) -> Self {
        Self {
            source,
            violations: Vec::new(),
        }
    }
}

fn compile_target(
    resolved: &ResolvedContract,
    target: RenderTarget,
    rules: &RuleSet,
    request: &CompileRequest,
    manager: &SecretsManager,
) -> Result<TargetOutcome, TargetFailure> {
    let service_id = resolved.service_id();
    let plan = secrets::plan_with_mode(resolved, target, &request.staging_root, request.secret_file_mode);

    let artifact = match renderer_for(target).render(resolved, &plan) {
        Ok(artifact) => artifact,
        Err(error) => {
            log_error!(error.error_code(), &error.to_string(),
                "target" => target,
                "field" => error.field_path().unwrap_or("-"));
            return Ok(TargetOutcome::new(service_id, target, TargetStatus::Failed { error }, None));
        }
    };
    log_success!(codes::success::ARTIFACT_RENDERED, "Artifact rendered",
        "target" => target,
        "file" => artifact.metadata.file_name.as_str());

    let mut staged = manager.materialize(&plan, resolved)?;
    let violations = policy::evaluate_artifact(rules, resolved, &artifact);

    if policy::is_blocking(&violations, request.fail_on_warn) {
        let shred = if staged.is_empty() {
            None
        } else {
            match staged.shred() {
                Ok(report) => Some(report),
                Err(source) => return Err(TargetFailure { source, violations }),
            }
        };
        let status = TargetStatus::Blocked {
            artifact,
            violations,
            shred,
        };
        return Ok(TargetOutcome::new(service_id, target, status, None));
    }

    let staged = (!staged.is_empty()).then_some(staged);
    let status = TargetStatus::Rendered { artifact, violations };
    Ok(TargetOutcome::new(service_id, target, status, staged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Predicate, Rule, Severity};
    use crate::render::ArtifactDocument;
    use crate::secrets::StagingState;
    use assert_matches::assert_matches;
    use serde_json::{json, Value};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    const DIGEST: &str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn web_contract(patch: Value) -> Value {
        let mut value = json!({
            "service_id": "web",
            "runtime_templates": ["container-compose"],
            "image": format!("registry/x@{}", DIGEST),
            "resources": {"memory_mb": 512, "cpu_cores": 1},
            "ports": [{"target": 8080, "published": 8080}],
            "health": {"cmd": ["/bin/sh", "-c", "exit 0"]}
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut value, patch) {
            base.extend(extra);
        }
        value
    }

    fn write_contract(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, serde_yaml::to_string(value).unwrap()).unwrap();
        path
    }

    fn request(dir: &TempDir, inputs: Vec<PathBuf>) -> CompileRequest {
        CompileRequest::new(inputs)
            .with_staging_root(dir.path().join("staging"))
            .with_worker_threads(2)
    }

    #[test]
    fn test_compose_scenario_compiles_clean() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let path = write_contract(&dir, "web.yml", &web_contract(json!({})));

        let report = compile(&request(&dir, vec![path])).unwrap();
        assert_eq!(report.exit_code(), EXIT_OK);
        assert_eq!(report.outcomes.len(), 1);
        assert!(report.violations().all(|v| !v.is_deny()));

        let outcome = report.outcome("web", RenderTarget::ContainerCompose).unwrap();
        assert!(outcome.is_ready());
        assert!(outcome.staged().is_none());
        let artifact = outcome.artifact().unwrap();
        let ArtifactDocument::Yaml(docs) = &artifact.document else {
            panic!("compose renders yaml");
        };
        let service = &docs[0]["services"]["web"];
        assert_eq!(service["user"], json!("65532:65532"));
        assert_eq!(service["read_only"], json!(true));
        assert_eq!(service["cap_drop"], json!(["ALL"]));
        assert_eq!(service["ports"], json!(["8080:8080"]));
        assert_eq!(service["healthcheck"]["test"], json!(["CMD", "/bin/sh", "-c", "exit 0"]));
        assert_eq!(artifact.metadata.health_cmd, vec!["/bin/sh", "-c", "exit 0"]);
    }

    #[test]
    fn test_latest_image_is_denied_before_render() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let contract = web_contract(json!({
            "image": "registry/x:latest",
            "runtime_templates": ["container-compose", "orchestrator-manifest"]
        }));
        let path = write_contract(&dir, "web.yml", &contract);

        let err = compile(&request(&dir, vec![path])).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_POLICY_DENY);
        let denies: Vec<&PolicyViolation> = err.violations().iter().filter(|v| v.is_deny()).collect();
        assert_eq!(denies.len(), 1);
        assert_eq!(denies[0].rule_id, "image.digest_pinned");
        assert_eq!(denies[0].field_path, "service_image");
        assert!(!dir.path().join("staging").exists());
    }

    #[test]
    fn test_missing_dependency_aborts_batch() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let path = write_contract(&dir, "web.yml", &web_contract(json!({"requires": [{"name": "cache"}]})));

        let err = compile(&request(&dir, vec![path.clone()])).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_DEPENDENCY);
        assert_matches!(&err, PipelineError::Dependency(failure) if failure.errors[0].kind() == "missing");

        let registry = dir.path().join("registry.yml");
        fs::write(&registry, "cache:\n  version: \"7.2\"\n").unwrap();
        let report = compile(&request(&dir, vec![path]).with_registry_file(registry)).unwrap();
        assert_eq!(report.exit_code(), EXIT_OK);
    }

    #[test]
    fn test_mutual_requirements_report_cycle() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let alpha = web_contract(json!({"service_id": "alpha", "requires": ["beta"]}));
        let beta = web_contract(json!({"service_id": "beta", "requires": ["alpha"]}));
        write_contract(&dir, "alpha.yml", &alpha);
        write_contract(&dir, "beta.yml", &beta);

        let contracts_dir = dir.path().to_path_buf();
        let err = compile(&request(&dir, vec![contracts_dir])).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_DEPENDENCY);
        let PipelineError::Dependency(failure) = &err else {
            panic!("expected dependency failure, got {err}");
        };
        let cycle = failure.errors.iter().find(|e| e.kind() == "cycle").unwrap();
        let text = cycle.to_string();
        assert!(text.contains("alpha") && text.contains("beta"), "{text}");
    }

    #[test]
    fn test_unscoped_secrets_fail_validation() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let contract = web_contract(json!({
            "secrets": {"env": [{"name": "DB_PASSWORD", "value": "hunter2-secret"}]}
        }));
        let path = write_contract(&dir, "web.yml", &contract);

        let err = compile(&request(&dir, vec![path])).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_INVALID);
        assert_matches!(err, PipelineError::Validation(_));
    }

    #[test]
    fn test_compile_is_idempotent_and_rotation_moves_one_line() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let compile_with = |rotation: &str| {
            let contract = web_contract(json!({
                "service_namespace": "shop",
                "secrets": {
                    "env": [{"name": "DB_PASSWORD", "value": "hunter2-secret"}],
                    "rotation_timestamp": rotation
                }
            }));
            let path = write_contract(&dir, "web.yml", &contract);
            let mut report = compile(&request(&dir, vec![path])).unwrap();
            let outcome = &mut report.outcomes[0];
            outcome.take_staged().unwrap().complete_apply().unwrap();
            outcome.artifact().unwrap().text.clone()
        };

        let first = compile_with("2024-05-01T00:00:00Z");
        assert_eq!(first, compile_with("2024-05-01T00:00:00Z"));

        let rotated = compile_with("2024-06-01T00:00:00Z");
        let differing = first.lines().zip(rotated.lines()).filter(|(a, b)| a != b).count();
        assert_eq!(differing, 1);
        assert!(!first.contains("hunter2-secret"));
    }

    #[test]
    fn test_staged_secrets_travel_with_ready_outcome() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let contract = web_contract(json!({
            "service_namespace": "shop",
            "secrets": {"env": [{"name": "DB_PASSWORD", "value": "hunter2-secret"}]}
        }));
        let path = write_contract(&dir, "web.yml", &contract);

        let mut report = compile(&request(&dir, vec![path])).unwrap();
        let staged = report.outcomes[0].take_staged().unwrap();
        assert_eq!(staged.state(), StagingState::Staged);
        let files = staged.files().to_vec();
        assert!(files.iter().all(|f| f.exists()));

        let shred = staged.complete_apply().unwrap();
        assert_eq!(shred.files_shredded, 1);
        assert!(files.iter().all(|f| !f.exists()));
    }

    #[test]
    fn test_post_render_deny_blocks_and_shreds() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let contract = web_contract(json!({
            "service_namespace": "shop",
            "command": ["/usr/bin/web", "--debug"],
            "secrets": {"env": [{"name": "DB_PASSWORD", "value": "hunter2-secret"}]}
        }));
        let path = write_contract(&dir, "web.yml", &contract);
        let mut rules = RuleSet::builtin();
        rules
            .insert(Rule::new(
                "custom.no_debug",
                Severity::Deny,
                "{service_id} ships a debug flag for {target}",
                Predicate::ForbiddenText {
                    pattern: "--debug".to_string(),
                    targets: Vec::new(),
                },
            ))
            .unwrap();

        let report = compile(&request(&dir, vec![path]).with_rules(rules)).unwrap();
        assert_eq!(report.exit_code(), EXIT_POLICY_DENY);
        let outcome = &report.outcomes[0];
        assert!(outcome.staged().is_none());
        assert_matches!(
            &outcome.status,
            TargetStatus::Blocked { shred: Some(shred), .. } if shred.files_shredded == 1
        );
        assert_eq!(
            outcome.violations()[0].message,
            "web ships a debug flag for container-compose"
        );
        assert!(!dir.path().join("staging/web/container-compose").exists());
        assert_eq!(report.artifacts().count(), 0);
    }

    #[test]
    fn test_render_error_is_scoped_to_its_target() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let contract = web_contract(json!({"runtime_templates": ["container-compose", "host-init-unit"]}));
        let path = write_contract(&dir, "web.yml", &contract);

        let report = compile(&request(&dir, vec![path])).unwrap();
        assert_eq!(report.exit_code(), EXIT_RENDER);
        assert!(report.outcome("web", RenderTarget::ContainerCompose).unwrap().is_ready());
        assert_matches!(
            &report.outcome("web", RenderTarget::HostInitUnit).unwrap().status,
            TargetStatus::Failed { error } if error.field_path() == Some("command")
        );
    }

    #[test]
    fn test_staging_failure_aborts_compile() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let contract = web_contract(json!({
            "service_namespace": "shop",
            "secrets": {"env": [{"name": "DB_PASSWORD", "value": "hunter2-secret"}]}
        }));
        let path = write_contract(&dir, "web.yml", &contract);
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        let err = compile(&request(&dir, vec![path]).with_staging_root(&blocker)).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_SECRETS);
        assert_matches!(err, PipelineError::Secrets { source: SecretsError::Staging { .. }, .. });
    }

    #[test]
    fn test_outcomes_are_sorted_and_filtered_by_target() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let targets = json!(["orchestrator-manifest", "container-compose", "container-unit-supervisor"]);
        let beta = web_contract(json!({"service_id": "beta", "runtime_templates": targets.clone()}));
        let alpha = web_contract(json!({"service_id": "alpha", "runtime_templates": targets}));
        let documents = vec![
            ContractDocument::new("beta.yml", beta),
            ContractDocument::new("alpha.yml", alpha),
        ];

        let mut request = CompileRequest::from_documents(documents.clone())
            .with_staging_root(dir.path().join("staging"))
            .with_worker_threads(3);
        let report = compile(&request).unwrap();
        let order: Vec<(&str, RenderTarget)> = report
            .outcomes
            .iter()
            .map(|o| (o.service_id.as_str(), o.target))
            .collect();
        assert_eq!(order, vec![
            ("alpha", RenderTarget::ContainerCompose),
            ("alpha", RenderTarget::ContainerUnitSupervisor),
            ("alpha", RenderTarget::OrchestratorManifest),
            ("beta", RenderTarget::ContainerCompose),
            ("beta", RenderTarget::ContainerUnitSupervisor),
            ("beta", RenderTarget::OrchestratorManifest),
        ]);

        request = request.with_targets(TargetSelection::parse(&["kubernetes", "baremetal"]).unwrap());
        let report = compile(&request).unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes.iter().all(|o| o.target == RenderTarget::OrchestratorManifest));
        assert_eq!(report.to_json()["outcomes"][0]["status"], json!("rendered"));
    }

    #[test]
    fn test_validate_only_and_rule_documents() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();
        let path = write_contract(&dir, "web.yml", &web_contract(json!({})));
        let contracts = validate_only(&request(&dir, vec![path])).unwrap();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].service_id, "web");

        let rules_path = dir.path().join("rules.yml");
        fs::write(
            &rules_path,
            "rules:\n  - id: image.digest_pinned\n    severity: warn\n    message: relaxed\n    predicate:\n      kind: image_pinned\n",
        )
        .unwrap();
        let rules = effective_rules(&CompileRequest::new(Vec::new()).with_rules_file(&rules_path)).unwrap();
        assert_eq!(rules.get("image.digest_pinned").unwrap().severity, Severity::Warn);
        assert_eq!(rules.len(), RuleSet::builtin().len());
    }
}
