//! Dependency and export resolution for a compile batch
//!
//! The batch contracts are overlaid on the registry, the combined graph is
//! checked for cycles, then every requirement is looked up. All errors are
//! collected before the batch is rejected.

pub mod error;
pub mod graph;
pub mod interpolate;
pub mod registry;

pub use error::{DependencyError, DependencyFailure};
pub use graph::DependencyGraph;
pub use registry::{exports_hash, DependencyRegistry, EntryOrigin, RegistryEntry};

use crate::contract::{EnvVar, ResolvedContract, ServiceContract};
use crate::logging::codes;
use crate::{log_error, log_success};
use std::collections::{BTreeMap, BTreeSet};

fn versions_match(required: &str, available: &str) -> bool {
    let strip = |v: &str| v.trim().trim_start_matches('v').to_string();
    strip(required) == strip(available)
}

#[derive(Default)]
struct Findings {
    cycles: Vec<DependencyError>,
    missing: Vec<DependencyError>,
    versions: Vec<DependencyError>,
    hashes: Vec<DependencyError>,
    exports: Vec<DependencyError>,
    undeclared: Vec<DependencyError>,
}

impl Findings {
    fn into_errors(self) -> Vec<DependencyError> {
        let mut errors = self.cycles;
        errors.extend(self.missing);
        errors.extend(self.versions);
        errors.extend(self.hashes);
        errors.extend(self.exports);
        errors.extend(self.undeclared);
        errors
    }
}

fn check_requirements(contract: &ServiceContract, combined: &DependencyRegistry, findings: &mut Findings) {
    let service_id = &contract.service_id;

    for (i, requirement) in contract.requires.iter().enumerate() {
        let field = format!("requires[{}]", i);
        let Some(entry) = combined.get(&requirement.name) else {
            findings.missing.push(DependencyError::Missing {
                service_id: service_id.clone(),
                dependency: requirement.name.clone(),
                field,
            });
            continue;
        };

        if let (Some(required), Some(available)) = (&requirement.version, &entry.version) {
            if !versions_match(required, available) {
                findings.versions.push(DependencyError::VersionMismatch {
                    service_id: service_id.clone(),
                    dependency: requirement.name.clone(),
                    required: required.clone(),
                    available: available.clone(),
                    field: format!("{}.version", field),
                });
            }
        }

        if let Some(expected) = &requirement.exports_hash {
            let actual = entry.effective_exports_hash();
            if !expected.eq_ignore_ascii_case(&actual) {
                findings.hashes.push(DependencyError::ExportsHashMismatch {
                    service_id: service_id.clone(),
                    dependency: requirement.name.clone(),
                    expected: expected.clone(),
                    actual,
                    field: format!("{}.exports_hash", field),
                });
            }
        }

        for (j, key) in requirement.exports.iter().enumerate() {
            if !entry.exports.contains_key(key) {
                findings.exports.push(DependencyError::MissingExport {
                    service_id: service_id.clone(),
                    dependency: requirement.name.clone(),
                    export: key.clone(),
                    field: format!("{}.exports[{}]", field, j),
                });
            }
        }
    }

    for (i, var) in contract.environment.iter().enumerate() {
        let field = format!("environment[{}].value", i);
        let mut reported = BTreeSet::new();
        for reference in interpolate::references(&var.value) {
            if contract.requirement(&reference.service).is_none() {
                if reported.insert(reference.service.clone()) {
                    findings.undeclared.push(DependencyError::Undeclared {
                        service_id: service_id.clone(),
                        dependency: reference.service,
                        field: field.clone(),
                    });
                }
                continue;
            }
            // Missing services were already reported against requires
            if let Some(entry) = combined.get(&reference.service) {
                if !entry.exports.contains_key(&reference.key) {
                    findings.exports.push(DependencyError::MissingExport {
                        service_id: service_id.clone(),
                        dependency: reference.service,
                        export: reference.key,
                        field: field.clone(),
                    });
                }
            }
        }
    }
}

fn resolve_contract(contract: ServiceContract, combined: &DependencyRegistry) -> ResolvedContract {
    let dependency_exports: BTreeMap<String, BTreeMap<String, String>> = contract
        .requires
        .iter()
        .filter_map(|req| combined.get(&req.name).map(|entry| (req.name.clone(), entry.exports.clone())))
        .collect();

    let environment = contract
        .environment
        .iter()
        .map(|var| EnvVar::new(&var.name, interpolate::interpolate(&var.value, &dependency_exports)))
        .collect();

    ResolvedContract {
        contract,
        dependency_exports,
        environment,
    }
}

/// Resolve every contract of the batch or fail with all dependency errors
pub fn resolve_batch(
    contracts: Vec<ServiceContract>,
    registry: &DependencyRegistry,
) -> Result<Vec<ResolvedContract>, DependencyFailure> {
    let combined = registry.with_batch(&contracts);

    let graph = DependencyGraph::build(&combined).map_err(|error| {
        log_error!(error.error_code(), &error.to_string());
        DependencyFailure { errors: vec![error] }
    })?;

    let mut findings = Findings::default();
    findings.cycles = graph
        .find_cycles()
        .into_iter()
        .map(|path| DependencyError::Cycle { path })
        .collect();

    for contract in &contracts {
        check_requirements(contract, &combined, &mut findings);
    }

    let errors = findings.into_errors();
    if !errors.is_empty() {
        for error in &errors {
            log_error!(error.error_code(), &error.to_string(),
                "kind" => error.kind(),
                "service_id" => error.service_id().unwrap_or("-"));
        }
        return Err(DependencyFailure { errors });
    }

    let resolved: Vec<ResolvedContract> = contracts
        .into_iter()
        .map(|contract| resolve_contract(contract, &combined))
        .collect();

    log_success!(codes::success::DEPENDENCIES_RESOLVED, "Dependencies resolved",
        "contracts" => resolved.len(),
        "graph_nodes" => graph.node_count());
    Ok(resolved)
}
