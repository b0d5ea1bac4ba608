//! Contract validation
//!
//! Two passes per document: the structural walk in [`schema`] builds a
//! `ServiceContract`, then [`semantic`] checks cross-field invariants. The
//! batch check for duplicate service ids runs last.

pub mod document;
pub mod error;
pub mod schema;
pub mod semantic;

pub use document::{load_document, load_value, parse_document, ContractDocument, DocumentFormat};
pub use error::{InputError, SchemaError, ValidationFailure, ValidationReport};

use crate::contract::ServiceContract;
use crate::logging::codes;
use crate::{log_debug, log_error, log_success};
use std::collections::BTreeMap;

pub fn validate_document(document: &ContractDocument) -> Result<ServiceContract, ValidationFailure> {
    let failure = |service_id: &str, errors: Vec<SchemaError>| ValidationFailure {
        document: document.path.clone(),
        service_id: service_id.to_string(),
        errors,
    };

    let contract = schema::build_contract(document)
        .map_err(|errors| failure(document.service_id_hint(), errors))?;

    let errors = semantic::check_contract(&contract);
    if !errors.is_empty() {
        return Err(failure(&contract.service_id, errors));
    }

    log_debug!("Contract passed validation",
        "service_id" => contract.service_id.as_str(),
        "targets" => contract.runtime_templates.len());
    Ok(contract)
}

/// Validate every document, reporting all failures together
pub fn validate_batch(documents: &[ContractDocument]) -> Result<Vec<ServiceContract>, ValidationReport> {
    let mut contracts = Vec::with_capacity(documents.len());
    let mut failures = Vec::new();

    for document in documents {
        let result = crate::logging::with_contract_context(
            document.service_id_hint(),
            &document.path,
            || validate_document(document),
        );
        match result {
            Ok(contract) => contracts.push((document, contract)),
            Err(failure) => failures.push(failure),
        }
    }

    // First declaration wins; later documents carry the error
    let mut first_seen: BTreeMap<String, &ContractDocument> = BTreeMap::new();
    let mut unique = Vec::with_capacity(contracts.len());
    for (document, contract) in contracts {
        match first_seen.get(&contract.service_id) {
            Some(first) => failures.push(ValidationFailure {
                document: document.path.clone(),
                service_id: contract.service_id.clone(),
                errors: vec![SchemaError::DuplicateServiceId {
                    service_id: contract.service_id.clone(),
                    field: "service_id".to_string(),
                    first_document: first.path.display().to_string(),
                }],
            }),
            None => {
                first_seen.insert(contract.service_id.clone(), document);
                unique.push(contract);
            }
        }
    }

    if failures.is_empty() {
        let count = unique.len().to_string();
        log_success!(codes::success::VALIDATION_PASSED, "All contracts passed validation",
            "contracts" => count.as_str());
        return Ok(unique);
    }

    for failure in &failures {
        crate::logging::with_contract_context(&failure.service_id, &failure.document, || {
            for error in &failure.errors {
                log_error!(error.error_code(), &error.to_string(),
                    "field" => error.field_path());
            }
        });
    }
    Err(ValidationReport { failures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn document(path: &str, service_id: &str) -> ContractDocument {
        ContractDocument::new(
            path,
            json!({
                "service_id": service_id,
                "runtime_templates": ["container-compose"],
                "image": "registry/x:1.0",
                "health": {"cmd": ["true"]}
            }),
        )
    }

    #[test]
    fn test_validate_batch_success() {
        let _ = crate::logging::init_global_logging();
        let contracts = validate_batch(&[document("a.yml", "a"), document("b.yml", "b")]).unwrap();
        assert_eq!(contracts.len(), 2);
    }

    #[test]
    fn test_duplicate_service_id_reported_on_later_document() {
        let _ = crate::logging::init_global_logging();
        let report = validate_batch(&[
            document("first.yml", "web"),
            document("second.yml", "web"),
        ])
        .unwrap_err();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].document, std::path::PathBuf::from("second.yml"));
        assert_matches!(
            &report.failures[0].errors[0],
            SchemaError::DuplicateServiceId { first_document, .. } if first_document == "first.yml"
        );
    }

    #[test]
    fn test_semantic_pass_skipped_when_structure_fails() {
        let _ = crate::logging::init_global_logging();
        let doc = ContractDocument::new(
            "bad.yml",
            json!({
                "service_id": "bad",
                "runtime_templates": ["container-compose"],
                "image": "x:1",
                "volumes": [{"name": "v", "target": "relative"}]
            }),
        );
        let failure = validate_document(&doc).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].field_path(), "health.cmd");
    }
}
