use super::model::{EnvVar, ServiceContract};
use std::collections::BTreeMap;

/// A validated contract enriched with the exports of everything it requires
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContract {
    pub contract: ServiceContract,
    /// required service id -> export key -> value
    pub dependency_exports: BTreeMap<String, BTreeMap<String, String>>,
    /// `environment` with every `${deps.<svc>.<KEY>}` reference substituted
    pub environment: Vec<EnvVar>,
}

impl ResolvedContract {
    /// Wrap a contract that has no dependencies
    pub fn standalone(contract: ServiceContract) -> Self {
        let environment = contract.environment.clone();
        Self {
            contract,
            dependency_exports: BTreeMap::new(),
            environment,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.contract.service_id
    }

    pub fn service_name(&self) -> &str {
        &self.contract.service_name
    }
}
