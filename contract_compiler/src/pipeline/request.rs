use crate::config::runtime::CompilerPreferences;
use crate::contract::{RenderTarget, ServiceContract};
use crate::policy::RuleSet;
use crate::validation::ContractDocument;
use serde_json::Value;
use std::path::PathBuf;

/// Which backends to render
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TargetSelection {
    /// Every target each contract declares
    #[default]
    All,
    /// The listed targets, where the contract declares them
    Only(Vec<RenderTarget>),
}

impl TargetSelection {
    /// `all`, or a list of target names and aliases
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Self, String> {
        if values.is_empty() || values.iter().any(|v| v.as_ref().eq_ignore_ascii_case("all")) {
            return Ok(TargetSelection::All);
        }
        let mut targets = Vec::new();
        for value in values {
            for tag in value.as_ref().split(',').map(str::trim).filter(|t| !t.is_empty()) {
                let target = RenderTarget::parse(tag).ok_or_else(|| format!("unknown render target '{}'", tag))?;
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        targets.sort();
        Ok(TargetSelection::Only(targets))
    }

    /// Targets to render for one contract, in target order
    pub fn targets_for(&self, contract: &ServiceContract) -> Vec<RenderTarget> {
        let mut targets: Vec<RenderTarget> = match self {
            TargetSelection::All => contract.runtime_templates.clone(),
            TargetSelection::Only(only) => contract
                .runtime_templates
                .iter()
                .copied()
                .filter(|t| only.contains(t))
                .collect(),
        };
        targets.sort();
        targets.dedup();
        targets
    }
}

/// Everything one compile needs
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Contract files and directories
    pub inputs: Vec<PathBuf>,
    /// Contracts already loaded
    pub documents: Vec<ContractDocument>,
    pub registry_paths: Vec<PathBuf>,
    pub registry_fragments: Vec<Value>,
    /// Base rule set; the built-ins when unset
    pub rules: Option<RuleSet>,
    /// Rule documents appended to the base set in order
    pub rule_paths: Vec<PathBuf>,
    pub targets: TargetSelection,
    pub staging_root: PathBuf,
    pub worker_threads: usize,
    pub fail_on_warn: bool,
    pub secret_file_mode: u32,
}

impl CompileRequest {
    pub fn new(inputs: Vec<PathBuf>) -> Self {
        Self::from_preferences(inputs, &CompilerPreferences::default())
    }

    pub fn from_preferences(inputs: Vec<PathBuf>, preferences: &CompilerPreferences) -> Self {
        Self {
            inputs,
            documents: Vec::new(),
            registry_paths: Vec::new(),
            registry_fragments: Vec::new(),
            rules: None,
            rule_paths: Vec::new(),
            targets: TargetSelection::All,
            staging_root: preferences.staging_root.clone(),
            worker_threads: preferences.effective_worker_threads(),
            fail_on_warn: preferences.fail_on_warn,
            secret_file_mode: preferences.secret_file_mode_bits(),
        }
    }

    pub fn from_documents(documents: Vec<ContractDocument>) -> Self {
        let mut request = Self::new(Vec::new());
        request.documents = documents;
        request
    }

    pub fn with_registry_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_paths.push(path.into());
        self
    }

    pub fn with_registry_value(mut self, fragment: Value) -> Self {
        self.registry_fragments.push(fragment);
        self
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_rules_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.rule_paths.push(path.into());
        self
    }

    pub fn with_targets(mut self, targets: TargetSelection) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn with_fail_on_warn(mut self, fail_on_warn: bool) -> Self {
        self.fail_on_warn = fail_on_warn;
        self
    }
}
