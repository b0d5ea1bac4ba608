//! Rule sets: the built-in rules plus operator-supplied documents

use super::error::PolicyError;
use super::types::{Predicate, Rule, RuleScope, Severity};
use crate::config::compile_time::policy::MAX_RULES;
use crate::logging::codes;
use crate::validation::load_value;
use crate::{log_error, log_info};
use regex::Regex;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        use Severity::{Deny, Warn};
        let rules = vec![
            Rule::new(
                "image.digest_pinned",
                Deny,
                "image '{image}' must carry a content digest or a non-latest tag",
                Predicate::ImagePinned,
            ),
            Rule::new(
                "resources.memory_bounds",
                Deny,
                "memory_mb {value} is outside [{min}, {max}]",
                Predicate::MemoryBounds { min_mb: 64, max_mb: 65536 },
            ),
            Rule::new(
                "resources.cpu_bounds",
                Deny,
                "cpu_cores {value} is outside [{min}, {max}]",
                Predicate::CpuBounds { min_cores: 0.1, max_cores: 64.0 },
            ),
            Rule::new(
                "ports.privileged_published",
                Deny,
                "published port {port} is below {min} and security.allow_privileged_ports is not set",
                Predicate::PrivilegedPorts { min_port: 1024 },
            ),
            Rule::new(
                "ports.wildcard_host_ip",
                Deny,
                "port {port} binds the wildcard address {host_ip}",
                Predicate::WildcardHostIp { addresses: vec!["0.0.0.0".to_string()] },
            ),
            Rule::new(
                "security.apparmor_allowlist",
                Deny,
                "apparmor profile '{profile}' is not one of: {allowed}",
                Predicate::ApparmorAllowlist,
            ),
            Rule::new(
                "security.capabilities_added",
                Warn,
                "capability {capability} is added",
                Predicate::CapabilitiesAdded,
            ),
            Rule::new(
                "secrets.shred_waived",
                Warn,
                "staged secrets persist after apply: {reason}",
                Predicate::ShredWaived,
            ),
            Rule::new(
                "artifact.non_root_user",
                Deny,
                "workload runs as user {user}",
                Predicate::NonRootUser,
            ),
            Rule::new(
                "kubernetes.image_digest",
                Deny,
                "deployment image '{image}' has no digest",
                Predicate::ManifestImageDigest,
            ),
            Rule::new(
                "kubernetes.hostpath_pvc_collision",
                Deny,
                "hostPath volume '{volume}' shares its name with a PersistentVolumeClaim",
                Predicate::HostPathClaimCollision,
            ),
            Rule::new(
                "artifact.inline_secret",
                Deny,
                "secret '{secret}' appears in the artifact text",
                Predicate::InlineSecret { min_length: 6 },
            ),
            Rule::new(
                "systemd.protect_system",
                Deny,
                "read-only root needs ProtectSystem=strict, found {value}",
                Predicate::ProtectSystemStrict,
            ),
            Rule::new(
                "hypervisor.unprivileged",
                Deny,
                "container is privileged (unprivileged: {value}) without allow_privilege_escalation",
                Predicate::HypervisorUnprivileged,
            ),
        ];
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.id == id)
    }

    pub fn scoped(&self, scope: RuleScope) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |rule| rule.scope() == scope)
    }

    /// Append a rule, replacing any rule with the same id in place
    pub fn insert(&mut self, rule: Rule) -> Result<(), PolicyError> {
        self.insert_from(rule, "rule set")
    }

    fn insert_from(&mut self, rule: Rule, source_name: &str) -> Result<(), PolicyError> {
        if let Predicate::ForbiddenText { pattern, .. } = &rule.predicate {
            Regex::new(pattern).map_err(|e| PolicyError::InvalidPattern {
                source_name: source_name.to_string(),
                rule_id: rule.id.clone(),
                message: e.to_string(),
            })?;
        }
        if let Some(existing) = self.rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule;
            return Ok(());
        }
        if self.rules.len() >= MAX_RULES {
            return Err(PolicyError::TooManyRules {
                count: self.rules.len() + 1,
                limit: MAX_RULES,
            });
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn extend(&mut self, other: RuleSet) -> Result<(), PolicyError> {
        for rule in other.rules {
            self.insert(rule)?;
        }
        Ok(())
    }

    /// Parse a `rules: [...]` document, or a bare list of rules
    pub fn from_value(value: Value, source: &Path) -> Result<Self, PolicyError> {
        let list = match value {
            Value::Object(mut map) => map
                .remove("rules")
                .ok_or_else(|| PolicyError::invalid(source, "expected a top-level 'rules' list"))?,
            list @ Value::Array(_) => list,
            _ => return Err(PolicyError::invalid(source, "expected a mapping or a list")),
        };
        let rules: Vec<Rule> =
            serde_json::from_value(list).map_err(|e| PolicyError::invalid(source, e.to_string()))?;

        let source_name = source.display().to_string();
        let mut set = RuleSet::empty();
        for rule in rules {
            if rule.id.trim().is_empty() {
                return Err(PolicyError::invalid(source, "rule id must not be empty"));
            }
            set.insert_from(rule, &source_name)?;
        }
        Ok(set)
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let value = load_value(path)?;
        match Self::from_value(value, path) {
            Ok(set) => {
                log_info!("Loaded rule document",
                    "path" => path.display(),
                    "rules" => set.len());
                Ok(set)
            }
            Err(err) => {
                log_error!(codes::policy::INVALID_RULE_SET, &err.to_string(),
                    "path" => path.display());
                Err(err)
            }
        }
    }

    /// Built-ins followed by each document in order
    pub fn with_documents(paths: &[impl AsRef<Path>]) -> Result<Self, PolicyError> {
        let mut set = Self::builtin();
        for path in paths {
            set.extend(Self::load(path.as_ref())?)?;
        }
        Ok(set)
    }
}
