//! Rule, predicate and violation types

use crate::contract::RenderTarget;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Deny,
    Warn,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Deny => "deny",
            Severity::Warn => "warn",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pass evaluates a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    Contract,
    Artifact,
}

/// The declarative check a rule performs, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    // Contract scope
    ImagePinned,
    ImageRegistryAllowlist {
        registries: Vec<String>,
    },
    MemoryBounds {
        #[serde(default = "default_min_mb")]
        min_mb: u32,
        #[serde(default = "default_max_mb")]
        max_mb: u32,
    },
    CpuBounds {
        #[serde(default = "default_min_cores")]
        min_cores: f64,
        #[serde(default = "default_max_cores")]
        max_cores: f64,
    },
    PrivilegedPorts {
        #[serde(default = "default_min_port")]
        min_port: u16,
    },
    WildcardHostIp {
        #[serde(default = "default_wildcards")]
        addresses: Vec<String>,
    },
    ApparmorAllowlist,
    CapabilitiesAdded,
    ForbiddenCapabilities {
        capabilities: Vec<String>,
    },
    ShredWaived,

    // Artifact scope
    NonRootUser,
    ManifestImageDigest,
    HostPathClaimCollision,
    InlineSecret {
        #[serde(default = "default_min_secret_length")]
        min_length: usize,
    },
    ProtectSystemStrict,
    HypervisorUnprivileged,
    ForbiddenText {
        pattern: String,
        #[serde(default)]
        targets: Vec<String>,
    },
}

fn default_min_mb() -> u32 {
    64
}

fn default_max_mb() -> u32 {
    65536
}

fn default_min_cores() -> f64 {
    0.1
}

fn default_max_cores() -> f64 {
    64.0
}

fn default_min_port() -> u16 {
    1024
}

fn default_wildcards() -> Vec<String> {
    vec!["0.0.0.0".to_string(), "::".to_string()]
}

fn default_min_secret_length() -> usize {
    6
}

impl Predicate {
    pub fn scope(&self) -> RuleScope {
        match self {
            Predicate::ImagePinned
            | Predicate::ImageRegistryAllowlist { .. }
            | Predicate::MemoryBounds { .. }
            | Predicate::CpuBounds { .. }
            | Predicate::PrivilegedPorts { .. }
            | Predicate::WildcardHostIp { .. }
            | Predicate::ApparmorAllowlist
            | Predicate::CapabilitiesAdded
            | Predicate::ForbiddenCapabilities { .. }
            | Predicate::ShredWaived => RuleScope::Contract,
            Predicate::NonRootUser
            | Predicate::ManifestImageDigest
            | Predicate::HostPathClaimCollision
            | Predicate::InlineSecret { .. }
            | Predicate::ProtectSystemStrict
            | Predicate::HypervisorUnprivileged
            | Predicate::ForbiddenText { .. } => RuleScope::Artifact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub severity: Severity,
    /// Template with `{placeholder}` bindings
    pub message: String,
    pub predicate: Predicate,
}

impl Rule {
    pub fn new(id: &str, severity: Severity, message: &str, predicate: Predicate) -> Self {
        Self {
            id: id.to_string(),
            severity,
            message: message.to_string(),
            predicate,
        }
    }

    pub fn scope(&self) -> RuleScope {
        self.predicate.scope()
    }
}

/// One place a predicate matched, with values for the message template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub field_path: String,
    pub bindings: BTreeMap<String, String>,
}

impl Finding {
    pub fn at(field_path: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn bind(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.bindings.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Subject {
    Contract { service_id: String },
    Artifact { service_id: String, target: RenderTarget },
}

impl Subject {
    pub fn service_id(&self) -> &str {
        match self {
            Subject::Contract { service_id } | Subject::Artifact { service_id, .. } => service_id,
        }
    }

    pub fn target(&self) -> Option<RenderTarget> {
        match self {
            Subject::Contract { .. } => None,
            Subject::Artifact { target, .. } => Some(*target),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Contract { service_id } => write!(f, "contract {}", service_id),
            Subject::Artifact { service_id, target } => write!(f, "{} artifact of {}", target, service_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyViolation {
    pub rule_id: String,
    pub message: String,
    pub subject: Subject,
    pub severity: Severity,
    pub field_path: String,
}

impl PolicyViolation {
    pub fn is_deny(&self) -> bool {
        self.severity == Severity::Deny
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}, {}): {}",
            self.severity, self.rule_id, self.subject, self.field_path, self.message
        )
    }
}

/// Fill `{key}` placeholders; unknown placeholders are left as written
pub fn render_message(template: &str, bindings: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match bindings.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_deserializes_with_defaults() {
        let predicate: Predicate = serde_json::from_value(serde_json::json!({"kind": "memory_bounds", "max_mb": 2048})).unwrap();
        assert_eq!(predicate, Predicate::MemoryBounds { min_mb: 64, max_mb: 2048 });
        assert_eq!(predicate.scope(), RuleScope::Contract);

        let unit: Predicate = serde_json::from_value(serde_json::json!({"kind": "non_root_user"})).unwrap();
        assert_eq!(unit.scope(), RuleScope::Artifact);
    }

    #[test]
    fn test_render_message() {
        let finding = Finding::at("ports[0].published").bind("port", 80);
        assert_eq!(
            render_message("port {port} below {min}", &finding.bindings),
            "port 80 below {min}"
        );
        assert_eq!(render_message("unbalanced {port", &finding.bindings), "unbalanced {port");
    }
}
