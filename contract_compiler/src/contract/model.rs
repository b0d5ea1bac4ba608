//! Canonical in-memory Service Contract
//!
//! Instances are produced by the validator and never mutated afterwards.
//! Secret values are excluded from `Debug` and serialization output.

use super::image::ImageReference;
use super::target::RenderTarget;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceContract {
    pub service_id: String,
    pub service_name: String,
    pub service_namespace: Option<String>,
    pub version: Option<String>,
    pub runtime_templates: Vec<RenderTarget>,
    pub image: ImageReference,
    pub command: Vec<String>,
    pub address: Option<String>,
    pub environment: Vec<EnvVar>,
    pub resources: Resources,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub mounts: Mounts,
    pub secrets: Secrets,
    pub health: HealthCheck,
    pub security: SecurityContext,
    pub exports: Exports,
    pub requires: Vec<Requirement>,
    pub hypervisor: HypervisorSettings,
}

impl ServiceContract {
    pub fn targets_backend(&self, target: RenderTarget) -> bool {
        self.runtime_templates.contains(&target)
    }

    pub fn requirement(&self, name: &str) -> Option<&Requirement> {
        self.requires.iter().find(|req| req.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resources {
    pub memory_mb: u32,
    pub cpu_cores: f64,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            memory_mb: 256,
            cpu_cores: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    pub target: u16,
    pub published: u16,
    pub host_ip: Option<String>,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostPathType {
    Directory,
    DirectoryOrCreate,
    File,
    FileOrCreate,
    Socket,
}

impl HostPathType {
    pub const NAMES: [&'static str; 5] =
        ["Directory", "DirectoryOrCreate", "File", "FileOrCreate", "Socket"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Directory" => Some(HostPathType::Directory),
            "DirectoryOrCreate" => Some(HostPathType::DirectoryOrCreate),
            "File" => Some(HostPathType::File),
            "FileOrCreate" => Some(HostPathType::FileOrCreate),
            "Socket" => Some(HostPathType::Socket),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostPathType::Directory => "Directory",
            HostPathType::DirectoryOrCreate => "DirectoryOrCreate",
            HostPathType::File => "File",
            HostPathType::FileOrCreate => "FileOrCreate",
            HostPathType::Socket => "Socket",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeMount {
    pub name: String,
    pub host_path: Option<String>,
    pub host_path_type: Option<HostPathType>,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistentVolume {
    pub name: String,
    pub target: String,
    pub size: Option<String>,
    pub apply_to: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EphemeralMount {
    pub name: Option<String>,
    pub path: String,
    pub medium: Option<String>,
    pub size: Option<String>,
    pub mode: Option<String>,
    pub read_only: bool,
    pub apply_to: Vec<String>,
}

impl EphemeralMount {
    pub fn is_memory_backed(&self) -> bool {
        matches!(
            self.medium.as_deref().map(str::to_ascii_lowercase).as_deref(),
            None | Some("memory") | Some("tmpfs") | Some("ram")
        )
    }
}

fn applies_to(apply_to: &[String], target: RenderTarget) -> bool {
    apply_to.is_empty() || apply_to.iter().any(|tag| target.matches_tag(tag))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Mounts {
    pub persistent_volumes: Vec<PersistentVolume>,
    pub ephemeral_mounts: Vec<EphemeralMount>,
}

impl Mounts {
    /// Ephemeral mounts for one backend; repeated paths keep the first entry
    pub fn ephemeral_for(&self, target: RenderTarget) -> Vec<&EphemeralMount> {
        let mut seen = BTreeSet::new();
        self.ephemeral_mounts
            .iter()
            .filter(|mount| applies_to(&mount.apply_to, target))
            .filter(|mount| seen.insert(mount.path.as_str()))
            .collect()
    }

    pub fn persistent_for(&self, target: RenderTarget) -> Vec<&PersistentVolume> {
        let mut seen = BTreeSet::new();
        self.persistent_volumes
            .iter()
            .filter(|volume| applies_to(&volume.apply_to, target))
            .filter(|volume| seen.insert(volume.target.as_str()))
            .collect()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct EnvSecret {
    pub name: String,
    #[serde(skip_serializing)]
    pub value: String,
}

impl fmt::Debug for EnvSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSecret")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct FileSecret {
    pub name: String,
    pub target: String,
    #[serde(skip_serializing)]
    pub value: String,
    pub mode: Option<u32>,
}

impl fmt::Debug for FileSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSecret")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("value", &"<redacted>")
            .field("mode", &self.mode.map(|m| format!("{:04o}", m)))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Secrets {
    pub env: Vec<EnvSecret>,
    pub files: Vec<FileSecret>,
    pub rotation_timestamp: Option<String>,
    pub shred_after_apply: bool,
    pub shred_waiver_reason: Option<String>,
}

impl Default for Secrets {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            files: Vec::new(),
            rotation_timestamp: None,
            shred_after_apply: true,
            shred_waiver_reason: None,
        }
    }
}

impl Secrets {
    pub fn is_empty(&self) -> bool {
        self.env.is_empty() && self.files.is_empty()
    }

    pub fn count(&self) -> usize {
        self.env.len() + self.files.len()
    }

    /// Persisting staged material needs an explicit, reasoned waiver
    pub fn is_shred_waived(&self) -> bool {
        !self.shred_after_apply
            && self
                .shred_waiver_reason
                .as_deref()
                .is_some_and(|reason| !reason.trim().is_empty())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.env
            .iter()
            .map(|secret| secret.value.as_str())
            .chain(self.files.iter().map(|secret| secret.value.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub cmd: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    pub start_period: Option<String>,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            cmd: Vec::new(),
            interval: "10s".to_string(),
            timeout: "5s".to_string(),
            retries: 3,
            start_period: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserNamespaceMode {
    Auto,
    Host,
    KeepId,
    Private,
}

impl UserNamespaceMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(UserNamespaceMode::Auto),
            "host" => Some(UserNamespaceMode::Host),
            "keep-id" => Some(UserNamespaceMode::KeepId),
            "private" => Some(UserNamespaceMode::Private),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserNamespaceMode::Auto => "auto",
            UserNamespaceMode::Host => "host",
            UserNamespaceMode::KeepId => "keep-id",
            UserNamespaceMode::Private => "private",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityContext {
    pub run_as_user: u32,
    pub run_as_group: u32,
    pub read_only_root_filesystem: bool,
    pub capabilities_drop: Vec<String>,
    pub capabilities_add: Vec<String>,
    pub no_new_privileges: bool,
    pub allow_privilege_escalation: bool,
    pub apparmor_profile: String,
    pub allowed_apparmor_profiles: Vec<String>,
    pub seccomp_profile: Option<String>,
    pub user_namespace: Option<UserNamespaceMode>,
    pub allow_privileged_ports: bool,
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self {
            run_as_user: 65532,
            run_as_group: 65532,
            read_only_root_filesystem: true,
            capabilities_drop: vec!["ALL".to_string()],
            capabilities_add: Vec::new(),
            no_new_privileges: true,
            allow_privilege_escalation: false,
            apparmor_profile: "docker-default".to_string(),
            allowed_apparmor_profiles: vec!["docker-default".to_string(), "unconfined".to_string()],
            seccomp_profile: None,
            user_namespace: None,
            allow_privileged_ports: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportVar {
    pub name: String,
    pub value: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Exports {
    pub env: Vec<ExportVar>,
}

impl Exports {
    pub fn as_map(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|export| (export.name.clone(), export.value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    pub name: String,
    pub version: Option<String>,
    pub exports_hash: Option<String>,
    pub exports: Vec<String>,
}

impl Requirement {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            exports_hash: None,
            exports: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FirewallAction {
    Accept,
    Drop,
    Reject,
}

impl FirewallAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ACCEPT" => Some(FirewallAction::Accept),
            "DROP" => Some(FirewallAction::Drop),
            "REJECT" => Some(FirewallAction::Reject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FirewallAction::Accept => "ACCEPT",
            FirewallAction::Drop => "DROP",
            FirewallAction::Reject => "REJECT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FirewallDirection {
    In,
    Out,
}

impl FirewallDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "in" => Some(FirewallDirection::In),
            "out" => Some(FirewallDirection::Out),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FirewallDirection::In => "in",
            FirewallDirection::Out => "out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallRule {
    pub action: FirewallAction,
    pub direction: FirewallDirection,
    pub protocol: Option<String>,
    pub destination_port: Option<String>,
    pub source: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HypervisorSettings {
    pub vmid: Option<u32>,
    pub ostemplate: Option<String>,
    pub bridge: String,
    pub gateway: Option<String>,
    pub features: Vec<String>,
    pub firewall: Vec<FirewallRule>,
}

impl Default for HypervisorSettings {
    fn default() -> Self {
        Self {
            vmid: None,
            ostemplate: None,
            bridge: "vmbr0".to_string(),
            gateway: None,
            features: Vec::new(),
            firewall: Vec::new(),
        }
    }
}
