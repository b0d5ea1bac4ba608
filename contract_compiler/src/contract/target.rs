use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment backend a contract can be compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderTarget {
    ContainerCompose,
    ContainerUnitSupervisor,
    HypervisorContainer,
    OrchestratorManifest,
    HostInitUnit,
}

impl RenderTarget {
    pub const ALL: [RenderTarget; 5] = [
        RenderTarget::ContainerCompose,
        RenderTarget::ContainerUnitSupervisor,
        RenderTarget::HypervisorContainer,
        RenderTarget::OrchestratorManifest,
        RenderTarget::HostInitUnit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderTarget::ContainerCompose => "container-compose",
            RenderTarget::ContainerUnitSupervisor => "container-unit-supervisor",
            RenderTarget::HypervisorContainer => "hypervisor-container",
            RenderTarget::OrchestratorManifest => "orchestrator-manifest",
            RenderTarget::HostInitUnit => "host-init-unit",
        }
    }

    /// Short backend name accepted in contracts and `apply_to` lists
    pub fn alias(&self) -> &'static str {
        match self {
            RenderTarget::ContainerCompose => "docker",
            RenderTarget::ContainerUnitSupervisor => "podman",
            RenderTarget::HypervisorContainer => "proxmox",
            RenderTarget::OrchestratorManifest => "kubernetes",
            RenderTarget::HostInitUnit => "baremetal",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|target| target.as_str() == tag || target.alias() == tag)
    }

    pub fn matches_tag(&self, tag: &str) -> bool {
        Self::parse(tag) == Some(*self)
    }
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            format!(
                "unknown render target '{}', expected one of: {}",
                s,
                Self::ALL.map(|t| t.as_str()).join(", ")
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_tags_and_aliases() {
        assert_eq!(
            RenderTarget::parse("container-compose"),
            Some(RenderTarget::ContainerCompose)
        );
        assert_eq!(RenderTarget::parse("Kubernetes"), Some(RenderTarget::OrchestratorManifest));
        assert_eq!(RenderTarget::parse("baremetal"), Some(RenderTarget::HostInitUnit));
        assert_eq!(RenderTarget::parse("nomad"), None);
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&RenderTarget::ContainerUnitSupervisor).unwrap();
        assert_eq!(json, "\"container-unit-supervisor\"");
    }

    #[test]
    fn test_from_str_error_lists_targets() {
        let err = "lambda".parse::<RenderTarget>().unwrap_err();
        assert!(err.contains("host-init-unit"));
    }
}
