//! How each backend receives secret material
//!
//! This table is the only place that maps a backend to its transport
//! idiom. Planning, staging and every renderer read it from here.

use crate::contract::RenderTarget;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretTransport {
    /// On-disk env file consumed as process environment
    EnvInjection,
    /// Staged file bind-mounted read-only at its target
    MountedFile,
    /// Secret objects in the orchestrator's store
    SecretStoreSplit,
    /// File installed on the host or guest by the apply step
    RenderedConfig,
}

impl SecretTransport {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretTransport::EnvInjection => "env_injection",
            SecretTransport::MountedFile => "mounted_file",
            SecretTransport::SecretStoreSplit => "secret_store_split",
            SecretTransport::RenderedConfig => "rendered_config",
        }
    }
}

impl fmt::Display for SecretTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportProfile {
    pub env: SecretTransport,
    pub files: SecretTransport,
}

pub const fn transport_profile(target: RenderTarget) -> TransportProfile {
    use SecretTransport::*;
    match target {
        RenderTarget::ContainerCompose => TransportProfile {
            env: EnvInjection,
            files: MountedFile,
        },
        RenderTarget::ContainerUnitSupervisor => TransportProfile {
            env: EnvInjection,
            files: MountedFile,
        },
        RenderTarget::OrchestratorManifest => TransportProfile {
            env: SecretStoreSplit,
            files: SecretStoreSplit,
        },
        RenderTarget::HypervisorContainer => TransportProfile {
            env: RenderedConfig,
            files: RenderedConfig,
        },
        RenderTarget::HostInitUnit => TransportProfile {
            env: EnvInjection,
            files: RenderedConfig,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_table() {
        let k8s = transport_profile(RenderTarget::OrchestratorManifest);
        assert_eq!(k8s.env, SecretTransport::SecretStoreSplit);
        assert_eq!(k8s.files, SecretTransport::SecretStoreSplit);

        let host = transport_profile(RenderTarget::HostInitUnit);
        assert_eq!(host.env, SecretTransport::EnvInjection);
        assert_eq!(host.files, SecretTransport::RenderedConfig);

        for target in RenderTarget::ALL {
            let profile = transport_profile(target);
            assert_ne!(profile.files, SecretTransport::EnvInjection, "{}", target);
        }
    }
}
