//! Backend renderers
//!
//! One adapter per render target behind [`BackendRenderer`]. The set is
//! closed and [`renderer_for`] dispatches on the target enum.

pub(crate) mod common;
pub mod compose;
pub mod error;
pub mod hypervisor;
pub mod kubernetes;
pub mod quadlet;
pub mod systemd;
pub mod types;

pub use compose::ComposeRenderer;
pub use error::RenderError;
pub use hypervisor::HypervisorRenderer;
pub use kubernetes::KubernetesRenderer;
pub use quadlet::QuadletRenderer;
pub use systemd::SystemdRenderer;
pub use types::{
    ArtifactDocument, ArtifactMetadata, RenderedArtifact, SecretInstall, UnitFile, UnitSection,
};

use crate::contract::{RenderTarget, ResolvedContract};
use crate::secrets::SecretsTransportPlan;

pub trait BackendRenderer: Send + Sync {
    fn target(&self) -> RenderTarget;

    fn render(
        &self,
        resolved: &ResolvedContract,
        secrets: &SecretsTransportPlan,
    ) -> Result<RenderedArtifact, RenderError>;
}

static COMPOSE: ComposeRenderer = ComposeRenderer;
static QUADLET: QuadletRenderer = QuadletRenderer;
static HYPERVISOR: HypervisorRenderer = HypervisorRenderer;
static KUBERNETES: KubernetesRenderer = KubernetesRenderer;
static SYSTEMD: SystemdRenderer = SystemdRenderer;

pub fn renderer_for(target: RenderTarget) -> &'static dyn BackendRenderer {
    match target {
        RenderTarget::ContainerCompose => &COMPOSE,
        RenderTarget::ContainerUnitSupervisor => &QUADLET,
        RenderTarget::HypervisorContainer => &HYPERVISOR,
        RenderTarget::OrchestratorManifest => &KUBERNETES,
        RenderTarget::HostInitUnit => &SYSTEMD,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::contract::{EnvSecret, FileSecret, RenderTarget, ResolvedContract};
    use crate::secrets::{plan, SecretsTransportPlan};
    use crate::validation::{validate_document, ContractDocument};
    use serde_json::{json, Value};
    use std::path::Path;

    pub const DIGEST: &str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    pub fn resolved(patch: Value) -> ResolvedContract {
        let mut value = json!({
            "service_id": "web",
            "service_namespace": "shop",
            "runtime_templates": ["container-compose", "container-unit-supervisor",
                "hypervisor-container", "orchestrator-manifest", "host-init-unit"],
            "image": format!("registry/x@{}", DIGEST),
            "resources": {"memory_mb": 512, "cpu_cores": 1},
            "ports": [{"target": 8080, "published": 8080}],
            "health": {"cmd": ["/bin/sh", "-c", "exit 0"]}
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut value, patch) {
            base.extend(extra);
        }
        let contract = validate_document(&ContractDocument::new("web.yml", value)).unwrap();
        ResolvedContract::standalone(contract)
    }

    pub fn with_secrets(mut resolved: ResolvedContract, rotation: Option<&str>) -> ResolvedContract {
        let secrets = &mut resolved.contract.secrets;
        secrets.env.push(EnvSecret {
            name: "DB_PASSWORD".to_string(),
            value: "hunter2-secret".to_string(),
        });
        secrets.files.push(FileSecret {
            name: "tls.key".to_string(),
            target: "/etc/tls/tls.key".to_string(),
            value: "PRIVATE KEY MATERIAL".to_string(),
            mode: None,
        });
        secrets.rotation_timestamp = rotation.map(str::to_string);
        resolved
    }

    pub fn plan_for(resolved: &ResolvedContract, target: RenderTarget) -> SecretsTransportPlan {
        plan(resolved, target, Path::new("/run/contractc"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renderer_for_covers_every_target() {
        for target in RenderTarget::ALL {
            assert_eq!(renderer_for(target).target(), target);
        }
    }

    #[test]
    fn test_rendering_is_byte_identical() {
        let resolved = fixtures::with_secrets(fixtures::resolved(serde_json::json!({
            "command": ["/usr/bin/web", "--port", "8080"],
            "address": "10.0.0.5/24"
        })), Some("2024-05-01T00:00:00Z"));
        for target in RenderTarget::ALL {
            let plan = fixtures::plan_for(&resolved, target);
            let first = renderer_for(target).render(&resolved, &plan).unwrap();
            let second = renderer_for(target).render(&resolved, &plan).unwrap();
            assert_eq!(first.text, second.text, "{}", target);
        }
    }

    #[test]
    fn test_rotation_changes_exactly_one_line() {
        let base = fixtures::resolved(serde_json::json!({
            "command": ["/usr/bin/web"],
            "address": "10.0.0.5"
        }));
        let a = fixtures::with_secrets(base.clone(), Some("2024-05-01T00:00:00Z"));
        let b = fixtures::with_secrets(base, Some("2024-06-01T00:00:00Z"));
        for target in RenderTarget::ALL {
            let text_a = renderer_for(target).render(&a, &fixtures::plan_for(&a, target)).unwrap().text;
            let text_b = renderer_for(target).render(&b, &fixtures::plan_for(&b, target)).unwrap().text;
            let lines_a: Vec<&str> = text_a.lines().collect();
            let lines_b: Vec<&str> = text_b.lines().collect();
            assert_eq!(lines_a.len(), lines_b.len(), "{}", target);
            let differing: Vec<(&str, &str)> = lines_a
                .iter()
                .zip(&lines_b)
                .filter(|(x, y)| x != y)
                .map(|(x, y)| (*x, *y))
                .collect();
            assert_eq!(differing.len(), 1, "{}: {:?}", target, differing);
            assert!(differing[0].0.contains("2024-05-01"), "{}", target);
        }
    }

    #[test]
    fn test_no_secret_values_in_any_artifact() {
        let resolved = fixtures::with_secrets(
            fixtures::resolved(serde_json::json!({"command": ["/usr/bin/web"], "address": "10.0.0.5"})),
            None,
        );
        for target in RenderTarget::ALL {
            let artifact = renderer_for(target)
                .render(&resolved, &fixtures::plan_for(&resolved, target))
                .unwrap();
            assert!(!artifact.text.contains("hunter2-secret"), "{}", target);
            assert!(!artifact.text.contains("PRIVATE KEY MATERIAL"), "{}", target);
            assert_eq!(artifact.metadata.health_cmd, vec!["/bin/sh", "-c", "exit 0"]);
        }
    }
}
