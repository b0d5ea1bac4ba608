//! Predicate evaluation
//!
//! Each predicate kind maps to one check function. Contract checks see the
//! validated model; artifact checks see the rendered document and text.

use super::types::{Finding, Predicate};
use crate::contract::{RenderTarget, ResolvedContract, ServiceContract};
use crate::render::RenderedArtifact;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;

const DEFAULT_REGISTRY: &str = "docker.io";

/// Findings of a contract-scope predicate; artifact-scope kinds yield none
pub fn check_contract(predicate: &Predicate, contract: &ServiceContract) -> Vec<Finding> {
    match predicate {
        Predicate::ImagePinned => image_pinned(contract),
        Predicate::ImageRegistryAllowlist { registries } => registry_allowlist(contract, registries),
        Predicate::MemoryBounds { min_mb, max_mb } => {
            let memory = contract.resources.memory_mb;
            if memory < *min_mb || memory > *max_mb {
                vec![Finding::at("resources.memory_mb")
                    .bind("value", memory)
                    .bind("min", min_mb)
                    .bind("max", max_mb)]
            } else {
                Vec::new()
            }
        }
        Predicate::CpuBounds { min_cores, max_cores } => {
            let cores = contract.resources.cpu_cores;
            if cores < *min_cores || cores > *max_cores {
                vec![Finding::at("resources.cpu_cores")
                    .bind("value", cores)
                    .bind("min", min_cores)
                    .bind("max", max_cores)]
            } else {
                Vec::new()
            }
        }
        Predicate::PrivilegedPorts { min_port } => {
            if contract.security.allow_privileged_ports {
                return Vec::new();
            }
            contract
                .ports
                .iter()
                .enumerate()
                .filter(|(_, port)| port.published < *min_port)
                .map(|(i, port)| {
                    Finding::at(format!("ports[{}].published", i))
                        .bind("port", port.published)
                        .bind("min", min_port)
                })
                .collect()
        }
        Predicate::WildcardHostIp { addresses } => contract
            .ports
            .iter()
            .enumerate()
            .filter_map(|(i, port)| {
                let ip = port.host_ip.as_deref()?;
                addresses.iter().any(|a| a == ip).then(|| {
                    Finding::at(format!("ports[{}].host_ip", i))
                        .bind("host_ip", ip)
                        .bind("port", port.published)
                })
            })
            .collect(),
        Predicate::ApparmorAllowlist => {
            let security = &contract.security;
            if security.allowed_apparmor_profiles.contains(&security.apparmor_profile) {
                Vec::new()
            } else {
                vec![Finding::at("security.apparmor_profile")
                    .bind("profile", &security.apparmor_profile)
                    .bind("allowed", security.allowed_apparmor_profiles.join(", "))]
            }
        }
        Predicate::CapabilitiesAdded => contract
            .security
            .capabilities_add
            .iter()
            .enumerate()
            .map(|(i, cap)| Finding::at(format!("security.capabilities_add[{}]", i)).bind("capability", cap))
            .collect(),
        Predicate::ForbiddenCapabilities { capabilities } => {
            let forbidden: BTreeSet<String> = capabilities.iter().map(|c| normalize_capability(c)).collect();
            contract
                .security
                .capabilities_add
                .iter()
                .enumerate()
                .filter(|(_, cap)| forbidden.contains(&normalize_capability(cap)))
                .map(|(i, cap)| Finding::at(format!("security.capabilities_add[{}]", i)).bind("capability", cap))
                .collect()
        }
        Predicate::ShredWaived => {
            let secrets = &contract.secrets;
            if secrets.is_shred_waived() {
                vec![Finding::at("secrets.shred_after_apply")
                    .bind("reason", secrets.shred_waiver_reason.as_deref().unwrap_or_default())]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

/// Findings of an artifact-scope predicate; contract-scope kinds yield none
pub fn check_artifact(
    predicate: &Predicate,
    resolved: &ResolvedContract,
    artifact: &RenderedArtifact,
) -> Vec<Finding> {
    match predicate {
        Predicate::NonRootUser => non_root_user(artifact),
        Predicate::ManifestImageDigest => deployment_containers(artifact)
            .into_iter()
            .filter_map(|(path, container)| {
                let image = container["image"].as_str().unwrap_or_default();
                (!image.contains("@sha256:")).then(|| Finding::at(format!("{}.image", path)).bind("image", image))
            })
            .collect(),
        Predicate::HostPathClaimCollision => host_path_claim_collisions(artifact),
        Predicate::InlineSecret { min_length } => {
            let secrets = &resolved.contract.secrets;
            let named = secrets
                .env
                .iter()
                .map(|s| (format!("secrets.env.{}", s.name), s.name.as_str(), s.value.as_str()))
                .chain(
                    secrets
                        .files
                        .iter()
                        .map(|s| (format!("secrets.files.{}", s.name), s.name.as_str(), s.value.as_str())),
                );
            named
                .filter(|(_, _, value)| value.len() >= *min_length && artifact.text.contains(value))
                .map(|(path, name, _)| Finding::at(path).bind("secret", name))
                .collect()
        }
        Predicate::ProtectSystemStrict => {
            if artifact.target != RenderTarget::HostInitUnit
                || !resolved.contract.security.read_only_root_filesystem
            {
                return Vec::new();
            }
            let Some(unit) = artifact.document.unit() else {
                return Vec::new();
            };
            let value = unit.first("Service", "ProtectSystem").unwrap_or("absent");
            if value == "strict" {
                Vec::new()
            } else {
                vec![Finding::at("Service.ProtectSystem").bind("value", value)]
            }
        }
        Predicate::HypervisorUnprivileged => {
            if artifact.target != RenderTarget::HypervisorContainer
                || resolved.contract.security.allow_privilege_escalation
            {
                return Vec::new();
            }
            artifact
                .document
                .yaml_documents()
                .iter()
                .filter(|doc| doc["unprivileged"] != Value::Bool(true))
                .map(|doc| Finding::at("unprivileged").bind("value", &doc["unprivileged"]))
                .collect()
        }
        Predicate::ForbiddenText { pattern, targets } => {
            if !targets.is_empty() && !targets.iter().any(|tag| artifact.target.matches_tag(tag)) {
                return Vec::new();
            }
            let Ok(regex) = Regex::new(pattern) else {
                return Vec::new();
            };
            artifact
                .text
                .lines()
                .enumerate()
                .filter(|(_, line)| regex.is_match(line))
                .map(|(i, _)| Finding::at(format!("line {}", i + 1)).bind("line", i + 1).bind("pattern", pattern))
                .collect()
        }
        _ => Vec::new(),
    }
}

fn image_pinned(contract: &ServiceContract) -> Vec<Finding> {
    let image = &contract.image;
    if image.is_pinned() {
        return Vec::new();
    }
    vec![Finding::at("service_image")
        .bind("image", &image.raw)
        .bind("tag", image.tag.as_deref().unwrap_or("<none>"))]
}

fn registry_allowlist(contract: &ServiceContract, registries: &[String]) -> Vec<Finding> {
    let registry = contract.image.registry().unwrap_or(DEFAULT_REGISTRY);
    if registries.iter().any(|r| r == registry) {
        Vec::new()
    } else {
        vec![Finding::at("service_image")
            .bind("image", &contract.image.raw)
            .bind("registry", registry)]
    }
}

fn normalize_capability(cap: &str) -> String {
    let upper = cap.trim().to_ascii_uppercase();
    upper.strip_prefix("CAP_").map(str::to_string).unwrap_or(upper)
}

fn is_root(user: &str) -> bool {
    let uid = user.split(':').next().unwrap_or_default().trim();
    uid == "0" || uid == "root"
}

/// Every declared run-as user, or a finding where none is declared
fn non_root_user(artifact: &RenderedArtifact) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut check = |path: String, user: Option<String>| match user {
        Some(user) if !is_root(&user) => {}
        Some(user) => findings.push(Finding::at(path).bind("user", user)),
        None => findings.push(Finding::at(path).bind("user", "<unset>")),
    };

    match artifact.target {
        RenderTarget::ContainerCompose => {
            for doc in artifact.document.yaml_documents() {
                if let Some(services) = doc["services"].as_object() {
                    for (name, service) in services {
                        check(format!("services.{}.user", name), service["user"].as_str().map(str::to_string));
                    }
                }
            }
        }
        RenderTarget::HypervisorContainer => {
            for doc in artifact.document.yaml_documents() {
                check("workload.user".to_string(), doc["workload"]["user"].as_str().map(str::to_string));
            }
        }
        RenderTarget::OrchestratorManifest => {
            for doc in artifact.document.yaml_documents() {
                if doc["kind"] != "Deployment" {
                    continue;
                }
                let pod = &doc["spec"]["template"]["spec"];
                let pod_user = pod["securityContext"]["runAsUser"].as_u64();
                for (i, container) in pod["containers"].as_array().into_iter().flatten().enumerate() {
                    let user = container["securityContext"]["runAsUser"].as_u64().or(pod_user);
                    check(
                        format!("spec.template.spec.containers[{}].securityContext.runAsUser", i),
                        user.map(|u| u.to_string()),
                    );
                }
            }
        }
        RenderTarget::ContainerUnitSupervisor => {
            if let Some(unit) = artifact.document.unit() {
                check("Container.User".to_string(), unit.first("Container", "User").map(str::to_string));
            }
        }
        RenderTarget::HostInitUnit => {
            if let Some(unit) = artifact.document.unit() {
                check("Service.User".to_string(), unit.first("Service", "User").map(str::to_string));
            }
        }
    }
    findings
}

fn deployment_containers(artifact: &RenderedArtifact) -> Vec<(String, &Value)> {
    artifact
        .document
        .yaml_documents()
        .iter()
        .filter(|doc| doc["kind"] == "Deployment")
        .flat_map(|doc| {
            doc["spec"]["template"]["spec"]["containers"]
                .as_array()
                .into_iter()
                .flatten()
                .enumerate()
                .map(|(i, c)| (format!("spec.template.spec.containers[{}]", i), c))
        })
        .collect()
}

fn host_path_claim_collisions(artifact: &RenderedArtifact) -> Vec<Finding> {
    let docs = artifact.document.yaml_documents();
    let claims: BTreeSet<&str> = docs
        .iter()
        .filter(|doc| doc["kind"] == "PersistentVolumeClaim")
        .filter_map(|doc| doc["metadata"]["name"].as_str())
        .collect();
    docs.iter()
        .filter(|doc| doc["kind"] == "Deployment")
        .flat_map(|doc| doc["spec"]["template"]["spec"]["volumes"].as_array().into_iter().flatten())
        .filter(|volume| volume.get("hostPath").is_some())
        .filter_map(|volume| volume["name"].as_str())
        .filter(|name| claims.contains(name))
        .map(|name| Finding::at(format!("volumes.{}", name)).bind("volume", name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{fixtures, renderer_for};
    use serde_json::json;

    fn render(resolved: &ResolvedContract, target: RenderTarget) -> RenderedArtifact {
        renderer_for(target)
            .render(resolved, &fixtures::plan_for(resolved, target))
            .unwrap()
    }

    #[test]
    fn test_image_pinned_cites_service_image() {
        let mut resolved = fixtures::resolved(json!({}));
        assert!(check_contract(&Predicate::ImagePinned, &resolved.contract).is_empty());

        resolved.contract.image = crate::contract::ImageReference::parse("registry/x:latest").unwrap();
        let findings = check_contract(&Predicate::ImagePinned, &resolved.contract);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].field_path, "service_image");
        assert_eq!(findings[0].bindings["tag"], "latest");
    }

    #[test]
    fn test_port_predicates() {
        let resolved = fixtures::resolved(json!({
            "ports": [
                {"target": 80, "published": 80},
                {"target": 8443, "host_ip": "0.0.0.0"}
            ]
        }));
        let privileged = check_contract(&Predicate::PrivilegedPorts { min_port: 1024 }, &resolved.contract);
        assert_eq!(privileged.len(), 1);
        assert_eq!(privileged[0].field_path, "ports[0].published");

        let wildcard = check_contract(
            &Predicate::WildcardHostIp { addresses: vec!["0.0.0.0".to_string()] },
            &resolved.contract,
        );
        assert_eq!(wildcard.len(), 1);
        assert_eq!(wildcard[0].field_path, "ports[1].host_ip");

        let allowed = fixtures::resolved(json!({
            "ports": [{"target": 80}],
            "security": {"allow_privileged_ports": true, "capabilities_add": ["NET_BIND_SERVICE"]}
        }));
        assert!(check_contract(&Predicate::PrivilegedPorts { min_port: 1024 }, &allowed.contract).is_empty());
        let forbidden = Predicate::ForbiddenCapabilities {
            capabilities: vec!["CAP_NET_BIND_SERVICE".to_string()],
        };
        assert_eq!(check_contract(&forbidden, &allowed.contract).len(), 1);
    }

    #[test]
    fn test_registry_allowlist_defaults_to_docker_hub() {
        let resolved = fixtures::resolved(json!({}));
        let predicate = Predicate::ImageRegistryAllowlist {
            registries: vec!["registry.internal".to_string()],
        };
        let findings = check_contract(&predicate, &resolved.contract);
        assert_eq!(findings[0].bindings["registry"], "docker.io");
    }

    #[test]
    fn test_artifact_checks_pass_on_defaults() {
        let resolved = fixtures::resolved(json!({"command": ["/usr/bin/web"], "address": "10.0.0.5"}));
        for target in RenderTarget::ALL {
            let artifact = render(&resolved, target);
            for predicate in [
                Predicate::NonRootUser,
                Predicate::ManifestImageDigest,
                Predicate::HostPathClaimCollision,
                Predicate::ProtectSystemStrict,
                Predicate::HypervisorUnprivileged,
            ] {
                assert!(check_artifact(&predicate, &resolved, &artifact).is_empty(), "{} {:?}", target, predicate);
            }
        }
    }

    #[test]
    fn test_root_user_is_flagged() {
        let resolved = fixtures::resolved(json!({"security": {"run_as_user": 0}}));
        let artifact = render(&resolved, RenderTarget::OrchestratorManifest);
        let findings = check_artifact(&Predicate::NonRootUser, &resolved, &artifact);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].bindings["user"], "0");
    }

    #[test]
    fn test_manifest_digest_and_claim_collision() {
        let mut resolved = fixtures::resolved(json!({
            "volumes": [{"name": "web-data", "host_path": "/srv/data", "target": "/srv"}],
            "mounts": {"persistent_volumes": [{"name": "data", "target": "/data"}]}
        }));
        resolved.contract.image = crate::contract::ImageReference::parse("registry/x:1.2").unwrap();
        let artifact = render(&resolved, RenderTarget::OrchestratorManifest);

        let digest = check_artifact(&Predicate::ManifestImageDigest, &resolved, &artifact);
        assert_eq!(digest[0].field_path, "spec.template.spec.containers[0].image");
        let collision = check_artifact(&Predicate::HostPathClaimCollision, &resolved, &artifact);
        assert_eq!(collision.len(), 1);
        assert_eq!(collision[0].bindings["volume"], "web-data");
    }

    #[test]
    fn test_inline_secret_and_forbidden_text() {
        let resolved = fixtures::with_secrets(fixtures::resolved(json!({})), None);
        let mut artifact = render(&resolved, RenderTarget::ContainerCompose);
        let predicate = Predicate::InlineSecret { min_length: 6 };
        assert!(check_artifact(&predicate, &resolved, &artifact).is_empty());

        artifact.text.push_str("# hunter2-secret\n");
        let findings = check_artifact(&predicate, &resolved, &artifact);
        assert_eq!(findings[0].field_path, "secrets.env.DB_PASSWORD");
        assert!(!findings[0].bindings.values().any(|v| v.contains("hunter2")));

        let text = Predicate::ForbiddenText {
            pattern: "^# hunter".to_string(),
            targets: vec!["docker".to_string()],
        };
        assert_eq!(check_artifact(&text, &resolved, &artifact).len(), 1);
    }
}
