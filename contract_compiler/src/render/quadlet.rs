//! Container unit supervisor `.container` file

use super::common::{
    command_line, cores_decimal, env_assignment, memory_compose, probe_seconds,
    process_environment, secret_installs, tmpfs_options,
};
use super::error::RenderError;
use super::types::{ArtifactDocument, ArtifactMetadata, RenderedArtifact, UnitFile};
use super::BackendRenderer;
use crate::contract::{Protocol, RenderTarget, ResolvedContract};
use crate::secrets::SecretsTransportPlan;
use std::collections::BTreeMap;

const TARGET: RenderTarget = RenderTarget::ContainerUnitSupervisor;

#[derive(Debug, Clone, Copy, Default)]
pub struct QuadletRenderer;

impl BackendRenderer for QuadletRenderer {
    fn target(&self) -> RenderTarget {
        TARGET
    }

    fn render(
        &self,
        resolved: &ResolvedContract,
        plan: &SecretsTransportPlan,
    ) -> Result<RenderedArtifact, RenderError> {
        let contract = &resolved.contract;
        let security = &contract.security;
        let name = contract.service_name.as_str();
        let health = &contract.health;
        let mut unit = UnitFile::new();
        let mut names = BTreeMap::new();
        names.insert("container".to_string(), name.to_string());
        names.insert("unit".to_string(), format!("{}.service", name));

        unit.section("Unit")
            .set("Description", format!("{} container", name));

        unit.section("Container")
            .set("ContainerName", name)
            .set("Image", contract.image.raw.as_str())
            .set_if(!contract.command.is_empty(), "Exec", command_line(&contract.command))
            .set("User", security.run_as_user.to_string())
            .set("Group", security.run_as_group.to_string())
            .set_if(security.read_only_root_filesystem, "ReadOnly", "true");
        for cap in &security.capabilities_drop {
            unit.set("DropCapability", cap.as_str());
        }
        for cap in &security.capabilities_add {
            unit.set("AddCapability", cap.as_str());
        }
        unit.set_if(security.no_new_privileges, "NoNewPrivileges", "true");
        if let Some(mode) = security.user_namespace {
            unit.set("UserNS", mode.as_str());
        }
        if let Some(seccomp) = &security.seccomp_profile {
            unit.set("SeccompProfile", seccomp.as_str());
        }

        for (key, value) in process_environment(resolved, plan) {
            unit.set("Environment", env_assignment(&key, &value));
        }
        if let Some(env) = &plan.env_file {
            unit.set("EnvironmentFile", env.staged_path.display().to_string());
        }

        for port in &contract.ports {
            let mut spec = match &port.host_ip {
                Some(ip) => format!("{}:{}:{}", ip, port.published, port.target),
                None => format!("{}:{}", port.published, port.target),
            };
            if port.protocol == Protocol::Udp {
                spec.push_str("/udp");
            }
            unit.set("PublishPort", spec);
        }

        for volume in &contract.volumes {
            let source = match &volume.host_path {
                Some(host_path) => host_path.clone(),
                None => {
                    let volume_name = format!("{}-{}", name, volume.name);
                    names.insert(format!("volume.{}", volume.name), volume_name.clone());
                    volume_name
                }
            };
            let suffix = if volume.read_only { ":ro" } else { "" };
            unit.set("Volume", format!("{}:{}{}", source, volume.target, suffix));
        }
        for volume in contract.mounts.persistent_for(TARGET) {
            let volume_name = format!("{}-{}", name, volume.name);
            names.insert(format!("volume.{}", volume.name), volume_name.clone());
            unit.set("Volume", format!("{}:{}", volume_name, volume.target));
        }
        for mount in contract.mounts.ephemeral_for(TARGET) {
            let options = tmpfs_options(mount);
            if options.is_empty() {
                unit.set("Tmpfs", mount.path.as_str());
            } else {
                unit.set("Tmpfs", format!("{}:{}", mount.path, options));
            }
        }
        for file in &plan.files {
            unit.set(
                "Mount",
                format!(
                    "type=bind,source={},destination={},ro=true",
                    file.staged_path.display(),
                    file.target
                ),
            );
        }

        unit.set("HealthCmd", command_line(&health.cmd))
            .set(
                "HealthInterval",
                format!("{}s", probe_seconds(resolved, TARGET, "health.interval", &health.interval)?),
            )
            .set(
                "HealthTimeout",
                format!("{}s", probe_seconds(resolved, TARGET, "health.timeout", &health.timeout)?),
            )
            .set("HealthRetries", health.retries.to_string());
        if let Some(start) = &health.start_period {
            unit.set(
                "HealthStartPeriod",
                format!("{}s", probe_seconds(resolved, TARGET, "health.start_period", start)?),
            );
        }

        let mut podman_args = vec![
            format!("--memory={}", memory_compose(contract.resources.memory_mb)),
            format!("--cpus={}", cores_decimal(contract.resources.cpu_cores)),
        ];
        podman_args.push(format!("--security-opt=apparmor={}", security.apparmor_profile));
        unit.set("PodmanArgs", podman_args.join(" "));

        unit.section("Service")
            .set("Restart", "always")
            .set("TimeoutStartSec", "300");
        unit.section("Install").set("WantedBy", "default.target");

        Ok(RenderedArtifact {
            service_id: contract.service_id.clone(),
            target: TARGET,
            text: unit.render(),
            metadata: ArtifactMetadata {
                address: contract.address.clone().unwrap_or_else(|| name.to_string()),
                file_name: format!("{}.container", name),
                names,
                secret_installs: secret_installs(plan),
                health_cmd: health.cmd.clone(),
                rotation_marker: plan.rotation_timestamp.clone(),
            },
            document: ArtifactDocument::Unit(unit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::fixtures;
    use serde_json::json;

    fn render(patch: serde_json::Value, rotation: Option<&str>, secrets: bool) -> RenderedArtifact {
        let mut resolved = fixtures::resolved(patch);
        if secrets {
            resolved = fixtures::with_secrets(resolved, rotation);
        }
        QuadletRenderer
            .render(&resolved, &fixtures::plan_for(&resolved, TARGET))
            .unwrap()
    }

    #[test]
    fn test_container_section() {
        let artifact = render(json!({"command": ["/usr/bin/web", "--port", "8080"]}), None, false);
        let unit = artifact.document.unit().unwrap();

        assert_eq!(unit.first("Container", "ContainerName"), Some("web"));
        assert_eq!(unit.first("Container", "Exec"), Some("/usr/bin/web --port 8080"));
        assert_eq!(unit.first("Container", "User"), Some("65532"));
        assert_eq!(unit.first("Container", "ReadOnly"), Some("true"));
        assert_eq!(unit.get("Container", "DropCapability"), vec!["ALL"]);
        assert_eq!(unit.get("Container", "PublishPort"), vec!["8080:8080"]);
        assert_eq!(unit.first("Container", "HealthCmd"), Some("/bin/sh -c \"exit 0\""));
        assert_eq!(unit.first("Container", "HealthInterval"), Some("10s"));
        assert_eq!(
            unit.first("Container", "PodmanArgs"),
            Some("--memory=512m --cpus=1 --security-opt=apparmor=docker-default")
        );
        assert_eq!(unit.first("Install", "WantedBy"), Some("default.target"));
        assert_eq!(artifact.metadata.file_name, "web.container");
        assert!(artifact.text.starts_with("[Unit]\nDescription=web container\n\n[Container]\n"));
    }

    #[test]
    fn test_secret_material_is_referenced_by_path() {
        let artifact = render(json!({}), Some("r1"), true);
        let unit = artifact.document.unit().unwrap();

        assert_eq!(
            unit.first("Container", "EnvironmentFile"),
            Some("/run/contractc/web/container-unit-supervisor/secrets.env")
        );
        assert_eq!(
            unit.get("Container", "Mount"),
            vec!["type=bind,source=/run/contractc/web/container-unit-supervisor/files/tls.key,destination=/etc/tls/tls.key,ro=true"]
        );
        assert_eq!(
            unit.get("Container", "Environment"),
            vec!["SECRETS_ROTATION_TIMESTAMP=r1"]
        );
    }

    #[test]
    fn test_named_volumes_are_prefixed() {
        let artifact = render(
            json!({
                "volumes": [{"name": "data", "target": "/var/lib/web"}],
                "security": {"user_namespace": "keep-id"}
            }),
            None,
            false,
        );
        let unit = artifact.document.unit().unwrap();
        assert_eq!(unit.get("Container", "Volume"), vec!["web-data:/var/lib/web"]);
        assert_eq!(unit.first("Container", "UserNS"), Some("keep-id"));
        assert_eq!(artifact.metadata.names["volume.data"], "web-data");
    }
}
