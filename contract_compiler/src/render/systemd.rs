//! Host init `.service` unit

use super::common::{
    command_line, cpu_quota_percent, env_assignment, memory_systemd, process_environment,
    secret_installs, tmpfs_options,
};
use super::error::RenderError;
use super::types::{ArtifactDocument, ArtifactMetadata, RenderedArtifact, UnitFile};
use super::BackendRenderer;
use crate::contract::{RenderTarget, ResolvedContract, UserNamespaceMode};
use crate::secrets::SecretsTransportPlan;
use std::collections::BTreeMap;

const TARGET: RenderTarget = RenderTarget::HostInitUnit;
const LOOPBACK: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemdRenderer;

fn capability_name(cap: &str) -> String {
    let upper = cap.to_ascii_uppercase();
    if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{}", upper)
    }
}

impl BackendRenderer for SystemdRenderer {
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
        if contract.command.is_empty() {
            return Err(RenderError::missing(&contract.service_id, TARGET, "command"));
        }
        let private_users = match security.user_namespace {
            None | Some(UserNamespaceMode::Host) => false,
            Some(UserNamespaceMode::Private | UserNamespaceMode::Auto) => true,
            Some(UserNamespaceMode::KeepId) => {
                return Err(RenderError::incompatible(
                    &contract.service_id,
                    TARGET,
                    "security.user_namespace",
                    "host units have no keep-id user namespace",
                ));
            }
        };

        let mut unit = UnitFile::new();
        unit.section("Unit")
            .set("Description", format!("{} service", name))
            .set("After", "network-online.target")
            .set("Wants", "network-online.target");

        unit.section("Service")
            .set("Type", "simple")
            .set("ExecStart", command_line(&contract.command))
            .set("User", security.run_as_user.to_string())
            .set("Group", security.run_as_group.to_string());
        for (key, value) in process_environment(resolved, plan) {
            unit.set("Environment", env_assignment(&key, &value));
        }
        if let Some(env) = &plan.env_file {
            let path = env
                .install_path
                .clone()
                .unwrap_or_else(|| env.staged_path.display().to_string());
            unit.set("EnvironmentFile", path);
        }
        for file in &plan.files {
            unit.set("LoadCredential", format!("{}:{}", file.name, file.target));
        }

        unit.set_if(security.no_new_privileges, "NoNewPrivileges", "yes");
        let dropped_all = security
            .capabilities_drop
            .iter()
            .any(|cap| cap.eq_ignore_ascii_case("ALL"));
        let added: Vec<String> = security.capabilities_add.iter().map(|c| capability_name(c)).collect();
        if dropped_all {
            unit.set("CapabilityBoundingSet", added.join(" "));
        } else if !security.capabilities_drop.is_empty() {
            let dropped: Vec<String> = security.capabilities_drop.iter().map(|c| capability_name(c)).collect();
            unit.set("CapabilityBoundingSet", format!("~{}", dropped.join(" ")));
        }
        if !added.is_empty() {
            unit.set("AmbientCapabilities", added.join(" "));
        }
        unit.set(
            "ProtectSystem",
            if security.read_only_root_filesystem { "strict" } else { "full" },
        )
        .set("ProtectHome", "yes")
        .set("PrivateTmp", "yes")
        .set_if(private_users, "PrivateUsers", "yes");

        for volume in &contract.volumes {
            match &volume.host_path {
                Some(host_path) => {
                    let key = if volume.read_only { "BindReadOnlyPaths" } else { "BindPaths" };
                    unit.set(key, format!("{}:{}", host_path, volume.target));
                }
                None => {
                    unit.set("ReadWritePaths", volume.target.as_str());
                }
            }
        }
        for volume in contract.mounts.persistent_for(TARGET) {
            unit.set("ReadWritePaths", volume.target.as_str());
        }
        for mount in contract.mounts.ephemeral_for(TARGET) {
            let options = tmpfs_options(mount);
            if options.is_empty() {
                unit.set("TemporaryFileSystem", mount.path.as_str());
            } else {
                unit.set("TemporaryFileSystem", format!("{}:{}", mount.path, options));
            }
        }

        unit.set("MemoryMax", memory_systemd(contract.resources.memory_mb))
            .set("CPUQuota", cpu_quota_percent(contract.resources.cpu_cores));
        if security.seccomp_profile.as_deref() != Some("unconfined") {
            unit.set("SystemCallFilter", "@system-service");
        }
        if !matches!(security.apparmor_profile.as_str(), "docker-default" | "unconfined") {
            unit.set("AppArmorProfile", security.apparmor_profile.as_str());
        }
        unit.set("Restart", "on-failure");
        unit.section("Install").set("WantedBy", "multi-user.target");

        let address = contract.address.clone().unwrap_or_else(|| {
            contract
                .ports
                .iter()
                .find_map(|p| p.host_ip.clone())
                .unwrap_or_else(|| LOOPBACK.to_string())
        });
        let mut names = BTreeMap::new();
        names.insert("unit".to_string(), format!("{}.service", name));

        Ok(RenderedArtifact {
            service_id: contract.service_id.clone(),
            target: TARGET,
            text: unit.render(),
            metadata: ArtifactMetadata {
                address,
                file_name: format!("{}.service", name),
                names,
                secret_installs: secret_installs(plan),
                health_cmd: contract.health.cmd.clone(),
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
    use assert_matches::assert_matches;
    use serde_json::json;

    fn render(resolved: &ResolvedContract) -> Result<RenderedArtifact, RenderError> {
        SystemdRenderer.render(resolved, &fixtures::plan_for(resolved, TARGET))
    }

    #[test]
    fn test_hardened_service_unit() {
        let artifact = render(&fixtures::resolved(json!({
            "command": ["/usr/bin/web", "--listen", "0.0.0.0:8080"],
            "environment": {"LOG_LEVEL": "info"},
            "mounts": {"ephemeral_mounts": [{"path": "/var/cache/web", "size": "32m"}]}
        })))
        .unwrap();
        let unit = artifact.document.unit().unwrap();

        assert_eq!(unit.first("Service", "ExecStart"), Some("/usr/bin/web --listen 0.0.0.0:8080"));
        assert_eq!(unit.first("Service", "User"), Some("65532"));
        assert_eq!(unit.get("Service", "Environment"), vec!["LOG_LEVEL=info"]);
        assert_eq!(unit.first("Service", "NoNewPrivileges"), Some("yes"));
        assert_eq!(unit.first("Service", "CapabilityBoundingSet"), Some(""));
        assert_eq!(unit.first("Service", "ProtectSystem"), Some("strict"));
        assert_eq!(unit.first("Service", "TemporaryFileSystem"), Some("/var/cache/web:size=32m"));
        assert_eq!(unit.first("Service", "MemoryMax"), Some("512M"));
        assert_eq!(unit.first("Service", "CPUQuota"), Some("100%"));
        assert_eq!(unit.first("Service", "SystemCallFilter"), Some("@system-service"));
        assert_eq!(unit.first("Service", "AppArmorProfile"), None);
        assert_eq!(unit.first("Install", "WantedBy"), Some("multi-user.target"));
        assert_eq!(artifact.metadata.address, "127.0.0.1");
        assert_eq!(artifact.metadata.file_name, "web.service");
    }

    #[test]
    fn test_command_is_required() {
        assert_matches!(
            render(&fixtures::resolved(json!({}))),
            Err(RenderError::MissingField { field, .. }) if field == "command"
        );
    }

    #[test]
    fn test_secrets_and_capabilities() {
        let resolved = fixtures::with_secrets(
            fixtures::resolved(json!({
                "command": ["/usr/bin/web"],
                "security": {"capabilities_add": ["NET_BIND_SERVICE"], "read_only_root_filesystem": false},
                "ports": [{"target": 8080, "host_ip": "10.1.2.3"}]
            })),
            Some("r1"),
        );
        let artifact = render(&resolved).unwrap();
        let unit = artifact.document.unit().unwrap();

        assert_eq!(
            unit.first("Service", "EnvironmentFile"),
            Some("/run/contractc/web/host-init-unit/secrets.env")
        );
        assert_eq!(unit.get("Service", "LoadCredential"), vec!["tls.key:/etc/tls/tls.key"]);
        assert_eq!(unit.get("Service", "Environment"), vec!["SECRETS_ROTATION_TIMESTAMP=r1"]);
        assert_eq!(unit.first("Service", "CapabilityBoundingSet"), Some("CAP_NET_BIND_SERVICE"));
        assert_eq!(unit.first("Service", "AmbientCapabilities"), Some("CAP_NET_BIND_SERVICE"));
        assert_eq!(unit.first("Service", "ProtectSystem"), Some("full"));
        assert_eq!(artifact.metadata.address, "10.1.2.3");
    }

    #[test]
    fn test_private_users() {
        let resolved = fixtures::resolved(json!({
            "command": ["/usr/bin/web"],
            "security": {"user_namespace": "auto"}
        }));
        let artifact = render(&resolved).unwrap();
        assert_eq!(artifact.document.unit().unwrap().first("Service", "PrivateUsers"), Some("yes"));
    }
}
