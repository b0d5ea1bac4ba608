//! Container-compose file

use super::common::{
    cores_decimal, memory_compose, probe_seconds, process_environment, secret_installs, tmpfs_spec,
    user_spec, yaml_text,
};
use super::error::RenderError;
use super::types::{ArtifactDocument, ArtifactMetadata, RenderedArtifact};
use super::BackendRenderer;
use crate::contract::{Protocol, RenderTarget, ResolvedContract, UserNamespaceMode};
use crate::secrets::SecretsTransportPlan;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

const TARGET: RenderTarget = RenderTarget::ContainerCompose;

#[derive(Debug, Clone, Copy, Default)]
pub struct ComposeRenderer;

/// Compose secret key for one file secret
fn secret_key(service_name: &str, secret_name: &str) -> String {
    format!("{}_{}", service_name, secret_name.replace('.', "_"))
}

fn port_spec(host_ip: Option<&str>, published: u16, target: u16, protocol: Protocol) -> String {
    let mut spec = match host_ip {
        Some(ip) => format!("{}:{}:{}", ip, published, target),
        None => format!("{}:{}", published, target),
    };
    if protocol == Protocol::Udp {
        spec.push_str("/udp");
    }
    spec
}

impl BackendRenderer for ComposeRenderer {
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
        let mut service = Map::new();

        service.insert("image".into(), json!(contract.image.raw));
        service.insert("container_name".into(), json!(name));
        if !contract.command.is_empty() {
            service.insert("command".into(), json!(contract.command));
        }
        service.insert("restart".into(), json!("unless-stopped"));
        service.insert("user".into(), json!(user_spec(resolved)));
        service.insert("read_only".into(), json!(security.read_only_root_filesystem));
        service.insert("cap_drop".into(), json!(security.capabilities_drop));
        if !security.capabilities_add.is_empty() {
            service.insert("cap_add".into(), json!(security.capabilities_add));
        }

        let mut security_opt = Vec::new();
        if security.no_new_privileges {
            security_opt.push("no-new-privileges:true".to_string());
        }
        security_opt.push(format!("apparmor={}", security.apparmor_profile));
        if let Some(seccomp) = &security.seccomp_profile {
            security_opt.push(format!("seccomp={}", seccomp));
        }
        service.insert("security_opt".into(), json!(security_opt));

        match security.user_namespace {
            None | Some(UserNamespaceMode::Private) => {}
            Some(UserNamespaceMode::Host) => {
                service.insert("userns_mode".into(), json!("host"));
            }
            Some(mode @ (UserNamespaceMode::Auto | UserNamespaceMode::KeepId)) => {
                return Err(RenderError::incompatible(
                    &contract.service_id,
                    TARGET,
                    "security.user_namespace",
                    format!("compose has no '{}' user namespace mode", mode.as_str()),
                ));
            }
        }

        let environment: Map<String, Value> = process_environment(resolved, plan)
            .into_iter()
            .map(|(k, v)| (k, json!(v)))
            .collect();
        if !environment.is_empty() {
            service.insert("environment".into(), Value::Object(environment));
        }
        if let Some(env) = &plan.env_file {
            service.insert("env_file".into(), json!([env.staged_path.display().to_string()]));
        }

        if !contract.ports.is_empty() {
            let ports: Vec<String> = contract
                .ports
                .iter()
                .map(|p| port_spec(p.host_ip.as_deref(), p.published, p.target, p.protocol))
                .collect();
            service.insert("ports".into(), json!(ports));
        }

        let mut volumes = Vec::new();
        let mut named_volumes = Map::new();
        for volume in &contract.volumes {
            let source = match &volume.host_path {
                Some(host_path) => host_path.clone(),
                None => {
                    named_volumes.insert(volume.name.clone(), json!({}));
                    volume.name.clone()
                }
            };
            let suffix = if volume.read_only { ":ro" } else { "" };
            volumes.push(format!("{}:{}{}", source, volume.target, suffix));
        }
        for volume in contract.mounts.persistent_for(TARGET) {
            named_volumes.insert(volume.name.clone(), json!({}));
            volumes.push(format!("{}:{}", volume.name, volume.target));
        }
        if !volumes.is_empty() {
            service.insert("volumes".into(), json!(volumes));
        }

        let tmpfs: Vec<String> = contract
            .mounts
            .ephemeral_for(TARGET)
            .into_iter()
            .map(tmpfs_spec)
            .collect();
        if !tmpfs.is_empty() {
            service.insert("tmpfs".into(), json!(tmpfs));
        }

        let mut top_secrets = Map::new();
        let mut secret_refs = Vec::new();
        for file in &plan.files {
            let key = secret_key(name, &file.name);
            top_secrets.insert(key.clone(), json!({"file": file.staged_path.display().to_string()}));
            secret_refs.push(json!({
                "source": key,
                "target": file.target,
                "mode": file.mode
            }));
        }
        if !secret_refs.is_empty() {
            service.insert("secrets".into(), json!(secret_refs));
        }

        let health = &contract.health;
        let mut test = vec!["CMD".to_string()];
        test.extend(health.cmd.iter().cloned());
        let mut healthcheck = json!({
            "test": test,
            "interval": format!("{}s", probe_seconds(resolved, TARGET, "health.interval", &health.interval)?),
            "timeout": format!("{}s", probe_seconds(resolved, TARGET, "health.timeout", &health.timeout)?),
            "retries": health.retries
        });
        if let Some(start) = &health.start_period {
            healthcheck["start_period"] =
                json!(format!("{}s", probe_seconds(resolved, TARGET, "health.start_period", start)?));
        }
        service.insert("healthcheck".into(), healthcheck);

        service.insert(
            "deploy".into(),
            json!({"resources": {"limits": {
                "memory": memory_compose(contract.resources.memory_mb),
                "cpus": cores_decimal(contract.resources.cpu_cores)
            }}}),
        );

        let mut document = Map::new();
        document.insert("services".into(), json!({ name: Value::Object(service) }));
        if !named_volumes.is_empty() {
            document.insert("volumes".into(), Value::Object(named_volumes));
        }
        if !top_secrets.is_empty() {
            document.insert("secrets".into(), Value::Object(top_secrets));
        }
        let document = Value::Object(document);
        let text = yaml_text(resolved, TARGET, std::slice::from_ref(&document))?;

        let mut names = BTreeMap::new();
        names.insert("container".to_string(), name.to_string());
        names.insert("service".to_string(), name.to_string());

        Ok(RenderedArtifact {
            service_id: contract.service_id.clone(),
            target: TARGET,
            text,
            document: ArtifactDocument::Yaml(vec![document]),
            metadata: ArtifactMetadata {
                address: contract.address.clone().unwrap_or_else(|| name.to_string()),
                file_name: "docker-compose.yml".to_string(),
                names,
                secret_installs: secret_installs(plan),
                health_cmd: health.cmd.clone(),
                rotation_marker: plan.rotation_timestamp.clone(),
            },
        })
    }
}
