//! Hypervisor container descriptor
//!
//! A YAML document describing an LXC-style system container: host settings,
//! network, mount points, firewall and the workload run inside it.

use super::common::{
    cores_decimal, octal_mode, probe_seconds, process_environment, secret_installs, size_gib,
    tmpfs_spec, user_spec, yaml_text,
};
use super::error::RenderError;
use super::types::{ArtifactDocument, ArtifactMetadata, RenderedArtifact};
use super::BackendRenderer;
use crate::contract::{FirewallAction, RenderTarget, ResolvedContract, UserNamespaceMode};
use crate::secrets::SecretsTransportPlan;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

const TARGET: RenderTarget = RenderTarget::HypervisorContainer;

pub const ALLOWED_FEATURES: [&str; 4] = ["fuse", "keyctl", "mount", "nesting"];
const DEFAULT_PREFIX: &str = "24";
const DEFAULT_VOLUME_GIB: u64 = 8;
const ROOTFS: &str = "local-lvm:8";

#[derive(Debug, Clone, Copy, Default)]
pub struct HypervisorRenderer;

/// Split `10.0.0.5/24` into address and prefix length
fn split_address(address: &str) -> (&str, &str) {
    match address.split_once('/') {
        Some((ip, prefix)) if !prefix.is_empty() => (ip, prefix),
        Some((ip, _)) => (ip, DEFAULT_PREFIX),
        None => (address, DEFAULT_PREFIX),
    }
}

fn features(resolved: &ResolvedContract) -> Result<Option<String>, RenderError> {
    let contract = &resolved.contract;
    let mut features = BTreeSet::new();
    for feature in &contract.hypervisor.features {
        let feature = feature.trim();
        if !ALLOWED_FEATURES.contains(&feature) {
            return Err(RenderError::incompatible(
                &contract.service_id,
                TARGET,
                "hypervisor.features",
                format!(
                    "feature '{}' is not allowed (allowed: {})",
                    feature,
                    ALLOWED_FEATURES.join(", ")
                ),
            ));
        }
        features.insert(feature);
    }
    if features.contains("nesting") && !contract.security.allow_privilege_escalation {
        return Err(RenderError::incompatible(
            &contract.service_id,
            TARGET,
            "hypervisor.features",
            "nesting requires security.allow_privilege_escalation",
        ));
    }
    if features.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        features
            .into_iter()
            .map(|f| format!("{}=1", f))
            .collect::<Vec<_>>()
            .join(","),
    ))
}

fn unprivileged(resolved: &ResolvedContract) -> Result<bool, RenderError> {
    let security = &resolved.contract.security;
    if security.user_namespace != Some(UserNamespaceMode::Host) {
        return Ok(true);
    }
    if !security.allow_privilege_escalation {
        return Err(RenderError::incompatible(
            resolved.service_id(),
            TARGET,
            "security.user_namespace",
            "a privileged container requires security.allow_privilege_escalation",
        ));
    }
    Ok(false)
}

fn firewall(resolved: &ResolvedContract) -> Value {
    let contract = &resolved.contract;
    let mut rules = Vec::new();
    for port in &contract.ports {
        rules.push(json!({
            "action": FirewallAction::Accept.as_str(),
            "type": "in",
            "proto": port.protocol.as_str(),
            "dport": port.target.to_string(),
            "comment": format!("{} port {}", contract.service_name, port.target)
        }));
    }
    for rule in &contract.hypervisor.firewall {
        let mut entry = Map::new();
        entry.insert("action".into(), json!(rule.action.as_str()));
        entry.insert("type".into(), json!(rule.direction.as_str()));
        if let Some(proto) = &rule.protocol {
            entry.insert("proto".into(), json!(proto));
        }
        if let Some(dport) = &rule.destination_port {
            entry.insert("dport".into(), json!(dport));
        }
        if let Some(source) = &rule.source {
            entry.insert("source".into(), json!(source));
        }
        if let Some(comment) = &rule.comment {
            entry.insert("comment".into(), json!(comment));
        }
        rules.push(Value::Object(entry));
    }
    json!({"enable": true, "policy_in": "DROP", "rules": rules})
}

impl BackendRenderer for HypervisorRenderer {
    fn target(&self) -> RenderTarget {
        TARGET
    }

    fn render(
        &self,
        resolved: &ResolvedContract,
        plan: &SecretsTransportPlan,
    ) -> Result<RenderedArtifact, RenderError> {
        let contract = &resolved.contract;
        let settings = &contract.hypervisor;
        let name = contract.service_name.as_str();
        let address = contract
            .address
            .as_deref()
            .ok_or_else(|| RenderError::missing(&contract.service_id, TARGET, "address"))?;
        let (ip, prefix) = split_address(address);

        let mut host = Map::new();
        host.insert("hostname".into(), json!(name));
        if let Some(vmid) = settings.vmid {
            host.insert("vmid".into(), json!(vmid));
        }
        if let Some(template) = &settings.ostemplate {
            host.insert("ostemplate".into(), json!(template));
        }
        host.insert("unprivileged".into(), json!(unprivileged(resolved)?));
        if let Some(features) = features(resolved)? {
            host.insert("features".into(), json!(features));
        }
        host.insert("memory".into(), json!(contract.resources.memory_mb));
        host.insert("swap".into(), json!(0));
        host.insert("cores".into(), json!(contract.resources.cpu_cores.ceil().max(1.0) as u32));
        host.insert("cpulimit".into(), json!(cores_decimal(contract.resources.cpu_cores)));
        host.insert("rootfs".into(), json!(ROOTFS));

        let mut net = format!("name=eth0,bridge={},ip={}/{}", settings.bridge, ip, prefix);
        if let Some(gateway) = &settings.gateway {
            net.push_str(&format!(",gw={}", gateway));
        }
        net.push_str(",firewall=1");
        host.insert("net0".into(), json!(net));

        let mut names = BTreeMap::new();
        names.insert("hostname".to_string(), name.to_string());
        let mut mount_points = Vec::new();
        for volume in &contract.volumes {
            let spec = match &volume.host_path {
                Some(host_path) => format!("{},mp={}", host_path, volume.target),
                None => format!("local-lvm:{},mp={}", DEFAULT_VOLUME_GIB, volume.target),
            };
            let spec = if volume.read_only { format!("{},ro=1", spec) } else { spec };
            mount_points.push((volume.name.clone(), spec));
        }
        for volume in contract.mounts.persistent_for(TARGET) {
            let gib = size_gib(volume.size.as_deref(), DEFAULT_VOLUME_GIB);
            mount_points.push((volume.name.clone(), format!("local-lvm:{},mp={}", gib, volume.target)));
        }
        for (i, (volume, spec)) in mount_points.into_iter().enumerate() {
            let key = format!("mp{}", i);
            names.insert(format!("volume.{}", volume), key.clone());
            host.insert(key, json!(spec));
        }
        host.insert("firewall".into(), firewall(resolved));

        let health = &contract.health;
        let mut health_block = json!({
            "cmd": health.cmd,
            "interval": probe_seconds(resolved, TARGET, "health.interval", &health.interval)?,
            "timeout": probe_seconds(resolved, TARGET, "health.timeout", &health.timeout)?,
            "retries": health.retries
        });
        if let Some(start) = &health.start_period {
            health_block["start_period"] =
                json!(probe_seconds(resolved, TARGET, "health.start_period", start)?);
        }

        let mut workload = Map::new();
        workload.insert("image".into(), json!(contract.image.raw));
        if !contract.command.is_empty() {
            workload.insert("command".into(), json!(contract.command));
        }
        workload.insert("user".into(), json!(user_spec(resolved)));
        let security = &contract.security;
        workload.insert("read_only".into(), json!(security.read_only_root_filesystem));
        workload.insert("cap_drop".into(), json!(security.capabilities_drop));
        if !security.capabilities_add.is_empty() {
            workload.insert("cap_add".into(), json!(security.capabilities_add));
        }
        workload.insert("no_new_privileges".into(), json!(security.no_new_privileges));
        workload.insert("apparmor_profile".into(), json!(security.apparmor_profile));
        if let Some(seccomp) = &security.seccomp_profile {
            workload.insert("seccomp_profile".into(), json!(seccomp));
        }
        let environment: Map<String, Value> = process_environment(resolved, plan)
            .into_iter()
            .map(|(k, v)| (k, json!(v)))
            .collect();
        if !environment.is_empty() {
            workload.insert("environment".into(), Value::Object(environment));
        }
        if let Some(env) = &plan.env_file {
            let path = env
                .install_path
                .clone()
                .unwrap_or_else(|| env.staged_path.display().to_string());
            workload.insert("env_file".into(), json!(path));
        }
        if !contract.ports.is_empty() {
            let ports: Vec<Value> = contract
                .ports
                .iter()
                .map(|p| json!({"port": p.target, "protocol": p.protocol.as_str()}))
                .collect();
            workload.insert("ports".into(), json!(ports));
        }
        let tmpfs: Vec<String> = contract
            .mounts
            .ephemeral_for(TARGET)
            .into_iter()
            .map(tmpfs_spec)
            .collect();
        if !tmpfs.is_empty() {
            workload.insert("tmpfs".into(), json!(tmpfs));
        }
        if !plan.files.is_empty() {
            let files: Vec<Value> = plan
                .files
                .iter()
                .map(|f| json!({"name": f.name, "path": f.target, "mode": octal_mode(f.mode)}))
                .collect();
            workload.insert("secret_files".into(), json!(files));
        }
        workload.insert("health".into(), health_block);
        host.insert("workload".into(), Value::Object(workload));

        let document = Value::Object(host);
        let text = yaml_text(resolved, TARGET, std::slice::from_ref(&document))?;

        Ok(RenderedArtifact {
            service_id: contract.service_id.clone(),
            target: TARGET,
            text,
            document: ArtifactDocument::Yaml(vec![document]),
            metadata: ArtifactMetadata {
                address: ip.to_string(),
                file_name: format!("{}.lxc.yml", name),
                names,
                secret_installs: secret_installs(plan),
                health_cmd: health.cmd.clone(),
                rotation_marker: plan.rotation_timestamp.clone(),
            },
        })
    }
}
