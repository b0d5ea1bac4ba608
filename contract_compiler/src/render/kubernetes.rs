//! Orchestrator manifest: PersistentVolumeClaims, a Deployment and a Service

use super::common::{cores_kubernetes, memory_kubernetes, probe_seconds, secret_installs, size_gib, yaml_text};
use super::error::RenderError;
use super::types::{ArtifactDocument, ArtifactMetadata, RenderedArtifact};
use super::BackendRenderer;
use crate::contract::{RenderTarget, ResolvedContract, UserNamespaceMode};
use crate::secrets::{SecretsTransportPlan, ROTATION_ANNOTATION};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

const TARGET: RenderTarget = RenderTarget::OrchestratorManifest;

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_CLAIM_GIB: u64 = 1;
const SECRET_FILES_VOLUME: &str = "secret-files";
const SECRET_ENV_VOLUME: &str = "secret-env";
/// One file per key of the `-env` Secret
pub const SECRET_ENV_MOUNT: &str = "/run/secrets/env";

#[derive(Debug, Clone, Copy, Default)]
pub struct KubernetesRenderer;

fn labels(name: &str) -> Value {
    json!({ NAME_LABEL: name, MANAGED_BY_LABEL: "contractc" })
}

fn object_meta(name: &str, namespace: &str, app: &str) -> Value {
    json!({"name": name, "namespace": namespace, "labels": labels(app)})
}

fn claim(name: &str, namespace: &str, app: &str, gib: u64) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": object_meta(name, namespace, app),
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "resources": {"requests": {"storage": format!("{}Gi", gib)}}
        }
    })
}

/// `seccompProfile` / `appArmorProfile` object from a profile name
fn profile_object(profile: &str) -> Value {
    match profile {
        "unconfined" | "Unconfined" => json!({"type": "Unconfined"}),
        "docker-default" | "runtime/default" | "RuntimeDefault" => json!({"type": "RuntimeDefault"}),
        local => json!({"type": "Localhost", "localhostProfile": local}),
    }
}

struct PodVolumes {
    volumes: Vec<Value>,
    mounts: Vec<Value>,
    seen: BTreeSet<String>,
}

impl PodVolumes {
    fn add(
        &mut self,
        resolved: &ResolvedContract,
        name: &str,
        source: Value,
    ) -> Result<(), RenderError> {
        if !self.seen.insert(name.to_string()) {
            return Err(RenderError::incompatible(
                resolved.service_id(),
                TARGET,
                "volumes",
                format!("pod volume name '{}' is used twice", name),
            ));
        }
        let mut volume = Map::new();
        volume.insert("name".into(), json!(name));
        if let Value::Object(source) = source {
            volume.extend(source);
        }
        self.volumes.push(Value::Object(volume));
        Ok(())
    }

    fn mount(&mut self, mount: Value) {
        self.mounts.push(mount);
    }
}

fn probe(resolved: &ResolvedContract) -> Result<Value, RenderError> {
    let health = &resolved.contract.health;
    let mut probe = json!({
        "exec": {"command": health.cmd},
        "periodSeconds": probe_seconds(resolved, TARGET, "health.interval", &health.interval)?,
        "timeoutSeconds": probe_seconds(resolved, TARGET, "health.timeout", &health.timeout)?,
        "failureThreshold": health.retries
    });
    if let Some(start) = &health.start_period {
        probe["initialDelaySeconds"] = json!(probe_seconds(resolved, TARGET, "health.start_period", start)?);
    }
    Ok(probe)
}

impl BackendRenderer for KubernetesRenderer {
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
        let namespace = contract.service_namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
        let mut names = BTreeMap::new();
        let mut documents = Vec::new();
        let mut pod = PodVolumes {
            volumes: Vec::new(),
            mounts: Vec::new(),
            seen: BTreeSet::new(),
        };

        for volume in &contract.volumes {
            match &volume.host_path {
                Some(host_path) => {
                    let mut source = json!({"path": host_path});
                    if let Some(kind) = volume.host_path_type {
                        source["type"] = json!(kind.as_str());
                    }
                    pod.add(resolved, &volume.name, json!({"hostPath": source}))?;
                }
                None => {
                    let claim_name = format!("{}-{}", name, volume.name);
                    documents.push(claim(&claim_name, namespace, name, DEFAULT_CLAIM_GIB));
                    names.insert(format!("pvc.{}", volume.name), claim_name.clone());
                    pod.add(
                        resolved,
                        &volume.name,
                        json!({"persistentVolumeClaim": {"claimName": claim_name}}),
                    )?;
                }
            }
            pod.mount(json!({
                "name": volume.name,
                "mountPath": volume.target,
                "readOnly": volume.read_only
            }));
        }
        for volume in contract.mounts.persistent_for(TARGET) {
            let claim_name = format!("{}-{}", name, volume.name);
            let gib = size_gib(volume.size.as_deref(), DEFAULT_CLAIM_GIB);
            documents.push(claim(&claim_name, namespace, name, gib));
            names.insert(format!("pvc.{}", volume.name), claim_name.clone());
            pod.add(
                resolved,
                &volume.name,
                json!({"persistentVolumeClaim": {"claimName": claim_name}}),
            )?;
            pod.mount(json!({"name": volume.name, "mountPath": volume.target}));
        }
        for (i, mount) in contract.mounts.ephemeral_for(TARGET).into_iter().enumerate() {
            let volume_name = mount.name.clone().unwrap_or_else(|| format!("ephemeral-{}", i));
            let mut empty_dir = Map::new();
            if mount.is_memory_backed() {
                empty_dir.insert("medium".into(), json!("Memory"));
            }
            if let Some(size) = &mount.size {
                empty_dir.insert("sizeLimit".into(), json!(size));
            }
            pod.add(resolved, &volume_name, json!({"emptyDir": Value::Object(empty_dir)}))?;
            pod.mount(json!({
                "name": volume_name,
                "mountPath": mount.path,
                "readOnly": mount.read_only
            }));
        }

        if let Some(store) = &plan.store {
            if !store.env_keys.is_empty() {
                names.insert("secret.env".to_string(), store.env_secret_name.clone());
                pod.add(
                    resolved,
                    SECRET_ENV_VOLUME,
                    json!({"secret": {"secretName": store.env_secret_name}}),
                )?;
                pod.mount(json!({
                    "name": SECRET_ENV_VOLUME,
                    "mountPath": SECRET_ENV_MOUNT,
                    "readOnly": true
                }));
            }
            if !store.files.is_empty() {
                names.insert("secret.files".to_string(), store.files_secret_name.clone());
                let items: Vec<Value> = store
                    .files
                    .iter()
                    .map(|f| json!({"key": f.key, "path": f.key, "mode": f.mode}))
                    .collect();
                pod.add(
                    resolved,
                    SECRET_FILES_VOLUME,
                    json!({"secret": {"secretName": store.files_secret_name, "items": items}}),
                )?;
                for file in &store.files {
                    pod.mount(json!({
                        "name": SECRET_FILES_VOLUME,
                        "mountPath": file.target,
                        "subPath": file.key,
                        "readOnly": true
                    }));
                }
            }
        }

        let mut container = Map::new();
        container.insert("name".into(), json!(name));
        container.insert("image".into(), json!(contract.image.raw));
        if !contract.command.is_empty() {
            container.insert("command".into(), json!(contract.command));
        }
        if !contract.ports.is_empty() {
            let ports: Vec<Value> = contract
                .ports
                .iter()
                .map(|p| json!({"containerPort": p.target, "protocol": p.protocol.as_str().to_ascii_uppercase()}))
                .collect();
            container.insert("ports".into(), json!(ports));
        }
        if !resolved.environment.is_empty() {
            let env: Vec<Value> = resolved
                .environment
                .iter()
                .map(|var| json!({"name": var.name, "value": var.value}))
                .collect();
            container.insert("env".into(), json!(env));
        }
        let quantity = json!({
            "memory": memory_kubernetes(contract.resources.memory_mb),
            "cpu": cores_kubernetes(contract.resources.cpu_cores)
        });
        container.insert("resources".into(), json!({"limits": quantity, "requests": quantity}));

        let mut container_security = json!({
            "readOnlyRootFilesystem": security.read_only_root_filesystem,
            "allowPrivilegeEscalation": security.allow_privilege_escalation,
            "capabilities": {"drop": security.capabilities_drop},
            "appArmorProfile": profile_object(&security.apparmor_profile)
        });
        if !security.capabilities_add.is_empty() {
            container_security["capabilities"]["add"] = json!(security.capabilities_add);
        }
        container.insert("securityContext".into(), container_security);
        let probe = probe(resolved)?;
        container.insert("livenessProbe".into(), probe.clone());
        container.insert("readinessProbe".into(), probe);
        if !pod.mounts.is_empty() {
            container.insert("volumeMounts".into(), json!(pod.mounts));
        }

        let mut pod_spec = Map::new();
        match security.user_namespace {
            None => {}
            Some(UserNamespaceMode::Host) => {
                pod_spec.insert("hostUsers".into(), json!(true));
            }
            Some(UserNamespaceMode::Private | UserNamespaceMode::Auto) => {
                pod_spec.insert("hostUsers".into(), json!(false));
            }
            Some(UserNamespaceMode::KeepId) => {
                return Err(RenderError::incompatible(
                    &contract.service_id,
                    TARGET,
                    "security.user_namespace",
                    "pods cannot keep the caller's user id",
                ));
            }
        }
        pod_spec.insert(
            "securityContext".into(),
            json!({
                "runAsUser": security.run_as_user,
                "runAsGroup": security.run_as_group,
                "runAsNonRoot": security.run_as_user != 0,
                "seccompProfile": profile_object(security.seccomp_profile.as_deref().unwrap_or("RuntimeDefault"))
            }),
        );
        pod_spec.insert("containers".into(), json!([Value::Object(container)]));
        if !pod.volumes.is_empty() {
            pod_spec.insert("volumes".into(), json!(pod.volumes));
        }

        let mut template_meta = json!({"labels": {NAME_LABEL: name}});
        if let Some(rotation) = &plan.rotation_timestamp {
            template_meta["annotations"] = json!({ ROTATION_ANNOTATION: rotation });
        }
        names.insert("deployment".to_string(), name.to_string());
        documents.push(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": object_meta(name, namespace, name),
            "spec": {
                "replicas": 1,
                "selector": {"matchLabels": {NAME_LABEL: name}},
                "template": {"metadata": template_meta, "spec": Value::Object(pod_spec)}
            }
        }));

        if !contract.ports.is_empty() {
            let ports: Vec<Value> = contract
                .ports
                .iter()
                .map(|p| {
                    json!({
                        "name": format!("{}-{}", p.protocol.as_str(), p.target),
                        "port": p.published,
                        "targetPort": p.target,
                        "protocol": p.protocol.as_str().to_ascii_uppercase()
                    })
                })
                .collect();
            names.insert("service".to_string(), name.to_string());
            documents.push(json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": object_meta(name, namespace, name),
                "spec": {"selector": {NAME_LABEL: name}, "ports": ports}
            }));
        }

        let text = yaml_text(resolved, TARGET, &documents)?;
        let address = contract
            .address
            .clone()
            .unwrap_or_else(|| format!("{}.{}.svc.cluster.local", name, namespace));

        Ok(RenderedArtifact {
            service_id: contract.service_id.clone(),
            target: TARGET,
            text,
            document: ArtifactDocument::Yaml(documents),
            metadata: ArtifactMetadata {
                address,
                file_name: format!("{}.yaml", name),
                names,
                secret_installs: secret_installs(plan),
                health_cmd: contract.health.cmd.clone(),
                rotation_marker: plan.rotation_timestamp.clone(),
            },
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
        KubernetesRenderer.render(resolved, &fixtures::plan_for(resolved, TARGET))
    }

    fn kind<'a>(artifact: &'a RenderedArtifact, kind: &str) -> Vec<&'a Value> {
        artifact
            .document
            .yaml_documents()
            .iter()
            .filter(|doc| doc["kind"] == kind)
            .collect()
    }

    #[test]
    fn test_deployment_and_service() {
        let artifact = render(&fixtures::resolved(json!({}))).unwrap();
        let deployment = kind(&artifact, "Deployment")[0];
        let pod = &deployment["spec"]["template"]["spec"];
        let container = &pod["containers"][0];

        assert_eq!(deployment["metadata"]["namespace"], "shop");
        assert_eq!(container["image"], format!("registry/x@{}", fixtures::DIGEST));
        assert_eq!(container["resources"]["limits"]["memory"], "512Mi");
        assert_eq!(container["resources"]["limits"]["cpu"], "1");
        assert_eq!(container["securityContext"]["readOnlyRootFilesystem"], true);
        assert_eq!(container["securityContext"]["capabilities"]["drop"], json!(["ALL"]));
        assert_eq!(container["livenessProbe"]["exec"]["command"], json!(["/bin/sh", "-c", "exit 0"]));
        assert_eq!(container["livenessProbe"]["periodSeconds"], 10);
        assert_eq!(pod["securityContext"]["runAsNonRoot"], true);
        assert!(deployment["spec"]["template"]["metadata"].get("annotations").is_none());

        let service = kind(&artifact, "Service")[0];
        assert_eq!(service["spec"]["ports"][0]["port"], 8080);
        assert_eq!(artifact.metadata.address, "web.shop.svc.cluster.local");
        assert!(artifact.text.starts_with("---\napiVersion: apps/v1\n"));
    }

    #[test]
    fn test_secrets_come_from_secret_objects() {
        let resolved = fixtures::with_secrets(fixtures::resolved(json!({})), Some("2024-05-01T00:00:00Z"));
        let artifact = render(&resolved).unwrap();
        let deployments = kind(&artifact, "Deployment");
        let template = &deployments[0]["spec"]["template"];
        let container = &template["spec"]["containers"][0];

        assert_eq!(template["metadata"]["annotations"][ROTATION_ANNOTATION], "2024-05-01T00:00:00Z");
        assert!(container.get("envFrom").is_none());
        assert!(container.get("env").is_none());
        assert_eq!(
            container["volumeMounts"],
            json!([
                {"name": "secret-env", "mountPath": SECRET_ENV_MOUNT, "readOnly": true},
                {"name": "secret-files", "mountPath": "/etc/tls/tls.key", "subPath": "tls.key", "readOnly": true}
            ])
        );
        assert_eq!(template["spec"]["volumes"][0]["secret"]["secretName"], "web-env");
        assert_eq!(template["spec"]["volumes"][1]["secret"]["secretName"], "web-files");
        assert_eq!(artifact.metadata.names["secret.env"], "web-env");
        assert_eq!(artifact.metadata.names["secret.files"], "web-files");
    }

    #[test]
    fn test_volumes_map_to_claims_host_paths_and_empty_dirs() {
        let artifact = render(&fixtures::resolved(json!({
            "volumes": [
                {"name": "data", "target": "/var/lib/web"},
                {"name": "logs", "host_path": "/var/log/web", "host_path_type": "DirectoryOrCreate", "target": "/logs"}
            ],
            "mounts": {"ephemeral_mounts": [{"name": "scratch", "path": "/tmp", "size": "64Mi"}]}
        })))
        .unwrap();
        let claims = kind(&artifact, "PersistentVolumeClaim");
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0]["metadata"]["name"], "web-data");

        let deployments = kind(&artifact, "Deployment");
        let volumes = &deployments[0]["spec"]["template"]["spec"]["volumes"];
        assert_eq!(volumes[0], json!({"name": "data", "persistentVolumeClaim": {"claimName": "web-data"}}));
        assert_eq!(
            volumes[1],
            json!({"name": "logs", "hostPath": {"path": "/var/log/web", "type": "DirectoryOrCreate"}})
        );
        assert_eq!(volumes[2], json!({"name": "scratch", "emptyDir": {"medium": "Memory", "sizeLimit": "64Mi"}}));
    }

    #[test]
    fn test_duplicate_pod_volume_name_fails() {
        let resolved = fixtures::resolved(json!({
            "volumes": [{"name": "scratch", "target": "/data"}],
            "mounts": {"ephemeral_mounts": [{"name": "scratch", "path": "/tmp"}]}
        }));
        assert_matches!(
            render(&resolved),
            Err(RenderError::IncompatibleField { message, .. }) if message.contains("'scratch'")
        );
    }

    #[test]
    fn test_keep_id_is_incompatible() {
        let resolved = fixtures::resolved(json!({"security": {"user_namespace": "keep-id"}}));
        assert_matches!(render(&resolved), Err(RenderError::IncompatibleField { .. }));
        let private = fixtures::resolved(json!({"security": {"user_namespace": "private"}}));
        let artifact = render(&private).unwrap();
        assert_eq!(
            kind(&artifact, "Deployment")[0]["spec"]["template"]["spec"]["hostUsers"],
            false
        );
    }
}
