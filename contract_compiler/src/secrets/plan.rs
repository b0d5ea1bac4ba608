//! Pure secrets planning
//!
//! A plan fixes every staged path and secret object name up front so a
//! rendered artifact never depends on what happens during staging.

use super::transport::{transport_profile, SecretTransport, TransportProfile};
use crate::contract::{RenderTarget, ResolvedContract};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_FILE_MODE: u32 = 0o400;
pub const ENV_FILE_MODE: u32 = 0o600;
pub const ENV_FILE_NAME: &str = "secrets.env";
pub const STORE_MANIFEST_NAME: &str = "secrets.yaml";
pub const FILES_DIR: &str = "files";

/// Env secrets written to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvFilePlan {
    pub staged_path: PathBuf,
    /// Where the apply step installs it, for rendered-config transports
    pub install_path: Option<String>,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePlan {
    pub name: String,
    pub staged_path: PathBuf,
    pub target: String,
    pub mode: u32,
}

/// Orchestrator Secret objects holding env and file material
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretStorePlan {
    pub env_secret_name: String,
    pub files_secret_name: String,
    pub manifest_path: PathBuf,
    pub env_keys: Vec<String>,
    pub files: Vec<StoreFile>,
}

/// One key of the files Secret and where the pod mounts it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreFile {
    pub key: String,
    pub target: String,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretsTransportPlan {
    pub service_id: String,
    pub target: RenderTarget,
    pub profile: TransportProfile,
    pub staging_dir: PathBuf,
    pub env_file: Option<EnvFilePlan>,
    pub files: Vec<FilePlan>,
    pub store: Option<SecretStorePlan>,
    pub rotation_timestamp: Option<String>,
    pub persist_after_apply: bool,
}

impl SecretsTransportPlan {
    pub fn is_empty(&self) -> bool {
        self.env_file.is_none() && self.files.is_empty() && self.store.is_none()
    }

    /// Every path materialization will write
    pub fn staged_paths(&self) -> Vec<&Path> {
        let mut paths: Vec<&Path> = Vec::new();
        if let Some(env) = &self.env_file {
            paths.push(&env.staged_path);
        }
        paths.extend(self.files.iter().map(|f| f.staged_path.as_path()));
        if let Some(store) = &self.store {
            paths.push(&store.manifest_path);
        }
        paths
    }
}

pub fn staging_dir(staging_root: &Path, service_id: &str, target: RenderTarget) -> PathBuf {
    staging_root.join(service_id).join(target.as_str())
}

pub fn plan(resolved: &ResolvedContract, target: RenderTarget, staging_root: &Path) -> SecretsTransportPlan {
    plan_with_mode(resolved, target, staging_root, DEFAULT_FILE_MODE)
}

/// As [`plan`], with the mode used for file secrets that declare none
pub fn plan_with_mode(
    resolved: &ResolvedContract,
    target: RenderTarget,
    staging_root: &Path,
    default_mode: u32,
) -> SecretsTransportPlan {
    let contract = &resolved.contract;
    let secrets = &contract.secrets;
    let profile = transport_profile(target);
    let dir = staging_dir(staging_root, &contract.service_id, target);

    let mut env_file = None;
    let mut files = Vec::new();
    let mut store = None;

    if !secrets.env.is_empty() {
        let names: Vec<String> = secrets.env.iter().map(|s| s.name.clone()).collect();
        match profile.env {
            SecretTransport::EnvInjection => {
                env_file = Some(EnvFilePlan {
                    staged_path: dir.join(ENV_FILE_NAME),
                    install_path: None,
                    names,
                });
            }
            SecretTransport::RenderedConfig => {
                env_file = Some(EnvFilePlan {
                    staged_path: dir.join(ENV_FILE_NAME),
                    install_path: Some(format!("/etc/{}/{}", contract.service_name, ENV_FILE_NAME)),
                    names,
                });
            }
            SecretTransport::SecretStoreSplit | SecretTransport::MountedFile => {}
        }
    }

    if !secrets.files.is_empty() && profile.files != SecretTransport::SecretStoreSplit {
        files = secrets
            .files
            .iter()
            .map(|secret| FilePlan {
                name: secret.name.clone(),
                staged_path: dir.join(FILES_DIR).join(&secret.name),
                target: secret.target.clone(),
                mode: secret.mode.unwrap_or(default_mode),
            })
            .collect();
    }

    let uses_store = profile.env == SecretTransport::SecretStoreSplit
        || profile.files == SecretTransport::SecretStoreSplit;
    if uses_store && !secrets.is_empty() {
        store = Some(SecretStorePlan {
            env_secret_name: format!("{}-env", contract.service_name),
            files_secret_name: format!("{}-files", contract.service_name),
            manifest_path: dir.join(STORE_MANIFEST_NAME),
            env_keys: secrets.env.iter().map(|s| s.name.clone()).collect(),
            files: secrets
                .files
                .iter()
                .map(|secret| StoreFile {
                    key: secret.name.clone(),
                    target: secret.target.clone(),
                    mode: secret.mode.unwrap_or(default_mode),
                })
                .collect(),
        });
    }

    SecretsTransportPlan {
        service_id: contract.service_id.clone(),
        target,
        profile,
        staging_dir: dir,
        env_file,
        files,
        store,
        rotation_timestamp: secrets.rotation_timestamp.clone(),
        persist_after_apply: secrets.is_shred_waived(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{EnvSecret, FileSecret};
    use crate::validation::{validate_document, ContractDocument};
    use serde_json::json;

    fn resolved_with_secrets() -> ResolvedContract {
        let mut contract = validate_document(&ContractDocument::new(
            "web.yml",
            json!({
                "service_id": "web",
                "service_name": "shop-web",
                "service_namespace": "shop",
                "runtime_templates": ["docker", "kubernetes", "proxmox", "baremetal"],
                "image": "registry/x:1.0",
                "health": {"cmd": ["true"]}
            }),
        ))
        .unwrap();
        contract.secrets.env.push(EnvSecret {
            name: "DB_PASSWORD".to_string(),
            value: "hunter2".to_string(),
        });
        contract.secrets.files.push(FileSecret {
            name: "tls.key".to_string(),
            target: "/etc/tls/tls.key".to_string(),
            value: "KEY".to_string(),
            mode: None,
        });
        contract.secrets.rotation_timestamp = Some("r1".to_string());
        ResolvedContract::standalone(contract)
    }

    #[test]
    fn test_plan_paths_are_deterministic() {
        let resolved = resolved_with_secrets();
        let root = Path::new("/run/contracts");
        let a = plan(&resolved, RenderTarget::ContainerCompose, root);
        let b = plan(&resolved, RenderTarget::ContainerCompose, root);
        assert_eq!(a, b);
        assert_eq!(a.staging_dir, PathBuf::from("/run/contracts/web/container-compose"));
        assert_eq!(
            a.env_file.as_ref().unwrap().staged_path,
            PathBuf::from("/run/contracts/web/container-compose/secrets.env")
        );
        assert_eq!(
            a.files[0].staged_path,
            PathBuf::from("/run/contracts/web/container-compose/files/tls.key")
        );
        assert_eq!(a.files[0].mode, DEFAULT_FILE_MODE);
        assert!(a.store.is_none());
        assert_eq!(a.rotation_timestamp.as_deref(), Some("r1"));
    }

    #[test]
    fn test_plan_secret_store_names() {
        let plan = plan(&resolved_with_secrets(), RenderTarget::OrchestratorManifest, Path::new("/s"));
        let store = plan.store.as_ref().unwrap();
        assert_eq!(store.env_secret_name, "shop-web-env");
        assert_eq!(store.files_secret_name, "shop-web-files");
        assert_eq!(store.files[0].key, "tls.key");
        assert!(plan.env_file.is_none());
        assert!(plan.files.is_empty());
        assert_eq!(plan.staged_paths(), vec![Path::new("/s/web/orchestrator-manifest/secrets.yaml")]);
    }

    #[test]
    fn test_plan_rendered_config_install_path() {
        let plan = plan_with_mode(&resolved_with_secrets(), RenderTarget::HypervisorContainer, Path::new("/s"), 0o440);
        let env = plan.env_file.as_ref().unwrap();
        assert_eq!(env.install_path.as_deref(), Some("/etc/shop-web/secrets.env"));
        assert_eq!(plan.files[0].mode, 0o440);

        let host = plan_with_mode(&resolved_with_secrets(), RenderTarget::HostInitUnit, Path::new("/s"), 0o400);
        assert!(host.env_file.as_ref().unwrap().install_path.is_none());
        assert_eq!(host.files.len(), 1);
    }

    #[test]
    fn test_plan_without_secrets_is_empty() {
        let mut resolved = resolved_with_secrets();
        resolved.contract.secrets = Default::default();
        for target in RenderTarget::ALL {
            assert!(plan(&resolved, target, Path::new("/s")).is_empty());
        }
    }
}
