//! Staging and shredding of secret material
//!
//! [`StagedSecrets`] owns everything written for one (service, target)
//! pair. Dropping it while still staged shreds the files.

use super::error::SecretsError;
use super::plan::{SecretsTransportPlan, ENV_FILE_MODE, FILES_DIR};
use super::store::{env_file_contents, secret_store_manifest};
use crate::contract::{RenderTarget, ResolvedContract};
use crate::logging::codes;
use crate::{log_debug, log_success};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingState {
    Staged,
    Shredded,
    Persisted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShredReport {
    pub service_id: String,
    pub target: RenderTarget,
    pub files_shredded: usize,
    pub bytes_overwritten: u64,
    pub persisted: bool,
}

#[derive(Debug)]
pub struct StagedSecrets {
    service_id: String,
    target: RenderTarget,
    dir: PathBuf,
    files: Vec<PathBuf>,
    persist_after_apply: bool,
    state: StagingState,
}

impl StagedSecrets {
    fn new(plan: &SecretsTransportPlan) -> Self {
        Self {
            service_id: plan.service_id.clone(),
            target: plan.target,
            dir: plan.staging_dir.clone(),
            files: Vec::new(),
            persist_after_apply: plan.persist_after_apply,
            state: StagingState::Staged,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn target(&self) -> RenderTarget {
        self.target
    }

    pub fn staging_dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn state(&self) -> StagingState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Called once the apply step has consumed the material
    pub fn complete_apply(mut self) -> Result<ShredReport, SecretsError> {
        if self.persist_after_apply {
            self.state = StagingState::Persisted;
            log_success!(codes::success::SECRETS_PERSISTED, "Staged secrets persisted under waiver",
                "service_id" => self.service_id.as_str(),
                "target" => self.target,
                "files" => self.files.len());
            return Ok(ShredReport {
                service_id: self.service_id.clone(),
                target: self.target,
                files_shredded: 0,
                bytes_overwritten: 0,
                persisted: true,
            });
        }
        self.shred()
    }

    /// Overwrite, sync and unlink every staged file, then remove the directory
    pub fn shred(&mut self) -> Result<ShredReport, SecretsError> {
        let mut failed = Vec::new();
        let mut files_shredded = 0;
        let mut bytes_overwritten = 0;

        for path in &self.files {
            match shred_file(path) {
                Ok(Some(bytes)) => {
                    files_shredded += 1;
                    bytes_overwritten += bytes;
                }
                Ok(None) => {}
                Err(_) => failed.push(path.clone()),
            }
        }

        if !failed.is_empty() {
            return Err(SecretsError::ShredFailed {
                service_id: self.service_id.clone(),
                target: self.target,
                paths: failed,
            });
        }

        remove_dir_if_present(&self.dir.join(FILES_DIR));
        remove_dir_if_present(&self.dir);
        // The per-service directory is shared between targets
        if let Some(parent) = self.dir.parent() {
            let _ = fs::remove_dir(parent);
        }

        self.state = StagingState::Shredded;
        log_success!(codes::success::SECRETS_SHREDDED, "Staged secrets shredded",
            "service_id" => self.service_id.as_str(),
            "target" => self.target,
            "files" => files_shredded);

        Ok(ShredReport {
            service_id: self.service_id.clone(),
            target: self.target,
            files_shredded,
            bytes_overwritten,
            persisted: false,
        })
    }
}

impl Drop for StagedSecrets {
    fn drop(&mut self) {
        if self.state != StagingState::Staged {
            return;
        }
        if let Err(error) = self.shred() {
            crate::logging::safe_log_critical(error.error_code(), &error.to_string());
        }
    }
}

/// Overwritten byte count, or `None` when the file is already gone
fn shred_file(path: &Path) -> io::Result<Option<u64>> {
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    // Staged files are usually read-only for their owner
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    let mut file = OpenOptions::new().write(true).open(path)?;
    let zeros = [0u8; 4096];
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(zeros.len() as u64) as usize;
        file.write_all(&zeros[..chunk])?;
        remaining -= chunk as u64;
    }
    file.sync_all()?;
    drop(file);
    fs::remove_file(path)?;
    Ok(Some(len))
}

fn remove_dir_if_present(dir: &Path) {
    if let Err(e) = fs::remove_dir(dir) {
        if e.kind() != io::ErrorKind::NotFound {
            log_debug!("Staging directory not removed",
                "path" => dir.display(),
                "reason" => e);
        }
    }
}

fn create_private_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

fn write_private_file(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let file = options.open(path)?;
    fill_or_shred(file, path, contents, mode)
}

/// Write and sync an opened file; any failure shreds what reached the disk
fn fill_or_shred(mut file: File, path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let written = file
        .write_all(contents)
        .and_then(|()| file.sync_all())
        .and_then(|()| set_private_mode(path, mode));
    if let Err(error) = written {
        drop(file);
        if shred_file(path).is_err() {
            let _ = fs::remove_file(path);
        }
        return Err(error);
    }
    Ok(())
}

// `mode` on open only applies to new files
#[cfg(unix)]
fn set_private_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_private_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Writes staged material described by a plan
#[derive(Debug, Clone, Default)]
pub struct SecretsManager;

impl SecretsManager {
    pub fn new() -> Self {
        Self
    }

    pub fn materialize(
        &self,
        plan: &SecretsTransportPlan,
        resolved: &ResolvedContract,
    ) -> Result<StagedSecrets, SecretsError> {
        // A partially written guard shreds what it holds when this returns early
        let mut staged = StagedSecrets::new(plan);
        if plan.is_empty() {
            staged.state = StagingState::Shredded;
            return Ok(staged);
        }

        let contract = &resolved.contract;
        let staging_error = |path: &Path, source: io::Error| SecretsError::Staging {
            service_id: plan.service_id.clone(),
            target: plan.target,
            path: path.to_path_buf(),
            source,
        };

        create_private_dir(&plan.staging_dir).map_err(|e| staging_error(&plan.staging_dir, e))?;

        if let Some(env) = &plan.env_file {
            let contents = env_file_contents(
                contract
                    .secrets
                    .env
                    .iter()
                    .map(|s| (s.name.as_str(), s.value.as_str())),
            );
            write_private_file(&env.staged_path, contents.as_bytes(), ENV_FILE_MODE)
                .map_err(|e| staging_error(&env.staged_path, e))?;
            staged.files.push(env.staged_path.clone());
        }

        if !plan.files.is_empty() {
            let files_dir = plan.staging_dir.join(FILES_DIR);
            create_private_dir(&files_dir).map_err(|e| staging_error(&files_dir, e))?;
        }
        for file in &plan.files {
            let value = contract
                .secrets
                .files
                .iter()
                .find(|s| s.name == file.name)
                .map(|s| s.value.as_str())
                .unwrap_or_default();
            write_private_file(&file.staged_path, value.as_bytes(), file.mode)
                .map_err(|e| staging_error(&file.staged_path, e))?;
            staged.files.push(file.staged_path.clone());
        }

        if let Some(store) = &plan.store {
            let manifest = secret_store_manifest(store, contract).map_err(|e| SecretsError::Encoding {
                service_id: plan.service_id.clone(),
                target: plan.target,
                message: e.to_string(),
            })?;
            write_private_file(&store.manifest_path, manifest.as_bytes(), ENV_FILE_MODE)
                .map_err(|e| staging_error(&store.manifest_path, e))?;
            staged.files.push(store.manifest_path.clone());
        }

        log_success!(codes::success::SECRETS_STAGED, "Secrets staged",
            "service_id" => plan.service_id.as_str(),
            "target" => plan.target,
            "files" => staged.files.len());
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{EnvSecret, FileSecret};
    use crate::secrets::plan::plan;
    use crate::validation::{validate_document, ContractDocument};
    use assert_matches::assert_matches;
    use serde_json::json;
    use tempfile::tempdir;

    fn resolved(shred_after_apply: bool) -> ResolvedContract {
        let mut contract = validate_document(&ContractDocument::new(
            "web.yml",
            json!({
                "service_id": "web",
                "service_namespace": "shop",
                "runtime_templates": ["docker", "kubernetes"],
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
            value: "PRIVATE KEY".to_string(),
            mode: Some(0o440),
        });
        if !shred_after_apply {
            contract.secrets.shred_after_apply = false;
            contract.secrets.shred_waiver_reason = Some("sidecar reloads from disk".to_string());
        }
        ResolvedContract::standalone(contract)
    }

    #[test]
    fn test_materialize_and_complete_apply_shreds() {
        let _ = crate::logging::init_global_logging();
        let root = tempdir().unwrap();
        let resolved = resolved(true);
        let plan = plan(&resolved, RenderTarget::ContainerCompose, root.path());

        let staged = SecretsManager::new().materialize(&plan, &resolved).unwrap();
        assert_eq!(staged.files().len(), 2);
        let env_text = fs::read_to_string(&staged.files()[0]).unwrap();
        assert_eq!(env_text, "DB_PASSWORD=hunter2\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&staged.files()[1]).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o440);
        }

        let files: Vec<PathBuf> = staged.files().to_vec();
        let report = staged.complete_apply().unwrap();
        assert_eq!(report.files_shredded, 2);
        assert_eq!(report.bytes_overwritten, ("DB_PASSWORD=hunter2\n".len() + "PRIVATE KEY".len()) as u64);
        assert!(!report.persisted);
        assert!(files.iter().all(|f| !f.exists()));
        assert!(!root.path().join("web").exists());
    }

    #[test]
    fn test_drop_shreds_staged_material() {
        let _ = crate::logging::init_global_logging();
        let root = tempdir().unwrap();
        let resolved = resolved(true);
        let plan = plan(&resolved, RenderTarget::OrchestratorManifest, root.path());

        let staged = SecretsManager::new().materialize(&plan, &resolved).unwrap();
        let manifest = staged.files()[0].clone();
        let text = fs::read_to_string(&manifest).unwrap();
        assert!(text.contains("name: web-env"));
        assert!(text.contains("name: web-files"));
        assert!(!text.contains("hunter2"));

        drop(staged);
        assert!(!manifest.exists());
    }

    #[test]
    fn test_waiver_persists_files() {
        let _ = crate::logging::init_global_logging();
        let root = tempdir().unwrap();
        let resolved = resolved(false);
        let plan = plan(&resolved, RenderTarget::ContainerCompose, root.path());

        let staged = SecretsManager::new().materialize(&plan, &resolved).unwrap();
        let files: Vec<PathBuf> = staged.files().to_vec();
        let report = staged.complete_apply().unwrap();
        assert!(report.persisted);
        assert!(files.iter().all(|f| f.exists()));
    }

    #[test]
    fn test_staging_failure_is_reported() {
        let _ = crate::logging::init_global_logging();
        let root = tempdir().unwrap();
        let blocker = root.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let resolved = resolved(true);
        let plan = plan(&resolved, RenderTarget::ContainerCompose, &blocker);

        assert_matches!(
            SecretsManager::new().materialize(&plan, &resolved),
            Err(SecretsError::Staging { .. })
        );
    }

    #[test]
    fn test_shred_skips_files_already_removed() {
        let _ = crate::logging::init_global_logging();
        let root = tempdir().unwrap();
        let resolved = resolved(true);
        let plan = plan(&resolved, RenderTarget::ContainerCompose, root.path());

        let mut staged = SecretsManager::new().materialize(&plan, &resolved).unwrap();
        fs::remove_file(&staged.files()[0]).unwrap();
        let report = staged.shred().unwrap();
        assert_eq!(report.files_shredded, 1);
        assert_eq!(staged.state(), StagingState::Shredded);
    }

    #[test]
    fn test_failed_write_leaves_no_plaintext() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.env");
        fs::write(&path, "DB_PASSWORD=hunter2\n").unwrap();

        // A read-only handle makes the write fail after the file exists
        let handle = File::open(&path).unwrap();
        assert!(fill_or_shred(handle, &path, b"DB_PASSWORD=hunter2\n", ENV_FILE_MODE).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_midway_failure_shreds_earlier_files() {
        let _ = crate::logging::init_global_logging();
        let root = tempdir().unwrap();
        let resolved = resolved(true);
        let plan = plan(&resolved, RenderTarget::ContainerCompose, root.path());

        // A regular file where the file-secret directory goes
        fs::create_dir_all(&plan.staging_dir).unwrap();
        fs::write(plan.staging_dir.join(FILES_DIR), "blocker").unwrap();

        assert_matches!(
            SecretsManager::new().materialize(&plan, &resolved),
            Err(SecretsError::Staging { .. })
        );
        let env_path = &plan.env_file.as_ref().unwrap().staged_path;
        assert!(!env_path.exists());
    }
}
