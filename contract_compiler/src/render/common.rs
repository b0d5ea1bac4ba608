//! Helpers shared by the backend renderers

use super::error::RenderError;
use super::types::SecretInstall;
use crate::contract::{duration_seconds, EphemeralMount, RenderTarget, ResolvedContract};
use crate::secrets::{SecretsTransportPlan, ROTATION_ENV_VAR};
use serde_json::Value;

pub(crate) fn memory_compose(mb: u32) -> String {
    format!("{}m", mb)
}

pub(crate) fn memory_kubernetes(mb: u32) -> String {
    format!("{}Mi", mb)
}

pub(crate) fn memory_systemd(mb: u32) -> String {
    format!("{}M", mb)
}

/// `1`, `0.5`: fractional cores in decimal form
pub(crate) fn cores_decimal(cores: f64) -> String {
    let rounded = (cores * 1000.0).round() / 1000.0;
    format!("{}", rounded)
}

/// Whole cores as `2`, fractions in millicores as `500m`
pub(crate) fn cores_kubernetes(cores: f64) -> String {
    let millis = (cores * 1000.0).round() as u64;
    if millis % 1000 == 0 {
        (millis / 1000).to_string()
    } else {
        format!("{}m", millis)
    }
}

pub(crate) fn cpu_quota_percent(cores: f64) -> String {
    format!("{}%", (cores * 100.0).round() as u64)
}

pub(crate) fn user_spec(resolved: &ResolvedContract) -> String {
    let security = &resolved.contract.security;
    format!("{}:{}", security.run_as_user, security.run_as_group)
}

/// Non-secret environment plus the rotation variable when set
pub(crate) fn process_environment(
    resolved: &ResolvedContract,
    plan: &SecretsTransportPlan,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = resolved
        .environment
        .iter()
        .map(|var| (var.name.clone(), var.value.clone()))
        .collect();
    if let Some(rotation) = &plan.rotation_timestamp {
        env.retain(|(name, _)| name != ROTATION_ENV_VAR);
        env.push((ROTATION_ENV_VAR.to_string(), rotation.clone()));
    }
    env
}

pub(crate) fn probe_seconds(
    resolved: &ResolvedContract,
    target: RenderTarget,
    field: &str,
    value: &str,
) -> Result<u64, RenderError> {
    duration_seconds(value).ok_or_else(|| {
        RenderError::incompatible(
            resolved.service_id(),
            target,
            field,
            format!("'{}' is not a duration", value),
        )
    })
}

/// `size=64m,mode=1777[,ro]` option list of a tmpfs mount
pub(crate) fn tmpfs_options(mount: &EphemeralMount) -> String {
    let mut options = Vec::new();
    if let Some(size) = &mount.size {
        options.push(format!("size={}", size));
    }
    if let Some(mode) = &mount.mode {
        options.push(format!("mode={}", mode));
    }
    if mount.read_only {
        options.push("ro".to_string());
    }
    options.join(",")
}

pub(crate) fn tmpfs_spec(mount: &EphemeralMount) -> String {
    let options = tmpfs_options(mount);
    if options.is_empty() {
        mount.path.clone()
    } else {
        format!("{}:{}", mount.path, options)
    }
}

/// Whole GiB from sizes such as `10Gi`, `10G`, `512Mi` or `10`
pub(crate) fn size_gib(size: Option<&str>, default: u64) -> u64 {
    let Some(raw) = size.map(str::trim).filter(|s| !s.is_empty()) else {
        return default;
    };
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let Ok(amount) = raw[..split].parse::<u64>() else {
        return default;
    };
    match raw[split..].to_ascii_lowercase().as_str() {
        "" | "g" | "gi" | "gb" => amount.max(1),
        "t" | "ti" | "tb" => amount * 1024,
        "m" | "mi" | "mb" => amount.div_ceil(1024).max(1),
        _ => default,
    }
}

/// Join argv for unit files, double-quoting arguments that need it
pub(crate) fn command_line(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            let plain = !arg.is_empty()
                && arg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
            if plain {
                arg.clone()
            } else {
                format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `KEY=value` for unit `Environment=`, quoted as a whole when needed
pub(crate) fn env_assignment(name: &str, value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| !c.is_whitespace() && !matches!(c, '"' | '\'' | '\\' | '%' | '$'));
    if plain {
        format!("{}={}", name, value)
    } else {
        let escaped = value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('%', "%%")
            .replace('$', "$$");
        format!("\"{}={}\"", name, escaped)
    }
}

pub(crate) fn octal_mode(mode: u32) -> String {
    format!("{:04o}", mode)
}

pub(crate) fn secret_installs(plan: &SecretsTransportPlan) -> Vec<SecretInstall> {
    let mut installs = Vec::new();
    if let Some(env) = &plan.env_file {
        installs.push(SecretInstall {
            name: "environment".to_string(),
            source: env.staged_path.clone(),
            destination: env
                .install_path
                .clone()
                .unwrap_or_else(|| env.staged_path.display().to_string()),
            mode: octal_mode(crate::secrets::plan::ENV_FILE_MODE),
            transport: plan.profile.env,
        });
    }
    for file in &plan.files {
        installs.push(SecretInstall {
            name: file.name.clone(),
            source: file.staged_path.clone(),
            destination: file.target.clone(),
            mode: octal_mode(file.mode),
            transport: plan.profile.files,
        });
    }
    if let Some(store) = &plan.store {
        for (name, has_data) in [
            (&store.env_secret_name, !store.env_keys.is_empty()),
            (&store.files_secret_name, !store.files.is_empty()),
        ] {
            if has_data {
                installs.push(SecretInstall {
                    name: name.clone(),
                    source: store.manifest_path.clone(),
                    destination: format!("secret/{}", name),
                    mode: octal_mode(crate::secrets::plan::ENV_FILE_MODE),
                    transport: plan.profile.env,
                });
            }
        }
    }
    installs
}

pub(crate) fn yaml_text(
    resolved: &ResolvedContract,
    target: RenderTarget,
    documents: &[Value],
) -> Result<String, RenderError> {
    let mut text = String::new();
    for document in documents {
        if documents.len() > 1 {
            text.push_str("---\n");
        }
        let rendered = serde_yaml::to_string(document).map_err(|e| RenderError::Serialization {
            service_id: resolved.service_id().to_string(),
            target,
            message: e.to_string(),
        })?;
        text.push_str(&rendered);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_formats() {
        assert_eq!(memory_compose(512), "512m");
        assert_eq!(memory_kubernetes(512), "512Mi");
        assert_eq!(memory_systemd(512), "512M");
        assert_eq!(cores_decimal(1.0), "1");
        assert_eq!(cores_decimal(0.5), "0.5");
        assert_eq!(cores_kubernetes(1.0), "1");
        assert_eq!(cores_kubernetes(0.5), "500m");
        assert_eq!(cpu_quota_percent(1.5), "150%");
    }

    #[test]
    fn test_size_gib() {
        assert_eq!(size_gib(None, 8), 8);
        assert_eq!(size_gib(Some("20Gi"), 8), 20);
        assert_eq!(size_gib(Some("20"), 8), 20);
        assert_eq!(size_gib(Some("512Mi"), 8), 1);
        assert_eq!(size_gib(Some("lots"), 8), 8);
    }

    #[test]
    fn test_command_line_quoting() {
        let args: Vec<String> = ["/bin/sh", "-c", "exit 0"].iter().map(|s| s.to_string()).collect();
        assert_eq!(command_line(&args), "/bin/sh -c \"exit 0\"");
    }

    #[test]
    fn test_env_assignment_quoting() {
        assert_eq!(env_assignment("A", "b"), "A=b");
        assert_eq!(env_assignment("A", "b c"), "\"A=b c\"");
        assert_eq!(env_assignment("A", "50%"), "\"A=50%%\"");
    }

    #[test]
    fn test_tmpfs_spec() {
        let mount = EphemeralMount {
            name: None,
            path: "/tmp".to_string(),
            medium: None,
            size: Some("64m".to_string()),
            mode: Some("1777".to_string()),
            read_only: false,
            apply_to: Vec::new(),
        };
        assert_eq!(tmpfs_spec(&mount), "/tmp:size=64m,mode=1777");
    }
}
