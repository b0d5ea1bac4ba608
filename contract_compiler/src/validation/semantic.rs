//! Semantic pass: cross-field invariants over a structurally valid contract

use super::error::SchemaError;
use super::schema::{index, join};
use crate::config::runtime::parse_octal_mode;
use crate::contract::{parse_duration, ServiceContract};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn env_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

fn service_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,62}$").expect("static regex"))
}

/// Secret names become file names in the staging area and Secret data keys
fn secret_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static regex"))
}

pub fn is_valid_env_name(name: &str) -> bool {
    env_name_pattern().is_match(name)
}

fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

struct Checker<'a> {
    service_id: &'a str,
    errors: Vec<SchemaError>,
}

impl<'a> Checker<'a> {
    fn invariant(&mut self, field: impl AsRef<str>, message: impl Into<String>) {
        self.errors
            .push(SchemaError::invariant(self.service_id, field.as_ref(), message));
    }

    fn absolute(&mut self, field: String, path: &str) {
        if !is_absolute(path) {
            self.invariant(field, format!("path '{}' must be absolute", path));
        }
    }

    fn unique<'n>(&mut self, seen: &mut BTreeSet<&'n str>, field: String, name: &'n str, what: &str) {
        if !seen.insert(name) {
            self.invariant(field, format!("duplicate {} '{}'", what, name));
        }
    }

    fn env_name(&mut self, field: String, name: &str) {
        if !is_valid_env_name(name) {
            self.invariant(
                field,
                format!("'{}' is not a valid environment variable name", name),
            );
        }
    }

    fn duration(&mut self, field: &str, value: &str) {
        if parse_duration(value).is_none() {
            self.invariant(field, format!("'{}' is not a duration such as 10s or 1m30s", value));
        }
    }
}

/// Every cross-field violation in declaration order
pub fn check_contract(contract: &ServiceContract) -> Vec<SchemaError> {
    let mut c = Checker {
        service_id: &contract.service_id,
        errors: Vec::new(),
    };

    if !service_id_pattern().is_match(&contract.service_id) || contract.service_id.contains("..") {
        c.errors.push(SchemaError::invalid_value(
            &contract.service_id,
            "service_id",
            "must start with a letter or digit and contain only letters, digits, '.', '_' or '-'",
        ));
    }

    for (i, var) in contract.environment.iter().enumerate() {
        c.env_name(join(&index("environment", i), "name"), &var.name);
    }

    let mut published = BTreeSet::new();
    for (i, port) in contract.ports.iter().enumerate() {
        let key = (port.host_ip.as_deref().unwrap_or(""), port.published, port.protocol.as_str());
        if !published.insert(key) {
            c.invariant(
                join(&index("ports", i), "published"),
                format!("port {}/{} is published twice", port.published, port.protocol.as_str()),
            );
        }
    }

    let mut volume_names = BTreeSet::new();
    for (i, volume) in contract.volumes.iter().enumerate() {
        let path = index("volumes", i);
        c.unique(&mut volume_names, join(&path, "name"), &volume.name, "volume name");
        c.absolute(join(&path, "target"), &volume.target);
        match &volume.host_path {
            Some(host_path) => c.absolute(join(&path, "host_path"), host_path),
            None if volume.host_path_type.is_some() => {
                c.invariant(join(&path, "host_path_type"), "host_path_type requires host_path")
            }
            None => {}
        }
    }

    for (i, volume) in contract.mounts.persistent_volumes.iter().enumerate() {
        let path = index("mounts.persistent_volumes", i);
        c.unique(&mut volume_names, join(&path, "name"), &volume.name, "volume name");
        c.absolute(join(&path, "target"), &volume.target);
    }

    for (i, mount) in contract.mounts.ephemeral_mounts.iter().enumerate() {
        let path = index("mounts.ephemeral_mounts", i);
        c.absolute(join(&path, "path"), &mount.path);
        if let Some(mode) = &mount.mode {
            if parse_octal_mode(mode).is_none() {
                c.invariant(join(&path, "mode"), format!("'{}' is not an octal mode", mode));
            }
        }
    }

    let secrets = &contract.secrets;
    if !secrets.is_empty() && contract.service_namespace.is_none() {
        c.errors.push(SchemaError::MissingSecretScope {
            service_id: contract.service_id.clone(),
            field: "service_namespace".to_string(),
        });
    }
    if !secrets.shred_after_apply && !secrets.is_shred_waived() {
        c.invariant(
            "secrets.shred_waiver_reason",
            "shred_after_apply: false requires a non-empty shred_waiver_reason",
        );
    }

    let mut env_secret_names = BTreeSet::new();
    for (i, secret) in secrets.env.iter().enumerate() {
        let field = join(&index("secrets.env", i), "name");
        c.env_name(field.clone(), &secret.name);
        c.unique(&mut env_secret_names, field, &secret.name, "env secret");
        if contract.environment.iter().any(|var| var.name == secret.name) {
            c.invariant(
                join(&index("secrets.env", i), "name"),
                format!("'{}' is also declared in environment", secret.name),
            );
        }
    }

    let mut file_secret_names = BTreeSet::new();
    let mut file_targets = BTreeSet::new();
    for (i, secret) in secrets.files.iter().enumerate() {
        let path = index("secrets.files", i);
        c.unique(&mut file_secret_names, join(&path, "name"), &secret.name, "file secret");
        if !secret_name_pattern().is_match(&secret.name) {
            c.invariant(
                join(&path, "name"),
                format!("'{}' may only contain letters, digits, '.', '_' or '-'", secret.name),
            );
        }
        c.absolute(join(&path, "target"), &secret.target);
        c.unique(&mut file_targets, join(&path, "target"), &secret.target, "file secret target");
        if secret.mode.is_some_and(|mode| mode > 0o777) {
            c.invariant(join(&path, "mode"), "file secret mode must not exceed 0777");
        }
    }

    c.duration("health.interval", &contract.health.interval);
    c.duration("health.timeout", &contract.health.timeout);
    if let Some(start_period) = &contract.health.start_period {
        c.duration("health.start_period", start_period);
    }

    let mut export_names = BTreeSet::new();
    for (i, export) in contract.exports.env.iter().enumerate() {
        let field = join(&index("exports.env", i), "name");
        c.env_name(field.clone(), &export.name);
        c.unique(&mut export_names, field, &export.name, "export");
    }

    let mut required = BTreeSet::new();
    for (i, requirement) in contract.requires.iter().enumerate() {
        c.unique(&mut required, join(&index("requires", i), "name"), &requirement.name, "requirement");
    }

    c.errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::document::ContractDocument;
    use crate::validation::schema::build_contract;
    use assert_matches::assert_matches;
    use serde_json::{json, Value};

    fn contract(patch: Value) -> ServiceContract {
        let mut value = json!({
            "service_id": "web",
            "service_namespace": "shop",
            "runtime_templates": ["container-compose"],
            "image": "registry/x:1.2",
            "health": {"cmd": ["true"]}
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut value, patch) {
            base.extend(extra);
        }
        build_contract(&ContractDocument::new("web.yml", value)).unwrap()
    }

    fn fields(errors: &[SchemaError]) -> Vec<&str> {
        errors.iter().map(|e| e.field_path()).collect()
    }

    #[test]
    fn test_clean_contract_has_no_errors() {
        assert!(check_contract(&contract(json!({}))).is_empty());
    }

    #[test]
    fn test_secrets_without_namespace_fail_closed() {
        let mut c = contract(json!({"secrets": {"env": [{"name": "TOKEN", "value": "abc123"}]}}));
        c.service_namespace = None;
        let errors = check_contract(&c);
        assert_eq!(errors.len(), 1);
        assert_matches!(&errors[0], SchemaError::MissingSecretScope { field, .. } if field == "service_namespace");
    }

    #[test]
    fn test_host_path_rules() {
        let c = contract(json!({"volumes": [
            {"name": "data", "host_path": "relative/dir", "target": "/data"},
            {"name": "sock", "host_path_type": "Socket", "target": "/run/x.sock"},
            {"name": "data", "target": "cache"}
        ]}));
        let errors = check_contract(&c);
        assert_eq!(
            fields(&errors),
            [
                "volumes[0].host_path",
                "volumes[1].host_path_type",
                "volumes[2].name",
                "volumes[2].target"
            ]
        );
    }

    #[test]
    fn test_waiver_and_secret_names() {
        let c = contract(json!({"secrets": {
            "env": [{"name": "1BAD", "value": "x"}, {"name": "1BAD", "value": "y"}],
            "files": [{"name": "key", "target": "key.pem", "value": "K"}],
            "shred_after_apply": false
        }}));
        let errors = check_contract(&c);
        assert_eq!(
            fields(&errors),
            [
                "secrets.shred_waiver_reason",
                "secrets.env[0].name",
                "secrets.env[1].name",
                "secrets.env[1].name",
                "secrets.files[0].target"
            ]
        );
    }

    #[test]
    fn test_bad_durations_and_service_id() {
        let mut c = contract(json!({"health": {"cmd": ["true"], "interval": "often"}}));
        c.service_id = "../etc".to_string();
        let errors = check_contract(&c);
        assert_eq!(fields(&errors), ["service_id", "health.interval"]);
    }

    #[test]
    fn test_file_secret_name_must_be_a_file_name() {
        let c = contract(json!({"secrets": {
            "files": [{"name": "../../etc/passwd", "target": "/etc/app/key", "value": "K"}]
        }}));
        assert_eq!(fields(&check_contract(&c)), ["secrets.files[0].name"]);
    }

    #[test]
    fn test_env_name_pattern() {
        assert!(is_valid_env_name("DB_URL"));
        assert!(is_valid_env_name("_x1"));
        assert!(!is_valid_env_name("9LIVES"));
        assert!(!is_valid_env_name("A-B"));
    }
}
