//! Structural pass: value tree to `ServiceContract`
//!
//! Every problem found while walking the document is recorded against its
//! field path. A contract is returned only when the walk found no errors.

use super::document::ContractDocument;
use super::error::SchemaError;
use crate::config::compile_time::contract::{
    MAX_ENVIRONMENT_ENTRIES, MAX_PORTS, MAX_REQUIRES, MAX_SECRETS, MAX_VOLUMES,
};
use crate::config::runtime::parse_octal_mode;
use crate::contract::{
    EnvSecret, EnvVar, EphemeralMount, ExportVar, Exports, FileSecret, FirewallAction,
    FirewallDirection, FirewallRule, HealthCheck, HostPathType, HypervisorSettings,
    ImageReference, Mounts, PersistentVolume, PortMapping, Protocol, RenderTarget, Requirement,
    Resources, Secrets, SecurityContext, ServiceContract, UserNamespaceMode, VolumeMount,
};
use crate::dependency::registry::{parse_named_requirement, parse_requirement};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

type Object = Map<String, Value>;

pub(crate) fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

pub(crate) fn index(parent: &str, i: usize) -> String {
    format!("{}[{}]", parent, i)
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Scalars that may be written unquoted in YAML (versions, env values)
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn present<'v>(obj: &'v Object, key: &str) -> Option<&'v Value> {
    obj.get(key).filter(|value| !value.is_null())
}

struct Walker {
    service_id: String,
    errors: Vec<SchemaError>,
}

impl Walker {
    fn new(service_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            errors: Vec::new(),
        }
    }

    fn push(&mut self, error: SchemaError) {
        self.errors.push(error);
    }

    fn missing(&mut self, field: &str) {
        self.push(SchemaError::missing(&self.service_id, field));
    }

    fn invalid(&mut self, field: &str, message: impl Into<String>) {
        self.push(SchemaError::invalid_value(&self.service_id, field, message));
    }

    fn type_error(&mut self, field: &str, expected: &'static str, found: &Value) {
        self.push(SchemaError::InvalidType {
            service_id: self.service_id.clone(),
            field: field.to_string(),
            expected,
            found: kind_of(found),
        });
    }

    fn limit(&mut self, field: &str, count: usize, limit: usize) {
        if count > limit {
            self.push(SchemaError::LimitExceeded {
                service_id: self.service_id.clone(),
                field: field.to_string(),
                count,
                limit,
            });
        }
    }

    fn object<'v>(&mut self, obj: &'v Object, key: &str, parent: &str) -> Option<&'v Object> {
        let path = join(parent, key);
        match present(obj, key)? {
            Value::Object(map) => Some(map),
            other => {
                self.type_error(&path, "a mapping", other);
                None
            }
        }
    }

    fn string(&mut self, obj: &Object, key: &str, parent: &str) -> Option<String> {
        let path = join(parent, key);
        match present(obj, key)? {
            Value::String(s) => Some(s.clone()),
            other => {
                self.type_error(&path, "a string", other);
                None
            }
        }
    }

    fn required_string(&mut self, obj: &Object, key: &str, parent: &str) -> Option<String> {
        let path = join(parent, key);
        match self.string(obj, key, parent) {
            Some(s) if s.trim().is_empty() => {
                self.invalid(&path, "must not be empty");
                None
            }
            Some(s) => Some(s),
            None => {
                if obj.get(key).map_or(true, Value::is_null) {
                    self.missing(&path);
                }
                None
            }
        }
    }

    fn scalar(&mut self, obj: &Object, key: &str, parent: &str) -> Option<String> {
        let path = join(parent, key);
        let value = present(obj, key)?;
        match scalar_string(value) {
            Some(s) => Some(s),
            None => {
                self.type_error(&path, "a scalar", value);
                None
            }
        }
    }

    fn boolean(&mut self, obj: &Object, key: &str, parent: &str) -> Option<bool> {
        let path = join(parent, key);
        match present(obj, key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) if s == "true" || s == "false" => Some(s == "true"),
            other => {
                self.type_error(&path, "a boolean", other);
                None
            }
        }
    }

    fn unsigned(&mut self, obj: &Object, key: &str, parent: &str, max: u64) -> Option<u64> {
        let path = join(parent, key);
        let value = present(obj, key)?;
        let parsed = match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        match parsed {
            Some(n) if n <= max => Some(n),
            Some(n) => {
                self.invalid(&path, format!("{} exceeds maximum {}", n, max));
                None
            }
            None => {
                self.type_error(&path, "a non-negative integer", value);
                None
            }
        }
    }

    fn float(&mut self, obj: &Object, key: &str, parent: &str) -> Option<f64> {
        let path = join(parent, key);
        let value = present(obj, key)?;
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(n) if n.is_finite() => Some(n),
            Some(_) => {
                self.invalid(&path, "must be a finite number");
                None
            }
            None => {
                self.type_error(&path, "a number", value);
                None
            }
        }
    }

    fn string_list(&mut self, obj: &Object, key: &str, parent: &str) -> Vec<String> {
        let path = join(parent, key);
        let Some(value) = present(obj, key) else {
            return Vec::new();
        };
        match value {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match scalar_string(item) {
                        Some(s) => out.push(s),
                        None => self.type_error(&index(&path, i), "a string", item),
                    }
                }
                out
            }
            other => {
                self.type_error(&path, "a list", other);
                Vec::new()
            }
        }
    }

    fn apply_to(&mut self, obj: &Object, parent: &str) -> Vec<String> {
        let tags = self.string_list(obj, "apply_to", parent);
        let path = join(parent, "apply_to");
        for (i, tag) in tags.iter().enumerate() {
            if RenderTarget::parse(tag).is_none() {
                self.invalid(&index(&path, i), format!("unknown backend '{}'", tag));
            }
        }
        tags
    }

    fn items<'v>(&mut self, value: &'v Value, path: &str) -> Vec<(String, &'v Object)> {
        let Value::Array(items) = value else {
            self.type_error(path, "a list", value);
            return Vec::new();
        };
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_path = index(path, i);
            match item {
                Value::Object(map) => out.push((item_path, map)),
                other => self.type_error(&item_path, "a mapping", other),
            }
        }
        out
    }
}

/// Build a contract or every structural error found in the document
pub fn build_contract(document: &ContractDocument) -> Result<ServiceContract, Vec<SchemaError>> {
    let Value::Object(root) = &document.value else {
        return Err(vec![SchemaError::InvalidType {
            service_id: document.service_id_hint().to_string(),
            field: String::new(),
            expected: "a mapping",
            found: kind_of(&document.value),
        }]);
    };

    let mut w = Walker::new(document.service_id_hint());
    let service_id = w.required_string(root, "service_id", "");
    let service_name = w.string(root, "service_name", "");
    let service_namespace = w
        .string(root, "service_namespace", "")
        .filter(|ns| !ns.trim().is_empty());
    let version = w.scalar(root, "version", "");
    let runtime_templates = runtime_templates(&mut w, root);
    let image = image(&mut w, root);
    let command = w.string_list(root, "command", "");
    let address = w.string(root, "address", "");
    let environment = environment(&mut w, root.get("environment"), "environment");
    let resources = resources(&mut w, root);
    let ports = ports(&mut w, root);
    let volumes = volumes(&mut w, root);
    let mounts = mounts(&mut w, root);
    let secrets = secrets(&mut w, root);
    let health = health(&mut w, root);
    let security = security(&mut w, root);
    let exports = exports(&mut w, root);
    let requires = requires(&mut w, root);
    let hypervisor = hypervisor(&mut w, root);

    w.limit("environment", environment.len(), MAX_ENVIRONMENT_ENTRIES);
    w.limit("ports", ports.len(), MAX_PORTS);
    w.limit("volumes", volumes.len(), MAX_VOLUMES);
    w.limit("secrets", secrets.count(), MAX_SECRETS);
    w.limit("requires", requires.len(), MAX_REQUIRES);

    match (service_id, image, health) {
        (Some(service_id), Some(image), Some(health)) if w.errors.is_empty() => {
            Ok(ServiceContract {
                service_name: service_name.unwrap_or_else(|| service_id.clone()),
                service_id,
                service_namespace,
                version,
                runtime_templates,
                image,
                command,
                address,
                environment,
                resources,
                ports,
                volumes,
                mounts,
                secrets,
                health,
                security,
                exports,
                requires,
                hypervisor,
            })
        }
        _ => Err(w.errors),
    }
}

fn runtime_templates(w: &mut Walker, root: &Object) -> Vec<RenderTarget> {
    if root.get("runtime_templates").map_or(true, Value::is_null) {
        w.missing("runtime_templates");
        return Vec::new();
    }
    let tags = w.string_list(root, "runtime_templates", "");
    let mut targets = Vec::new();
    for (i, tag) in tags.iter().enumerate() {
        match RenderTarget::parse(tag) {
            Some(target) if !targets.contains(&target) => targets.push(target),
            Some(_) => {}
            None => w.invalid(
                &index("runtime_templates", i),
                format!("unknown render target '{}'", tag),
            ),
        }
    }
    if tags.is_empty() && w.errors.iter().all(|e| e.field_path() != "runtime_templates") {
        w.invalid("runtime_templates", "at least one render target is required");
    }
    targets
}

fn image(w: &mut Walker, root: &Object) -> Option<ImageReference> {
    let key = if root.contains_key("image") { "image" } else { "service_image" };
    let raw = w.required_string(root, key, "")?;
    match ImageReference::parse(&raw) {
        Ok(image) => Some(image),
        Err(message) => {
            w.invalid(key, message);
            None
        }
    }
}

fn environment(w: &mut Walker, value: Option<&Value>, path: &str) -> Vec<EnvVar> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (name, raw) in map {
                let field = join(path, name);
                match scalar_string(raw) {
                    Some(v) if seen.insert(name.clone()) => out.push(EnvVar::new(name, v)),
                    Some(_) => {}
                    None => w.type_error(&field, "a scalar", raw),
                }
            }
        }
        Some(list @ Value::Array(_)) => {
            for (item_path, item) in w.items(list, path) {
                let name = w.required_string(item, "name", &item_path);
                let value = w.scalar(item, "value", &item_path);
                if value.is_none() && item.get("value").map_or(true, Value::is_null) {
                    w.missing(&join(&item_path, "value"));
                }
                if let (Some(name), Some(value)) = (name, value) {
                    if seen.insert(name.clone()) {
                        out.push(EnvVar::new(name, value));
                    }
                }
            }
        }
        Some(other) => w.type_error(path, "a list or mapping", other),
    }
    out
}

fn resources(w: &mut Walker, root: &Object) -> Resources {
    let mut resources = Resources::default();
    let Some(obj) = w.object(root, "resources", "") else {
        return resources;
    };
    if let Some(memory) = w.unsigned(obj, "memory_mb", "resources", u32::MAX as u64) {
        resources.memory_mb = memory as u32;
    }
    if let Some(cpu) = w.float(obj, "cpu_cores", "resources") {
        resources.cpu_cores = cpu;
    }
    resources
}

fn port_number(w: &mut Walker, obj: &Object, key: &str, parent: &str) -> Option<u16> {
    let port = w.unsigned(obj, key, parent, u16::MAX as u64)?;
    if port == 0 {
        w.invalid(&join(parent, key), "port 0 is not valid");
        return None;
    }
    Some(port as u16)
}

fn ports(w: &mut Walker, root: &Object) -> Vec<PortMapping> {
    let Some(value) = root.get("ports").filter(|v| !v.is_null()) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (path, item) in w.items(value, "ports") {
        let target = port_number(w, item, "target", &path);
        if item.get("target").map_or(true, Value::is_null) {
            w.missing(&join(&path, "target"));
        }
        let published = port_number(w, item, "published", &path);
        let host_ip = w.string(item, "host_ip", &path);
        let protocol = match w.string(item, "protocol", &path) {
            None => Some(Protocol::Tcp),
            Some(raw) => {
                let parsed = Protocol::parse(&raw);
                if parsed.is_none() {
                    w.invalid(&join(&path, "protocol"), format!("expected tcp or udp, found '{}'", raw));
                }
                parsed
            }
        };
        if let (Some(target), Some(protocol)) = (target, protocol) {
            out.push(PortMapping {
                target,
                published: published.unwrap_or(target),
                host_ip,
                protocol,
            });
        }
    }
    out
}

fn volumes(w: &mut Walker, root: &Object) -> Vec<VolumeMount> {
    let Some(value) = root.get("volumes").filter(|v| !v.is_null()) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (path, item) in w.items(value, "volumes") {
        let name = w.required_string(item, "name", &path);
        let target = w.required_string(item, "target", &path);
        let host_path = w.string(item, "host_path", &path);
        let host_path_type = w.string(item, "host_path_type", &path).and_then(|raw| {
            let parsed = HostPathType::parse(&raw);
            if parsed.is_none() {
                w.invalid(
                    &join(&path, "host_path_type"),
                    format!("'{}' is not one of {}", raw, HostPathType::NAMES.join(", ")),
                );
            }
            parsed
        });
        let read_only = w.boolean(item, "read_only", &path).unwrap_or(false);
        if let (Some(name), Some(target)) = (name, target) {
            out.push(VolumeMount {
                name,
                host_path,
                host_path_type,
                target,
                read_only,
            });
        }
    }
    out
}

fn mounts(w: &mut Walker, root: &Object) -> Mounts {
    let mut mounts = Mounts::default();
    let Some(obj) = w.object(root, "mounts", "") else {
        return mounts;
    };

    if let Some(value) = obj.get("persistent_volumes").filter(|v| !v.is_null()) {
        for (path, item) in w.items(value, "mounts.persistent_volumes") {
            let name = w.required_string(item, "name", &path);
            let target = w.required_string(item, "target", &path);
            let size = w.scalar(item, "size", &path);
            let apply_to = w.apply_to(item, &path);
            if let (Some(name), Some(target)) = (name, target) {
                mounts.persistent_volumes.push(PersistentVolume {
                    name,
                    target,
                    size,
                    apply_to,
                });
            }
        }
    }

    if let Some(value) = obj.get("ephemeral_mounts").filter(|v| !v.is_null()) {
        for (path, item) in w.items(value, "mounts.ephemeral_mounts") {
            let name = w.string(item, "name", &path);
            let mount_path = w.required_string(item, "path", &path);
            let medium = w.string(item, "medium", &path);
            let size = w.scalar(item, "size", &path);
            let mode = w.scalar(item, "mode", &path);
            let read_only = w.boolean(item, "read_only", &path).unwrap_or(false);
            let apply_to = w.apply_to(item, &path);
            if let Some(mount_path) = mount_path {
                mounts.ephemeral_mounts.push(EphemeralMount {
                    name,
                    path: mount_path,
                    medium,
                    size,
                    mode,
                    read_only,
                    apply_to,
                });
            }
        }
    }
    mounts
}

fn file_mode(w: &mut Walker, item: &Object, parent: &str) -> Option<u32> {
    let raw = w.scalar(item, "mode", parent)?;
    let parsed = parse_octal_mode(&raw);
    if parsed.is_none() {
        w.invalid(&join(parent, "mode"), format!("'{}' is not an octal file mode", raw));
    }
    parsed
}

fn secrets(w: &mut Walker, root: &Object) -> Secrets {
    let mut secrets = Secrets::default();
    let Some(obj) = w.object(root, "secrets", "") else {
        return secrets;
    };

    if let Some(value) = obj.get("env").filter(|v| !v.is_null()) {
        for (path, item) in w.items(value, "secrets.env") {
            let name = w.required_string(item, "name", &path);
            let value = w.scalar(item, "value", &path);
            if item.get("value").map_or(true, Value::is_null) {
                w.missing(&join(&path, "value"));
            }
            if let (Some(name), Some(value)) = (name, value) {
                secrets.env.push(EnvSecret { name, value });
            }
        }
    }

    if let Some(value) = obj.get("files").filter(|v| !v.is_null()) {
        for (path, item) in w.items(value, "secrets.files") {
            let name = w.required_string(item, "name", &path);
            let target = w.required_string(item, "target", &path);
            let value = w.scalar(item, "value", &path);
            if item.get("value").map_or(true, Value::is_null) {
                w.missing(&join(&path, "value"));
            }
            let mode = file_mode(w, item, &path);
            if let (Some(name), Some(target), Some(value)) = (name, target, value) {
                secrets.files.push(FileSecret {
                    name,
                    target,
                    value,
                    mode,
                });
            }
        }
    }

    secrets.rotation_timestamp = w.scalar(obj, "rotation_timestamp", "secrets");
    if let Some(shred) = w.boolean(obj, "shred_after_apply", "secrets") {
        secrets.shred_after_apply = shred;
    }
    secrets.shred_waiver_reason = w.string(obj, "shred_waiver_reason", "secrets");
    secrets
}

fn health(w: &mut Walker, root: &Object) -> Option<HealthCheck> {
    if root.get("health").map_or(true, Value::is_null) {
        w.missing("health.cmd");
        return None;
    }
    let obj = w.object(root, "health", "")?;
    let mut health = HealthCheck::default();

    if obj.get("cmd").map_or(true, Value::is_null) {
        w.missing("health.cmd");
        return None;
    }
    health.cmd = w.string_list(obj, "cmd", "health");
    if obj.get("cmd").and_then(Value::as_array).is_some_and(|cmd| cmd.is_empty()) {
        w.invalid("health.cmd", "must be a non-empty list");
    }
    if let Some(interval) = w.scalar(obj, "interval", "health") {
        health.interval = interval;
    }
    if let Some(timeout) = w.scalar(obj, "timeout", "health") {
        health.timeout = timeout;
    }
    if let Some(retries) = w.unsigned(obj, "retries", "health", u32::MAX as u64) {
        health.retries = retries as u32;
    }
    health.start_period = w.scalar(obj, "start_period", "health");
    Some(health)
}

fn security(w: &mut Walker, root: &Object) -> SecurityContext {
    let mut security = SecurityContext::default();
    let Some(obj) = w.object(root, "security", "") else {
        return security;
    };
    let p = "security";

    if let Some(uid) = w.unsigned(obj, "run_as_user", p, u32::MAX as u64) {
        security.run_as_user = uid as u32;
        security.run_as_group = uid as u32;
    }
    if let Some(gid) = w.unsigned(obj, "run_as_group", p, u32::MAX as u64) {
        security.run_as_group = gid as u32;
    }
    if let Some(ro) = w.boolean(obj, "read_only_root_filesystem", p) {
        security.read_only_root_filesystem = ro;
    }
    if obj.contains_key("capabilities_drop") {
        security.capabilities_drop = w.string_list(obj, "capabilities_drop", p);
    }
    security.capabilities_add = w.string_list(obj, "capabilities_add", p);
    if let Some(nnp) = w.boolean(obj, "no_new_privileges", p) {
        security.no_new_privileges = nnp;
    }
    security.allow_privilege_escalation = w
        .boolean(obj, "allow_privilege_escalation", p)
        .unwrap_or(!security.no_new_privileges);
    if let Some(profile) = w.string(obj, "apparmor_profile", p) {
        security.apparmor_profile = profile;
    }
    if obj.contains_key("allowed_apparmor_profiles") {
        security.allowed_apparmor_profiles = w.string_list(obj, "allowed_apparmor_profiles", p);
    }
    security.seccomp_profile = w.string(obj, "seccomp_profile", p);
    security.user_namespace = w.string(obj, "user_namespace", p).and_then(|raw| {
        let parsed = UserNamespaceMode::parse(&raw);
        if parsed.is_none() {
            w.invalid(
                "security.user_namespace",
                format!("expected auto, host, keep-id or private, found '{}'", raw),
            );
        }
        parsed
    });
    if let Some(allow) = w.boolean(obj, "allow_privileged_ports", p) {
        security.allow_privileged_ports = allow;
    }
    security
}

fn exports(w: &mut Walker, root: &Object) -> Exports {
    let mut exports = Exports::default();
    let Some(obj) = w.object(root, "exports", "") else {
        return exports;
    };
    match obj.get("env") {
        None | Some(Value::Null) => {}
        Some(list @ Value::Array(_)) => {
            for (path, item) in w.items(list, "exports.env") {
                let name = w.required_string(item, "name", &path);
                let value = w.scalar(item, "value", &path);
                if item.get("value").map_or(true, Value::is_null) {
                    w.missing(&join(&path, "value"));
                }
                let description = w.string(item, "description", &path);
                if let (Some(name), Some(value)) = (name, value) {
                    exports.env.push(ExportVar {
                        name,
                        value,
                        description,
                    });
                }
            }
        }
        Some(map @ Value::Object(_)) => {
            exports.env = environment(w, Some(map), "exports.env")
                .into_iter()
                .map(|var| ExportVar {
                    name: var.name,
                    value: var.value,
                    description: None,
                })
                .collect();
        }
        Some(other) => w.type_error("exports.env", "a list or mapping", other),
    }
    exports
}

fn requires(w: &mut Walker, root: &Object) -> Vec<Requirement> {
    let mut out = Vec::new();
    match root.get("requires") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                match parse_requirement(item) {
                    Ok(req) => out.push(req),
                    Err(message) => w.invalid(&index("requires", i), message),
                }
            }
        }
        Some(Value::Object(map)) => {
            for (name, body) in map {
                match parse_named_requirement(name, body) {
                    Ok(req) => out.push(req),
                    Err(message) => w.invalid(&join("requires", name), message),
                }
            }
        }
        Some(other) => w.type_error("requires", "a list or mapping", other),
    }
    out
}

fn firewall_rule(w: &mut Walker, item: &Object, path: &str) -> Option<FirewallRule> {
    let action = w.required_string(item, "action", path).and_then(|raw| {
        let parsed = FirewallAction::parse(&raw);
        if parsed.is_none() {
            w.invalid(&join(path, "action"), format!("expected ACCEPT, DROP or REJECT, found '{}'", raw));
        }
        parsed
    });
    let direction = match w.string(item, "direction", path) {
        None => Some(FirewallDirection::In),
        Some(raw) => {
            let parsed = FirewallDirection::parse(&raw);
            if parsed.is_none() {
                w.invalid(&join(path, "direction"), format!("expected in or out, found '{}'", raw));
            }
            parsed
        }
    };
    let protocol = w.string(item, "protocol", path);
    let destination_port = w.scalar(item, "destination_port", path);
    let source = w.string(item, "source", path);
    let comment = w.string(item, "comment", path);
    Some(FirewallRule {
        action: action?,
        direction: direction?,
        protocol,
        destination_port,
        source,
        comment,
    })
}

fn hypervisor(w: &mut Walker, root: &Object) -> HypervisorSettings {
    let mut settings = HypervisorSettings::default();
    let Some(obj) = w.object(root, "hypervisor", "") else {
        return settings;
    };
    let p = "hypervisor";

    settings.vmid = w.unsigned(obj, "vmid", p, u32::MAX as u64).map(|id| id as u32);
    settings.ostemplate = w.string(obj, "ostemplate", p);
    if let Some(bridge) = w.string(obj, "bridge", p) {
        settings.bridge = bridge;
    }
    settings.gateway = w.string(obj, "gateway", p);
    settings.features = match obj.get("features") {
        Some(Value::String(list)) => list
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| f.trim_end_matches("=1").to_string())
            .collect(),
        _ => w.string_list(obj, "features", p),
    };
    if let Some(value) = obj.get("firewall").filter(|v| !v.is_null()) {
        for (path, item) in w.items(value, "hypervisor.firewall") {
            if let Some(rule) = firewall_rule(w, item, &path) {
                settings.firewall.push(rule);
            }
        }
    }
    settings
}
