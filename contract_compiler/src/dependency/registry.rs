//! Dependency registry: who publishes which exports
//!
//! Registry documents come in several shapes. They are all normalized to a
//! map of service id to [`RegistryEntry`], and fragments merge in order.

use super::error::DependencyError;
use crate::contract::{Requirement, ServiceContract};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryOrigin {
    Registry,
    Batch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub name: String,
    pub version: Option<String>,
    pub exports_hash: Option<String>,
    pub exports: BTreeMap<String, String>,
    pub requires: Vec<Requirement>,
    pub origin: EntryOrigin,
}

impl RegistryEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            exports_hash: None,
            exports: BTreeMap::new(),
            requires: Vec::new(),
            origin: EntryOrigin::Registry,
        }
    }

    /// Declared hash, or the one computed from the export values
    pub fn effective_exports_hash(&self) -> String {
        self.exports_hash
            .clone()
            .unwrap_or_else(|| exports_hash(&self.exports))
    }

    pub fn from_contract(contract: &ServiceContract) -> Self {
        let exports = contract.exports.as_map();
        Self {
            name: contract.service_id.clone(),
            version: contract.version.clone(),
            exports_hash: Some(exports_hash(&exports)),
            exports,
            requires: contract.requires.clone(),
            origin: EntryOrigin::Batch,
        }
    }
}

/// SHA-256 hex over the sorted `name=value` lines of an export set
pub fn exports_hash(exports: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in exports {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: &Value) -> Result<Self, DependencyError> {
        let mut registry = Self::new();
        for entry in normalize_registry(value).map_err(|message| DependencyError::InvalidRegistry { message })? {
            registry.insert(entry);
        }
        Ok(registry)
    }

    /// Merge fragments in order: later scalars win, `requires` merge by name
    pub fn from_fragments<'a>(fragments: impl IntoIterator<Item = &'a Value>) -> Result<Self, DependencyError> {
        let mut registry = Self::new();
        for fragment in fragments {
            registry.merge(Self::from_value(fragment)?);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, entry: RegistryEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn merge(&mut self, other: DependencyRegistry) {
        for (name, incoming) in other.entries {
            match self.entries.get_mut(&name) {
                None => {
                    self.entries.insert(name, incoming);
                }
                Some(existing) => {
                    if incoming.version.is_some() {
                        existing.version = incoming.version;
                    }
                    if incoming.exports_hash.is_some() {
                        existing.exports_hash = incoming.exports_hash;
                    }
                    if !incoming.exports.is_empty() {
                        existing.exports = incoming.exports;
                    }
                    merge_requirements(&mut existing.requires, incoming.requires);
                    existing.origin = incoming.origin;
                }
            }
        }
    }

    /// Registry overlaid with entries contributed by the batch contracts
    pub fn with_batch(&self, contracts: &[ServiceContract]) -> Self {
        let mut combined = self.clone();
        for contract in contracts {
            combined.insert(RegistryEntry::from_contract(contract));
        }
        combined
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn merge_requirements(existing: &mut Vec<Requirement>, incoming: Vec<Requirement>) {
    for requirement in incoming {
        match existing.iter_mut().find(|r| r.name == requirement.name) {
            None => existing.push(requirement),
            Some(current) => {
                if requirement.version.is_some() {
                    current.version = requirement.version;
                }
                if requirement.exports_hash.is_some() {
                    current.exports_hash = requirement.exports_hash;
                }
                for key in requirement.exports {
                    if !current.exports.contains(&key) {
                        current.exports.push(key);
                    }
                }
            }
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn optional_scalar(body: &Map<String, Value>, key: &str) -> Result<Option<String>, String> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => scalar(value)
            .map(Some)
            .ok_or_else(|| format!("'{}' must be a string", key)),
    }
}

fn requirement_body(name: &str, body: &Map<String, Value>) -> Result<Requirement, String> {
    let mut requirement = Requirement::named(name);
    requirement.version = optional_scalar(body, "version")?;
    requirement.exports_hash = optional_scalar(body, "exports_hash")?;
    requirement.exports = match body.get("exports") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(keys)) => keys
            .iter()
            .map(|key| key.as_str().map(str::to_string).ok_or("export keys must be strings"))
            .collect::<Result<_, _>>()?,
        Some(_) => return Err("'exports' must be a list of export keys".to_string()),
    };
    Ok(requirement)
}

/// Accepts `"cache"`, `{name: cache, ...}` or `{cache: {...}}`
pub fn parse_requirement(value: &Value) -> Result<Requirement, String> {
    match value {
        Value::String(name) if !name.trim().is_empty() => Ok(Requirement::named(name.trim())),
        Value::Object(map) => match map.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => requirement_body(name.trim(), map),
            Some(_) => Err("requirement name must be a non-empty string".to_string()),
            None if map.len() == 1 => {
                let (name, body) = map.iter().next().ok_or("empty requirement")?;
                parse_named_requirement(name, body)
            }
            None => Err("requirement mapping needs a 'name' key".to_string()),
        },
        _ => Err(format!("unsupported requirement entry: {}", value)),
    }
}

/// The `{name: body}` form, where body may be empty
pub fn parse_named_requirement(name: &str, body: &Value) -> Result<Requirement, String> {
    if name.trim().is_empty() {
        return Err("requirement name must not be empty".to_string());
    }
    match body {
        Value::Null => Ok(Requirement::named(name)),
        Value::Object(map) => requirement_body(name, map),
        Value::String(version) => Ok(Requirement {
            version: Some(version.clone()),
            ..Requirement::named(name)
        }),
        _ => Err(format!("requirement '{}' must map to a mapping", name)),
    }
}

pub fn normalize_requirements(value: &Value) -> Result<Vec<Requirement>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(parse_requirement).collect(),
        Value::Object(map) if !map.contains_key("name") => map
            .iter()
            .map(|(name, body)| parse_named_requirement(name, body))
            .collect(),
        other => parse_requirement(other).map(|req| vec![req]),
    }
}

fn parse_exports(value: &Value) -> Result<BTreeMap<String, String>, String> {
    let env = match value {
        Value::Null => return Ok(BTreeMap::new()),
        Value::Object(map) => map.get("env").unwrap_or(&Value::Null),
        other => other,
    };
    let mut exports = BTreeMap::new();
    match env {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                let name = item.get("name").and_then(Value::as_str);
                let value = item.get("value").and_then(scalar);
                match (name, value) {
                    (Some(name), Some(value)) => {
                        exports.entry(name.to_string()).or_insert(value);
                    }
                    _ => return Err("export entries need 'name' and 'value'".to_string()),
                }
            }
        }
        Value::Object(map) => {
            for (name, value) in map {
                let value = scalar(value).ok_or_else(|| format!("export '{}' must be a scalar", name))?;
                exports.insert(name.clone(), value);
            }
        }
        _ => return Err("exports.env must be a list or mapping".to_string()),
    }
    Ok(exports)
}

fn entry_from_value(name: &str, value: &Value) -> Result<RegistryEntry, String> {
    let mut entry = RegistryEntry::new(name);
    match value {
        Value::Null => {}
        Value::String(version) => {
            if !version.is_empty() {
                entry.version = Some(version.clone());
            }
        }
        Value::Object(body) => {
            entry.version = optional_scalar(body, "version")?;
            entry.exports_hash = optional_scalar(body, "exports_hash")?;
            entry.exports =
                parse_exports(body.get("exports").unwrap_or(&Value::Null)).map_err(|e| format!("{}: {}", name, e))?;
            entry.requires = normalize_requirements(body.get("requires").unwrap_or(&Value::Null))
                .map_err(|e| format!("{}: {}", name, e))?;
        }
        other => return Err(format!("entry '{}' has unsupported value {}", name, other)),
    }
    Ok(entry)
}

fn normalize_registry(value: &Value) -> Result<Vec<RegistryEntry>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(name) => Ok(vec![RegistryEntry::new(name.as_str())]),
        Value::Object(map) if map.contains_key("dependencies") => {
            normalize_registry(map.get("dependencies").unwrap_or(&Value::Null))
        }
        Value::Object(map) => map
            .iter()
            .map(|(key, body)| {
                let name = body.get("name").and_then(Value::as_str).unwrap_or(key);
                entry_from_value(name, body)
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(name) => Ok(RegistryEntry::new(name.as_str())),
                Value::Object(body) => {
                    let name = body
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| format!("registry entry missing name: {}", item))?;
                    entry_from_value(name, item)
                }
                other => Err(format!("unsupported registry entry: {}", other)),
            })
            .collect(),
        other => Err(format!("unsupported registry value: {}", other)),
    }
}
