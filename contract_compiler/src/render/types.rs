//! Rendered artifact types

use crate::contract::RenderTarget;
use crate::secrets::SecretTransport;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// INI-style unit file with ordered sections and repeatable keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitFile {
    sections: Vec<UnitSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitSection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl UnitFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new section; subsequent `set` calls add to it
    pub fn section(&mut self, name: &str) -> &mut Self {
        self.sections.push(UnitSection {
            name: name.to_string(),
            entries: Vec::new(),
        });
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        if self.sections.is_empty() {
            self.section("Unit");
        }
        if let Some(section) = self.sections.last_mut() {
            section.entries.push((key.to_string(), value.into()));
        }
        self
    }

    pub fn set_if(&mut self, condition: bool, key: &str, value: impl Into<String>) -> &mut Self {
        if condition {
            self.set(key, value);
        }
        self
    }

    pub fn sections(&self) -> &[UnitSection] {
        &self.sections
    }

    /// All values for a key within a section, in order
    pub fn get(&self, section: &str, key: &str) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|s| s.name == section)
            .flat_map(|s| s.entries.iter())
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn first(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).into_iter().next()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (key, value) in &section.entries {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }
}

/// Structured form of an artifact, inspected by artifact-scope rules
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "format", content = "content", rename_all = "snake_case")]
pub enum ArtifactDocument {
    Yaml(Vec<Value>),
    Unit(UnitFile),
}

impl ArtifactDocument {
    pub fn yaml_documents(&self) -> &[Value] {
        match self {
            ArtifactDocument::Yaml(docs) => docs,
            ArtifactDocument::Unit(_) => &[],
        }
    }

    pub fn unit(&self) -> Option<&UnitFile> {
        match self {
            ArtifactDocument::Unit(unit) => Some(unit),
            ArtifactDocument::Yaml(_) => None,
        }
    }
}

/// Where one piece of staged material ends up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretInstall {
    pub name: String,
    pub source: PathBuf,
    pub destination: String,
    pub mode: String,
    pub transport: SecretTransport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactMetadata {
    pub address: String,
    pub file_name: String,
    /// Generated object names, e.g. container, secret and claim names
    pub names: BTreeMap<String, String>,
    pub secret_installs: Vec<SecretInstall>,
    pub health_cmd: Vec<String>,
    pub rotation_marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedArtifact {
    pub service_id: String,
    pub target: RenderTarget,
    pub text: String,
    pub document: ArtifactDocument,
    pub metadata: ArtifactMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_file_render_and_lookup() {
        let mut unit = UnitFile::new();
        unit.section("Unit").set("Description", "web");
        unit.section("Service")
            .set("Environment", "A=1")
            .set("Environment", "B=2")
            .set_if(false, "User", "0");

        assert_eq!(unit.get("Service", "Environment"), vec!["A=1", "B=2"]);
        assert_eq!(unit.first("Service", "User"), None);
        assert_eq!(
            unit.render(),
            "[Unit]\nDescription=web\n\n[Service]\nEnvironment=A=1\nEnvironment=B=2\n"
        );
    }
}
