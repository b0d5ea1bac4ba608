//! Contract document loading
//!
//! YAML and JSON documents are both converted into a `serde_json::Value`
//! tree so the validator walks a single representation.

use super::error::InputError;
use crate::config::compile_time::input::MAX_DOCUMENT_SIZE;
use crate::{log_debug, log_error};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "yml" | "yaml" => Some(DocumentFormat::Yaml),
            "json" => Some(DocumentFormat::Json),
            _ => None,
        }
    }
}

/// A parsed contract document still in value-tree form
#[derive(Debug, Clone, PartialEq)]
pub struct ContractDocument {
    pub path: PathBuf,
    pub value: Value,
}

impl ContractDocument {
    pub fn new(path: impl Into<PathBuf>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    /// The raw `service_id` if present, used to label errors before validation
    pub fn service_id_hint(&self) -> &str {
        self.value
            .get("service_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .unwrap_or("<unknown>")
    }
}

pub fn load_document(path: &Path) -> Result<ContractDocument, InputError> {
    let value = load_value(path)?;
    if !value.is_object() {
        return Err(InputError::NotAMapping {
            path: path.to_path_buf(),
        });
    }
    let document = ContractDocument::new(path, value);
    log_debug!("Contract document loaded",
        "path" => path.display().to_string(),
        "service_id" => document.service_id_hint());
    Ok(document)
}

/// Read a YAML or JSON file into a value tree, enforcing the size limit
pub fn load_value(path: &Path) -> Result<Value, InputError> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| InputError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;

    let metadata = fs::metadata(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            InputError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            InputError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    if metadata.len() > MAX_DOCUMENT_SIZE {
        log_error!(crate::logging::codes::input::DOCUMENT_TOO_LARGE, "Document exceeds size limit",
            "path" => path.display(),
            "size" => metadata.len());
        return Err(InputError::TooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: MAX_DOCUMENT_SIZE,
        });
    }

    let text = fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_value(path, &text, format)
}

fn parse_value(path: &Path, text: &str, format: DocumentFormat) -> Result<Value, InputError> {
    let parsed = match format {
        DocumentFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| InputError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

pub fn parse_document(
    path: &Path,
    text: &str,
    format: DocumentFormat,
) -> Result<ContractDocument, InputError> {
    let value = parse_value(path, text, format)?;
    if !value.is_object() {
        return Err(InputError::NotAMapping {
            path: path.to_path_buf(),
        });
    }
    Ok(ContractDocument::new(path, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    #[test]
    fn test_format_detection() {
        assert_eq!(DocumentFormat::from_path(Path::new("a/web.yml")), Some(DocumentFormat::Yaml));
        assert_eq!(DocumentFormat::from_path(Path::new("web.YAML")), Some(DocumentFormat::Yaml));
        assert_eq!(DocumentFormat::from_path(Path::new("web.json")), Some(DocumentFormat::Json));
        assert_eq!(DocumentFormat::from_path(Path::new("web.toml")), None);
        assert_eq!(DocumentFormat::from_path(Path::new("web")), None);
    }

    #[test]
    fn test_load_yaml_and_json() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();

        let yaml = dir.path().join("web.yml");
        fs::write(&yaml, "service_id: web\nruntime_templates: [container-compose]\n").unwrap();
        let doc = load_document(&yaml).unwrap();
        assert_eq!(doc.service_id_hint(), "web");

        let json = dir.path().join("db.json");
        fs::write(&json, r#"{"service_id": "db"}"#).unwrap();
        assert_eq!(load_document(&json).unwrap().service_id_hint(), "db");
    }

    #[test]
    fn test_load_errors() {
        let _ = crate::logging::init_global_logging();
        let dir = tempdir().unwrap();

        assert_matches!(
            load_document(&dir.path().join("absent.yml")),
            Err(InputError::NotFound { .. })
        );
        assert_matches!(
            load_document(&dir.path().join("web.txt")),
            Err(InputError::UnsupportedFormat { .. })
        );

        let list = dir.path().join("list.yml");
        fs::write(&list, "- one\n- two\n").unwrap();
        assert_matches!(load_document(&list), Err(InputError::NotAMapping { .. }));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{\"service_id\": ").unwrap();
        assert_matches!(load_document(&broken), Err(InputError::Parse { .. }));
    }

    #[test]
    fn test_service_id_hint_fallback() {
        let doc = ContractDocument::new("x.yml", serde_json::json!({"image": "a:1"}));
        assert_eq!(doc.service_id_hint(), "<unknown>");
    }
}
