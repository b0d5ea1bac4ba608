//! Text encodings of staged secret material

use super::plan::SecretStorePlan;
use crate::contract::ServiceContract;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '#' | '\\'))
}

/// `NAME=value` lines; values with special characters are double-quoted
pub fn env_file_contents<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (name, value) in entries {
        out.push_str(name);
        out.push('=');
        if needs_quoting(value) {
            out.push('"');
            for c in value.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    other => out.push(other),
                }
            }
            out.push('"');
        } else {
            out.push_str(value);
        }
        out.push('\n');
    }
    out
}

fn secret_object(name: &str, contract: &ServiceContract, data: Map<String, Value>) -> Value {
    let mut metadata = json!({
        "name": name,
        "labels": {
            "app.kubernetes.io/name": contract.service_name,
            "app.kubernetes.io/managed-by": "contractc"
        }
    });
    if let Some(namespace) = &contract.service_namespace {
        metadata["namespace"] = json!(namespace);
    }
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": metadata,
        "type": "Opaque",
        "data": data
    })
}

/// Two-document manifest: the env Secret and the files Secret
pub fn secret_store_manifest(store: &SecretStorePlan, contract: &ServiceContract) -> Result<String, serde_yaml::Error> {
    let env_data: Map<String, Value> = contract
        .secrets
        .env
        .iter()
        .map(|s| (s.name.clone(), json!(STANDARD.encode(s.value.as_bytes()))))
        .collect();
    let file_data: Map<String, Value> = contract
        .secrets
        .files
        .iter()
        .map(|s| (s.name.clone(), json!(STANDARD.encode(s.value.as_bytes()))))
        .collect();

    let mut text = String::new();
    for (name, data) in [
        (&store.env_secret_name, env_data),
        (&store.files_secret_name, file_data),
    ] {
        if data.is_empty() {
            continue;
        }
        text.push_str("---\n");
        text.push_str(&serde_yaml::to_string(&secret_object(name, contract, data))?);
    }
    Ok(text)
}
