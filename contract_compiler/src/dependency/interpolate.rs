//! `${deps.<service>.<KEY>}` references inside environment values

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{deps\.([A-Za-z0-9][A-Za-z0-9._-]*?)\.([A-Za-z_][A-Za-z0-9_]*)\}")
            .expect("static regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReference {
    pub service: String,
    pub key: String,
}

pub fn references(value: &str) -> Vec<ExportReference> {
    reference_pattern()
        .captures_iter(value)
        .map(|caps| ExportReference {
            service: caps[1].to_string(),
            key: caps[2].to_string(),
        })
        .collect()
}

/// Substitute every reference found in `exports`; unknown ones stay verbatim
pub fn interpolate(value: &str, exports: &BTreeMap<String, BTreeMap<String, String>>) -> String {
    reference_pattern()
        .replace_all(value, |caps: &Captures<'_>| {
            exports
                .get(&caps[1])
                .and_then(|keys| keys.get(&caps[2]))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_with_dotted_service_ids() {
        let refs = references("redis://${deps.cache.HOST}:${deps.cache.v2.PORT}/0");
        assert_eq!(
            refs,
            vec![
                ExportReference { service: "cache".to_string(), key: "HOST".to_string() },
                ExportReference { service: "cache.v2".to_string(), key: "PORT".to_string() },
            ]
        );
        assert!(references("${other.cache.HOST} $deps").is_empty());
    }

    #[test]
    fn test_interpolate() {
        let mut exports = BTreeMap::new();
        exports.insert(
            "db".to_string(),
            BTreeMap::from([("URL".to_string(), "postgres://db:5432".to_string())]),
        );
        assert_eq!(interpolate("${deps.db.URL}/app", &exports), "postgres://db:5432/app");
        assert_eq!(interpolate("${deps.db.USER}", &exports), "${deps.db.USER}");
    }
}
