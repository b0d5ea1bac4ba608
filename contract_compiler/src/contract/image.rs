use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// Parsed container image reference: `repository[:tag][@sha256:<64 hex>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageReference {
    pub raw: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

fn repository_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:[._\-][a-z0-9]+)*(?::[0-9]+)?(?:/[a-z0-9]+(?:[._\-][a-z0-9]+)*)*$")
            .expect("static regex")
    })
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]{0,127}$").expect("static regex"))
}

fn digest_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^sha256:[0-9a-f]{64}$").expect("static regex"))
}

impl ImageReference {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("image reference is empty".to_string());
        }

        let (name, digest) = match trimmed.split_once('@') {
            Some((name, digest)) => {
                if !digest_pattern().is_match(digest) {
                    return Err(format!(
                        "digest '{}' must be sha256: followed by 64 lowercase hex characters",
                        digest
                    ));
                }
                (name, Some(digest.to_string()))
            }
            None => (trimmed, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a registry port
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match name[last_slash..].rfind(':') {
            Some(offset) => {
                let split = last_slash + offset;
                (&name[..split], Some(name[split + 1..].to_string()))
            }
            None => (name, None),
        };

        if !repository_pattern().is_match(repository) {
            return Err(format!("repository '{}' is not a valid image name", repository));
        }
        if let Some(tag) = &tag {
            if !tag_pattern().is_match(tag) {
                return Err(format!("tag '{}' is not a valid image tag", tag));
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    pub fn has_digest(&self) -> bool {
        self.digest.is_some()
    }

    /// Pinned means a content digest, or an explicit tag other than `latest`
    pub fn is_pinned(&self) -> bool {
        self.has_digest() || matches!(self.tag.as_deref(), Some(tag) if tag != "latest")
    }

    /// Registry host, when the first path component looks like one
    pub fn registry(&self) -> Option<&str> {
        let (first, rest) = self.repository.split_once('/')?;
        if rest.is_empty() {
            return None;
        }
        (first.contains('.') || first.contains(':') || first == "localhost").then_some(first)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_parse_digest_reference() {
        let image = ImageReference::parse(&format!("registry/x@{}", DIGEST)).unwrap();
        assert_eq!(image.repository, "registry/x");
        assert_eq!(image.tag, None);
        assert_eq!(image.digest.as_deref(), Some(DIGEST));
        assert!(image.is_pinned());
    }

    #[test]
    fn test_registry_port_is_not_a_tag() {
        let image = ImageReference::parse("registry.local:5000/team/api").unwrap();
        assert_eq!(image.repository, "registry.local:5000/team/api");
        assert_eq!(image.tag, None);
        assert_eq!(image.registry(), Some("registry.local:5000"));
        assert!(!image.is_pinned());
    }

    #[test]
    fn test_latest_tag_is_not_pinned() {
        let latest = ImageReference::parse("registry/x:latest").unwrap();
        assert!(!latest.is_pinned());

        let versioned = ImageReference::parse("registry/x:1.4.2").unwrap();
        assert!(versioned.is_pinned());
        assert_eq!(versioned.registry(), None);
    }

    #[test]
    fn test_invalid_references() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("Registry/X").is_err());
        assert!(ImageReference::parse("registry/x@sha256:abc").is_err());
        assert!(ImageReference::parse("registry/x:bad tag").is_err());
    }
}
