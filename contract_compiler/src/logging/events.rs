//! Compiler log events

use super::codes::{self, Code, ErrorMetadata};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Placeholder codes for events logged without one
const UNCODED_WARNING: Code = Code::new("W000");
const UNCODED_INFO: Code = Code::new("I000");
const UNCODED_DEBUG: Code = Code::new("D000");

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub code: Code,
    pub message: String,
    /// Ordered so rendered lines are stable
    pub context: BTreeMap<String, String>,
}

fn bounded(message: &str) -> String {
    let limit = super::config::get_max_log_message_length();
    match message.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &message[..cut]),
        None => message.to_string(),
    }
}

impl LogEvent {
    fn new(level: LogLevel, code: Code, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            code,
            message: bounded(message),
            context: BTreeMap::new(),
        }
    }

    pub fn error(code: Code, message: &str) -> Self {
        Self::new(LogLevel::Error, code, message)
    }

    pub fn warning(message: &str) -> Self {
        Self::new(LogLevel::Warning, UNCODED_WARNING, message)
    }

    pub fn warning_with_code(code: Code, message: &str) -> Self {
        Self::new(LogLevel::Warning, code, message)
    }

    pub fn info(message: &str) -> Self {
        Self::new(LogLevel::Info, UNCODED_INFO, message)
    }

    /// Info-level event carrying a stage success code
    pub fn success(code: Code, message: &str) -> Self {
        Self::new(LogLevel::Info, code, message)
    }

    pub fn debug(message: &str) -> Self {
        Self::new(LogLevel::Debug, UNCODED_DEBUG, message)
    }

    pub fn with_context(mut self, key: &str, value: &str) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_service_id(self, service_id: &str) -> Self {
        self.with_context("service_id", service_id)
    }

    pub fn with_document_path(self, path: &str) -> Self {
        self.with_context("document", path)
    }

    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }

    pub fn is_warning(&self) -> bool {
        self.level == LogLevel::Warning
    }

    pub fn is_info(&self) -> bool {
        self.level == LogLevel::Info
    }

    pub fn is_debug(&self) -> bool {
        self.level == LogLevel::Debug
    }

    pub fn metadata(&self) -> Option<&'static ErrorMetadata> {
        codes::get_error_metadata(self.code.as_str())
    }

    pub fn requires_halt(&self) -> bool {
        self.metadata().is_some_and(|m| m.requires_halt)
    }

    pub fn is_recoverable(&self) -> bool {
        codes::is_recoverable(self.code.as_str())
    }

    pub fn severity(&self) -> &'static str {
        codes::get_severity(self.code.as_str()).as_str()
    }

    pub fn category(&self) -> &'static str {
        codes::get_category(self.code.as_str())
    }

    pub fn description(&self) -> &'static str {
        codes::get_description(self.code.as_str())
    }

    pub fn recommended_action(&self) -> &'static str {
        codes::get_action(self.code.as_str())
    }

    /// `[LEVEL] CODE [service_id] - message`
    pub fn format(&self) -> String {
        match self.context.get("service_id") {
            Some(service_id) => format!(
                "[{}] {} [{}] - {}",
                self.level.as_str(),
                self.code,
                service_id,
                self.message
            ),
            None => format!("[{}] {} - {}", self.level.as_str(), self.code, self.message),
        }
    }

    /// One-line form followed by registry metadata and context
    pub fn format_detailed(&self) -> String {
        let mut lines = vec![
            self.format(),
            format!("  Category: {}", self.category()),
            format!("  Severity: {}", self.severity()),
        ];

        if let Some(metadata) = self.metadata().filter(|_| self.is_error()) {
            lines.push(format!("  Recoverable: {}", metadata.recoverable));
            lines.push(format!("  Requires halt: {}", metadata.requires_halt));
        }
        if let Some(metadata) = self.metadata() {
            lines.push(format!("  Description: {}", metadata.description));
            lines.push(format!("  Recommended action: {}", metadata.recommended_action));
        }

        if !self.context.is_empty() {
            lines.push("  Context:".to_string());
            lines.extend(self.context.iter().map(|(k, v)| format!("    {}: {}", k, v)));
        }
        lines.join("\n")
    }

    pub fn format_json(&self) -> Result<String, serde_json::Error> {
        let mut value = json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "level": self.level.as_str(),
            "code": self.code,
            "message": self.message,
            "category": self.category(),
            "severity": self.severity(),
        });

        if let Some(metadata) = self.metadata().filter(|_| self.is_error()) {
            value["error_metadata"] = json!({
                "recoverable": metadata.recoverable,
                "requires_halt": metadata.requires_halt,
                "description": metadata.description,
                "recommended_action": metadata.recommended_action,
            });
        }
        if !self.context.is_empty() {
            value["context"] = serde_json::to_value(&self.context)?;
        }
        serde_json::to_string(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_event_creation() {
        let event = LogEvent::error(codes::input::DOCUMENT_NOT_FOUND, "Document not found");

        assert!(event.is_error());
        assert_eq!(event.code.as_str(), "E005");
        assert_eq!(event.category(), "Input");
    }

    #[test]
    fn test_event_with_context() {
        let event = LogEvent::error(codes::input::DOCUMENT_TOO_LARGE, "Document too large")
            .with_context("size", "1024")
            .with_service_id("web");

        assert_eq!(event.context.get("size"), Some(&"1024".to_string()));
        assert_eq!(event.format(), "[ERROR] E006 [web] - Document too large");
    }

    #[test]
    fn test_shred_failure_is_critical() {
        let event = LogEvent::error(codes::secrets::SHRED_FAILURE, "Shred failed");

        assert_eq!(event.severity(), "Critical");
        assert_eq!(event.category(), "Secrets");
        assert!(event.requires_halt());
        assert!(event.format_detailed().contains("Recommended action"));
    }

    #[test]
    fn test_uncoded_events_use_placeholders() {
        assert_eq!(LogEvent::warning("Generic warning").code.as_str(), "W000");
        assert_eq!(LogEvent::debug("trace").code.as_str(), "D000");
        let coded = LogEvent::warning_with_code(codes::policy::WARN_VIOLATION, "Waived");
        assert_eq!(coded.code.as_str(), "E061");
        assert!(coded.metadata().is_some());
    }

    #[test]
    fn test_long_messages_are_bounded() {
        let limit = super::super::config::get_max_log_message_length();
        let event = LogEvent::info(&"x".repeat(limit + 10));
        assert_eq!(event.message.len(), limit + 3);
        assert!(event.message.ends_with("..."));
    }

    #[test]
    fn test_json_formatting() {
        let event = LogEvent::error(codes::dependency::DEPENDENCY_CYCLE, "Cycle")
            .with_context("path", "a -> b -> a");

        let json = event.format_json().unwrap();
        assert!(json.contains("\"level\":\"ERROR\""));
        assert!(json.contains("\"code\":\"E044\""));
        assert!(json.contains("\"path\":\"a -> b -> a\""));
        assert!(json.contains("\"requires_halt\""));
    }
}
