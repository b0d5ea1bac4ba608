//! Error collector for batch compiles with cargo-style output
//!
//! Events are grouped by the contract document they belong to.

use super::events::LogEvent;
use crate::config::compile_time::logging::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Contract currently being processed on a thread
#[derive(Debug, Clone)]
pub struct ContractContext {
    pub service_id: String,
    pub document: PathBuf,
    pub start_time: Instant,
}

impl ContractContext {
    pub fn new(service_id: &str, document: PathBuf) -> Self {
        Self {
            service_id: service_id.to_string(),
            document,
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Summary of batch processing results
#[derive(Debug, Clone, Default)]
pub struct ProcessingSummary {
    pub total_documents: usize,
    pub clean_documents: usize,
    pub failed_documents: usize,
    pub documents_with_warnings: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
    pub total_processing_time: Duration,
}

impl ProcessingSummary {
    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }

    pub fn has_warnings(&self) -> bool {
        self.total_warnings > 0
    }
}

/// Thread-safe error collector for batch processing
pub struct ErrorCollector {
    document_events: Mutex<BTreeMap<PathBuf, Vec<LogEvent>>>,
    processing_start: Instant,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self {
            document_events: Mutex::new(BTreeMap::new()),
            processing_start: Instant::now(),
        }
    }

    fn events(&self) -> MutexGuard<'_, BTreeMap<PathBuf, Vec<LogEvent>>> {
        self.document_events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an event for a specific document
    pub fn record_event(&self, document: &Path, event: LogEvent) {
        let mut events = self.events();

        if events.len() >= MAX_ERROR_COLLECTION && !events.contains_key(document) {
            return;
        }

        let document_events = events.entry(document.to_path_buf()).or_default();
        if document_events.len() < MAX_LOG_EVENTS_PER_DOCUMENT {
            document_events.push(event);
        } else if document_events.len() == MAX_LOG_EVENTS_PER_DOCUMENT {
            document_events.push(LogEvent::warning(&format!(
                "Too many events for document (limit: {})",
                MAX_LOG_EVENTS_PER_DOCUMENT
            )));
        }
    }

    /// Make sure a document is listed even when it produced no events
    pub fn record_document(&self, document: &Path) {
        self.events().entry(document.to_path_buf()).or_default();
    }

    pub fn get_document_events(&self, document: &Path) -> Vec<LogEvent> {
        self.events().get(document).cloned().unwrap_or_default()
    }

    pub fn get_document_errors(&self, document: &Path) -> Vec<LogEvent> {
        self.events()
            .get(document)
            .map(|events| events.iter().filter(|e| e.is_error()).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_all_document_events(&self) -> BTreeMap<PathBuf, Vec<LogEvent>> {
        self.events().clone()
    }

    pub fn get_summary(&self) -> ProcessingSummary {
        let events = self.events();

        let mut summary = ProcessingSummary {
            total_documents: events.len(),
            total_processing_time: self.processing_start.elapsed(),
            ..Default::default()
        };

        for document_events in events.values() {
            let errors = document_events.iter().filter(|e| e.is_error()).count();
            let warnings = document_events.iter().filter(|e| e.is_warning()).count();

            if errors > 0 {
                summary.failed_documents += 1;
            } else if warnings > 0 {
                summary.documents_with_warnings += 1;
            } else {
                summary.clean_documents += 1;
            }

            summary.total_errors += errors;
            summary.total_warnings += warnings;
        }

        summary
    }

    pub fn clear(&self) {
        self.events().clear();
    }

    pub fn total_event_count(&self) -> usize {
        self.events().values().map(Vec::len).sum()
    }
}

impl Default for ErrorCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Format collected events grouped by document, cargo style
pub fn format_cargo_style_errors(collector: &ErrorCollector) -> String {
    let mut output = String::new();

    for (document, events) in &collector.get_all_document_events() {
        let errors: Vec<_> = events.iter().filter(|e| e.is_error()).collect();
        let warnings: Vec<_> = events.iter().filter(|e| e.is_warning()).collect();

        if errors.is_empty() && warnings.is_empty() {
            continue;
        }

        output.push_str(&format!("Checking {}...\n", document.display()));

        for event in errors {
            output.push_str(&format!("error[{}]: {}\n", event.code, event.message));
            output.push_str(&format!(
                "  = severity: {}, category: {}\n",
                event.severity(),
                event.category()
            ));
            push_context(&mut output, event);

            let action = event.recommended_action();
            if action != "No specific action available" {
                output.push_str(&format!("  = help: {}\n", action));
            }
        }

        for event in warnings {
            output.push_str(&format!("warning[{}]: {}\n", event.code, event.message));
            push_context(&mut output, event);
        }

        output.push('\n');
    }

    let summary = collector.get_summary();
    if summary.total_errors > 0 {
        output.push_str(&format!("\nTotal errors: {}\n", summary.total_errors));
    }
    if summary.total_warnings > 0 {
        output.push_str(&format!("Total warnings: {}\n", summary.total_warnings));
    }

    output
}

fn push_context(output: &mut String, event: &LogEvent) {
    for (key, value) in &event.context {
        if key != "document" {
            output.push_str(&format!("  = {}: {}\n", key, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::codes;

    #[test]
    fn test_events_grouped_by_document() {
        let collector = ErrorCollector::new();
        let web = PathBuf::from("contracts/web.yml");
        let api = PathBuf::from("contracts/api.yml");

        collector.record_event(&web, LogEvent::error(codes::schema::MISSING_FIELD, "missing image"));
        collector.record_event(&web, LogEvent::warning("capabilities added"));
        collector.record_document(&api);

        let summary = collector.get_summary();
        assert_eq!(summary.total_documents, 2);
        assert_eq!(summary.failed_documents, 1);
        assert_eq!(summary.clean_documents, 1);
        assert_eq!(collector.get_document_errors(&web).len(), 1);
    }

    #[test]
    fn test_per_document_limit() {
        let collector = ErrorCollector::new();
        let doc = PathBuf::from("noisy.yml");
        for _ in 0..(MAX_LOG_EVENTS_PER_DOCUMENT + 10) {
            collector.record_event(&doc, LogEvent::info("event"));
        }
        assert_eq!(
            collector.get_document_events(&doc).len(),
            MAX_LOG_EVENTS_PER_DOCUMENT + 1
        );
    }

    #[test]
    fn test_cargo_style_output() {
        let collector = ErrorCollector::new();
        let doc = PathBuf::from("web.yml");
        collector.record_event(
            &doc,
            LogEvent::error(codes::schema::SECRET_SCOPE_MISSING, "secrets need a namespace")
                .with_context("field", "service_namespace"),
        );

        let output = format_cargo_style_errors(&collector);
        assert!(output.contains("Checking web.yml..."));
        assert!(output.contains("error[E025]"));
        assert!(output.contains("= field: service_namespace"));
        assert!(output.contains("Total errors: 1"));
    }
}
