//! Global logging for the contract compiler
//!
//! Thread-safe global logging with per-contract context, cargo-style
//! batch summaries and a macro interface. Secret values never enter log
//! events; only secret names and counts do.

pub mod codes;
pub mod collector;
pub mod config;
pub mod events;
pub mod macros;
pub mod service;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

pub use codes::Code;
pub use collector::{ContractContext, ErrorCollector, ProcessingSummary};
pub use events::{LogEvent, LogLevel};
#[cfg(feature = "log-facade")]
pub use service::FacadeLogger;
pub use service::{ConsoleLogger, Logger, LoggingService, MemoryLogger, StructuredLogger};

// ============================================================================
// GLOBAL STATE
// ============================================================================

static GLOBAL_LOGGER: OnceLock<Arc<LoggingService>> = OnceLock::new();
static GLOBAL_ERROR_COLLECTOR: OnceLock<Arc<ErrorCollector>> = OnceLock::new();

thread_local! {
    static CONTRACT_CONTEXT: RefCell<Option<ContractContext>> = const { RefCell::new(None) };
}

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Initialize global logging system
pub fn init_global_logging() -> Result<(), String> {
    config::validate_config().map_err(|e| format!("Configuration validation failed: {}", e))?;

    // Every stage must have registry metadata before anything logs
    let stage_codes = ["ERR001", "E005", "E020", "E040", "E060", "E080", "E100"];
    for &code in &stage_codes {
        if codes::get_description(code) == "Unknown error" {
            return Err(format!("Missing metadata for error code: {}", code));
        }
    }

    let logging_service = Arc::new(service::create_configured_service());
    install(logging_service.clone())?;

    logging_service.log_event(LogEvent::success(
        codes::success::SYSTEM_INITIALIZATION_COMPLETED,
        "Global logging system initialized",
    ));

    Ok(())
}

/// Initialize with a caller-supplied service (CLI hosts and tests)
pub fn init_global_logging_with_service(service: Arc<LoggingService>) -> Result<(), String> {
    install(service)
}

fn install(service: Arc<LoggingService>) -> Result<(), String> {
    GLOBAL_LOGGER
        .set(service)
        .map_err(|_| "Global logger already initialized".to_string())?;

    GLOBAL_ERROR_COLLECTOR
        .set(Arc::new(ErrorCollector::new()))
        .map_err(|_| "Global error collector already initialized".to_string())?;

    Ok(())
}

pub fn is_initialized() -> bool {
    GLOBAL_LOGGER.get().is_some() && GLOBAL_ERROR_COLLECTOR.get().is_some()
}

// ============================================================================
// GLOBAL ACCESS
// ============================================================================

pub fn try_get_global_logger() -> Option<&'static LoggingService> {
    GLOBAL_LOGGER.get().map(|service| service.as_ref())
}

pub fn try_get_global_error_collector() -> Option<&'static ErrorCollector> {
    GLOBAL_ERROR_COLLECTOR
        .get()
        .map(|collector| collector.as_ref())
}

// ============================================================================
// CONTRACT CONTEXT MANAGEMENT
// ============================================================================

/// Set contract context for current thread
pub fn set_contract_context(service_id: &str, document: PathBuf) {
    let context = ContractContext::new(service_id, document);

    if let Some(collector) = try_get_global_error_collector() {
        collector.record_document(&context.document);
    }

    CONTRACT_CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = Some(context);
    });
}

pub fn clear_contract_context() {
    CONTRACT_CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = None;
    });
}

/// Execute function with contract context. Context is restored afterwards,
/// so nested calls on one thread keep the outer contract.
pub fn with_contract_context<F, R>(service_id: &str, document: &Path, f: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = get_current_contract_context();
    set_contract_context(service_id, document.to_path_buf());
    let result = f();
    CONTRACT_CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = previous;
    });
    result
}

pub fn get_current_contract_context() -> Option<ContractContext> {
    CONTRACT_CONTEXT.with(|ctx| ctx.borrow().clone())
}

fn attach_context(mut event: LogEvent, context: Vec<(&str, &str)>) -> LogEvent {
    for (key, value) in context {
        event = event.with_context(key, value);
    }

    if config::include_contract_context() {
        if let Some(contract) = get_current_contract_context() {
            if !event.context.contains_key("service_id") {
                event = event.with_service_id(&contract.service_id);
            }
            event = event.with_document_path(&contract.document.display().to_string());
        }
    }

    event
}

fn dispatch(event: LogEvent) {
    let collect = event.is_error() || event.is_warning();
    let document = get_current_contract_context().map(|ctx| ctx.document);

    if collect {
        if let (Some(document), Some(collector)) = (&document, try_get_global_error_collector()) {
            collector.record_event(document, event.clone());
        }
    }

    if let Some(logger) = try_get_global_logger() {
        logger.log_event(event);
    }
}

// ============================================================================
// MACRO SUPPORT FUNCTIONS
// ============================================================================

pub fn log_error_with_context(code: Code, message: &str, context: Vec<(&str, &str)>) {
    dispatch(attach_context(LogEvent::error(code, message), context));
}

pub fn log_success_with_context(code: Code, message: &str, context: Vec<(&str, &str)>) {
    dispatch(attach_context(LogEvent::success(code, message), context));
}

pub fn log_info_with_context(message: &str, context: Vec<(&str, &str)>) {
    dispatch(attach_context(LogEvent::info(message), context));
}

pub fn log_warning_with_context(code: Option<Code>, message: &str, context: Vec<(&str, &str)>) {
    let event = match code {
        Some(code) => LogEvent::warning_with_code(code, message),
        None => LogEvent::warning(message),
    };
    dispatch(attach_context(event, context));
}

pub fn log_debug_with_context(message: &str, context: Vec<(&str, &str)>) {
    dispatch(attach_context(LogEvent::debug(message), context));
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

pub fn get_processing_summary() -> ProcessingSummary {
    try_get_global_error_collector()
        .map(|collector| collector.get_summary())
        .unwrap_or_default()
}

pub fn get_document_errors(document: &Path) -> Vec<LogEvent> {
    try_get_global_error_collector()
        .map(|collector| collector.get_document_errors(document))
        .unwrap_or_default()
}

/// Print cargo-style summary
pub fn print_cargo_style_summary() {
    if !config::use_cargo_style_output() {
        return;
    }
    if let Some(collector) = try_get_global_error_collector() {
        eprint!("{}", collector::format_cargo_style_errors(collector));
    }
}

pub fn clear_error_collection() {
    if let Some(collector) = try_get_global_error_collector() {
        collector.clear();
    }
}

// ============================================================================
// SAFE FALLBACK LOGGING
// ============================================================================

/// Safe error logging (won't panic if uninitialized)
pub fn safe_log_error(code: Code, message: &str) {
    if let Some(logger) = try_get_global_logger() {
        logger.log_event(LogEvent::error(code, message));
    } else {
        eprintln!("[ERROR] FALLBACK: [{}] {}", code.as_str(), message);
    }
}

/// Critical errors go to stderr even when a logger is installed
pub fn safe_log_critical(code: Code, message: &str) {
    if let Some(logger) = try_get_global_logger() {
        logger.log_event(LogEvent::error(code, message));
    }
    eprintln!("CRITICAL ERROR [{}]: {}", code.as_str(), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_logging_initialization() {
        let _ = init_global_logging();
        assert!(is_initialized());
        assert!(init_global_logging().is_err());
    }

    #[test]
    fn test_contract_context_management() {
        assert!(get_current_contract_context().is_none());

        set_contract_context("web", PathBuf::from("web.yml"));
        let context = get_current_contract_context().unwrap();
        assert_eq!(context.service_id, "web");

        clear_contract_context();
        assert!(get_current_contract_context().is_none());
    }

    #[test]
    fn test_with_contract_context_restores_outer() {
        let result = with_contract_context("outer", Path::new("outer.yml"), || {
            with_contract_context("inner", Path::new("inner.yml"), || {
                assert_eq!(get_current_contract_context().unwrap().service_id, "inner");
            });
            get_current_contract_context().unwrap().service_id
        });

        assert_eq!(result, "outer");
        assert!(get_current_contract_context().is_none());
    }

    #[test]
    fn test_errors_are_collected_per_document() {
        let _ = init_global_logging();
        let document = PathBuf::from("collector-context.yml");

        with_contract_context("cache", &document, || {
            log_error_with_context(codes::schema::MISSING_FIELD, "missing image", vec![]);
        });

        assert_eq!(get_document_errors(&document).len(), 1);
    }

    #[test]
    fn test_safe_logging() {
        safe_log_error(codes::system::INTERNAL_ERROR, "Test error");
        safe_log_critical(codes::secrets::SHRED_FAILURE, "Test critical error");
    }
}
