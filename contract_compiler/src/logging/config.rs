//! Logging configuration: compile-time bounds plus runtime preferences
//!
//! Bounds come from the generated constants; runtime preferences can only
//! tighten or select within them.

use crate::config::compile_time::logging::{
    LOG_BUFFER_SIZE, MAX_LOG_EVENTS_PER_DOCUMENT, MAX_LOG_MESSAGE_LENGTH, SECURITY_MIN_LOG_LEVEL,
};
use crate::config::runtime::LoggingPreferences;
use crate::logging::events::LogLevel;
use std::sync::OnceLock;

static RUNTIME_PREFERENCES: OnceLock<LoggingPreferences> = OnceLock::new();

/// First call wins; later calls report an error
pub fn init_runtime_preferences(preferences: LoggingPreferences) -> Result<(), String> {
    RUNTIME_PREFERENCES
        .set(preferences)
        .map_err(|_| "Runtime logging preferences already initialized".to_string())
}

fn preferences() -> &'static LoggingPreferences {
    static DEFAULTS: OnceLock<LoggingPreferences> = OnceLock::new();
    RUNTIME_PREFERENCES
        .get()
        .unwrap_or_else(|| DEFAULTS.get_or_init(LoggingPreferences::default))
}

/// The preferred level, never quieter than the security floor
pub fn get_min_log_level() -> LogLevel {
    preferences()
        .min_log_level
        .to_events_log_level()
        .max(get_security_log_level())
}

pub fn get_security_log_level() -> LogLevel {
    match SECURITY_MIN_LOG_LEVEL {
        0 => LogLevel::Error,
        1 => LogLevel::Warning,
        _ => LogLevel::Info,
    }
}

pub fn use_structured_logging() -> bool {
    preferences().use_structured_logging
}

pub fn use_console_logging() -> bool {
    preferences().enable_console_logging
}

pub fn use_cargo_style_output() -> bool {
    preferences().enable_cargo_style_output
}

pub fn include_contract_context() -> bool {
    preferences().include_contract_context
}

pub fn get_error_buffer_size() -> usize {
    LOG_BUFFER_SIZE
}

pub fn get_max_log_message_length() -> usize {
    MAX_LOG_MESSAGE_LENGTH
}

pub fn validate_config() -> Result<(), String> {
    if !(100..=100_000).contains(&LOG_BUFFER_SIZE) {
        return Err(format!("Log buffer size out of range: {}", LOG_BUFFER_SIZE));
    }
    if MAX_LOG_EVENTS_PER_DOCUMENT > LOG_BUFFER_SIZE {
        return Err("Max log events per document exceeds total buffer size".to_string());
    }
    if MAX_LOG_MESSAGE_LENGTH < 80 {
        return Err(format!("Max log message length too small: {}", MAX_LOG_MESSAGE_LENGTH));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(validate_config().is_ok());
    }

    #[test]
    fn test_min_level_never_below_security_level() {
        assert!(get_min_log_level() >= get_security_log_level());
    }
}
