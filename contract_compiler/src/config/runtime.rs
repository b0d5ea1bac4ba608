// RUNTIME PREFERENCES (operator experience)

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use super::compile_time::batch::MAX_WORKER_THREADS;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerPreferences {
    /// Root directory for staged secret material
    pub staging_root: PathBuf,

    /// Render worker threads (clamped to the compile-time maximum)
    pub worker_threads: usize,

    /// Treat warn-severity violations as blocking
    pub fail_on_warn: bool,

    /// Default mode for staged file secrets, in octal notation
    pub secret_file_mode: String,
}

impl Default for CompilerPreferences {
    fn default() -> Self {
        Self {
            staging_root: env::var(env_vars::STAGING_ROOT)
                .ok()
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("contractc-staging")),
            worker_threads: env::var(env_vars::WORKER_THREADS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(num_cpus::get),
            fail_on_warn: env::var(env_vars::FAIL_ON_WARN)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            secret_file_mode: env::var(env_vars::SECRET_FILE_MODE)
                .ok()
                .filter(|v| parse_octal_mode(v).is_some())
                .unwrap_or_else(|| "0400".to_string()),
        }
    }
}

impl CompilerPreferences {
    /// Worker count actually used by the pool
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.clamp(1, MAX_WORKER_THREADS)
    }

    pub fn secret_file_mode_bits(&self) -> u32 {
        parse_octal_mode(&self.secret_file_mode).unwrap_or(0o400)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingPreferences {
    /// Whether to use structured JSON logging
    pub use_structured_logging: bool,

    /// Whether to enable console output
    pub enable_console_logging: bool,

    /// Preferred minimum log level (within security constraints)
    pub min_log_level: LogLevel,

    /// Whether to include service_id and document path in log messages
    pub include_contract_context: bool,

    /// Whether to print a cargo-style summary at the end of a batch
    pub enable_cargo_style_output: bool,
}

impl Default for LoggingPreferences {
    fn default() -> Self {
        Self {
            use_structured_logging: env::var(env_vars::LOGGING_USE_STRUCTURED)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            enable_console_logging: env::var(env_vars::LOGGING_ENABLE_CONSOLE)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            min_log_level: env::var(env_vars::LOGGING_MIN_LEVEL)
                .ok()
                .and_then(|v| parse_log_level(&v))
                .unwrap_or(LogLevel::Info),
            include_contract_context: env::var(env_vars::LOGGING_INCLUDE_CONTRACT_CONTEXT)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            enable_cargo_style_output: env::var(env_vars::LOGGING_CARGO_STYLE)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
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

    pub fn to_events_log_level(&self) -> crate::logging::events::LogLevel {
        match self {
            LogLevel::Error => crate::logging::events::LogLevel::Error,
            LogLevel::Warning => crate::logging::events::LogLevel::Warning,
            LogLevel::Info => crate::logging::events::LogLevel::Info,
            LogLevel::Debug => crate::logging::events::LogLevel::Debug,
        }
    }

    pub fn from_events_log_level(level: crate::logging::events::LogLevel) -> Self {
        match level {
            crate::logging::events::LogLevel::Error => LogLevel::Error,
            crate::logging::events::LogLevel::Warning => LogLevel::Warning,
            crate::logging::events::LogLevel::Info => LogLevel::Info,
            crate::logging::events::LogLevel::Debug => LogLevel::Debug,
        }
    }
}

/// Parse log level from string (used for environment variables)
pub fn parse_log_level(level: &str) -> Option<LogLevel> {
    match level.to_lowercase().as_str() {
        "error" | "0" => Some(LogLevel::Error),
        "warning" | "warn" | "1" => Some(LogLevel::Warning),
        "info" | "2" => Some(LogLevel::Info),
        "debug" | "3" => Some(LogLevel::Debug),
        _ => None,
    }
}

/// Parse a file mode such as `0400` or `600`
pub fn parse_octal_mode(mode: &str) -> Option<u32> {
    let digits = mode.trim().trim_start_matches("0o");
    if digits.is_empty() || digits.len() > 4 {
        return None;
    }
    u32::from_str_radix(digits, 8).ok().filter(|m| *m <= 0o7777)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read runtime config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid runtime config {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub compiler: CompilerPreferences,
    pub logging: LoggingPreferences,
}

impl RuntimeConfig {
    /// Load overrides from a TOML file. Missing keys keep their environment defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }
}

/// Environment variable names for configuration
pub mod env_vars {
    // Compiler
    pub const STAGING_ROOT: &str = "CONTRACTC_STAGING_ROOT";
    pub const WORKER_THREADS: &str = "CONTRACTC_WORKER_THREADS";
    pub const FAIL_ON_WARN: &str = "CONTRACTC_FAIL_ON_WARN";
    pub const SECRET_FILE_MODE: &str = "CONTRACTC_SECRET_FILE_MODE";

    // Logging
    pub const LOGGING_USE_STRUCTURED: &str = "CONTRACTC_LOGGING_USE_STRUCTURED";
    pub const LOGGING_ENABLE_CONSOLE: &str = "CONTRACTC_LOGGING_ENABLE_CONSOLE";
    pub const LOGGING_MIN_LEVEL: &str = "CONTRACTC_LOGGING_MIN_LEVEL";
    pub const LOGGING_INCLUDE_CONTRACT_CONTEXT: &str = "CONTRACTC_LOGGING_INCLUDE_CONTRACT_CONTEXT";
    pub const LOGGING_CARGO_STYLE: &str = "CONTRACTC_LOGGING_CARGO_STYLE";
}
