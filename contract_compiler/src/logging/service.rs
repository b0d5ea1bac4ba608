//! Logging service and logger backends
//!
//! Every backend writes to stderr or a file. Stdout belongs to the CLI's
//! artifact and report output.

use super::codes::Code;
use super::config;
use super::events::{LogEvent, LogLevel};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub trait Logger: Send + Sync {
    fn log(&self, event: &LogEvent);
}

// Loggers keep working after a panicking thread poisoned their lock
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Level filter in front of one logger
pub struct LoggingService {
    logger: Arc<dyn Logger>,
    min_level: LogLevel,
}

impl LoggingService {
    pub fn new(logger: Arc<dyn Logger>, min_level: LogLevel) -> Self {
        Self { logger, min_level }
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level <= self.min_level
    }

    pub fn log_event(&self, event: LogEvent) {
        if self.should_log(event.level) {
            self.logger.log(&event);
        }
    }

    fn log_with(&self, mut event: LogEvent, context: Vec<(&str, &str)>) {
        for (key, value) in context {
            event = event.with_context(key, value);
        }
        self.log_event(event);
    }

    pub fn log_error(&self, code: Code, message: &str) {
        self.log_event(LogEvent::error(code, message));
    }

    pub fn log_error_with_context(&self, code: Code, message: &str, context: Vec<(&str, &str)>) {
        self.log_with(LogEvent::error(code, message), context);
    }

    pub fn log_success_with_context(&self, code: Code, message: &str, context: Vec<(&str, &str)>) {
        self.log_with(LogEvent::success(code, message), context);
    }

    pub fn log_info(&self, message: &str) {
        self.log_event(LogEvent::info(message));
    }

    pub fn log_warning(&self, message: &str) {
        self.log_event(LogEvent::warning(message));
    }

    pub fn log_debug(&self, message: &str) {
        self.log_event(LogEvent::debug(message));
    }
}

/// Human-readable lines on stderr
pub struct ConsoleLogger {
    min_level: LogLevel,
}

impl ConsoleLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, event: &LogEvent) {
        if event.level <= self.min_level {
            eprintln!("{}", event.format());
        }
    }
}

/// One JSON object per line on stderr
pub struct StructuredLogger {
    min_level: LogLevel,
}

impl StructuredLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl Logger for StructuredLogger {
    fn log(&self, event: &LogEvent) {
        if event.level <= self.min_level {
            eprintln!("{}", event.format_json().unwrap_or_else(|_| event.format()));
        }
    }
}

/// Forwards compiler events into the `log` facade, so a host binary can
/// route them through whichever `log` implementation it installs.
#[cfg(feature = "log-facade")]
pub struct FacadeLogger;

#[cfg(feature = "log-facade")]
impl Logger for FacadeLogger {
    fn log(&self, event: &LogEvent) {
        let level = match event.level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        };
        if !log::log_enabled!(target: "contract_compiler", level) {
            return;
        }
        let context: Vec<String> = event.context.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        if context.is_empty() {
            log::log!(target: "contract_compiler", level, "{} {}", event.code, event.message);
        } else {
            log::log!(target: "contract_compiler", level, "{} {} ({})", event.code, event.message, context.join(" "));
        }
    }
}

/// Bounded in-memory ring of events, for tests
pub struct MemoryLogger {
    events: Mutex<VecDeque<LogEvent>>,
    capacity: usize,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::with_capacity(config::get_error_buffer_size())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn events(&self) -> Vec<LogEvent> {
        lock(&self.events).iter().cloned().collect()
    }

    pub fn event_count(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    pub fn errors(&self) -> Vec<LogEvent> {
        self.matching(LogEvent::is_error)
    }

    pub fn with_code(&self, code: Code) -> Vec<LogEvent> {
        self.matching(|e| e.code == code)
    }

    pub fn has_error_with_code(&self, code: Code) -> bool {
        lock(&self.events).iter().any(|e| e.is_error() && e.code == code)
    }

    pub fn has_success_with_code(&self, code: Code) -> bool {
        lock(&self.events).iter().any(|e| e.is_info() && e.code == code)
    }

    pub fn critical_errors(&self) -> Vec<LogEvent> {
        self.matching(|e| e.is_error() && e.requires_halt())
    }

    pub fn summary(&self) -> EventSummary {
        let events = lock(&self.events);
        let mut summary = EventSummary {
            total_count: events.len(),
            ..EventSummary::default()
        };
        for event in events.iter() {
            match event.level {
                LogLevel::Error => summary.error_count += 1,
                LogLevel::Warning => summary.warning_count += 1,
                LogLevel::Info => summary.info_count += 1,
                LogLevel::Debug => summary.debug_count += 1,
            }
            if event.is_error() && event.requires_halt() {
                summary.critical_count += 1;
            }
        }
        summary
    }

    fn matching(&self, predicate: impl Fn(&LogEvent) -> bool) -> Vec<LogEvent> {
        lock(&self.events).iter().filter(|e| predicate(e)).cloned().collect()
    }
}

impl Default for MemoryLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, event: &LogEvent) {
        let mut events = lock(&self.events);
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventSummary {
    pub total_count: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub debug_count: usize,
    pub critical_count: usize,
}

impl EventSummary {
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn has_critical_errors(&self) -> bool {
        self.critical_count > 0
    }
}

/// Appends events to a file held open for the process lifetime
pub struct FileLogger {
    file: Mutex<File>,
    min_level: LogLevel,
    structured: bool,
}

impl FileLogger {
    pub fn new<P: AsRef<Path>>(path: P, min_level: LogLevel, structured: bool) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            min_level,
            structured,
        })
    }
}

impl Logger for FileLogger {
    fn log(&self, event: &LogEvent) {
        if event.level > self.min_level {
            return;
        }
        let line = if self.structured {
            event.format_json().unwrap_or_else(|_| event.format())
        } else {
            event.format()
        };
        // A failed write cannot itself be logged
        let _ = writeln!(lock(&self.file), "{}", line);
    }
}

/// Fans one event out to several loggers
pub struct MultiLogger {
    loggers: Vec<Arc<dyn Logger>>,
    min_level: LogLevel,
}

impl MultiLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            loggers: Vec::new(),
            min_level,
        }
    }

    pub fn add_logger(&mut self, logger: Arc<dyn Logger>) {
        self.loggers.push(logger);
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.add_logger(logger);
        self
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl Logger for MultiLogger {
    fn log(&self, event: &LogEvent) {
        if event.level <= self.min_level {
            for logger in &self.loggers {
                logger.log(event);
            }
        }
    }
}

/// Service built from the runtime logging preferences
pub fn create_configured_service() -> LoggingService {
    let min_level = config::get_min_log_level();
    let mut sink = MultiLogger::new(min_level);
    if config::use_console_logging() {
        if config::use_structured_logging() {
            sink.add_logger(Arc::new(StructuredLogger::new(min_level)));
        } else {
            sink.add_logger(Arc::new(ConsoleLogger::new(min_level)));
        }
    }
    LoggingService::new(Arc::new(sink), min_level)
}
