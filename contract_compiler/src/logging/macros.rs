//! Logging macros taking a `Code` and `"key" => value` context
//!
//! Context values only need `Display`; they are formatted once, before the
//! event is built.

#[doc(hidden)]
#[macro_export]
macro_rules! __log_with_context {
    ($sink:expr $(, $key:expr => $value:expr)*) => {{
        let owned: Vec<(&str, String)> = vec![$(($key, format!("{}", $value))),*];
        ($sink)(owned.iter().map(|(k, v)| (*k, v.as_str())).collect::<Vec<(&str, &str)>>())
    }};
}

#[macro_export]
macro_rules! log_error {
    ($code:expr, $message:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::__log_with_context!(
            |context| $crate::logging::log_error_with_context($code, $message, context)
            $(, $key => $value)*)
    };
}

#[macro_export]
macro_rules! log_success {
    ($code:expr, $message:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::__log_with_context!(
            |context| $crate::logging::log_success_with_context($code, $message, context)
            $(, $key => $value)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($message:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::__log_with_context!(
            |context| $crate::logging::log_info_with_context($message, context)
            $(, $key => $value)*)
    };
}

/// `log_warning!(msg, ...)` or `log_warning!(code = c, msg, ...)`
#[macro_export]
macro_rules! log_warning {
    (code = $code:expr, $message:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::__log_with_context!(
            |context| $crate::logging::log_warning_with_context(Some($code), $message, context)
            $(, $key => $value)*)
    };

    ($message:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::__log_with_context!(
            |context| $crate::logging::log_warning_with_context(None, $message, context)
            $(, $key => $value)*)
    };
}

/// Context is only formatted when debug output is enabled
#[macro_export]
macro_rules! log_debug {
    ($message:expr $(, $key:expr => $value:expr)* $(,)?) => {
        if $crate::logging::config::get_min_log_level() >= $crate::logging::LogLevel::Debug {
            $crate::__log_with_context!(
                |context| $crate::logging::log_debug_with_context($message, context)
                $(, $key => $value)*)
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::logging::codes;

    #[test]
    fn test_macros_accept_display_context() {
        let _ = crate::logging::init_global_logging();

        crate::log_error!(codes::schema::MISSING_FIELD, "missing field",
            "field" => "health.cmd", "index" => 3);
        crate::log_success!(codes::success::VALIDATION_PASSED, "validated", "count" => 2usize);
        crate::log_info!("compiling", "targets" => "all");
        crate::log_warning!("capabilities added", "service_id" => "web");
        crate::log_warning!(code = codes::policy::WARN_VIOLATION, "waived", "rule" => "secrets.shred_waived");
        crate::log_debug!("plan computed", "files" => 0);
    }
}
