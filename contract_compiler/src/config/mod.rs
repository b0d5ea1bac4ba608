//! Configuration for the contract compiler
//!
//! Compile-time limits are generated by build.rs from `config/<profile>.toml`.
//! Runtime preferences live in [`runtime`] and are read from `CONTRACTC_*`
//! environment variables or an optional TOML override file.

include!(concat!(env!("OUT_DIR"), "/constants.rs"));

pub mod runtime;

/// Build information and configuration metadata
pub mod build_info {
    /// Returns the configuration profile used during build
    pub fn profile() -> &'static str {
        option_env!("CONTRACT_BUILD_PROFILE").unwrap_or("development")
    }

    /// Returns the configuration directory used during build
    pub fn config_dir() -> &'static str {
        option_env!("CONTRACT_CONFIG_DIR").unwrap_or("config")
    }

    pub fn source_info() -> String {
        format!("Generated from {}/{}.toml", config_dir(), profile())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_limits_are_usable() {
        assert!(compile_time::input::MAX_DOCUMENT_SIZE > 0);
        assert!(compile_time::batch::MAX_WORKER_THREADS >= 1);
        assert!(compile_time::dependency::MAX_CYCLE_PATH_LENGTH >= 2);
        assert!(compile_time::logging::SECURITY_MIN_LOG_LEVEL <= 2);
    }

    #[test]
    fn test_source_info_names_profile() {
        assert!(build_info::source_info().contains(build_info::profile()));
    }
}
