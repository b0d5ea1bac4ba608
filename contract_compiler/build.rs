// build.rs - TOML-driven compile-time limit generation
use std::env;
use std::fs;
use std::path::Path;

#[derive(serde::Deserialize)]
struct CompileTimeConfig {
    input: InputLimits,
    contract: ContractLimits,
    dependency: DependencyLimits,
    policy: PolicyLimits,
    batch: BatchLimits,
    logging: LoggingLimits,
}

#[derive(serde::Deserialize)]
struct InputLimits {
    max_document_size: u64,
    max_documents_per_batch: usize,
}

#[derive(serde::Deserialize)]
struct ContractLimits {
    max_ports: usize,
    max_volumes: usize,
    max_secrets: usize,
    max_requires: usize,
    max_environment_entries: usize,
}

#[derive(serde::Deserialize)]
struct DependencyLimits {
    max_graph_nodes: usize,
    max_reported_cycles: usize,
    max_cycle_path_length: usize,
}

#[derive(serde::Deserialize)]
struct PolicyLimits {
    max_rules: usize,
    max_violations: usize,
}

#[derive(serde::Deserialize)]
struct BatchLimits {
    max_worker_threads: usize,
}

#[derive(serde::Deserialize)]
struct LoggingLimits {
    max_error_collection: usize,
    log_buffer_size: usize,
    max_log_message_length: usize,
    max_log_events_per_document: usize,
    security_min_log_level: u8,
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=CONTRACT_BUILD_PROFILE");
    println!("cargo:rerun-if-env-changed=CONTRACT_CONFIG_DIR");

    let profile =
        env::var("CONTRACT_BUILD_PROFILE").unwrap_or_else(|_| "development".to_string());
    let config_dir = env::var("CONTRACT_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

    // Workspace root is the parent of the contract_compiler directory
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let workspace_root = Path::new(&manifest_dir)
        .parent()
        .expect("Could not find workspace root (parent directory)");

    let config_path = workspace_root
        .join(&config_dir)
        .join(format!("{}.toml", profile));

    println!("cargo:rerun-if-changed={}", config_path.display());

    if !config_path.exists() {
        panic!(
            "Configuration file not found: {}\nWorkspace root: {}\nLooking for: {}/{}/{}.toml",
            config_path.display(),
            workspace_root.display(),
            workspace_root.display(),
            config_dir,
            profile
        );
    }

    let config_content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", config_path.display(), e));

    let config: CompileTimeConfig = toml::from_str(&config_content)
        .unwrap_or_else(|e| panic!("Invalid TOML in {}: {}", config_path.display(), e));

    validate_security_constraints(&config, &profile);
    generate_constants(&config, &profile);
}

fn validate_security_constraints(config: &CompileTimeConfig, profile: &str) {
    const ABSOLUTE_MAX_DOCUMENT_SIZE: u64 = 100_000_000;
    const ABSOLUTE_MAX_WORKER_THREADS: usize = 256;
    const ABSOLUTE_MAX_GRAPH_NODES: usize = 1_000_000;

    if config.input.max_document_size > ABSOLUTE_MAX_DOCUMENT_SIZE {
        panic!("SECURITY: max_document_size exceeds absolute maximum");
    }

    if config.batch.max_worker_threads == 0
        || config.batch.max_worker_threads > ABSOLUTE_MAX_WORKER_THREADS
    {
        panic!("SECURITY: max_worker_threads must be within 1..=256");
    }

    if config.dependency.max_graph_nodes > ABSOLUTE_MAX_GRAPH_NODES {
        panic!("SECURITY: max_graph_nodes exceeds absolute maximum");
    }

    if config.dependency.max_cycle_path_length < 2 {
        panic!("SECURITY: max_cycle_path_length must allow at least a two-node cycle");
    }

    if config.logging.security_min_log_level > 2 {
        panic!("SECURITY: security_min_log_level too high (max: 2)");
    }

    if profile == "production" {
        if config.input.max_document_size > 10_000_000 {
            panic!("PRODUCTION: max_document_size too high for production");
        }
        if config.policy.max_violations < 100 {
            panic!("PRODUCTION: max_violations too low to report a full batch");
        }
    }
}

fn generate_constants(config: &CompileTimeConfig, profile: &str) {
    let out_dir = env::var("OUT_DIR").unwrap();
    let output_path = Path::new(&out_dir).join("constants.rs");

    let constants_code = format!(
        r#"
// Generated compile-time constants from TOML configuration
// Profile: {}
// DO NOT EDIT - Generated by build.rs

pub mod compile_time {{
    pub mod input {{
        /// SECURITY: Upper bound on a single contract or registry document
        pub const MAX_DOCUMENT_SIZE: u64 = {};
        /// SECURITY: Upper bound on documents compiled together
        pub const MAX_DOCUMENTS_PER_BATCH: usize = {};
    }}

    pub mod contract {{
        pub const MAX_PORTS: usize = {};
        pub const MAX_VOLUMES: usize = {};
        pub const MAX_SECRETS: usize = {};
        pub const MAX_REQUIRES: usize = {};
        pub const MAX_ENVIRONMENT_ENTRIES: usize = {};
    }}

    pub mod dependency {{
        /// SECURITY: Bounds graph memory for registry plus batch
        pub const MAX_GRAPH_NODES: usize = {};
        pub const MAX_REPORTED_CYCLES: usize = {};
        pub const MAX_CYCLE_PATH_LENGTH: usize = {};
    }}

    pub mod policy {{
        pub const MAX_RULES: usize = {};
        pub const MAX_VIOLATIONS: usize = {};
    }}

    pub mod batch {{
        /// SECURITY: Ceiling for the render worker pool
        pub const MAX_WORKER_THREADS: usize = {};
    }}

    pub mod logging {{
        pub const MAX_ERROR_COLLECTION: usize = {};
        pub const LOG_BUFFER_SIZE: usize = {};
        pub const MAX_LOG_MESSAGE_LENGTH: usize = {};
        pub const MAX_LOG_EVENTS_PER_DOCUMENT: usize = {};
        pub const SECURITY_MIN_LOG_LEVEL: u8 = {};
    }}
}}
"#,
        profile,
        // Input
        config.input.max_document_size,
        config.input.max_documents_per_batch,
        // Contract
        config.contract.max_ports,
        config.contract.max_volumes,
        config.contract.max_secrets,
        config.contract.max_requires,
        config.contract.max_environment_entries,
        // Dependency
        config.dependency.max_graph_nodes,
        config.dependency.max_reported_cycles,
        config.dependency.max_cycle_path_length,
        // Policy
        config.policy.max_rules,
        config.policy.max_violations,
        // Batch
        config.batch.max_worker_threads,
        // Logging
        config.logging.max_error_collection,
        config.logging.log_buffer_size,
        config.logging.max_log_message_length,
        config.logging.max_log_events_per_document,
        config.logging.security_min_log_level,
    );

    fs::write(output_path, constants_code).unwrap();
}
