//! Secrets lifecycle: transport table, planning, staging and shredding

pub mod error;
pub mod plan;
pub mod staging;
pub mod store;
pub mod transport;

pub use error::SecretsError;
pub use plan::{
    plan, plan_with_mode, EnvFilePlan, FilePlan, SecretStorePlan, SecretsTransportPlan, StoreFile,
    DEFAULT_FILE_MODE,
};
pub use staging::{SecretsManager, ShredReport, StagedSecrets, StagingState};
pub use transport::{transport_profile, SecretTransport, TransportProfile};

/// Environment variable carrying the rotation marker on env-based backends
pub const ROTATION_ENV_VAR: &str = "SECRETS_ROTATION_TIMESTAMP";

/// Pod template annotation carrying the rotation marker
pub const ROTATION_ANNOTATION: &str = "contracts.dev/secrets-rotation";
