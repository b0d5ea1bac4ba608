use crate::contract::RenderTarget;
use crate::logging::codes;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("{service_id}/{target}: failed to stage {path}: {source}")]
    Staging {
        service_id: String,
        target: RenderTarget,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{service_id}/{target}: failed to shred {} staged file(s): {}", .paths.len(), join_paths(.paths))]
    ShredFailed {
        service_id: String,
        target: RenderTarget,
        paths: Vec<PathBuf>,
    },

    #[error("{service_id}/{target}: failed to encode secret store manifest: {message}")]
    Encoding {
        service_id: String,
        target: RenderTarget,
        message: String,
    },
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl SecretsError {
    pub fn error_code(&self) -> codes::Code {
        match self {
            Self::Staging { .. } | Self::Encoding { .. } => codes::secrets::STAGING_FAILURE,
            Self::ShredFailed { .. } => codes::secrets::SHRED_FAILURE,
        }
    }

    pub fn severity(&self) -> &'static str {
        codes::get_severity(self.error_code().as_str()).as_str()
    }

    pub fn service_id(&self) -> &str {
        match self {
            Self::Staging { service_id, .. }
            | Self::ShredFailed { service_id, .. }
            | Self::Encoding { service_id, .. } => service_id,
        }
    }

    pub fn target(&self) -> RenderTarget {
        match self {
            Self::Staging { target, .. }
            | Self::ShredFailed { target, .. }
            | Self::Encoding { target, .. } => *target,
        }
    }
}
