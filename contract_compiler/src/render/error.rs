use crate::contract::RenderTarget;
use crate::logging::codes;
use thiserror::Error;

/// A backend cannot express some part of a contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("{service_id}/{target}: '{field}' cannot be rendered: {message}")]
    IncompatibleField {
        service_id: String,
        target: RenderTarget,
        field: String,
        message: String,
    },

    #[error("{service_id}/{target}: '{field}' is required by this backend")]
    MissingField {
        service_id: String,
        target: RenderTarget,
        field: String,
    },

    #[error("{service_id}/{target}: failed to serialize artifact: {message}")]
    Serialization {
        service_id: String,
        target: RenderTarget,
        message: String,
    },
}

impl RenderError {
    pub fn incompatible(
        service_id: &str,
        target: RenderTarget,
        field: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::IncompatibleField {
            service_id: service_id.to_string(),
            target,
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn missing(service_id: &str, target: RenderTarget, field: &str) -> Self {
        Self::MissingField {
            service_id: service_id.to_string(),
            target,
            field: field.to_string(),
        }
    }

    pub fn error_code(&self) -> codes::Code {
        match self {
            Self::IncompatibleField { .. } => codes::render::INCOMPATIBLE_FIELD,
            Self::MissingField { .. } => codes::render::MISSING_BACKEND_FIELD,
            Self::Serialization { .. } => codes::render::SERIALIZATION_FAILURE,
        }
    }

    pub fn severity(&self) -> &'static str {
        codes::get_severity(self.error_code().as_str()).as_str()
    }

    pub fn service_id(&self) -> &str {
        match self {
            Self::IncompatibleField { service_id, .. }
            | Self::MissingField { service_id, .. }
            | Self::Serialization { service_id, .. } => service_id,
        }
    }

    pub fn target(&self) -> RenderTarget {
        match self {
            Self::IncompatibleField { target, .. }
            | Self::MissingField { target, .. }
            | Self::Serialization { target, .. } => *target,
        }
    }

    pub fn field_path(&self) -> Option<&str> {
        match self {
            Self::IncompatibleField { field, .. } | Self::MissingField { field, .. } => Some(field),
            Self::Serialization { .. } => None,
        }
    }
}
