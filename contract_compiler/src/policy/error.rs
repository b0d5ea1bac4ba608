use crate::logging::codes;
use crate::validation::InputError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Invalid rule set {source_name}: {message}")]
    InvalidRuleSet { source_name: String, message: String },

    #[error("Rule '{rule_id}' in {source_name} has an invalid pattern: {message}")]
    InvalidPattern {
        source_name: String,
        rule_id: String,
        message: String,
    },

    #[error("Rule set holds {count} rules, limit is {limit}")]
    TooManyRules { count: usize, limit: usize },
}

impl PolicyError {
    pub fn invalid(path: &std::path::Path, message: impl Into<String>) -> Self {
        PolicyError::InvalidRuleSet {
            source_name: path.display().to_string(),
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> codes::Code {
        match self {
            PolicyError::Input(err) => err.error_code(),
            PolicyError::InvalidRuleSet { .. }
            | PolicyError::InvalidPattern { .. }
            | PolicyError::TooManyRules { .. } => codes::policy::INVALID_RULE_SET,
        }
    }

    pub fn severity(&self) -> &'static str {
        codes::get_severity(self.error_code().as_str()).as_str()
    }

    pub fn document(&self) -> Option<PathBuf> {
        match self {
            PolicyError::Input(err) => err.document().map(|p| p.to_path_buf()),
            PolicyError::InvalidRuleSet { source_name, .. }
            | PolicyError::InvalidPattern { source_name, .. } => Some(PathBuf::from(source_name)),
            PolicyError::TooManyRules { .. } => None,
        }
    }
}
