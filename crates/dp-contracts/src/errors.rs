use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalized failure kinds shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedProvider,
    MissingCredential,
    Unauthorized,
    RateLimited,
    ContentPolicyViolation,
    ServiceUnavailable,
    MalformedResponse,
    UnknownProviderError,
    FilesystemError,
    StateFileError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedProvider => "unsupported_provider",
            Self::MissingCredential => "missing_credential",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::ContentPolicyViolation => "content_policy_violation",
            Self::ServiceUnavailable => "service_unavailable",
            Self::MalformedResponse => "malformed_response",
            Self::UnknownProviderError => "unknown_provider_error",
            Self::FilesystemError => "filesystem_error",
            Self::StateFileError => "state_file_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DpError {
    pub kind: ErrorKind,
    pub message: String,
}

pub type DpResult<T> = std::result::Result<T, DpError>;

impl DpError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported_provider(name: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedProvider,
            format!("Unknown provider: {name}"),
        )
    }

    pub fn missing_credential(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingCredential, message)
    }

    pub fn unknown_provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownProviderError, message)
    }

    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FilesystemError, message)
    }

    pub fn state_file(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StateFileError, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DpError, ErrorKind};

    #[test]
    fn kinds_serialize_as_snake_case_tags() -> anyhow::Result<()> {
        assert_eq!(
            serde_json::to_value(ErrorKind::ContentPolicyViolation)?,
            json!("content_policy_violation")
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::UnknownProviderError)?,
            json!(ErrorKind::UnknownProviderError.as_str())
        );
        let parsed: ErrorKind = serde_json::from_value(json!("rate_limited"))?;
        assert_eq!(parsed, ErrorKind::RateLimited);
        Ok(())
    }

    #[test]
    fn error_display_is_the_message_only() {
        let err = DpError::unsupported_provider("midjourney");
        assert_eq!(err.kind(), ErrorKind::UnsupportedProvider);
        assert_eq!(err.to_string(), "Unknown provider: midjourney");
    }
}
