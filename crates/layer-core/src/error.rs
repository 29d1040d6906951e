//! Error taxonomy for gate resolution and completion routing

use thiserror::Error;

use crate::registry::Vendor;

/// One vendor attempt failed. Whatever the vendor client raised is kept as
/// the source; nothing vendor-specific leaks past this type.
#[derive(Debug, Error)]
#[error("{} call for model '{model}' failed: {source:#}", vendor_label(.vendor))]
pub struct ProviderError {
    /// `None` when the model could not be mapped to a vendor at all
    pub vendor: Option<Vendor>,
    pub model: String,
    #[source]
    pub source: anyhow::Error,
}

fn vendor_label(vendor: &Option<Vendor>) -> String {
    vendor
        .map(|v| v.to_string())
        .unwrap_or_else(|| "provider".to_string())
}

impl ProviderError {
    pub fn new(vendor: Vendor, model: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            vendor: Some(vendor),
            model: model.into(),
            source,
        }
    }

    /// No adapter can serve this model (absent from the registry, or its
    /// vendor has nothing registered)
    pub fn unroutable(model: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            vendor: None,
            model: model.into(),
            source,
        }
    }
}

/// A [`GateStore`](crate::resolver::GateStore) write that would give an
/// owner two gates with the same name
#[derive(Debug, Error)]
#[error("Gate name '{name}' is already taken for owner '{owner_id}'")]
pub struct DuplicateGateName {
    pub owner_id: String,
    pub name: String,
}

/// Errors surfaced by the routing engine and the gate admin service
#[derive(Debug, Error)]
pub enum GateError {
    /// Malformed request (missing gate name, empty messages, invalid gate
    /// definition)
    #[error("{0}")]
    Validation(String),

    #[error("Gate \"{0}\" not found")]
    NotFound(String),

    #[error("Gate \"{0}\" already exists")]
    Conflict(String),

    /// Every candidate model failed; `source` is the last failure
    #[error("All {attempts} candidate model(s) failed")]
    AllProvidersFailed {
        attempts: usize,
        #[source]
        source: ProviderError,
    },

    /// Store or other collaborator failure
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Boundary error code, see [`GateError::code`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Conflict,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InternalError => "internal_error",
        }
    }
}

impl GateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::BadRequest,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::AllProvidersFailed { .. } | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Message safe to show callers. Internal failures are reduced to a
    /// generic sentence; the full chain stays in logs and the audit record.
    pub fn public_message(&self) -> String {
        match self {
            Self::AllProvidersFailed { .. } => {
                "The completion could not be generated by any configured model".to_string()
            }
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Full diagnostic text, including the cause chain
    pub fn detail(&self) -> String {
        match self {
            Self::AllProvidersFailed { attempts, source } => {
                format!("All {} candidate model(s) failed; last error: {}", attempts, source)
            }
            Self::Internal(e) => format!("{:#}", e),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::error::Error as _;

    #[test]
    fn test_error_codes() {
        assert_eq!(GateError::Validation("x".into()).code().as_str(), "bad_request");
        assert_eq!(GateError::NotFound("g".into()).code().as_str(), "not_found");
        assert_eq!(GateError::Conflict("g".into()).code().as_str(), "conflict");
        assert_eq!(
            GateError::Internal(anyhow!("db down")).code().as_str(),
            "internal_error"
        );
    }

    #[test]
    fn test_all_failed_hides_cause_from_public_message() {
        let err = GateError::AllProvidersFailed {
            attempts: 2,
            source: ProviderError::new(
                Vendor::OpenAi,
                "gpt-4o",
                anyhow!("status 401: invalid key sk-abc"),
            ),
        };
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert!(!err.public_message().contains("sk-abc"));
        assert!(err.detail().contains("status 401"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::new(Vendor::Google, "gemini-2.0-flash", anyhow!("timeout"));
        assert_eq!(
            err.to_string(),
            "google call for model 'gemini-2.0-flash' failed: timeout"
        );
        let err = ProviderError::unroutable("mystery", anyhow!("no adapter"));
        assert!(err.to_string().starts_with("provider call for model 'mystery'"));
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(
            GateError::NotFound("missing".into()).public_message(),
            "Gate \"missing\" not found"
        );
    }
}
