//! Typed error taxonomy shared by every previewd component.
//!
//! Each variant maps to exactly one HTTP status via [`PreviewError::status_code`];
//! the boundary layer converts errors to responses without retrying.

use thiserror::Error;

/// Errors raised by the storage, authorization, resolution and orchestration layers.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("Authentication failure")]
    AuthenticationFailure,

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type PreviewResult<T> = std::result::Result<T, PreviewError>;

impl PreviewError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Numeric status carried to the HTTP boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AuthenticationFailure => 401,
            Self::AuthorizationDenied(_) => 403,
            Self::BadRequest(_) => 400,
            Self::ProvisioningFailed(_) => 502,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
        }
    }

    /// True for failures that are the server's fault rather than the caller's.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}
