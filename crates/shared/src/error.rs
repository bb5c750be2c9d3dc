use thiserror::Error;

/// Error taxonomy shared across the whole workspace.
///
/// `Validation` and `PermissionDenied` are surfaced to the caller and never
/// retried. `NotFound` means the caller is holding a stale id and should
/// refresh its snapshot. `Unavailable` covers transient store or network
/// failures and is the only variant safe to retry.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{what} not found with id {id}")]
    NotFound { what: String, id: String },

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn not_found(what: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            what: what.into(),
            id: id.to_string(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// True only for failures that are safe to retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
