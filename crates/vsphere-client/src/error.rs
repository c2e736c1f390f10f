//! vSphere client errors

use thiserror::Error;

/// Errors that can occur when interacting with the vSphere API
#[derive(Debug, Error)]
pub enum VSphereError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint returned a fault
    #[error("vSphere API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Credentials rejected or session no longer valid
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Managed object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., malformed endpoint URL)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,
}

impl VSphereError {
    /// True when the error means the session (or the login) was rejected.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Copy of this error for handing to other waiters. Transport and decode
    /// errors are not `Clone`, so they are carried over as their message.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Http(e) => Self::Api(e.to_string()),
            Self::Serialization(e) => Self::Api(e.to_string()),
            Self::Api(m) => Self::Api(m.clone()),
            Self::Authentication(m) => Self::Authentication(m.clone()),
            Self::NotFound(m) => Self::NotFound(m.clone()),
            Self::InvalidRequest(m) => Self::InvalidRequest(m.clone()),
            Self::Cancelled => Self::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_keeps_authentication_kind() {
        let err = VSphereError::Authentication("InvalidLogin".to_string());
        let copy = err.duplicate();

        assert!(copy.is_authentication());
        assert_eq!(copy.to_string(), err.to_string());
    }

    #[test]
    fn test_duplicate_carries_decode_errors_as_message() {
        let err = VSphereError::from(serde_json::from_str::<u32>("nope").unwrap_err());

        assert!(matches!(err.duplicate(), VSphereError::Api(_)));
    }
}
