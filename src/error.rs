//! Error types for entitlement operations.
//!
//! Status-read failures never escape the fetcher; they are folded into the
//! fallback snapshot and surfaced through the store's `status_error`. Session
//! initiation failures are returned to the caller so the UI can display them.

/// The main error type for dealgate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntitlementError {
    /// No auth token is available. Raised locally, no request was sent.
    #[error("You must be signed in to manage billing")]
    Unauthenticated,

    /// The request never produced an HTTP response (connect failure, timeout).
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The backend answered with a non-success status.
    #[error("{message}")]
    ServerRejected { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Configuration could not be built.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EntitlementError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure(message.into())
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::ServerRejected {
            status,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// HTTP status carried by the error, if the server answered.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::ServerRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if this is a client error (4xx or a local precondition failure).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Unauthenticated | Self::InvalidConfig(_) => true,
            Self::ServerRejected { status, .. } => (400..500).contains(status),
            _ => false,
        }
    }

    /// Check if this is a server-side or transport error.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::TransportFailure(_) | Self::MalformedResponse(_) => true,
            Self::ServerRejected { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    /// Check if a user-initiated retry could plausibly succeed.
    ///
    /// Nothing in this crate retries on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportFailure(_) => true,
            Self::ServerRejected { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

/// Result type alias for dealgate operations.
pub type Result<T> = std::result::Result<T, EntitlementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EntitlementError::rejected(402, "Card declined");
        assert_eq!(err.to_string(), "Card declined");

        let err = EntitlementError::Unauthenticated;
        assert_eq!(err.to_string(), "You must be signed in to manage billing");

        let err = EntitlementError::malformed("missing field `url`");
        assert_eq!(err.to_string(), "Malformed response: missing field `url`");
    }

    #[test]
    fn test_error_classification() {
        let err = EntitlementError::Unauthenticated;
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
        assert!(!err.is_retryable());

        let err = EntitlementError::rejected(503, "Service unavailable");
        assert!(!err.is_client_error());
        assert!(err.is_server_error());
        assert!(err.is_retryable());
        assert_eq!(err.http_status(), Some(503));

        let err = EntitlementError::transport("connection refused");
        assert!(err.is_server_error());
        assert!(err.is_retryable());
        assert_eq!(err.http_status(), None);

        let err = EntitlementError::rejected(429, "Slow down");
        assert!(err.is_client_error());
        assert!(err.is_retryable());
    }
}
