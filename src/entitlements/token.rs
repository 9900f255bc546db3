//! Bearer token handed over by the authentication layer.

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

/// Auth token for backend calls.
///
/// Issued elsewhere; this crate only forwards it as `Authorization: Bearer`.
/// The value never shows up in `Debug` output.
#[derive(Clone)]
pub struct AuthToken {
    secret: Arc<SecretString>,
}

impl AuthToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            secret: Arc::new(SecretString::from(token.into())),
        }
    }

    /// The raw token, for building the `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl PartialEq for AuthToken {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for AuthToken {}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

impl From<String> for AuthToken {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl From<&str> for AuthToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}
