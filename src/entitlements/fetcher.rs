//! Authenticated status read with fallback-on-error policy.

use std::sync::Arc;

use crate::error::EntitlementError;
use super::client::BillingApi;
use super::snapshot::{EntitlementSnapshot, FallbackPolicy};
use super::token::AuthToken;

/// Result of a status read. Never an error: failures become `Fallback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// No token; treat the user as signed out, not as free tier.
    Unauthenticated,
    /// The server's snapshot.
    Fresh(EntitlementSnapshot),
    /// The canonical fallback, plus what went wrong.
    Fallback {
        snapshot: EntitlementSnapshot,
        error: EntitlementError,
    },
}

impl FetchOutcome {
    #[must_use]
    pub fn snapshot(&self) -> Option<&EntitlementSnapshot> {
        match self {
            Self::Unauthenticated => None,
            Self::Fresh(snapshot) | Self::Fallback { snapshot, .. } => Some(snapshot),
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&EntitlementError> {
        match self {
            Self::Fallback { error, .. } => Some(error),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Reads the entitlement snapshot for a token.
pub struct StatusFetcher<C: BillingApi> {
    client: Arc<C>,
    policy: FallbackPolicy,
}

impl<C: BillingApi> StatusFetcher<C> {
    #[must_use]
    pub fn new(client: Arc<C>, policy: FallbackPolicy) -> Self {
        Self { client, policy }
    }

    #[must_use]
    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// Fetch the snapshot for `token`.
    ///
    /// Transport failures, timeouts, non-2xx replies and malformed bodies are
    /// logged and folded into the fallback snapshot.
    pub async fn fetch(&self, token: Option<&AuthToken>) -> FetchOutcome {
        let Some(token) = token else {
            return FetchOutcome::Unauthenticated;
        };

        match self.client.subscription_status(token).await {
            Ok(snapshot) => FetchOutcome::Fresh(snapshot),
            Err(error) => {
                tracing::warn!(
                    target: "dealgate::entitlements::status",
                    error = %error,
                    http_status = ?error.http_status(),
                    fallback = ?self.policy,
                    "Subscription status unavailable, using fallback snapshot"
                );
                FetchOutcome::Fallback {
                    snapshot: EntitlementSnapshot::fallback(self.policy),
                    error,
                }
            }
        }
    }
}
