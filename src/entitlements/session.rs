//! Checkout and billing-portal session initiators.
//!
//! Each flow asks the backend for a payment-provider-hosted page and, on
//! success, navigates the browsing context there. Progress is published on a
//! per-flow `watch` channel:
//!
//! ```text
//! Idle -> Requesting -> Redirecting(url)
//!                    -> Failed(message)
//! ```
//!
//! Calls are independent. Two overlapping checkouts both hit the backend and
//! whichever finishes last decides the final navigation. A failure never
//! replaces the redirect of a call started after it.
//!
//! Hosted session URLs grant access to the customer's billing page, so logs
//! and audit events carry only their host.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use url::Url;

use crate::error::{EntitlementError, Result};
use super::audit::{EntitlementAuditEvent, EntitlementAuditLogger, SessionKind};
use super::client::{BillingApi, CheckoutRequest, RedirectSession};
use super::navigation::Navigator;
use super::token::AuthToken;

/// Default post-payment destination.
pub const DEFAULT_SUCCESS_URL: &str = "http://localhost:3000/dashboard?checkout=success";
/// Default destination when the user backs out of checkout.
pub const DEFAULT_CANCEL_URL: &str = "http://localhost:3000/pricing?checkout=cancelled";

/// Where the payment provider sends the user back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutConfig {
    pub success_url: String,
    pub cancel_url: String,
    /// Allowed domains for the return URLs (empty = any domain).
    pub allowed_redirect_domains: Vec<String>,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            success_url: DEFAULT_SUCCESS_URL.to_string(),
            cancel_url: DEFAULT_CANCEL_URL.to_string(),
            allowed_redirect_domains: Vec::new(),
        }
    }
}

impl CheckoutConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn success_url(mut self, url: impl Into<String>) -> Self {
        self.success_url = url.into();
        self
    }

    #[must_use]
    pub fn cancel_url(mut self, url: impl Into<String>) -> Self {
        self.cancel_url = url.into();
        self
    }

    /// Set allowed return domains. Subdomains of an entry are accepted too.
    ///
    /// # Example
    /// ```ignore
    /// let config = CheckoutConfig::new()
    ///     .allowed_redirect_domains(["dealgate.app", "staging.dealgate.app"]);
    /// ```
    #[must_use]
    pub fn allowed_redirect_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_redirect_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single allowed return domain.
    #[must_use]
    pub fn add_allowed_domain(mut self, domain: impl Into<String>) -> Self {
        self.allowed_redirect_domains.push(domain.into());
        self
    }

    /// Check both return URLs.
    pub fn validate(&self) -> Result<()> {
        self.validate_redirect_url(&self.success_url)?;
        self.validate_redirect_url(&self.cancel_url)
    }

    /// Validate a return URL.
    ///
    /// Returns an error if:
    /// - The URL is not valid
    /// - The URL is not HTTPS (plain HTTP is allowed for loopback hosts)
    /// - The URL's domain is not in the allowed list (if list is non-empty)
    pub fn validate_redirect_url(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url).map_err(|e| {
            EntitlementError::invalid_config(format!("Invalid redirect URL '{}': {}", url, e))
        })?;

        let host = parsed.host_str().ok_or_else(|| {
            EntitlementError::invalid_config(format!("Redirect URL '{}' must have a host", url))
        })?;

        match parsed.scheme() {
            "https" => {}
            "http" if is_loopback(host) => {}
            _ => {
                return Err(EntitlementError::invalid_config(format!(
                    "Redirect URL '{}' must use HTTPS",
                    url
                )));
            }
        }

        if !self.allowed_redirect_domains.is_empty() {
            let domain_allowed = self.allowed_redirect_domains.iter().any(|allowed| {
                host == allowed || host.ends_with(&format!(".{}", allowed))
            });

            if !domain_allowed {
                return Err(EntitlementError::invalid_config(format!(
                    "Redirect URL domain '{}' is not allowed",
                    host
                )));
            }
        }

        Ok(())
    }

    /// Request body for the checkout endpoint.
    #[must_use]
    pub fn request(&self) -> CheckoutRequest {
        CheckoutRequest {
            success_url: self.success_url.clone(),
            cancel_url: self.cancel_url.clone(),
        }
    }
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

/// Observable progress of one session flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Requesting,
    /// Navigation to this URL has been issued.
    Redirecting(String),
    /// User-facing failure message.
    Failed(String),
}

impl SessionPhase {
    #[must_use]
    pub fn is_requesting(&self) -> bool {
        matches!(self, Self::Requesting)
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Phase channel plus call bookkeeping for one flow.
struct Flow {
    phase: watch::Sender<SessionPhase>,
    /// Sequence number of the latest call started.
    started: AtomicU64,
    /// Sequence number of the call behind the current `Redirecting` phase.
    /// Only touched while the phase channel is being modified.
    redirected: AtomicU64,
}

impl Flow {
    fn new() -> Self {
        Self {
            phase: watch::Sender::new(SessionPhase::Idle),
            started: AtomicU64::new(0),
            redirected: AtomicU64::new(0),
        }
    }

    fn start(&self) -> u64 {
        self.started.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn redirect(&self, call: u64, url: &str) {
        self.phase.send_modify(|phase| {
            self.redirected.store(call, Ordering::SeqCst);
            *phase = SessionPhase::Redirecting(url.to_string());
        });
    }

    /// Publish a failure unless a newer call has already redirected.
    fn fail(&self, call: u64, message: &str) -> bool {
        self.phase.send_if_modified(|phase| {
            if matches!(phase, SessionPhase::Redirecting(_))
                && self.redirected.load(Ordering::SeqCst) > call
            {
                return false;
            }
            *phase = SessionPhase::Failed(message.to_string());
            true
        })
    }
}

/// Host part of a hosted session URL, for logs.
fn redirect_host(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Runs checkout and portal flows against a [`BillingApi`].
pub struct SessionInitiator<C: BillingApi, N: Navigator, L: EntitlementAuditLogger> {
    client: Arc<C>,
    navigator: N,
    audit: Arc<L>,
    config: CheckoutConfig,
    checkout: Flow,
    portal: Flow,
}

impl<C: BillingApi, N: Navigator, L: EntitlementAuditLogger> SessionInitiator<C, N, L> {
    #[must_use]
    pub fn new(client: Arc<C>, navigator: N, audit: Arc<L>, config: CheckoutConfig) -> Self {
        Self {
            client,
            navigator,
            audit,
            config,
            checkout: Flow::new(),
            portal: Flow::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Subscribe to checkout progress.
    #[must_use]
    pub fn checkout_phase(&self) -> watch::Receiver<SessionPhase> {
        self.checkout.phase.subscribe()
    }

    /// Subscribe to portal progress.
    #[must_use]
    pub fn portal_phase(&self) -> watch::Receiver<SessionPhase> {
        self.portal.phase.subscribe()
    }

    /// Start a checkout and navigate to the hosted payment page.
    ///
    /// Returns the URL navigated to.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` when `token` is `None`; nothing is sent.
    /// - `ServerRejected` with the backend's message (or a generic one).
    /// - `TransportFailure` / `MalformedResponse` as reported by the client.
    pub async fn create_checkout_session(&self, token: Option<&AuthToken>) -> Result<String> {
        let request = self.config.request();
        self.run(SessionKind::Checkout, token, |token| async move {
            self.client.create_checkout_session(token, &request).await
        })
        .await
    }

    /// Open the hosted billing portal.
    ///
    /// # Errors
    ///
    /// Same as [`create_checkout_session`](Self::create_checkout_session).
    pub async fn open_customer_portal(&self, token: Option<&AuthToken>) -> Result<String> {
        self.run(SessionKind::Portal, token, |token| async move {
            self.client.create_portal_session(token).await
        })
        .await
    }

    async fn run<'a, F, Fut>(
        &'a self,
        kind: SessionKind,
        token: Option<&'a AuthToken>,
        request: F,
    ) -> Result<String>
    where
        F: FnOnce(&'a AuthToken) -> Fut,
        Fut: Future<Output = Result<RedirectSession>>,
    {
        let flow = self.flow(kind);
        let call = flow.start();

        let Some(token) = token else {
            return Err(self.fail(kind, call, EntitlementError::Unauthenticated).await);
        };

        flow.phase.send_replace(SessionPhase::Requesting);
        tracing::debug!(
            target: "dealgate::entitlements::session",
            kind = %kind,
            call = call,
            "Requesting billing session"
        );

        match request(token).await {
            Ok(session) => {
                let host = redirect_host(&session.url);
                tracing::info!(
                    target: "dealgate::entitlements::session",
                    kind = %kind,
                    call = call,
                    host = %host,
                    "Redirecting to hosted billing page"
                );
                flow.redirect(call, &session.url);
                self.navigator.navigate(&session.url);
                self.audit
                    .log(EntitlementAuditEvent::RedirectIssued { kind, host })
                    .await;
                Ok(session.url)
            }
            Err(error) => Err(self.fail(kind, call, error).await),
        }
    }

    async fn fail(&self, kind: SessionKind, call: u64, error: EntitlementError) -> EntitlementError {
        let message = error.to_string();
        tracing::warn!(
            target: "dealgate::entitlements::session",
            kind = %kind,
            call = call,
            error = %message,
            http_status = ?error.http_status(),
            "Billing session failed"
        );
        if !self.flow(kind).fail(call, &message) {
            tracing::debug!(
                target: "dealgate::entitlements::session",
                kind = %kind,
                call = call,
                "Newer session already redirecting, phase left unchanged"
            );
        }
        self.audit
            .log(EntitlementAuditEvent::SessionFailed {
                kind,
                reason: message,
            })
            .await;
        error
    }

    fn flow(&self, kind: SessionKind) -> &Flow {
        match kind {
            SessionKind::Checkout => &self.checkout,
            SessionKind::Portal => &self.portal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::audit::test::RecordingAuditLogger;
    use crate::entitlements::client::test::MockBillingApi;
    use crate::entitlements::navigation::test::RecordingNavigator;
    use futures::poll;
    use std::pin::pin;

    type Initiator = SessionInitiator<MockBillingApi, RecordingNavigator, RecordingAuditLogger>;

    fn initiator(api: &MockBillingApi) -> (Initiator, RecordingNavigator, RecordingAuditLogger) {
        let navigator = RecordingNavigator::new();
        let audit = RecordingAuditLogger::new();
        let initiator = SessionInitiator::new(
            Arc::new(api.clone()),
            navigator.clone(),
            Arc::new(audit.clone()),
            CheckoutConfig::new()
                .success_url("https://app.dealgate.test/dashboard?checkout=success")
                .cancel_url("https://app.dealgate.test/pricing"),
        );
        (initiator, navigator, audit)
    }

    #[test]
    fn test_validate_redirect_url() {
        let config = CheckoutConfig::new();
        assert!(config.validate_redirect_url("https://example.com/success").is_ok());
        assert!(config.validate_redirect_url("http://localhost:3000/dashboard").is_ok());
        assert!(config.validate_redirect_url("http://127.0.0.1:8080/pricing").is_ok());

        let result = config.validate_redirect_url("http://example.com/success");
        assert!(matches!(result, Err(EntitlementError::InvalidConfig(_))));

        assert!(config.validate_redirect_url("not-a-url").is_err());
        assert!(config.validate_redirect_url("").is_err());
    }

    #[test]
    fn test_validate_redirect_url_domains() {
        let config = CheckoutConfig::new().allowed_redirect_domains(["dealgate.app"]);

        assert!(config.validate_redirect_url("https://dealgate.app/dashboard").is_ok());
        assert!(config.validate_redirect_url("https://staging.dealgate.app/dashboard").is_ok());
        assert!(config.validate_redirect_url("https://evil.com/redirect").is_err());
        assert!(config.validate_redirect_url("https://notdealgate.app/success").is_err());

        let config = config.add_allowed_domain("localhost");
        assert!(config.validate_redirect_url("http://localhost:3000/").is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(CheckoutConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_checkout_without_token_sends_nothing() {
        let api = MockBillingApi::new();
        let (initiator, navigator, audit) = initiator(&api);
        let phase = initiator.checkout_phase();

        let result = initiator.create_checkout_session(None).await;

        assert_eq!(result, Err(EntitlementError::Unauthenticated));
        assert_eq!(api.checkout_calls(), 0);
        assert!(navigator.visits().is_empty());
        assert_eq!(
            phase.borrow().error_message(),
            Some("You must be signed in to manage billing")
        );
        assert_eq!(audit.kinds(), vec!["session_failed"]);
    }

    #[tokio::test]
    async fn test_checkout_navigates_to_exact_url() {
        let api = MockBillingApi::new();
        let url = "https://checkout.stripe.com/c/pay/cs_live_a1B2#fidkdWxOYHwnPyd1blpxYHZxWjA0";
        api.set_checkout(Ok(RedirectSession::new(url)));
        let (initiator, navigator, _) = initiator(&api);
        let token = AuthToken::new("tok");

        let navigated = initiator.create_checkout_session(Some(&token)).await.unwrap();

        assert_eq!(navigated, url);
        assert_eq!(navigator.visits(), vec![url]);
        assert_eq!(*initiator.checkout_phase().borrow(), SessionPhase::Redirecting(url.to_string()));
        assert_eq!(
            api.checkout_requests(),
            vec![CheckoutRequest {
                success_url: "https://app.dealgate.test/dashboard?checkout=success".to_string(),
                cancel_url: "https://app.dealgate.test/pricing".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_rejected_checkout_surfaces_message() {
        let api = MockBillingApi::new();
        api.set_checkout(Err(EntitlementError::rejected(400, "Already subscribed")));
        let (initiator, navigator, audit) = initiator(&api);
        let token = AuthToken::new("tok");

        let result = initiator.create_checkout_session(Some(&token)).await;

        assert_eq!(result.unwrap_err().to_string(), "Already subscribed");
        assert!(navigator.visits().is_empty());
        assert_eq!(
            *initiator.checkout_phase().borrow(),
            SessionPhase::Failed("Already subscribed".to_string())
        );
        assert_eq!(
            audit.events(),
            vec![EntitlementAuditEvent::SessionFailed {
                kind: SessionKind::Checkout,
                reason: "Already subscribed".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_portal_flow() {
        let api = MockBillingApi::new();
        let (initiator, navigator, _) = initiator(&api);
        let token = AuthToken::new("tok");

        let url = initiator.open_customer_portal(Some(&token)).await.unwrap();

        assert_eq!(url, "https://billing.stripe.com/p/session/bps_test_0");
        assert_eq!(navigator.current().as_deref(), Some(url.as_str()));
        assert_eq!(api.portal_calls(), 1);
        assert_eq!(*initiator.checkout_phase().borrow(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_phase_shows_requesting_while_in_flight() {
        let api = MockBillingApi::new();
        api.hold_sessions();
        let (initiator, _, _) = initiator(&api);
        let token = AuthToken::new("tok");
        let phase = initiator.portal_phase();

        let mut call = pin!(initiator.open_customer_portal(Some(&token)));
        assert!(poll!(call.as_mut()).is_pending());
        assert!(phase.borrow().is_requesting());

        api.release_portal(0, Err(EntitlementError::transport("timed out")));
        assert!(call.await.is_err());
        assert_eq!(
            phase.borrow().error_message(),
            Some("Transport failure: timed out")
        );
    }

    #[tokio::test]
    async fn test_overlapping_checkouts_last_completion_wins() {
        let api = MockBillingApi::new();
        api.hold_sessions();
        let (initiator, navigator, _) = initiator(&api);
        let token = AuthToken::new("tok");

        let mut first = pin!(initiator.create_checkout_session(Some(&token)));
        let mut second = pin!(initiator.create_checkout_session(Some(&token)));
        assert!(poll!(first.as_mut()).is_pending());
        assert!(poll!(second.as_mut()).is_pending());
        assert_eq!(api.checkout_calls(), 2);

        api.release_checkout(1, Ok(RedirectSession::new("https://checkout.stripe.com/second")));
        second.await.unwrap();
        api.release_checkout(0, Ok(RedirectSession::new("https://checkout.stripe.com/first")));
        first.await.unwrap();

        assert_eq!(
            navigator.visits(),
            vec!["https://checkout.stripe.com/second", "https://checkout.stripe.com/first"]
        );
        assert_eq!(
            *initiator.checkout_phase().borrow(),
            SessionPhase::Redirecting("https://checkout.stripe.com/first".to_string())
        );
    }

    #[tokio::test]
    async fn test_older_failure_keeps_newer_redirect() {
        let api = MockBillingApi::new();
        api.hold_sessions();
        let (initiator, navigator, audit) = initiator(&api);
        let token = AuthToken::new("tok");

        let mut first = pin!(initiator.create_checkout_session(Some(&token)));
        let mut second = pin!(initiator.create_checkout_session(Some(&token)));
        assert!(poll!(first.as_mut()).is_pending());
        assert!(poll!(second.as_mut()).is_pending());

        api.release_checkout(1, Ok(RedirectSession::new("https://checkout.stripe.com/ok")));
        second.await.unwrap();
        api.release_checkout(0, Err(EntitlementError::transport("timed out")));
        assert_eq!(first.await, Err(EntitlementError::transport("timed out")));

        assert_eq!(navigator.visits(), vec!["https://checkout.stripe.com/ok"]);
        assert_eq!(
            *initiator.checkout_phase().borrow(),
            SessionPhase::Redirecting("https://checkout.stripe.com/ok".to_string())
        );
        assert_eq!(audit.kinds(), vec!["redirect_issued", "session_failed"]);
    }

    #[tokio::test]
    async fn test_newer_failure_replaces_older_redirect() {
        let api = MockBillingApi::new();
        api.hold_sessions();
        let (initiator, navigator, _) = initiator(&api);
        let token = AuthToken::new("tok");

        let mut first = pin!(initiator.create_checkout_session(Some(&token)));
        let mut second = pin!(initiator.create_checkout_session(Some(&token)));
        assert!(poll!(first.as_mut()).is_pending());
        assert!(poll!(second.as_mut()).is_pending());

        api.release_checkout(0, Ok(RedirectSession::new("https://checkout.stripe.com/ok")));
        first.await.unwrap();
        api.release_checkout(1, Err(EntitlementError::rejected(400, "Already subscribed")));
        second.await.unwrap_err();

        assert_eq!(navigator.visits(), vec!["https://checkout.stripe.com/ok"]);
        assert_eq!(
            initiator.checkout_phase().borrow().error_message(),
            Some("Already subscribed")
        );
    }

    #[tokio::test]
    async fn test_redirect_audit_carries_only_host() {
        let api = MockBillingApi::new();
        api.set_portal(Ok(RedirectSession::new(
            "https://billing.stripe.com/p/session/live_YWNjdF8xTm9z",
        )));
        let (initiator, _, audit) = initiator(&api);

        initiator
            .open_customer_portal(Some(&AuthToken::new("tok")))
            .await
            .unwrap();

        assert_eq!(
            audit.events(),
            vec![EntitlementAuditEvent::RedirectIssued {
                kind: SessionKind::Portal,
                host: "billing.stripe.com".to_string(),
            }]
        );
    }
}
