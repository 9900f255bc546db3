//! Backend API seam.
//!
//! `BillingApi` is the boundary between the entitlement engine and the
//! dashboard backend. [`HttpBillingApi`](super::http_client::HttpBillingApi)
//! is the production implementation; `test::MockBillingApi` scripts replies
//! for tests.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use super::snapshot::EntitlementSnapshot;
use super::token::AuthToken;

/// Status read endpoint.
pub const STATUS_PATH: &str = "/api/subscription/status";
/// Checkout session endpoint.
pub const CHECKOUT_PATH: &str = "/api/stripe/create-checkout-session";
/// Billing portal session endpoint.
pub const PORTAL_PATH: &str = "/api/stripe/create-portal-session";

/// Body of the checkout session request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Where the payment provider sends the user after paying.
    pub success_url: String,
    /// Where the payment provider sends the user on cancel.
    pub cancel_url: String,
}

/// A payment-provider-hosted page to send the user to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct RedirectSession {
    /// Absolute http(s) URL exactly as the server returned it.
    pub url: String,
}

impl RedirectSession {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Trait for the dashboard backend's billing endpoints.
#[allow(async_fn_in_trait)]
pub trait BillingApi: Send + Sync {
    /// `GET /api/subscription/status`.
    async fn subscription_status(&self, token: &AuthToken) -> Result<EntitlementSnapshot>;

    /// `POST /api/stripe/create-checkout-session`.
    async fn create_checkout_session(
        &self,
        token: &AuthToken,
        request: &CheckoutRequest,
    ) -> Result<RedirectSession>;

    /// `POST /api/stripe/create-portal-session`.
    async fn create_portal_session(&self, token: &AuthToken) -> Result<RedirectSession>;
}

/// Scripted billing API for tests.
#[cfg(any(test, feature = "test-entitlements"))]
pub mod test {
    use super::*;
    use crate::error::EntitlementError;
    use crate::entitlements::snapshot::FallbackPolicy;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    /// One endpoint's scripted behaviour.
    ///
    /// Replies immediately with the configured result, or, once held, parks
    /// every call until the test releases it by index.
    struct Scripted<T: Clone> {
        reply: Mutex<Result<T>>,
        held: AtomicBool,
        parked: Mutex<Vec<Option<oneshot::Sender<Result<T>>>>>,
        calls: AtomicUsize,
    }

    impl<T: Clone> Scripted<T> {
        fn new(reply: Result<T>) -> Self {
            Self {
                reply: Mutex::new(reply),
                held: AtomicBool::new(false),
                parked: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        async fn respond(&self) -> Result<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.held.load(Ordering::SeqCst) {
                return self.reply.lock().unwrap().clone();
            }

            let (tx, rx) = oneshot::channel();
            self.parked.lock().unwrap().push(Some(tx));
            rx.await
                .unwrap_or_else(|_| Err(EntitlementError::transport("mock reply dropped")))
        }

        fn release(&self, index: usize, result: Result<T>) -> bool {
            let sender = self
                .parked
                .lock()
                .unwrap()
                .get_mut(index)
                .and_then(Option::take);
            sender.is_some_and(|tx| tx.send(result).is_ok())
        }
    }

    struct MockInner {
        status: Scripted<EntitlementSnapshot>,
        checkout: Scripted<RedirectSession>,
        portal: Scripted<RedirectSession>,
        tokens: Mutex<Vec<String>>,
        checkout_requests: Mutex<Vec<CheckoutRequest>>,
    }

    /// Mock billing API.
    ///
    /// Clones share state, so a test can keep a handle after moving one into
    /// the store.
    #[derive(Clone)]
    pub struct MockBillingApi {
        inner: Arc<MockInner>,
    }

    impl Default for MockBillingApi {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockBillingApi {
        /// A backend that reports the free fallback shape and hands out
        /// fixed redirect URLs.
        #[must_use]
        pub fn new() -> Self {
            let checkout = RedirectSession::new("https://checkout.stripe.com/c/pay/cs_test_0");
            let portal = RedirectSession::new("https://billing.stripe.com/p/session/bps_test_0");

            Self {
                inner: Arc::new(MockInner {
                    status: Scripted::new(Ok(EntitlementSnapshot::fallback(FallbackPolicy::Free))),
                    checkout: Scripted::new(Ok(checkout)),
                    portal: Scripted::new(Ok(portal)),
                    tokens: Mutex::new(Vec::new()),
                    checkout_requests: Mutex::new(Vec::new()),
                }),
            }
        }

        pub fn set_status(&self, result: Result<EntitlementSnapshot>) {
            *self.inner.status.reply.lock().unwrap() = result;
        }

        pub fn set_checkout(&self, result: Result<RedirectSession>) {
            *self.inner.checkout.reply.lock().unwrap() = result;
        }

        pub fn set_portal(&self, result: Result<RedirectSession>) {
            *self.inner.portal.reply.lock().unwrap() = result;
        }

        /// Park every subsequent status call until released.
        pub fn hold_status(&self) {
            self.inner.status.held.store(true, Ordering::SeqCst);
        }

        /// Park every subsequent checkout and portal call until released.
        pub fn hold_sessions(&self) {
            self.inner.checkout.held.store(true, Ordering::SeqCst);
            self.inner.portal.held.store(true, Ordering::SeqCst);
        }

        /// Resolve the `index`-th parked status call. Returns false if there
        /// was no such call or it was already released.
        pub fn release_status(&self, index: usize, result: Result<EntitlementSnapshot>) -> bool {
            self.inner.status.release(index, result)
        }

        pub fn release_checkout(&self, index: usize, result: Result<RedirectSession>) -> bool {
            self.inner.checkout.release(index, result)
        }

        pub fn release_portal(&self, index: usize, result: Result<RedirectSession>) -> bool {
            self.inner.portal.release(index, result)
        }

        #[must_use]
        pub fn status_calls(&self) -> usize {
            self.inner.status.calls.load(Ordering::SeqCst)
        }

        #[must_use]
        pub fn checkout_calls(&self) -> usize {
            self.inner.checkout.calls.load(Ordering::SeqCst)
        }

        #[must_use]
        pub fn portal_calls(&self) -> usize {
            self.inner.portal.calls.load(Ordering::SeqCst)
        }

        /// Tokens seen by any endpoint, in call order.
        #[must_use]
        pub fn tokens_seen(&self) -> Vec<String> {
            self.inner.tokens.lock().unwrap().clone()
        }

        #[must_use]
        pub fn checkout_requests(&self) -> Vec<CheckoutRequest> {
            self.inner.checkout_requests.lock().unwrap().clone()
        }

        fn record_token(&self, token: &AuthToken) {
            self.inner.tokens.lock().unwrap().push(token.expose().to_string());
        }
    }

    impl BillingApi for MockBillingApi {
        async fn subscription_status(&self, token: &AuthToken) -> Result<EntitlementSnapshot> {
            self.record_token(token);
            self.inner.status.respond().await
        }

        async fn create_checkout_session(
            &self,
            token: &AuthToken,
            request: &CheckoutRequest,
        ) -> Result<RedirectSession> {
            self.record_token(token);
            self.inner.checkout_requests.lock().unwrap().push(request.clone());
            self.inner.checkout.respond().await
        }

        async fn create_portal_session(&self, token: &AuthToken) -> Result<RedirectSession> {
            self.record_token(token);
            self.inner.portal.respond().await
        }
    }
}
