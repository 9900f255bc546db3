//! The entitlement store.
//!
//! Single owner of the current snapshot. Consumers either read it directly
//! ([`EntitlementStore::gates`]) or subscribe to a `watch` channel and re-render
//! when it changes.
//!
//! Ordering: every status fetch is tagged with a generation taken from a
//! monotonically increasing counter. A result is applied only if its
//! generation is above the highest one applied so far. Signing out (or
//! switching accounts) raises that floor to the newest generation issued, so
//! every fetch still in flight lands as stale.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::config::Config;
use crate::error::{EntitlementError, Result};
use super::audit::{EntitlementAuditEvent, EntitlementAuditLogger, TracingAuditLogger};
use super::client::BillingApi;
use super::fetcher::{FetchOutcome, StatusFetcher};
use super::gates::Gates;
use super::navigation::Navigator;
use super::session::{SessionInitiator, SessionPhase};
use super::snapshot::{EntitlementSnapshot, FallbackPolicy};
use super::token::AuthToken;

/// What consumers observe.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntitlementView {
    /// `None` while signed out or before the first fetch lands.
    pub snapshot: Option<Arc<EntitlementSnapshot>>,
    /// A fetch newer than the current snapshot is in flight.
    pub loading: bool,
    /// Set when the current snapshot is the fallback; the "status
    /// unavailable" banner reads this.
    pub status_error: Option<EntitlementError>,
}

impl EntitlementView {
    #[must_use]
    pub fn gates(&self) -> Gates {
        Gates::new(self.snapshot.clone())
    }
}

/// How a [`refresh`](EntitlementStore::refresh) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    /// The result became the current snapshot.
    Applied,
    /// A newer result was already applied; this one was dropped.
    Stale,
    /// The user signed out or switched accounts mid-flight.
    AuthChanged,
    /// No token, nothing was fetched.
    Unauthenticated,
}

#[derive(Debug, Default)]
struct Control {
    token: Option<AuthToken>,
    /// Last generation handed out.
    issued: u64,
    /// Highest generation whose result is current (or was invalidated).
    applied: u64,
    /// Generations at or below this were started under a previous identity.
    auth_floor: u64,
    /// Generations whose fetch has neither landed nor been dropped.
    pending: BTreeSet<u64>,
}

impl Control {
    /// A fetch newer than the current result is still outstanding.
    fn loading(&self) -> bool {
        self.pending.last().is_some_and(|&generation| generation > self.applied)
    }
}

/// Forgets its generation when the refresh future is dropped before the
/// result lands.
struct InFlight<'a, C: BillingApi, N: Navigator, L: EntitlementAuditLogger> {
    store: &'a EntitlementStore<C, N, L>,
    generation: u64,
}

impl<C: BillingApi, N: Navigator, L: EntitlementAuditLogger> Drop for InFlight<'_, C, N, L> {
    fn drop(&mut self) {
        self.store.abandon(self.generation);
    }
}

struct StoreInner<C: BillingApi, N: Navigator, L: EntitlementAuditLogger> {
    fetcher: StatusFetcher<C>,
    sessions: SessionInitiator<C, N, L>,
    audit: Arc<L>,
    state: watch::Sender<EntitlementView>,
    control: Mutex<Control>,
}

/// Owns the auth token and the current entitlement snapshot.
///
/// Cloning is cheap and every clone shares the same state.
///
/// # Example
///
/// ```rust,ignore
/// use dealgate::{ConfigBuilder, EntitlementStore, HttpBillingApi};
///
/// let config = ConfigBuilder::new().from_env().build()?;
/// let api = HttpBillingApi::new(&config.api)?;
/// let store = EntitlementStore::new(api, |url: &str| open_in_browser(url), &config);
///
/// store.sign_in("eyJhbGciOi...".into()).await;
/// if !store.gates().can_create_lead() {
///     show_upgrade_modal();
/// }
/// ```
pub struct EntitlementStore<C, N, L = TracingAuditLogger>
where
    C: BillingApi,
    N: Navigator,
    L: EntitlementAuditLogger,
{
    inner: Arc<StoreInner<C, N, L>>,
}

impl<C: BillingApi, N: Navigator, L: EntitlementAuditLogger> Clone for EntitlementStore<C, N, L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: BillingApi, N: Navigator> EntitlementStore<C, N, TracingAuditLogger> {
    /// Create a store that audits through `tracing`.
    #[must_use]
    pub fn new(client: C, navigator: N, config: &Config) -> Self {
        Self::with_audit_logger(client, navigator, TracingAuditLogger, config)
    }
}

impl<C: BillingApi, N: Navigator, L: EntitlementAuditLogger> EntitlementStore<C, N, L> {
    /// Create a store with a custom audit logger.
    #[must_use]
    pub fn with_audit_logger(client: C, navigator: N, audit_logger: L, config: &Config) -> Self {
        let client = Arc::new(client);
        let audit = Arc::new(audit_logger);

        Self {
            inner: Arc::new(StoreInner {
                fetcher: StatusFetcher::new(Arc::clone(&client), config.fallback_policy),
                sessions: SessionInitiator::new(
                    client,
                    navigator,
                    Arc::clone(&audit),
                    config.checkout.clone(),
                ),
                audit,
                state: watch::Sender::new(EntitlementView::default()),
                control: Mutex::new(Control::default()),
            }),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.inner
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn fallback_policy(&self) -> FallbackPolicy {
        self.inner.fetcher.policy()
    }

    // === reads ===

    /// Current view, cloned.
    #[must_use]
    pub fn view(&self) -> EntitlementView {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<EntitlementSnapshot>> {
        self.inner.state.borrow().snapshot.clone()
    }

    /// Gate predicates over the current snapshot.
    #[must_use]
    pub fn gates(&self) -> Gates {
        self.inner.state.borrow().gates()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    #[must_use]
    pub fn status_error(&self) -> Option<EntitlementError> {
        self.inner.state.borrow().status_error.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.control().token.is_some()
    }

    /// Receive view changes. Re-applying an identical snapshot keeps the
    /// existing `Arc`, so receivers can compare by pointer.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EntitlementView> {
        self.inner.state.subscribe()
    }

    // === auth transitions ===

    /// Auth became available (or changed): store the token and fetch.
    ///
    /// A different token invalidates in-flight fetches and clears the
    /// snapshot first, so one account's entitlements never show under another.
    pub async fn sign_in(&self, token: AuthToken) -> RefreshStatus {
        {
            let mut control = self.control();
            if control.token.as_ref() != Some(&token) {
                if control.token.is_some() {
                    tracing::info!(
                        target: "dealgate::entitlements::store",
                        "Auth token changed, discarding current entitlements"
                    );
                }
                self.invalidate(&mut control);
                control.token = Some(token);
            }
        }

        self.refresh().await
    }

    /// Auth went away. Clears the snapshot immediately; any fetch still in
    /// flight is discarded when it lands.
    pub fn sign_out(&self) {
        let mut control = self.control();
        control.token = None;
        self.invalidate(&mut control);

        tracing::info!(
            target: "dealgate::entitlements::store",
            generation = control.issued,
            "Signed out, entitlements cleared"
        );
    }

    /// Follow the auth layer's state.
    pub async fn on_auth_changed(&self, token: Option<AuthToken>) -> RefreshStatus {
        match token {
            Some(token) => self.sign_in(token).await,
            None => {
                self.sign_out();
                RefreshStatus::Unauthenticated
            }
        }
    }

    fn invalidate(&self, control: &mut Control) {
        control.applied = control.issued;
        control.auth_floor = control.issued;
        self.inner.state.send_if_modified(|view| {
            let cleared = EntitlementView::default();
            if *view == cleared {
                return false;
            }
            *view = cleared;
            true
        });
    }

    // === status ===

    /// Re-fetch the snapshot.
    ///
    /// Safe to call any number of times; only the newest result that lands
    /// is kept, and an identical snapshot does not replace the current one.
    pub async fn refresh(&self) -> RefreshStatus {
        let (token, generation) = {
            let mut control = self.control();
            let Some(token) = control.token.clone() else {
                return RefreshStatus::Unauthenticated;
            };
            control.issued += 1;
            let generation = control.issued;
            control.pending.insert(generation);

            self.inner.state.send_if_modified(|view| {
                let changed = !view.loading;
                view.loading = true;
                changed
            });

            (token, generation)
        };

        tracing::debug!(
            target: "dealgate::entitlements::store",
            generation = generation,
            "Fetching subscription status"
        );

        let in_flight = InFlight {
            store: self,
            generation,
        };
        let outcome = self.inner.fetcher.fetch(Some(&token)).await;
        let (status, event) = self.apply(generation, outcome);
        drop(in_flight);

        if let Some(event) = event {
            self.inner.audit.log(event).await;
        }
        status
    }

    fn apply(
        &self,
        generation: u64,
        outcome: FetchOutcome,
    ) -> (RefreshStatus, Option<EntitlementAuditEvent>) {
        let mut control = self.control();
        control.pending.remove(&generation);

        if generation <= control.auth_floor {
            tracing::debug!(
                target: "dealgate::entitlements::store",
                generation = generation,
                "Discarding result fetched before auth change"
            );
            return (
                RefreshStatus::AuthChanged,
                Some(EntitlementAuditEvent::DiscardedAfterAuthChange { generation }),
            );
        }

        if generation <= control.applied {
            tracing::debug!(
                target: "dealgate::entitlements::store",
                generation = generation,
                applied = control.applied,
                "Discarding stale status result"
            );
            return (
                RefreshStatus::Stale,
                Some(EntitlementAuditEvent::StaleResultDiscarded {
                    generation,
                    applied: control.applied,
                }),
            );
        }

        control.applied = generation;
        let loading = control.loading();

        let event = match &outcome {
            FetchOutcome::Fresh(snapshot) => Some(EntitlementAuditEvent::SnapshotApplied {
                generation,
                plan: snapshot.plan,
            }),
            FetchOutcome::Fallback { error, .. } => Some(EntitlementAuditEvent::FallbackApplied {
                generation,
                reason: error.to_string(),
            }),
            FetchOutcome::Unauthenticated => None,
        };

        let status_error = outcome.error().cloned();
        let next = match outcome {
            FetchOutcome::Fresh(snapshot) | FetchOutcome::Fallback { snapshot, .. } => Some(snapshot),
            FetchOutcome::Unauthenticated => None,
        };

        self.inner.state.send_if_modified(|view| {
            let snapshot_changed = view.snapshot.as_deref() != next.as_ref();
            if !snapshot_changed && view.loading == loading && view.status_error == status_error {
                return false;
            }
            if snapshot_changed {
                view.snapshot = next.map(Arc::new);
            }
            view.loading = loading;
            view.status_error = status_error;
            true
        });

        (RefreshStatus::Applied, event)
    }

    fn abandon(&self, generation: u64) {
        let mut control = self.control();
        if !control.pending.remove(&generation) {
            return;
        }

        tracing::debug!(
            target: "dealgate::entitlements::store",
            generation = generation,
            "Status fetch dropped before completion"
        );

        let loading = control.loading();
        self.inner.state.send_if_modified(|view| {
            let changed = view.loading != loading;
            view.loading = loading;
            changed
        });
    }

    // === billing sessions ===

    fn token(&self) -> Option<AuthToken> {
        self.control().token.clone()
    }

    /// Start a checkout for the signed-in user and navigate to it.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` when signed out (nothing is sent); otherwise the
    /// backend's failure.
    pub async fn create_checkout_session(&self) -> Result<String> {
        let token = self.token();
        self.inner
            .sessions
            .create_checkout_session(token.as_ref())
            .await
    }

    /// Open the billing portal for the signed-in user.
    ///
    /// # Errors
    ///
    /// Same as [`create_checkout_session`](Self::create_checkout_session).
    pub async fn open_customer_portal(&self) -> Result<String> {
        let token = self.token();
        self.inner.sessions.open_customer_portal(token.as_ref()).await
    }

    #[must_use]
    pub fn checkout_phase(&self) -> watch::Receiver<SessionPhase> {
        self.inner.sessions.checkout_phase()
    }

    #[must_use]
    pub fn portal_phase(&self) -> watch::Receiver<SessionPhase> {
        self.inner.sessions.portal_phase()
    }
}
