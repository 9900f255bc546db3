//! Client-side entitlement and usage-limit engine.
//!
//! Fetches the signed-in user's plan and usage from the dashboard backend,
//! keeps one live snapshot of it, answers "may the user do X" questions, and
//! starts hosted checkout and billing-portal flows.
//!
//! # Example
//!
//! ```rust,ignore
//! use dealgate::entitlements::{Counter, EntitlementStore, HttpBillingApi};
//! use dealgate::ConfigBuilder;
//!
//! let config = ConfigBuilder::new().from_env().build()?;
//! let store = EntitlementStore::new(
//!     HttpBillingApi::new(&config.api)?,
//!     |url: &str| webview.load(url),
//!     &config,
//! );
//!
//! // Auth layer reports a session
//! store.on_auth_changed(Some(token)).await;
//!
//! let gates = store.gates();
//! if !gates.can_consume(Counter::ValuationLookupsToday) {
//!     return show_upgrade_modal(gates.remaining(Counter::ValuationLookupsToday));
//! }
//!
//! // "Upgrade" button
//! store.create_checkout_session().await?;
//! ```

pub mod audit;
pub mod client;
pub mod fetcher;
pub mod gates;
pub mod http_client;
pub mod navigation;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod token;

// Snapshot exports
pub use snapshot::{
    Counter, EntitlementSnapshot, FallbackPolicy, Limit, Plan, SnapshotBuilder, Usage,
    UsageCounter, FREE_AI_SCORING_PER_DAY, FREE_LEADS_PER_DAY, FREE_PROPERTIES,
    FREE_VALUATION_LOOKUPS_PER_DAY,
};

// Gate exports
pub use gates::{AccountState, Gates};

// Client exports
pub use client::{BillingApi, CheckoutRequest, RedirectSession};
pub use http_client::HttpBillingApi;
pub use token::AuthToken;

// Fetch exports
pub use fetcher::{FetchOutcome, StatusFetcher};

// Session exports
pub use navigation::Navigator;
pub use session::{CheckoutConfig, SessionInitiator, SessionPhase};

// Store exports
pub use store::{EntitlementStore, EntitlementView, RefreshStatus};

// Audit exports
pub use audit::{
    EntitlementAuditEvent, EntitlementAuditLogger, NoOpAuditLogger, SessionKind,
    TracingAuditLogger,
};

// Test exports
#[cfg(any(test, feature = "test-entitlements"))]
pub use audit::test::RecordingAuditLogger;
#[cfg(any(test, feature = "test-entitlements"))]
pub use client::test::MockBillingApi;
#[cfg(any(test, feature = "test-entitlements"))]
pub use navigation::test::RecordingNavigator;
