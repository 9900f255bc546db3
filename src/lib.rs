//! Dealgate - plan entitlements and usage limits for the real-estate dashboard
//!
//! Dealgate keeps the dashboard's view of "what is this user allowed to do"
//! in one place: it reads the subscription status from the backend, applies
//! only the newest result, falls back to restrictive defaults when the
//! backend is unreachable, and starts hosted checkout and billing-portal flows.
//!
//! # Features
//!
//! - **Snapshot**: Typed plan, trial and usage state with the backend's wire format
//! - **Gates**: Pure predicates (`can_create_lead`, `can_lookup_valuation`, ...)
//! - **Store**: Last-fetch-wins ordering, instant sign-out, `watch` subscriptions
//! - **Sessions**: Checkout and portal redirects with observable progress
//! - **Testing**: Scripted `MockBillingApi` behind the `test-entitlements` feature
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dealgate::{ConfigBuilder, EntitlementStore, HttpBillingApi};
//!
//! #[tokio::main]
//! async fn main() -> dealgate::Result<()> {
//!     // Initialize logging
//!     dealgate::init_tracing();
//!
//!     let config = ConfigBuilder::new().from_env().build()?;
//!     let store = EntitlementStore::new(
//!         HttpBillingApi::new(&config.api)?,
//!         |url: &str| println!("navigate to {url}"),
//!         &config,
//!     );
//!
//!     store.sign_in("eyJhbGciOi...".into()).await;
//!     println!("pro: {}", store.gates().is_pro());
//!     Ok(())
//! }
//! ```

#![allow(async_fn_in_trait)]

mod config;
pub mod entitlements;
mod error;
pub mod utils;

// Re-exports for public API
pub use config::{ApiConfig, Config, ConfigBuilder, LoggingConfig};
pub use entitlements::{
    AuthToken, BillingApi, CheckoutConfig, Counter, EntitlementSnapshot, EntitlementStore,
    EntitlementView, FallbackPolicy, Gates, HttpBillingApi, Navigator, Plan, SessionPhase,
};
pub use error::{EntitlementError, Result};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// Call once, early, before building the store.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "dealgate=debug", "dealgate::audit=info")
/// - `DEALGATE_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = utils::get_env_with_prefix("LOG_JSON")
        .and_then(|v| utils::parse_bool_flag(&v))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing with a custom configuration
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::new(&config.logging.level);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
