//! Live HTTP implementation of [`BillingApi`].
//!
//! Talks to the dashboard backend with `reqwest`, sending the auth token as a
//! bearer header and mapping every failure onto the crate's error taxonomy:
//!
//! - no response at all (connect error, timeout) -> `TransportFailure`
//! - non-2xx status -> `ServerRejected`, with the body's `error` message when present
//! - body that does not decode -> `MalformedResponse`

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ApiConfig;
use crate::error::{EntitlementError, Result};
use super::client::{
    BillingApi, CHECKOUT_PATH, CheckoutRequest, PORTAL_PATH, RedirectSession, STATUS_PATH,
};
use super::snapshot::EntitlementSnapshot;
use super::token::AuthToken;

const STATUS_OPERATION: &str = "subscription_status";
const CHECKOUT_OPERATION: &str = "create_checkout_session";
const PORTAL_OPERATION: &str = "create_portal_session";

/// Body of a non-2xx reply.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Body of a successful session reply.
#[derive(Debug, Deserialize)]
struct RedirectBody {
    url: String,
}

/// Production billing API client.
///
/// # Example
///
/// ```rust,ignore
/// use dealgate::{ConfigBuilder, HttpBillingApi};
///
/// let config = ConfigBuilder::new().from_env().build()?;
/// let api = HttpBillingApi::new(&config.api)?;
/// ```
#[derive(Clone, Debug)]
pub struct HttpBillingApi {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpBillingApi {
    /// Build a client from API configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the base URL does not parse or the HTTP
    /// client cannot be constructed.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = config.parsed_base_url()?;
        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| {
                EntitlementError::invalid_config(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Use a preconfigured `reqwest::Client`.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: Url, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` under the base URL, keeping any path prefix the base
    /// carries (`https://host/backend` + `/api/x` -> `https://host/backend/api/x`).
    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let directory = format!("{}/", base.path());
            base.set_path(&directory);
        }

        base.join(path.trim_start_matches('/')).map_err(|e| {
            EntitlementError::invalid_config(format!("Invalid endpoint path '{}': {}", path, e))
        })
    }

    /// Send a request and return the body of a 2xx reply.
    async fn execute(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
        token: &AuthToken,
    ) -> Result<Vec<u8>> {
        let response = request
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(|e| self.transport_error(operation, &e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(operation, &e))?;

        if status.is_success() {
            tracing::debug!(
                target: "dealgate::entitlements::http",
                operation = operation,
                status = status.as_u16(),
                "Backend request succeeded"
            );
            return Ok(body.to_vec());
        }

        let message = serde_json::from_slice::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| generic_message(operation).to_string());

        tracing::debug!(
            target: "dealgate::entitlements::http",
            operation = operation,
            status = status.as_u16(),
            message = %message,
            "Backend rejected request"
        );

        Err(EntitlementError::rejected(status.as_u16(), message))
    }

    fn transport_error(&self, operation: &str, error: &reqwest::Error) -> EntitlementError {
        if error.is_timeout() {
            EntitlementError::transport(format!(
                "{} timed out after {} seconds",
                operation,
                self.timeout.as_secs()
            ))
        } else {
            EntitlementError::transport(format!("{} failed: {}", operation, error))
        }
    }

    async fn request_redirect(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
        token: &AuthToken,
    ) -> Result<RedirectSession> {
        let body: RedirectBody = decode(&self.execute(operation, request, token).await?)?;
        parse_redirect(body.url).map(RedirectSession::new)
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| EntitlementError::malformed(e.to_string()))
}

/// Generic user-facing message when the backend gives none.
fn generic_message(operation: &str) -> &'static str {
    match operation {
        CHECKOUT_OPERATION => "Failed to create checkout session",
        PORTAL_OPERATION => "Failed to open billing portal",
        _ => "Failed to load subscription status",
    }
}

/// Redirect targets must be absolute http(s) URLs. The raw string is kept so
/// navigation uses exactly what the server sent.
fn parse_redirect(raw: String) -> Result<String> {
    let url = Url::parse(&raw)
        .map_err(|e| EntitlementError::malformed(format!("Invalid redirect URL '{}': {}", raw, e)))?;

    match url.scheme() {
        "https" | "http" => Ok(raw),
        scheme => Err(EntitlementError::malformed(format!(
            "Redirect URL must use http or https, got '{}'",
            scheme
        ))),
    }
}

impl BillingApi for HttpBillingApi {
    async fn subscription_status(&self, token: &AuthToken) -> Result<EntitlementSnapshot> {
        let url = self.endpoint(STATUS_PATH)?;
        decode(&self.execute(STATUS_OPERATION, self.client.get(url), token).await?)
    }

    async fn create_checkout_session(
        &self,
        token: &AuthToken,
        request: &CheckoutRequest,
    ) -> Result<RedirectSession> {
        let url = self.endpoint(CHECKOUT_PATH)?;
        self.request_redirect(CHECKOUT_OPERATION, self.client.post(url).json(request), token)
            .await
    }

    async fn create_portal_session(&self, token: &AuthToken) -> Result<RedirectSession> {
        let url = self.endpoint(PORTAL_PATH)?;
        self.request_redirect(PORTAL_OPERATION, self.client.post(url), token)
            .await
    }
}
