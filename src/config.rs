use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::entitlements::{CheckoutConfig, FallbackPolicy};
use crate::error::{EntitlementError, Result};
use crate::utils::{get_env_with_prefix, parse_bool_flag};

/// Main configuration for the entitlement engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub checkout: CheckoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Snapshot substituted when the status read fails.
    #[serde(default)]
    pub fallback_policy: FallbackPolicy,
}

/// Dashboard backend connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Whole-request timeout. A timed-out status read is a failed one.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_json")]
    pub json: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout_seconds(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_json(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("dealgate/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json() -> bool {
    false
}

impl ApiConfig {
    /// The base URL as an absolute http(s) URL.
    pub fn parsed_base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            EntitlementError::invalid_config(format!(
                "Invalid API base URL '{}': {}",
                self.base_url, e
            ))
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(EntitlementError::invalid_config(format!(
                "API base URL must use http or https, got '{}'",
                scheme
            ))),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_api_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.api.base_url = base_url.into();
        self
    }

    pub fn with_api_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.api.timeout_seconds = seconds;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.api.user_agent = user_agent.into();
        self
    }

    pub fn with_checkout(mut self, checkout: CheckoutConfig) -> Self {
        self.config.checkout = checkout;
        self
    }

    pub fn with_success_url(mut self, url: impl Into<String>) -> Self {
        self.config.checkout.success_url = url.into();
        self
    }

    pub fn with_cancel_url(mut self, url: impl Into<String>) -> Self {
        self.config.checkout.cancel_url = url.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.config.fallback_policy = policy;
        self
    }

    /// Load configuration from environment variables with DEALGATE_ prefix
    ///
    /// Unparseable values are ignored and the current setting is kept.
    pub fn from_env(mut self) -> Self {
        if let Some(base_url) = get_env_with_prefix("API_BASE_URL") {
            self.config.api.base_url = base_url;
        }
        if let Some(timeout) = get_env_with_prefix("API_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.trim().parse() {
                self.config.api.timeout_seconds = seconds;
            }
        }
        if let Some(url) = get_env_with_prefix("CHECKOUT_SUCCESS_URL") {
            self.config.checkout.success_url = url;
        }
        if let Some(url) = get_env_with_prefix("CHECKOUT_CANCEL_URL") {
            self.config.checkout.cancel_url = url;
        }
        if let Some(domains) = get_env_with_prefix("CHECKOUT_ALLOWED_DOMAINS") {
            self.config.checkout.allowed_redirect_domains = domains
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            self.config.logging.json = parse_bool_flag(&json).unwrap_or(false);
        }
        if let Some(policy) = get_env_with_prefix("FALLBACK_POLICY") {
            if let Ok(policy) = policy.parse() {
                self.config.fallback_policy = policy;
            }
        }

        self
    }

    /// Build the configuration, validating all settings
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if:
    /// - The API base URL is not an absolute http(s) URL
    /// - The API timeout is zero
    /// - A checkout return URL is invalid or not allowed
    /// - The log level is unknown
    pub fn build(self) -> Result<Config> {
        self.config.api.parsed_base_url()?;

        if self.config.api.timeout_seconds == 0 {
            return Err(EntitlementError::invalid_config(
                "API timeout must be greater than 0",
            ));
        }

        self.config.checkout.validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging.level.to_lowercase().as_str()) {
            return Err(EntitlementError::invalid_config(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.config.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
