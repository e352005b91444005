use serde::Deserialize;

use crate::{circuit_breaker::CircuitBreakerConfig, ExperimentService, Result};

/// Configuration for [`ExperimentService`].
///
/// Can be built in code or deserialized from a JSON document with camelCase keys:
///
/// ```
/// # use abtest::ServiceConfig;
/// let config = ServiceConfig::from_json(
///     r#"{
///         "url": "https://cdn.example.com/datafiles/production.json",
///         "experiments": ["checkout-button"],
///         "cookieName": "ab_user",
///         "debug": true
///     }"#,
/// )
/// .unwrap();
/// assert_eq!(config.cookie_name, "ab_user");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Forward log messages of the experimentation client to the `log` facade.
    #[serde(default)]
    pub debug: bool,
    /// Names of the experiments activated for every request.
    #[serde(default)]
    pub experiments: Vec<String>,
    /// Location of the experiment datafile.
    pub url: String,
    /// Name of the cookie holding the visitor identity.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Settings of the circuit breaker guarding datafile fetches.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_cookie_name() -> String {
    ServiceConfig::DEFAULT_COOKIE_NAME.to_owned()
}

impl ServiceConfig {
    /// Default name of the visitor identity cookie.
    pub const DEFAULT_COOKIE_NAME: &'static str = "abtest_user_id";

    /// Create a default configuration fetching the datafile from `url`.
    ///
    /// ```
    /// # use abtest::ServiceConfig;
    /// ServiceConfig::new("https://cdn.example.com/datafile.json");
    /// ```
    pub fn new(url: impl Into<String>) -> Self {
        ServiceConfig {
            debug: false,
            experiments: Vec::new(),
            url: url.into(),
            cookie_name: default_cookie_name(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    /// Parse configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the experiments to activate for each request.
    pub fn experiments<I, S>(mut self, experiments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.experiments = experiments.into_iter().map(Into::into).collect();
        self
    }

    pub fn cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        self.cookie_name = cookie_name.into();
        self
    }

    /// Override circuit breaker settings. The defaults are suitable for most deployments.
    pub fn circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    /// Create a new [`ExperimentService`] using this configuration.
    ///
    /// ```
    /// # use abtest::ServiceConfig;
    /// let service = ServiceConfig::new("https://cdn.example.com/datafile.json")
    ///     .experiments(["checkout-button"])
    ///     .to_service()
    ///     .unwrap();
    /// ```
    pub fn to_service(self) -> Result<ExperimentService> {
        ExperimentService::new(self)
    }
}
