use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::Serialize;

use crate::{
    bucketing::DatafileClient,
    circuit_breaker::{CircuitBreaker, CircuitBreakerError},
    client::{ClientFactory, LogLevel, SdkLogger},
    configuration_fetcher::ConfigurationFetcher,
    configuration_store::{Configuration, ConfigurationStore},
    identity::resolve_user_id,
    usecase::{with_usecase, OUTBOUND_DATAFILE_JSON},
    Datafile, Error, Result, ServiceConfig,
};

/// Variants selected for a single request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variants {
    /// Selected variant per configured experiment. `None` if the visitor is not part of the
    /// experiment.
    pub variants: HashMap<String, Option<String>>,
    /// Visitor identity the variants were computed for.
    pub user_id: String,
}

/// Service used for A/B testing.
///
/// The service keeps the datafile in memory. It has to be loaded with [`fetch`](Self::fetch),
/// [`fetch_safely`](Self::fetch_safely) or [`set_datafile`](Self::set_datafile) before variants
/// can be computed with [`get_variants`](Self::get_variants).
///
/// # Examples
/// ```no_run
/// # async fn handle(request: http::HeaderMap) -> abtest::Result<()> {
/// use abtest::ServiceConfig;
///
/// let service = ServiceConfig::new("https://cdn.example.com/datafile.json")
///     .experiments(["checkout-button"])
///     .to_service()?;
///
/// let mut response = http::HeaderMap::new();
/// if service.fetch_safely().await {
///     let variants = service.get_variants(&request, &mut response)?;
///     println!("{:?}", variants);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ExperimentService {
    config: ServiceConfig,
    store: ConfigurationStore,
    fetcher: ConfigurationFetcher,
    breaker: CircuitBreaker,
    client_factory: Box<dyn ClientFactory>,
    /// Serializes cold-cache fetches from `fetch_safely`.
    fetch_gate: tokio::sync::Mutex<()>,
    /// Number of fetch attempts completed through `fetch_safely`.
    fetch_attempts: AtomicU64,
}

impl ExperimentService {
    /// Create a new service using the built-in [`DatafileClient`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the configured URL cannot be parsed.
    pub fn new(config: ServiceConfig) -> Result<ExperimentService> {
        let fetcher = ConfigurationFetcher::new(&config.url)?;
        let breaker = CircuitBreaker::new(config.circuit_breaker.clone());

        Ok(ExperimentService {
            config,
            store: ConfigurationStore::new(),
            fetcher,
            breaker,
            client_factory: Box::new(DatafileClient::create),
            fetch_gate: tokio::sync::Mutex::new(()),
            fetch_attempts: AtomicU64::new(0),
        })
    }

    /// Use `factory` to build experimentation clients instead of [`DatafileClient`].
    pub fn with_client_factory(mut self, factory: impl ClientFactory + 'static) -> Self {
        self.client_factory = Box::new(factory);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Load the datafile from the configured URL, replacing the current one.
    ///
    /// The request runs through the circuit breaker. On failure the current datafile, if any, is
    /// kept.
    ///
    /// # Errors
    ///
    /// - [`Error::Network`] if the datafile could not be fetched.
    /// - [`Error::CircuitBreaker`] if the breaker is open or the request timed out.
    pub async fn fetch(&self) -> Result<()> {
        let datafile = self
            .breaker
            .call(|| with_usecase(OUTBOUND_DATAFILE_JSON, self.fetcher.fetch()))
            .await
            .inspect_err(|err| {
                // Other fetch errors are logged by the fetcher. A timed out request is cancelled
                // before it can report anything.
                if let Error::CircuitBreaker(CircuitBreakerError::Timeout(_)) = err {
                    let url = self.fetcher.url();
                    log::error!(target: "abtest",
                                url:display = url;
                                "failed to fetch datafile JSON from {}: {}", url, err);
                }
            })?;

        self.set_datafile(datafile);
        log::debug!(target: "abtest", "successfully fetched configuration data from API");
        Ok(())
    }

    /// Make sure a datafile is loaded, fetching it if necessary.
    ///
    /// Returns immediately if a datafile is present. Otherwise performs a [`fetch`](Self::fetch);
    /// callers that arrive while a fetch is in flight wait for it and share its outcome instead of
    /// issuing their own request.
    ///
    /// Never fails: returns `true` if a datafile is available afterwards, `false` otherwise.
    pub async fn fetch_safely(&self) -> bool {
        if self.has_data() {
            return true;
        }

        let observed = self.fetch_attempts.load(Ordering::Acquire);
        let _gate = self.fetch_gate.lock().await;
        if self.fetch_attempts.load(Ordering::Acquire) != observed || self.has_data() {
            return self.has_data();
        }

        if let Err(err) = self.fetch().await {
            // Fetch errors are logged by the fetcher; breaker rejections are expected while the
            // API is down.
            log::debug!(target: "abtest", "continuing without configuration data: {}", err);
        }
        self.fetch_attempts.fetch_add(1, Ordering::AcqRel);
        self.has_data()
    }

    /// Replace the datafile and rebuild the experimentation client from it.
    ///
    /// A `null` datafile clears the service instead, as if [`reset`](Self::reset) was called.
    pub fn set_datafile(&self, datafile: Datafile) {
        if datafile.as_json().is_null() {
            log::warn!(target: "abtest", "datafile is null, dropping configuration data");
            self.store.clear();
            return;
        }
        let datafile = Arc::new(datafile);
        let client = self
            .client_factory
            .create_client(datafile.clone(), self.sdk_logger());
        self.store
            .set_configuration(Configuration::new(datafile, client));
    }

    /// The active datafile, if any.
    pub fn datafile(&self) -> Option<Arc<Datafile>> {
        self.store
            .get_configuration()
            .map(|configuration| configuration.datafile().clone())
    }

    /// When the active datafile was loaded, if any.
    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.store
            .get_configuration()
            .map(|configuration| configuration.activated_at)
    }

    /// Drop the datafile and its client so the next [`fetch_safely`](Self::fetch_safely) loads it
    /// again.
    pub fn reset(&self) {
        self.store.clear();
    }

    /// Compute variants of all configured experiments for the visitor of a request.
    ///
    /// The visitor is identified by the configured cookie; a new identity is written to
    /// `response` if the request has none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationMissing`] if no datafile has been loaded. No fetch is
    /// attempted in that case.
    pub fn get_variants(&self, request: &HeaderMap, response: &mut HeaderMap) -> Result<Variants> {
        let configuration = self
            .store
            .get_configuration()
            .ok_or(Error::ConfigurationMissing)?;

        let user_id = resolve_user_id(&self.config.cookie_name, request, response);
        let variants = self
            .config
            .experiments
            .iter()
            .map(|experiment| {
                let variant = configuration.client().activate(experiment, &user_id);
                (experiment.clone(), variant)
            })
            .collect();

        log::trace!(target: "abtest", user_id:display = user_id; "computed variants");
        Ok(Variants { variants, user_id })
    }

    /// Logger handed to experimentation clients. Visible for testing purposes.
    ///
    /// Messages are only forwarded when the service runs in debug mode.
    pub fn log_with_client(&self, level: LogLevel, message: &str) {
        forward_client_log(self.config.debug, level, message);
    }

    fn has_data(&self) -> bool {
        self.store.get_configuration().is_some()
    }

    fn sdk_logger(&self) -> SdkLogger {
        let debug = self.config.debug;
        Arc::new(move |level: LogLevel, message: &str| forward_client_log(debug, level, message))
    }
}

fn forward_client_log(debug: bool, level: LogLevel, message: &str) {
    // Error messages are subject to the debug switch as well.
    if !debug {
        return;
    }
    match level {
        LogLevel::Debug => log::debug!(target: "abtest", "{}", message),
        LogLevel::Info => log::info!(target: "abtest", "{}", message),
        LogLevel::Warning => log::warn!(target: "abtest", "{}", message),
        LogLevel::Error => log::error!(target: "abtest", "{}", message),
    }
}
