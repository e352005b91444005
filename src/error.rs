use std::sync::Arc;

use thiserror::Error;

use crate::circuit_breaker::CircuitBreakerError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the experiment service.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Variants were requested before any configuration data has been fetched or set.
    #[error(
        "cannot get variants for incoming request, no configuration data; did you forget to call fetch?"
    )]
    ConfigurationMissing,

    /// The configured datafile URL could not be parsed.
    #[error("invalid datafile url")]
    InvalidUrl(#[source] url::ParseError),

    /// Fetching the datafile failed (transport error, timeout, non-2xx status or a body that is
    /// not JSON).
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// The datafile host answered with a `null` document.
    #[error("datafile response body is null")]
    EmptyDatafile,

    /// The call was rejected or cut short by the circuit breaker.
    #[error(transparent)]
    CircuitBreaker(#[from] CircuitBreakerError),

    /// The service configuration document could not be parsed.
    #[error("invalid service configuration")]
    InvalidConfig(#[source] Arc<serde_json::Error>),

    /// Indicates that the poller task panicked. This should normally never happen.
    #[error("poller task panicked")]
    PollerPanicked,
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::InvalidConfig(Arc::new(value))
    }
}
