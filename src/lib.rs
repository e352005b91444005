//! Per-request A/B test variant assignment backed by a remotely hosted experiment datafile.
//!
//! # Overview
//!
//! The crate revolves around an [`ExperimentService`]. It downloads the experiment datafile from
//! a configured URL, keeps it in memory and computes variants of the configured experiments for
//! each incoming request. Visitors are identified by a cookie; a visitor without one gets a new
//! time-ordered identity that is written back to the response.
//!
//! Downloads are guarded by a [`CircuitBreaker`], so an unreachable datafile host is not hammered
//! with requests and the logs are not flooded with errors. [`ExperimentService::fetch_safely`]
//! never fails: request handlers call it and fall back to the default experience if it returns
//! `false`.
//!
//! Variant computation is delegated to an [`ExperimentClient`], which is rebuilt whenever a new
//! datafile becomes active. The built-in [`DatafileClient`] buckets visitors using the traffic
//! allocation of the datafile; other implementations can be plugged in through a
//! [`ClientFactory`].
//!
//! A [`Poller`] can keep the datafile up to date in the background.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Calling
//! [`get_variants`](ExperimentService::get_variants) before a datafile is loaded returns
//! [`Error::ConfigurationMissing`], which indicates a usage error rather than a transient
//! condition.
//!
//! # Logging and metrics
//!
//! The crate logs through the [`log`](https://docs.rs/log/latest/log/) facade under the `abtest`
//! target. Messages of the experimentation client are only forwarded in
//! [debug mode](ServiceConfig::debug). Datafile downloads are timed and counted through the
//! [`metrics`](https://docs.rs/metrics/latest/metrics/) facade, see [`metrics_defs`].

#![warn(rustdoc::missing_crate_level_docs)]

mod bucketing;
mod circuit_breaker;
mod client;
mod config;
mod configuration_fetcher;
mod configuration_store;
mod datafile;
mod error;
mod identity;
pub mod metrics_defs;
mod poller;
mod service;
mod sharder;
mod usecase;

#[cfg(test)]
mod test_logger;

pub use bucketing::DatafileClient;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use client::{ClientFactory, ExperimentClient, LogLevel, SdkLogger};
pub use config::ServiceConfig;
pub use configuration_fetcher::ConfigurationFetcher;
pub use configuration_store::{Configuration, ConfigurationStore};
pub use datafile::Datafile;
pub use error::{Error, Result};
pub use identity::resolve_user_id;
pub use poller::{Poller, PollerConfig};
pub use service::{ExperimentService, Variants};
pub use sharder::{Md5Sharder, Sharder};
pub use usecase::{with_usecase, Usecase, OUTBOUND_DATAFILE_JSON};
