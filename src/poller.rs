//! A background task that periodically refreshes the datafile of an [`ExperimentService`].
use std::{sync::Arc, time::Duration};

use rand::{thread_rng, Rng};
use tokio::{sync::watch, task::JoinHandle};

use crate::{Error, ExperimentService, Result};

/// Configuration for [`Poller`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval to wait between fetches.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Random amount subtracted from each interval. This helps to avoid multiple server instances
    /// synchronizing and producing spiky load on the datafile host.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
}

impl PollerConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(30);

    pub fn new() -> PollerConfig {
        PollerConfig::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> PollerConfig {
        self.interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> PollerConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerConfig {
    fn default() -> PollerConfig {
        PollerConfig {
            interval: PollerConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerConfig::DEFAULT_POLL_JITTER,
        }
    }
}

/// A datafile poller task.
///
/// The poller fetches the datafile right away and then once per interval, always through
/// [`ExperimentService::fetch`], so the circuit breaker applies. A failed fetch keeps the
/// previous datafile.
pub struct Poller {
    join_handle: JoinHandle<()>,

    /// Used to send a stop command to the poller task.
    stop_sender: watch::Sender<bool>,

    /// Holds `None` until the first fetch attempt has completed, then the outcome of the latest
    /// attempt.
    result: watch::Receiver<Option<Result<()>>>,
}

impl Poller {
    /// Start polling with the default configuration. Must be called within a tokio runtime.
    pub fn start(service: Arc<ExperimentService>) -> Poller {
        Poller::start_with_config(service, PollerConfig::default())
    }

    pub fn start_with_config(service: Arc<ExperimentService>, config: PollerConfig) -> Poller {
        let (stop_sender, mut stop_receiver) = watch::channel(false);
        let (result_sender, result) = watch::channel(None);

        let join_handle = tokio::spawn(async move {
            loop {
                log::debug!(target: "abtest", "polling for a new datafile");
                let outcome = service.fetch().await;
                if let Err(err) = &outcome {
                    log::warn!(target: "abtest", "datafile poll failed, keeping current datafile: {}", err);
                }
                result_sender.send_replace(Some(outcome));

                let timeout = jitter(config.interval, config.jitter);
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {}
                    changed = stop_receiver.changed() => {
                        // Err means the `Poller` was dropped. Stop in both cases.
                        let _ = changed;
                        log::debug!(target: "abtest", "poller received stop command");
                        return;
                    }
                }
            }
        });

        Poller {
            join_handle,
            stop_sender,
            result,
        }
    }

    /// Wait until the first fetch attempt has completed and return its outcome.
    ///
    /// Returns immediately if an attempt has already completed, with the outcome of the latest
    /// one.
    ///
    /// # Errors
    ///
    /// - The fetch error of the attempt.
    /// - [`Error::PollerPanicked`] if the task died before completing an attempt.
    pub async fn wait_for_configuration(&self) -> Result<()> {
        let mut result = self.result.clone();
        let outcome = result
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::PollerPanicked)?;
        outcome.clone().unwrap_or(Err(Error::PollerPanicked))
    }

    /// Stop the poller task.
    ///
    /// This function does not wait for the task to actually stop.
    pub fn stop(&self) {
        // Sending fails only if the task has exited already.
        let _ = self.stop_sender.send(true);
    }

    /// Stop the poller task and wait for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PollerPanicked`] if the task panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle.await.map_err(|_| Error::PollerPanicked)?;
        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}


#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::json;
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    use super::{Poller, PollerConfig};
    use crate::{Datafile, Error, ServiceConfig};

    fn fast_polling() -> PollerConfig {
        PollerConfig::new()
            .with_interval(Duration::from_millis(50))
            .with_jitter(Duration::ZERO)
    }

    #[tokio::test]
    async fn first_poll_loads_datafile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"experiments": []})))
            .mount(&server)
            .await;
        let service = Arc::new(ServiceConfig::new(server.uri()).to_service().unwrap());

        let poller = Poller::start_with_config(service.clone(), PollerConfig::default());
        poller.wait_for_configuration().await.unwrap();

        assert_eq!(
            service.datafile().as_deref(),
            Some(&Datafile::from(json!({"experiments": []})))
        );
        poller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn reports_failed_first_poll() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let service = Arc::new(ServiceConfig::new(server.uri()).to_service().unwrap());

        let poller = Poller::start(service.clone());

        assert!(matches!(
            poller.wait_for_configuration().await,
            Err(Error::Network(_))
        ));
        assert!(service.datafile().is_none());
        poller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn keeps_refreshing_until_stopped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"experiments": []})))
            .mount(&server)
            .await;
        let service = Arc::new(ServiceConfig::new(server.uri()).to_service().unwrap());

        let poller = Poller::start_with_config(service, fast_polling());
        tokio::time::sleep(Duration::from_millis(180)).await;
        poller.shutdown().await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests.len() >= 2, "only {} requests", requests.len());
    }
}
