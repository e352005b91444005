//! Timing and success/failure accounting for outbound calls.
use std::future::Future;

use tokio::time::Instant;

use crate::metrics_defs::{USECASE_DURATION, USECASE_FAILURE, USECASE_SUCCESS};

/// Usecase identifier of the datafile fetch.
pub const OUTBOUND_DATAFILE_JSON: &str = "outbound.experiments.json";

/// A named unit of work reported to the `metrics` recorder.
///
/// A usecase dropped before [`success`](Usecase::success) or [`fail`](Usecase::fail) was called
/// counts as failed. This covers futures cancelled by a timeout.
#[derive(Debug)]
pub struct Usecase {
    id: &'static str,
    started_at: Option<Instant>,
    settled: bool,
}

impl Usecase {
    pub fn new(id: &'static str) -> Usecase {
        Usecase {
            id,
            started_at: None,
            settled: false,
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn start_timer(&mut self) -> &mut Self {
        self.started_at = Some(Instant::now());
        self
    }

    /// Record time elapsed since [`Usecase::start_timer`]. Does nothing if the timer was not
    /// started.
    pub fn stop_timer(&mut self) -> &mut Self {
        if let Some(started_at) = self.started_at.take() {
            metrics::histogram!(USECASE_DURATION.name, "usecase" => self.id)
                .record(started_at.elapsed().as_secs_f64());
        }
        self
    }

    pub fn success(&mut self) {
        self.settled = true;
        metrics::counter!(USECASE_SUCCESS.name, "usecase" => self.id).increment(1);
    }

    pub fn fail(&mut self) {
        self.settled = true;
        log::debug!(target: "abtest", usecase = self.id; "usecase failed");
        metrics::counter!(USECASE_FAILURE.name, "usecase" => self.id).increment(1);
    }
}

impl Drop for Usecase {
    fn drop(&mut self) {
        if !self.settled {
            log::debug!(target: "abtest", usecase = self.id; "usecase cancelled before settling");
            self.stop_timer().fail();
        }
    }
}

/// Run `operation` as usecase `id`: time it and count its outcome.
///
/// The result of `operation` is returned unchanged; errors are recorded and passed on. Dropping
/// the returned future before it completes records a failure.
pub async fn with_usecase<Fut, T, E>(id: &'static str, operation: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let mut usecase = Usecase::new(id);
    usecase.start_timer();
    let result = operation.await;
    let usecase = usecase.stop_timer();
    match &result {
        Ok(_) => usecase.success(),
        Err(_) => usecase.fail(),
    }
    result
}
