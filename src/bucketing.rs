//! Built-in [`ExperimentClient`] that buckets visitors using the traffic allocation of a
//! datafile.
//!
//! Understood datafile layout:
//!
//! ```json
//! {
//!   "experiments": [{
//!     "id": "9300000007",
//!     "key": "checkout-button",
//!     "status": "Running",
//!     "variations": [{"id": "1", "key": "control"}, {"id": "2", "key": "green"}],
//!     "trafficAllocation": [{"entityId": "1", "endOfRange": 5000}, {"entityId": "2", "endOfRange": 10000}],
//!     "forcedVariations": {"qa-user": "green"}
//!   }]
//! }
//! ```
//!
//! Unknown keys are ignored. An experiment that fails to parse does not prevent the rest of the
//! datafile from being used.
use std::{collections::HashMap, sync::Arc};

use serde::Deserialize;

use crate::{
    client::{ExperimentClient, LogLevel, SdkLogger},
    sharder::{Md5Sharder, Sharder},
    Datafile,
};

const TOTAL_BUCKETS: u64 = 10_000;
const STATUS_RUNNING: &str = "Running";

/// `TryParse` allows a single experiment to fail parsing without failing the whole datafile.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExperimentsDatafile {
    experiments: Vec<TryParse<Experiment>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Experiment {
    id: String,
    key: String,
    #[serde(default = "default_status")]
    status: String,
    variations: Vec<Variation>,
    #[serde(default)]
    traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    forced_variations: HashMap<String, String>,
}

fn default_status() -> String {
    STATUS_RUNNING.to_owned()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Variation {
    id: String,
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrafficAllocation {
    entity_id: String,
    end_of_range: u64,
}

/// The default experimentation client.
pub struct DatafileClient {
    experiments: HashMap<String, TryParse<Experiment>>,
    logger: SdkLogger,
}

impl DatafileClient {
    pub fn new(datafile: Arc<Datafile>, logger: SdkLogger) -> DatafileClient {
        let experiments = match ExperimentsDatafile::deserialize(datafile.as_json()) {
            Ok(parsed) => index_experiments(parsed, &logger),
            Err(err) => {
                logger(LogLevel::Error, &format!("unable to parse datafile: {err}"));
                HashMap::new()
            }
        };

        DatafileClient {
            experiments,
            logger,
        }
    }

    /// Factory function suitable for [`ExperimentService::with_client_factory`](crate::ExperimentService::with_client_factory).
    pub fn create(datafile: Arc<Datafile>, logger: SdkLogger) -> Arc<dyn ExperimentClient> {
        Arc::new(DatafileClient::new(datafile, logger))
    }

    fn log(&self, level: LogLevel, message: &str) {
        (self.logger)(level, message);
    }
}

fn index_experiments(
    datafile: ExperimentsDatafile,
    logger: &SdkLogger,
) -> HashMap<String, TryParse<Experiment>> {
    let mut experiments = HashMap::with_capacity(datafile.experiments.len());
    for entry in datafile.experiments {
        match entry {
            TryParse::Parsed(experiment) => {
                experiments.insert(experiment.key.clone(), TryParse::Parsed(experiment));
            }
            TryParse::ParseFailed(json) => {
                let Some(key) = json
                    .get("key")
                    .and_then(|key| key.as_str())
                    .map(str::to_owned)
                else {
                    logger(LogLevel::Error, "skipping datafile experiment without a key");
                    continue;
                };
                logger(
                    LogLevel::Error,
                    &format!("experiment {key} in datafile could not be parsed"),
                );
                experiments.insert(key, TryParse::ParseFailed(json));
            }
        }
    }
    experiments
}

impl ExperimentClient for DatafileClient {
    fn activate(&self, experiment_key: &str, user_id: &str) -> Option<String> {
        let experiment = match self.experiments.get(experiment_key) {
            Some(TryParse::Parsed(experiment)) => experiment,
            Some(TryParse::ParseFailed(_)) => {
                self.log(
                    LogLevel::Error,
                    &format!("experiment {experiment_key} has invalid configuration"),
                );
                return None;
            }
            None => {
                self.log(
                    LogLevel::Error,
                    &format!("experiment {experiment_key} is not in the datafile"),
                );
                return None;
            }
        };

        if experiment.status != STATUS_RUNNING {
            self.log(
                LogLevel::Info,
                &format!("experiment {experiment_key} is not running"),
            );
            return None;
        }

        if let Some(forced) = experiment.forced_variations.get(user_id) {
            match experiment.variations.iter().find(|v| &v.key == forced) {
                Some(variation) => {
                    self.log(
                        LogLevel::Debug,
                        &format!(
                            "user {user_id} is forced into variation {} of experiment {experiment_key}",
                            variation.key
                        ),
                    );
                    return Some(variation.key.clone());
                }
                None => self.log(
                    LogLevel::Warning,
                    &format!(
                        "forced variation {forced} does not exist in experiment {experiment_key}"
                    ),
                ),
            }
        }

        let bucket = Md5Sharder.get_shard(format!("{user_id}{}", experiment.id), TOTAL_BUCKETS);
        let variation = experiment
            .traffic_allocation
            .iter()
            .find(|allocation| bucket < allocation.end_of_range)
            .and_then(|allocation| {
                experiment
                    .variations
                    .iter()
                    .find(|variation| variation.id == allocation.entity_id)
            });

        match variation {
            Some(variation) => {
                self.log(
                    LogLevel::Debug,
                    &format!(
                        "user {user_id} is in variation {} of experiment {experiment_key}",
                        variation.key
                    ),
                );
                Some(variation.key.clone())
            }
            None => {
                self.log(
                    LogLevel::Info,
                    &format!("user {user_id} is not in any variation of experiment {experiment_key}"),
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::DatafileClient;
    use crate::{
        client::{ExperimentClient, LogLevel, SdkLogger},
        Datafile,
    };

    fn recording_logger() -> (SdkLogger, Arc<Mutex<Vec<(LogLevel, String)>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = records.clone();
        let logger: SdkLogger = Arc::new(move |level: LogLevel, message: &str| {
            sink.lock().unwrap().push((level, message.to_owned()));
        });
        (logger, records)
    }

    fn client(datafile: serde_json::Value) -> (DatafileClient, Arc<Mutex<Vec<(LogLevel, String)>>>) {
        let (logger, records) = recording_logger();
        (
            DatafileClient::new(Arc::new(Datafile::from(datafile)), logger),
            records,
        )
    }

    fn datafile() -> serde_json::Value {
        json!({
            "version": "4",
            "experiments": [
                {
                    "id": "100",
                    "key": "everyone-green",
                    "status": "Running",
                    "variations": [{"id": "1", "key": "control"}, {"id": "2", "key": "green"}],
                    "trafficAllocation": [{"entityId": "2", "endOfRange": 10000}],
                    "forcedVariations": {"qa-user": "control"}
                },
                {
                    "id": "200",
                    "key": "split",
                    "status": "Running",
                    "variations": [{"id": "1", "key": "a"}, {"id": "2", "key": "b"}],
                    "trafficAllocation": [
                        {"entityId": "1", "endOfRange": 5000},
                        {"entityId": "2", "endOfRange": 10000}
                    ]
                },
                {
                    "id": "300",
                    "key": "paused",
                    "status": "Paused",
                    "variations": [{"id": "1", "key": "a"}],
                    "trafficAllocation": [{"entityId": "1", "endOfRange": 10000}]
                },
                {
                    "id": "400",
                    "key": "holdback",
                    "variations": [{"id": "1", "key": "a"}],
                    "trafficAllocation": [{"entityId": "", "endOfRange": 10000}]
                },
                {
                    "key": "broken",
                    "variations": "not-a-list"
                }
            ]
        })
    }

    #[test]
    fn assigns_variation_covering_the_whole_range() {
        let (client, _) = client(datafile());

        assert_eq!(
            client.activate("everyone-green", "visitor-1"),
            Some("green".to_owned())
        );
    }

    #[test]
    fn forced_variation_wins_over_allocation() {
        let (client, records) = client(datafile());

        assert_eq!(
            client.activate("everyone-green", "qa-user"),
            Some("control".to_owned())
        );
        assert!(records.lock().unwrap().iter().any(|(level, message)| {
            *level == LogLevel::Debug && message.contains("forced into variation control")
        }));
    }

    #[test]
    fn assignment_is_deterministic_per_user() {
        let (client, _) = client(datafile());

        for user in ["u-1", "u-2", "u-3", "u-4"] {
            let first = client.activate("split", user);
            assert!(matches!(first.as_deref(), Some("a") | Some("b")));
            assert_eq!(client.activate("split", user), first);
        }
    }

    #[test]
    fn skips_experiments_that_are_not_running() {
        let (client, records) = client(datafile());

        assert_eq!(client.activate("paused", "visitor-1"), None);
        assert!(records
            .lock()
            .unwrap()
            .contains(&(LogLevel::Info, "experiment paused is not running".to_owned())));
    }

    #[test]
    fn holdback_allocation_assigns_nothing() {
        let (client, _) = client(datafile());

        assert_eq!(client.activate("holdback", "visitor-1"), None);
    }

    #[test]
    fn reports_unknown_and_broken_experiments() {
        let (client, records) = client(datafile());

        assert_eq!(client.activate("missing", "visitor-1"), None);
        assert_eq!(client.activate("broken", "visitor-1"), None);

        let records = records.lock().unwrap();
        assert!(records.contains(&(
            LogLevel::Error,
            "experiment broken in datafile could not be parsed".to_owned()
        )));
        assert!(records.contains(&(
            LogLevel::Error,
            "experiment missing is not in the datafile".to_owned()
        )));
        assert!(records.contains(&(
            LogLevel::Error,
            "experiment broken has invalid configuration".to_owned()
        )));
    }

    #[test]
    fn unrecognized_datafile_yields_empty_client() {
        let (client, records) = client(json!([{"experimentKey": "experiment-1"}]));

        assert_eq!(client.activate("experiment-1", "visitor-1"), None);
        assert!(records
            .lock()
            .unwrap()
            .iter()
            .any(|(level, message)| *level == LogLevel::Error
                && message.starts_with("unable to parse datafile")));
    }
}
