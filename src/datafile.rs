use derive_more::From;
use serde::{Deserialize, Serialize};

/// Experiment configuration as served by the experimentation service.
///
/// The service treats the datafile as an opaque JSON document: it is fetched and stored as a
/// whole and only ever interpreted by an [`ExperimentClient`](crate::ExperimentClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(transparent)]
pub struct Datafile(serde_json::Value);

impl Datafile {
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_json(self) -> serde_json::Value {
        self.0
    }
}
