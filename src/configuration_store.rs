//! In-memory storage for the active datafile and the client built from it.
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::{client::ExperimentClient, Datafile};

/// A datafile together with the experimentation client built from it.
///
/// Both halves are always replaced together, so a reader never observes a client that belongs to
/// a different datafile.
pub struct Configuration {
    /// Timestamp when the datafile became active.
    pub activated_at: DateTime<Utc>,
    datafile: Arc<Datafile>,
    client: Arc<dyn ExperimentClient>,
}

impl Configuration {
    pub fn new(datafile: Arc<Datafile>, client: Arc<dyn ExperimentClient>) -> Configuration {
        Configuration {
            activated_at: Utc::now(),
            datafile,
            client,
        }
    }

    pub fn datafile(&self) -> &Arc<Datafile> {
        &self.datafile
    }

    pub fn client(&self) -> &dyn ExperimentClient {
        self.client.as_ref()
    }
}

/// `ConfigurationStore` provides a thread-safe (`Sync`) storage for the active [`Configuration`]
/// that allows concurrent access for readers and writers.
#[derive(Default)]
pub struct ConfigurationStore {
    configuration: RwLock<Option<Arc<Configuration>>>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    /// Get currently-active configuration. Returns `None` if no configuration has been stored yet
    /// or it has been cleared.
    pub fn get_configuration(&self) -> Option<Arc<Configuration>> {
        // Writers only swap the slot, so a poisoned lock still holds a consistent value.
        let configuration = self
            .configuration
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        configuration.clone()
    }

    /// Set new configuration, returning the previous one.
    pub fn set_configuration(&self, configuration: Configuration) -> Option<Arc<Configuration>> {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Some(Arc::new(configuration));

        let mut slot = self
            .configuration
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut slot, new_value)
    }

    /// Remove the active configuration, returning it.
    pub fn clear(&self) -> Option<Arc<Configuration>> {
        let mut slot = self
            .configuration
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        slot.take()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{Configuration, ConfigurationStore};
    use crate::{client::ExperimentClient, Datafile};

    struct NoVariants;

    impl ExperimentClient for NoVariants {
        fn activate(&self, _experiment: &str, _user_id: &str) -> Option<String> {
            None
        }
    }

    fn configuration(version: u32) -> Configuration {
        Configuration::new(
            Arc::new(Datafile::from(json!({ "version": version }))),
            Arc::new(NoVariants),
        )
    }

    #[test]
    fn can_set_configuration_from_another_thread() {
        let store = Arc::new(ConfigurationStore::new());

        assert!(store.get_configuration().is_none());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_configuration(configuration(1));
            })
            .join();
        }

        assert!(store.get_configuration().is_some());
    }

    #[test]
    fn replaces_configuration_wholesale() {
        let store = ConfigurationStore::new();

        assert!(store.set_configuration(configuration(1)).is_none());
        let previous = store.set_configuration(configuration(2)).unwrap();

        assert_eq!(previous.datafile().as_json(), &json!({ "version": 1 }));
        assert_eq!(
            store.get_configuration().unwrap().datafile().as_json(),
            &json!({ "version": 2 })
        );
    }

    #[test]
    fn clear_removes_datafile_and_client() {
        let store = ConfigurationStore::new();
        store.set_configuration(configuration(1));

        assert!(store.clear().is_some());
        assert!(store.get_configuration().is_none());
        assert!(store.clear().is_none());
    }
}
