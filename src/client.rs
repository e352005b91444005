//! Seam between the service and the experimentation SDK that computes variants.
use std::sync::Arc;

use crate::Datafile;

/// Severity of a message emitted by an [`ExperimentClient`].
///
/// Discriminants match the numeric levels used by experimentation SDKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 1,
    Info = 2,
    Warning = 3,
    Error = 4,
}

impl LogLevel {
    pub fn from_u8(value: u8) -> Option<LogLevel> {
        match value {
            1 => Some(LogLevel::Debug),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Warning),
            4 => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Callback an [`ExperimentClient`] uses to report what it is doing.
pub type SdkLogger = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Computes experiment variants for visitors from a datafile.
pub trait ExperimentClient: Send + Sync {
    /// Activate `experiment` for `user_id`, returning the key of the selected variant or `None`
    /// if the visitor is not part of the experiment.
    fn activate(&self, experiment: &str, user_id: &str) -> Option<String>;
}

/// Builds an [`ExperimentClient`] whenever a new datafile becomes active.
///
/// Closures with a matching signature implement this trait:
///
/// ```
/// # use std::sync::Arc;
/// # use abtest::{ClientFactory, Datafile, ExperimentClient, SdkLogger};
/// struct AlwaysControl;
/// impl ExperimentClient for AlwaysControl {
///     fn activate(&self, _experiment: &str, _user_id: &str) -> Option<String> {
///         Some("control".to_owned())
///     }
/// }
///
/// let factory = |_datafile: Arc<Datafile>, _logger: SdkLogger| {
///     Arc::new(AlwaysControl) as Arc<dyn ExperimentClient>
/// };
/// # fn accepts(_: impl ClientFactory) {}
/// # accepts(factory);
/// ```
pub trait ClientFactory: Send + Sync {
    fn create_client(&self, datafile: Arc<Datafile>, logger: SdkLogger) -> Arc<dyn ExperimentClient>;
}

impl<T> ClientFactory for T
where
    T: Fn(Arc<Datafile>, SdkLogger) -> Arc<dyn ExperimentClient> + Send + Sync,
{
    fn create_client(&self, datafile: Arc<Datafile>, logger: SdkLogger) -> Arc<dyn ExperimentClient> {
        self(datafile, logger)
    }
}

#[cfg(test)]
mod tests {
    use super::LogLevel;

    #[test]
    fn converts_numeric_levels() {
        assert_eq!(LogLevel::from_u8(1), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_u8(3), Some(LogLevel::Warning));
        assert_eq!(LogLevel::from_u8(4), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_u8(0), None);
        assert_eq!(LogLevel::from_u8(5), None);
        assert_eq!(LogLevel::Info as u8, 2);
    }
}
