use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{AgentIdentity, PktvisorConverter, PolicyMetrics, TimeSeries};

/// An error returned when a backend payload cannot be converted.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The payload is encoded in a format the converter does not understand.
    #[error("unsupported payload format {0:?}")]
    UnsupportedFormat(String),
    /// The payload is not valid JSON.
    #[error("invalid json payload")]
    InvalidJson(#[from] serde_json::Error),
    /// The payload is valid JSON but not an object keyed by handler.
    #[error("payload is not an object")]
    NotAnObject,
}

/// Converts the payload of one backend family into canonical time series.
///
/// Converters are shared across tasks and must not keep mutable state between calls.
pub trait BackendConverter: Send + Sync {
    /// Converts the metrics of a single policy.
    fn process_metrics(
        &self,
        agent: &AgentIdentity,
        agent_id: &str,
        payload: &PolicyMetrics,
    ) -> Result<Vec<TimeSeries>, ConvertError>;
}

/// Registry of backend converters by backend name.
///
/// Populated once at startup and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    converters: BTreeMap<String, Arc<dyn BackendConverter>>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with all converters shipped in this crate.
    pub fn with_default_backends() -> Self {
        let mut registry = Self::new();
        registry.register("pktvisor", PktvisorConverter);
        registry
    }

    /// Registers a converter, replacing any previous converter with the same name.
    pub fn register(&mut self, name: impl Into<String>, converter: impl BackendConverter + 'static) {
        self.converters.insert(name.into(), Arc::new(converter));
    }

    /// Returns the converter for the given backend.
    pub fn get_backend(&self, name: &str) -> Option<&dyn BackendConverter> {
        self.converters.get(name).map(|c| c.as_ref())
    }

    /// Returns `true` if a converter is registered for the given backend.
    pub fn have_backend(&self, name: &str) -> bool {
        self.converters.contains_key(name)
    }

    /// Returns the names of all registered backends.
    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.converters.keys().map(String::as_str)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.backends()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    impl BackendConverter for Empty {
        fn process_metrics(
            &self,
            _agent: &AgentIdentity,
            _agent_id: &str,
            _payload: &PolicyMetrics,
        ) -> Result<Vec<TimeSeries>, ConvertError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_registry() {
        let mut registry = BackendRegistry::with_default_backends();
        assert!(registry.have_backend("pktvisor"));
        assert!(!registry.have_backend("otel"));

        registry.register("otel", Empty);
        assert!(registry.have_backend("otel"));
        assert_eq!(registry.backends().collect::<Vec<_>>(), ["otel", "pktvisor"]);

        let series = registry
            .get_backend("otel")
            .unwrap()
            .process_metrics(&AgentIdentity::default(), "a1", &PolicyMetrics::default())
            .unwrap();
        assert!(series.is_empty());
        assert!(registry.get_backend("unknown").is_none());
    }
}
