use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;

use futures::future;
use sinker_stats::metric;

use crate::services::collaborators::{CollaboratorError, DatasetLookup};
use crate::statsd::SinkerCounters;

/// A dataset that could not be resolved. Logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The policy references a dataset with an empty id.
    #[error("empty dataset id")]
    EmptyDatasetId,
    /// The dataset lookup failed.
    #[error("failed to look up dataset {dataset_id}")]
    Lookup {
        /// The dataset that was looked up.
        dataset_id: String,
        /// The lookup error.
        #[source]
        source: CollaboratorError,
    },
}

/// Resolves the datasets of a policy to the set of sinks to deliver to.
#[derive(Clone)]
pub struct SinkResolver {
    datasets: Arc<dyn DatasetLookup>,
}

impl SinkResolver {
    /// Creates a resolver using the given dataset lookup.
    pub fn new(datasets: Arc<dyn DatasetLookup>) -> Self {
        Self { datasets }
    }

    /// Returns the deduplicated sink ids of all resolvable datasets.
    ///
    /// Datasets are looked up concurrently. Datasets that cannot be resolved are skipped, so the
    /// result may be empty.
    pub async fn resolve(&self, owner_id: &str, dataset_ids: &[String]) -> BTreeSet<String> {
        let lookups = dataset_ids
            .iter()
            .map(|dataset_id| self.lookup(owner_id, dataset_id));

        let mut sink_ids = BTreeSet::new();
        for result in future::join_all(lookups).await {
            match result {
                Ok(ids) => sink_ids.extend(ids),
                Err(error) => {
                    metric!(counter(SinkerCounters::DatasetLookupFailed) += 1);
                    sinker_log::warn!(
                        error = &error as &dyn Error,
                        owner_id,
                        "skipping unresolvable dataset"
                    );
                }
            }
        }

        sink_ids
    }

    async fn lookup(&self, owner_id: &str, dataset_id: &str) -> Result<Vec<String>, ResolveError> {
        if dataset_id.is_empty() {
            return Err(ResolveError::EmptyDatasetId);
        }

        let dataset = self
            .datasets
            .dataset(owner_id, dataset_id)
            .await
            .map_err(|source| ResolveError::Lookup {
                dataset_id: dataset_id.to_owned(),
                source,
            })?;

        Ok(dataset.sink_ids)
    }
}

impl std::fmt::Debug for SinkResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::FakeDatasets;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_resolve_deduplicates() {
        let datasets = FakeDatasets::default()
            .with("o1", "d1", &["s1", "s2"])
            .with("o1", "d2", &["s2", "s3"]);
        let resolver = SinkResolver::new(Arc::new(datasets));

        let sinks = resolver.resolve("o1", &ids(&["d1", "d2"])).await;
        assert_eq!(sinks.into_iter().collect::<Vec<_>>(), ["s1", "s2", "s3"]);
    }

    #[test]
    fn test_resolve_skips_failures() {
        let datasets = FakeDatasets::default()
            .with("o1", "d1", &["s1"])
            .with("o1", "d2", &["s2"])
            .with("o1", "d3", &["s3"]);
        let resolver = SinkResolver::new(Arc::new(datasets));

        let captures = sinker_stats::with_capturing_test_client(|| {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let dataset_ids = ids(&["d1", "d2", "", "d3", "d4"]);
            let sinks = runtime.block_on(resolver.resolve("o1", &dataset_ids));
            assert_eq!(sinks.len(), 3);
        });

        assert_eq!(
            captures,
            [
                "resolver.dataset_failed:1|c",
                "resolver.dataset_failed:1|c",
            ]
        );
    }

    #[tokio::test]
    async fn test_resolve_other_owner() {
        let datasets = FakeDatasets::default().with("o1", "d1", &["s1"]);
        let resolver = SinkResolver::new(Arc::new(datasets));

        assert!(resolver.resolve("o2", &ids(&["d1"])).await.is_empty());
    }
}
