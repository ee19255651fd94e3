//! Immutable registry of loaded datasets.

use crate::error::{PipelineError, PipelineResult};
use crate::models::{Dataset, DatasetKind, UnavailableDataset};
use std::collections::BTreeMap;

/// Read-only handle to every dataset of a session.
///
/// Built once at startup and passed by reference into every pipeline call.
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    datasets: BTreeMap<DatasetKind, Dataset>,
    unavailable: BTreeMap<DatasetKind, String>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from already-parsed datasets.
    pub fn from_datasets(datasets: impl IntoIterator<Item = Dataset>) -> Self {
        datasets
            .into_iter()
            .fold(Self::new(), |registry, dataset| registry.with_dataset(dataset))
    }

    /// Add a dataset, replacing any earlier entry of the same kind.
    pub fn with_dataset(mut self, dataset: Dataset) -> Self {
        self.unavailable.remove(&dataset.kind);
        self.datasets.insert(dataset.kind, dataset);
        self
    }

    /// Record that a dataset could not be loaded.
    pub fn with_unavailable(mut self, kind: DatasetKind, reason: impl Into<String>) -> Self {
        self.datasets.remove(&kind);
        self.unavailable.insert(kind, reason.into());
        self
    }

    /// Resolve a dataset by name.
    pub fn get(&self, name: &str) -> PipelineResult<&Dataset> {
        let kind = DatasetKind::from_name(name)
            .ok_or_else(|| PipelineError::DatasetNotFound(name.to_string()))?;

        if let Some(dataset) = self.datasets.get(&kind) {
            return Ok(dataset);
        }

        match self.unavailable.get(&kind) {
            Some(reason) => Err(PipelineError::DataUnavailable {
                dataset: kind.name().to_string(),
                reason: reason.clone(),
            }),
            None => Err(PipelineError::DatasetNotFound(name.to_string())),
        }
    }

    /// Loaded datasets in kind order.
    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.values()
    }

    /// Number of loaded datasets.
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    #[allow(dead_code)] // Pairs with len()
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn total_records(&self) -> usize {
        self.datasets.values().map(Dataset::len).sum()
    }

    /// Datasets the loader failed on, with reasons.
    pub fn unavailable(&self) -> Vec<UnavailableDataset> {
        self.unavailable
            .iter()
            .map(|(kind, reason)| UnavailableDataset {
                dataset: kind.name().to_string(),
                reason: reason.clone(),
            })
            .collect()
    }
}
