//! Query backends that execute aggregation requests.

use super::aggregate;
use crate::error::PipelineResult;
use crate::loader::DatasetRegistry;
use crate::models::{AggregationRequest, AggregationResult, FilterSpec, MetricValue};

/// Executes aggregation requests over a dataset registry.
///
/// Every implementation must return identical results for identical inputs.
pub trait QueryBackend {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    /// The registry the backend answers from.
    fn registry(&self) -> &DatasetRegistry;

    /// Run one aggregation.
    fn aggregate(&self, request: &AggregationRequest) -> PipelineResult<AggregationResult>;

    /// Sum metrics over every matching record as a single `ALL` group.
    fn aggregate_total(
        &self,
        dataset: &str,
        filter: &FilterSpec,
        metrics: &[String],
    ) -> PipelineResult<AggregationResult>;
}

/// Backend that scans the in-memory records directly.
pub struct MemoryBackend<'a> {
    registry: &'a DatasetRegistry,
}

impl<'a> MemoryBackend<'a> {
    pub fn new(registry: &'a DatasetRegistry) -> Self {
        Self { registry }
    }
}

impl QueryBackend for MemoryBackend<'_> {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn registry(&self) -> &DatasetRegistry {
        self.registry
    }

    fn aggregate(&self, request: &AggregationRequest) -> PipelineResult<AggregationResult> {
        aggregate::aggregate(self.registry, request)
    }

    fn aggregate_total(
        &self,
        dataset: &str,
        filter: &FilterSpec,
        metrics: &[String],
    ) -> PipelineResult<AggregationResult> {
        aggregate::aggregate_total(self.registry, dataset, filter, metrics)
    }
}

/// Relative tolerance for float sums computed in different orders.
const TOLERANCE: f64 = 1e-9;

/// Compare two metric values; floats may differ by relative drift.
pub fn metrics_agree(x: &MetricValue, y: &MetricValue) -> bool {
    match (x, y) {
        (MetricValue::Int(p), MetricValue::Int(q)) => p == q,
        _ => {
            let (p, q) = (x.as_f64(), y.as_f64());
            (p - q).abs() <= TOLERANCE * p.abs().max(q.abs()).max(1.0)
        }
    }
}

/// Compare two results, allowing relative float drift from summation order.
pub fn results_agree(a: &AggregationResult, b: &AggregationResult) -> bool {
    a.dataset == b.dataset
        && a.group_by == b.group_by
        && a.metrics == b.metrics
        && a.order == b.order
        && a.matched_records == b.matched_records
        && a.rows.len() == b.rows.len()
        && a.rows.iter().zip(&b.rows).all(|(ra, rb)| {
            ra.key == rb.key
                && ra.values.len() == rb.values.len()
                && ra.values.iter().zip(&rb.values).all(|(x, y)| metrics_agree(x, y))
        })
}
