//! Error types for the aggregation pipeline.
//!
//! Every variant is recoverable: callers surface it next to the view that
//! failed and keep going. A zero-group result is not an error.

use thiserror::Error;

/// Errors raised while validating or executing an aggregation.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The dataset name does not resolve to any known dataset.
    #[error("dataset '{0}' not found")]
    DatasetNotFound(String),

    /// The dataset is known but the loader failed to provide it.
    #[error("dataset '{dataset}' is unavailable: {reason}")]
    DataUnavailable { dataset: String, reason: String },

    /// A filter, group-by or metric field is absent from the schema.
    #[error("unknown field '{field}' in dataset '{dataset}'")]
    UnknownField { dataset: String, field: String },

    /// A metric field exists but cannot be summed.
    #[error("field '{field}' in dataset '{dataset}' is not numeric")]
    NonNumericMetric { dataset: String, field: String },

    #[error("at least one group-by field is required")]
    EmptyGrouping,

    #[error("at least one metric field is required")]
    NoMetrics,

    /// Non-positive row limit.
    #[error("invalid limit {0}: must be at least 1")]
    InvalidLimit(usize),

    /// Pivot requested on a result that is not grouped by exactly two fields.
    #[error("pivot needs a result grouped by two fields, got [{0}]")]
    PivotShape(String),

    /// The same (primary, secondary) pair occurred twice in a pivot source.
    #[error("duplicate group ({primary}, {secondary}) in pivot source")]
    DuplicateGroup { primary: String, secondary: String },

    #[error("integer overflow while summing '{0}'")]
    Overflow(String),

    /// The embedded SQL store rejected or failed a query.
    #[error("query backend error: {0}")]
    Backend(#[from] rusqlite::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PipelineError::UnknownField {
            dataset: "Aggregate_Transaction".to_string(),
            field: "Province".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unknown field 'Province' in dataset 'Aggregate_Transaction'"
        );

        let err = PipelineError::InvalidLimit(0);
        assert!(err.to_string().contains("at least 1"));
    }
}
