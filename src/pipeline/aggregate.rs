//! Group-by aggregation and the views derived from it.
//!
//! `aggregate` filters a dataset, partitions it by the group-by fields and
//! sums each metric. `top`, `pivot` and `ratio_of_sums` re-shape a finished
//! result without touching the dataset again.

use crate::error::{PipelineError, PipelineResult};
use crate::loader::DatasetRegistry;
use crate::models::{
    AggregationRequest, AggregationResult, Dataset, FieldKind, FilterField, FilterSpec, GroupKey,
    GroupRow, MetricValue, PivotRow, PivotTable, SortOrder, Value,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Label of the single group produced by [`aggregate_total`].
pub const ALL_GROUP: &str = "ALL";

/// A validated request, with every field resolved to a record position.
#[derive(Debug)]
pub struct QueryPlan<'a> {
    pub dataset: &'a Dataset,
    /// (position, field name, required value) per present filter constraint.
    pub filters: Vec<(usize, &'static str, Value)>,
    pub group_by: Vec<(usize, &'static str)>,
    pub metrics: Vec<(usize, &'static str, FieldKind)>,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl QueryPlan<'_> {
    /// Whether a record satisfies every filter constraint.
    pub fn matches(&self, record: &crate::models::Record) -> bool {
        self.filters
            .iter()
            .all(|(idx, _, wanted)| record.get(*idx).total_cmp(wanted) == Ordering::Equal)
    }
}

/// Validate a request against the registry and resolve its fields.
///
/// Shared by every backend so that schema errors are identical.
pub fn plan<'a>(
    registry: &'a DatasetRegistry,
    request: &AggregationRequest,
) -> PipelineResult<QueryPlan<'a>> {
    let dataset = registry.get(&request.dataset)?;

    if request.group_by.is_empty() {
        return Err(PipelineError::EmptyGrouping);
    }
    resolve(dataset, request)
}

fn resolve<'a>(
    dataset: &'a Dataset,
    request: &AggregationRequest,
) -> PipelineResult<QueryPlan<'a>> {
    if let Some(0) = request.limit {
        return Err(PipelineError::InvalidLimit(0));
    }
    if request.metrics.is_empty() {
        return Err(PipelineError::NoMetrics);
    }

    let schema = &dataset.schema;
    let unknown = |field: &str| PipelineError::UnknownField {
        dataset: dataset.name().to_string(),
        field: field.to_string(),
    };
    let lookup = |name: &str| {
        schema
            .index_of(name)
            .map(|idx| (idx, schema.fields[idx].name, schema.fields[idx].kind))
            .ok_or_else(|| unknown(name))
    };

    let filters = resolve_filters(dataset, &request.filter)?;

    let group_by = request
        .group_by
        .iter()
        .map(|name| lookup(name).map(|(idx, name, _)| (idx, name)))
        .collect::<PipelineResult<Vec<_>>>()?;

    let mut metrics = Vec::with_capacity(request.metrics.len());
    for name in &request.metrics {
        let (idx, name, kind) = lookup(name)?;
        if !kind.is_numeric() {
            return Err(PipelineError::NonNumericMetric {
                dataset: dataset.name().to_string(),
                field: name.to_string(),
            });
        }
        metrics.push((idx, name, kind));
    }

    Ok(QueryPlan {
        dataset,
        filters,
        group_by,
        metrics,
        order: request.order,
        limit: request.limit,
    })
}

/// Map each present filter constraint onto a schema field.
fn resolve_filters(
    dataset: &Dataset,
    filter: &FilterSpec,
) -> PipelineResult<Vec<(usize, &'static str, Value)>> {
    let schema = &dataset.schema;
    let mut resolved = Vec::new();

    for (field, value) in filter.constraints() {
        let name = match field {
            FilterField::Year => Some("Year"),
            FilterField::Quarter => Some("Quarter"),
            FilterField::State => Some("State"),
            FilterField::Category => schema.category,
        };
        let idx = name.and_then(|n| schema.index_of(n)).ok_or_else(|| {
            PipelineError::UnknownField {
                dataset: dataset.name().to_string(),
                field: field.to_string(),
            }
        })?;
        resolved.push((idx, schema.fields[idx].name, value));
    }

    Ok(resolved)
}

/// Run an aggregation by scanning the registry in memory.
pub fn aggregate(
    registry: &DatasetRegistry,
    request: &AggregationRequest,
) -> PipelineResult<AggregationResult> {
    let plan = plan(registry, request)?;
    execute(&plan)
}

/// Execute a validated plan over its dataset's records.
pub fn execute(plan: &QueryPlan<'_>) -> PipelineResult<AggregationResult> {
    let mut groups: BTreeMap<GroupKey, Vec<MetricValue>> = BTreeMap::new();
    let mut matched = 0usize;

    for record in plan.dataset.records.iter().filter(|r| plan.matches(r)) {
        matched += 1;

        let key = GroupKey(
            plan.group_by
                .iter()
                .map(|(idx, _)| record.get(*idx).clone())
                .collect(),
        );
        let sums = groups.entry(key).or_insert_with(|| {
            plan.metrics
                .iter()
                .map(|(_, _, kind)| MetricValue::zero(*kind))
                .collect()
        });

        for (sum, (idx, name, _)) in sums.iter_mut().zip(&plan.metrics) {
            // Null metrics contribute nothing, as with SQL SUM
            if let Some(value) = record.get(*idx).as_metric() {
                *sum = sum
                    .checked_add(value)
                    .ok_or_else(|| PipelineError::Overflow(name.to_string()))?;
            }
        }
    }

    let mut rows: Vec<GroupRow> = groups
        .into_iter()
        .map(|(key, values)| GroupRow { key, values })
        .collect();
    sort_rows(&mut rows, plan.order);
    if let Some(limit) = plan.limit {
        rows.truncate(limit);
    }

    debug!(
        "Aggregated {} of {} records from {} into {} groups",
        matched,
        plan.dataset.len(),
        plan.dataset.name(),
        rows.len()
    );

    Ok(AggregationResult {
        dataset: plan.dataset.name().to_string(),
        group_by: plan.group_by.iter().map(|(_, n)| n.to_string()).collect(),
        metrics: plan.metrics.iter().map(|(_, n, _)| n.to_string()).collect(),
        order: plan.order,
        matched_records: matched,
        rows,
    })
}

/// Sum metrics over every record matching `filter`, as one `ALL` group.
///
/// Returns zero groups when nothing matches.
pub fn aggregate_total<M>(
    registry: &DatasetRegistry,
    dataset: &str,
    filter: &FilterSpec,
    metrics: M,
) -> PipelineResult<AggregationResult>
where
    M: IntoIterator,
    M::Item: Into<String>,
{
    let plan = plan_total(registry, dataset, filter, metrics)?;
    execute(&plan).map(label_total)
}

/// Validate an ungrouped request.
pub fn plan_total<'a, M>(
    registry: &'a DatasetRegistry,
    dataset: &str,
    filter: &FilterSpec,
    metrics: M,
) -> PipelineResult<QueryPlan<'a>>
where
    M: IntoIterator,
    M::Item: Into<String>,
{
    let resolved = registry.get(dataset)?;
    let request = AggregationRequest::new(dataset, Vec::<String>::new(), metrics)
        .with_filter(filter.clone());
    resolve(resolved, &request)
}

/// Rename the single ungrouped row to the `ALL` group.
pub fn label_total(mut result: AggregationResult) -> AggregationResult {
    result.group_by = vec![ALL_GROUP.to_string()];
    for row in &mut result.rows {
        row.key = GroupKey(vec![Value::text(ALL_GROUP)]);
    }
    result
}

/// Order rows per `order`. Equal metric values fall back to ascending key.
pub fn sort_rows(rows: &mut [GroupRow], order: SortOrder) {
    match order {
        SortOrder::Descending => rows.sort_by(|a, b| {
            b.primary()
                .total_cmp(&a.primary())
                .then_with(|| a.key.cmp(&b.key))
        }),
        SortOrder::Ascending => rows.sort_by(|a, b| {
            a.primary()
                .total_cmp(&b.primary())
                .then_with(|| a.key.cmp(&b.key))
        }),
        SortOrder::GroupKey => rows.sort_by(|a, b| a.key.cmp(&b.key)),
        SortOrder::LeadingKey => rows.sort_by(|a, b| {
            let lead = match (a.key.0.first(), b.key.0.first()) {
                (Some(x), Some(y)) => x.total_cmp(y),
                _ => Ordering::Equal,
            };
            lead.then_with(|| b.primary().total_cmp(&a.primary()))
                .then_with(|| a.key.cmp(&b.key))
        }),
    }
}

/// The `n` groups with the largest (or smallest) first metric.
///
/// Asking for more groups than exist returns all of them.
pub fn top(result: &AggregationResult, n: usize, ascending: bool) -> PipelineResult<AggregationResult> {
    if n == 0 {
        return Err(PipelineError::InvalidLimit(n));
    }

    let order = if ascending {
        SortOrder::Ascending
    } else {
        SortOrder::Descending
    };

    let mut rows = result.rows.clone();
    sort_rows(&mut rows, order);
    rows.truncate(n);

    Ok(AggregationResult {
        order,
        rows,
        ..result.clone()
    })
}

/// Re-express a two-field aggregation as primary key -> {secondary key: value}.
///
/// The pivot uses the first metric. Combinations absent from the source are
/// zero of that metric's type.
pub fn pivot(result: &AggregationResult, secondary_field: &str) -> PipelineResult<PivotTable> {
    if result.group_by.len() != 2 {
        return Err(PipelineError::PivotShape(result.group_by.join(", ")));
    }
    let secondary_idx = result
        .group_index(secondary_field)
        .ok_or_else(|| PipelineError::UnknownField {
            dataset: result.dataset.clone(),
            field: secondary_field.to_string(),
        })?;
    let primary_idx = 1 - secondary_idx;

    let metric = result
        .metrics
        .first()
        .cloned()
        .ok_or(PipelineError::NoMetrics)?;

    let mut cells: BTreeMap<GroupKey, BTreeMap<GroupKey, MetricValue>> = BTreeMap::new();
    let mut columns: BTreeSet<GroupKey> = BTreeSet::new();
    let mut zero = None;

    for row in &result.rows {
        let primary = GroupKey(vec![row.key.0[primary_idx].clone()]);
        let secondary = GroupKey(vec![row.key.0[secondary_idx].clone()]);
        let value = row.primary();
        zero.get_or_insert(value.zero_like());

        columns.insert(secondary.clone());
        let previous = cells
            .entry(primary.clone())
            .or_default()
            .insert(secondary.clone(), value);
        if previous.is_some() {
            return Err(PipelineError::DuplicateGroup {
                primary: primary.label(),
                secondary: secondary.label(),
            });
        }
    }

    let zero = zero.unwrap_or(MetricValue::Int(0));
    let rows = cells
        .into_iter()
        .map(|(primary, by_secondary)| PivotRow {
            values: columns
                .iter()
                .map(|col| by_secondary.get(col).copied().unwrap_or(zero))
                .collect(),
            key: primary.0.into_iter().next().unwrap_or(Value::Null),
        })
        .collect();

    Ok(PivotTable {
        primary_field: result.group_by[primary_idx].clone(),
        secondary_field: result.group_by[secondary_idx].clone(),
        metric,
        columns: columns
            .into_iter()
            .map(|k| k.0.into_iter().next().unwrap_or(Value::Null))
            .collect(),
        rows,
    })
}

/// Derive `SUM(numerator) / SUM(denominator)` per group.
///
/// The ratio is taken over the summed values, never as a mean of per-record
/// ratios. Groups whose denominator sums to zero are dropped. Rows come back
/// sorted descending by the ratio.
pub fn ratio_of_sums(
    result: &AggregationResult,
    numerator: &str,
    denominator: &str,
    label: &str,
) -> PipelineResult<AggregationResult> {
    let index = |name: &str| {
        result
            .metric_index(name)
            .ok_or_else(|| PipelineError::UnknownField {
                dataset: result.dataset.clone(),
                field: name.to_string(),
            })
    };
    let num = index(numerator)?;
    let den = index(denominator)?;

    let mut rows: Vec<GroupRow> = result
        .rows
        .iter()
        .filter_map(|row| {
            let d = row.values.get(den)?.as_f64();
            if d == 0.0 {
                return None;
            }
            let n = row.values.get(num)?.as_f64();
            Some(GroupRow {
                key: row.key.clone(),
                values: vec![MetricValue::Float(n / d)],
            })
        })
        .collect();
    sort_rows(&mut rows, SortOrder::Descending);

    Ok(AggregationResult {
        dataset: result.dataset.clone(),
        group_by: result.group_by.clone(),
        metrics: vec![label.to_string()],
        order: SortOrder::Descending,
        matched_records: result.matched_records,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DatasetKind, Record};

    /// Aggregate_Transaction: State, Year, Quarter, Transaction_Name, Count, Amount
    fn txn(state: &str, year: i64, quarter: i64, name: &str, count: i64, amount: f64) -> Record {
        Record::new(vec![
            Value::text(state),
            Value::Int(year),
            Value::Int(quarter),
            Value::text(name),
            Value::Int(count),
            Value::Float(amount),
        ])
    }

    fn create_test_registry() -> DatasetRegistry {
        let records = vec![
            txn("X", 2023, 1, "Recharge", 4, 100.0),
            txn("X", 2023, 1, "Transfer", 1, 50.0),
            txn("Y", 2023, 1, "Recharge", 2, 30.0),
        ];
        DatasetRegistry::from_datasets([Dataset::with_records(
            DatasetKind::AggregateTransaction,
            records,
        )])
    }

    fn create_wide_registry() -> DatasetRegistry {
        let mut records = Vec::new();
        let states = ["Goa", "Bihar", "Assam", "Kerala"];
        for (i, state) in states.iter().enumerate() {
            for year in [2021, 2022] {
                for quarter in 1..=4 {
                    for (j, name) in ["Recharge", "Transfer"].iter().enumerate() {
                        let count = (i as i64 + 1) * quarter + j as i64;
                        records.push(txn(state, year, quarter, name, count, count as f64 * 2.5));
                    }
                }
            }
        }
        DatasetRegistry::from_datasets([Dataset::with_records(
            DatasetKind::AggregateTransaction,
            records,
        )])
    }

    fn keys(result: &AggregationResult) -> Vec<String> {
        result.rows.iter().map(|r| r.key.label()).collect()
    }

    #[test]
    fn test_concrete_scenario() {
        let registry = create_test_registry();
        let request = AggregationRequest::new(
            "Aggregate_Transaction",
            ["State"],
            ["Transaction_Amount"],
        )
        .with_filter(FilterSpec::new().year(2023).quarter(1));

        let result = aggregate(&registry, &request).unwrap();
        assert_eq!(keys(&result), vec!["X", "Y"]);
        assert_eq!(result.rows[0].values, vec![MetricValue::Float(150.0)]);
        assert_eq!(result.rows[1].values, vec![MetricValue::Float(30.0)]);
        assert_eq!(result.matched_records, 3);

        let best = top(&result, 1, false).unwrap();
        assert_eq!(keys(&best), vec!["X"]);
        assert_eq!(best.rows[0].values, vec![MetricValue::Float(150.0)]);
    }

    #[test]
    fn test_unknown_group_field() {
        let registry = create_test_registry();
        let request = AggregationRequest::new(
            "Aggregate_Transaction",
            ["Province"],
            ["Transaction_Amount"],
        );
        let err = aggregate(&registry, &request).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnknownField { ref field, .. } if field == "Province"
        ));
    }

    #[test]
    fn test_unknown_metric_and_filter_fields() {
        let registry = create_test_registry();

        let request = AggregationRequest::new("Aggregate_Transaction", ["State"], ["App_Count"]);
        assert!(matches!(
            aggregate(&registry, &request),
            Err(PipelineError::UnknownField { .. })
        ));

        let map = DatasetRegistry::from_datasets([Dataset::new(DatasetKind::MapTransaction)]);
        let request = AggregationRequest::new("Map_Transaction", ["District"], ["Transaction_Count"])
            .with_filter(FilterSpec::new().category("Recharge"));
        assert!(matches!(
            aggregate(&map, &request),
            Err(PipelineError::UnknownField { ref field, .. }) if field == "Category"
        ));
    }

    #[test]
    fn test_non_numeric_metric_rejected() {
        let registry = create_test_registry();
        let request = AggregationRequest::new("Aggregate_Transaction", ["Year"], ["State"]);
        assert!(matches!(
            aggregate(&registry, &request),
            Err(PipelineError::NonNumericMetric { .. })
        ));
    }

    #[test]
    fn test_dataset_not_found() {
        let registry = create_test_registry();
        let request = AggregationRequest::new("Transactions", ["State"], ["Transaction_Amount"]);
        assert!(matches!(
            aggregate(&registry, &request),
            Err(PipelineError::DatasetNotFound(_))
        ));
    }

    #[test]
    fn test_empty_grouping_and_zero_limit() {
        let registry = create_test_registry();

        let request = AggregationRequest::new(
            "Aggregate_Transaction",
            Vec::<String>::new(),
            ["Transaction_Amount"],
        );
        assert!(matches!(
            aggregate(&registry, &request),
            Err(PipelineError::EmptyGrouping)
        ));

        let request = AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Amount"])
            .with_limit(0);
        assert!(matches!(
            aggregate(&registry, &request),
            Err(PipelineError::InvalidLimit(0))
        ));
    }

    #[test]
    fn test_empty_filter_result_is_not_an_error() {
        let registry = create_test_registry();
        let request = AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Amount"])
            .with_filter(FilterSpec::new().year(1999));

        let result = aggregate(&registry, &request).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.matched_records, 0);
    }

    #[test]
    fn test_conservation_against_total() {
        let registry = create_wide_registry();
        let dataset = registry.get("Aggregate_Transaction").unwrap();
        let count_idx = dataset.schema.index_of("Transaction_Count").unwrap();

        let filters = [
            FilterSpec::new(),
            FilterSpec::new().year(2022),
            FilterSpec::new().year(2021).quarter(3),
            FilterSpec::new().state("Goa").category("Transfer"),
        ];

        for filter in filters {
            let request = AggregationRequest::new(
                "Aggregate_Transaction",
                ["State", "Transaction_Name"],
                ["Transaction_Count"],
            )
            .with_filter(filter.clone());
            let grouped = aggregate(&registry, &request).unwrap();

            let total =
                aggregate_total(&registry, "Aggregate_Transaction", &filter, ["Transaction_Count"])
                    .unwrap();

            let plan = plan(&registry, &request).unwrap();
            let expected: i64 = dataset
                .records
                .iter()
                .filter(|r| plan.matches(r))
                .map(|r| match r.get(count_idx) {
                    Value::Int(i) => *i,
                    _ => 0,
                })
                .sum();

            assert_eq!(grouped.total(0), Some(MetricValue::Int(expected)));
            assert_eq!(total.rows.len(), 1);
            assert_eq!(total.rows[0].key.label(), ALL_GROUP);
            assert_eq!(total.rows[0].values[0], MetricValue::Int(expected));
            assert_eq!(total.matched_records, grouped.matched_records);
        }
    }

    #[test]
    fn test_filter_monotonicity() {
        let registry = create_wide_registry();
        let chain = [
            FilterSpec::new(),
            FilterSpec::new().year(2022),
            FilterSpec::new().year(2022).quarter(2),
            FilterSpec::new().year(2022).quarter(2).state("Assam"),
            FilterSpec::new()
                .year(2022)
                .quarter(2)
                .state("Assam")
                .category("Recharge"),
        ];

        let mut previous = usize::MAX;
        for filter in chain {
            let request = AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Count"])
                .with_filter(filter);
            let matched = aggregate(&registry, &request).unwrap().matched_records;
            assert!(matched <= previous);
            previous = matched;
        }
        assert_eq!(previous, 1);
    }

    #[test]
    fn test_sort_correctness_with_ties() {
        let records = vec![
            txn("Kerala", 2023, 1, "Recharge", 5, 1.0),
            txn("Assam", 2023, 1, "Recharge", 5, 1.0),
            txn("Goa", 2023, 1, "Recharge", 9, 1.0),
            txn("Bihar", 2023, 1, "Recharge", 5, 1.0),
            txn("Delhi", 2023, 1, "Recharge", 1, 1.0),
        ];
        let registry = DatasetRegistry::from_datasets([Dataset::with_records(
            DatasetKind::AggregateTransaction,
            records,
        )]);

        let desc = aggregate(
            &registry,
            &AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Count"]),
        )
        .unwrap();
        assert_eq!(keys(&desc), vec!["Goa", "Assam", "Bihar", "Kerala", "Delhi"]);
        assert!(desc
            .rows
            .windows(2)
            .all(|w| w[0].primary().total_cmp(&w[1].primary()) != Ordering::Less));

        let asc = aggregate(
            &registry,
            &AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Count"])
                .with_order(SortOrder::Ascending),
        )
        .unwrap();
        assert_eq!(keys(&asc), vec!["Delhi", "Assam", "Bihar", "Kerala", "Goa"]);

        let by_key = aggregate(
            &registry,
            &AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Count"])
                .with_order(SortOrder::GroupKey),
        )
        .unwrap();
        assert_eq!(keys(&by_key), vec!["Assam", "Bihar", "Delhi", "Goa", "Kerala"]);
    }

    #[test]
    fn test_leading_key_order_keeps_states_together() {
        let records = vec![
            txn("Y", 2023, 1, "Recharge", 1, 30.0),
            txn("X", 2023, 1, "Transfer", 1, 50.0),
            txn("Y", 2023, 1, "Transfer", 1, 80.0),
            txn("X", 2023, 1, "Recharge", 1, 100.0),
            txn("Y", 2023, 1, "Bills", 1, 80.0),
        ];
        let registry = DatasetRegistry::from_datasets([Dataset::with_records(
            DatasetKind::AggregateTransaction,
            records,
        )]);
        let request = AggregationRequest::new(
            "Aggregate_Transaction",
            ["State", "Transaction_Name"],
            ["Transaction_Amount"],
        )
        .with_order(SortOrder::LeadingKey);
        let result = aggregate(&registry, &request).unwrap();

        assert_eq!(
            keys(&result),
            vec![
                "X / Recharge",
                "X / Transfer",
                "Y / Bills",
                "Y / Transfer",
                "Y / Recharge"
            ]
        );
    }

    #[test]
    fn test_request_limit_truncates_after_sort() {
        let registry = create_wide_registry();
        let request = AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Count"])
            .with_limit(2);
        let result = aggregate(&registry, &request).unwrap();
        assert_eq!(keys(&result), vec!["Kerala", "Assam"]);
        assert_eq!(result.matched_records, 64);
    }

    #[test]
    fn test_top_idempotent_and_bounds() {
        let registry = create_wide_registry();
        let request = AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Amount"]);
        let result = aggregate(&registry, &request).unwrap();

        let once = top(&result, 3, false).unwrap();
        let twice = top(&once, 3, false).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);

        let all = top(&result, 50, false).unwrap();
        assert_eq!(all.len(), result.len());

        let least = top(&result, 1, true).unwrap();
        assert_eq!(keys(&least), vec!["Goa"]);

        assert!(matches!(
            top(&result, 0, false),
            Err(PipelineError::InvalidLimit(0))
        ));
    }

    #[test]
    fn test_pivot_completeness_fills_zero() {
        let records = vec![
            txn("X", 2023, 1, "Recharge", 4, 100.0),
            txn("X", 2023, 2, "Transfer", 1, 50.0),
            txn("Y", 2023, 1, "Recharge", 2, 30.0),
            txn("Y", 2023, 1, "Recharge", 3, 20.0),
        ];
        let registry = DatasetRegistry::from_datasets([Dataset::with_records(
            DatasetKind::AggregateTransaction,
            records,
        )]);
        let request = AggregationRequest::new(
            "Aggregate_Transaction",
            ["State", "Transaction_Name"],
            ["Transaction_Amount"],
        );
        let result = aggregate(&registry, &request).unwrap();
        let table = pivot(&result, "Transaction_Name").unwrap();

        assert_eq!(table.primary_field, "State");
        assert_eq!(table.secondary_field, "Transaction_Name");
        assert_eq!(
            table.columns,
            vec![Value::text("Recharge"), Value::text("Transfer")]
        );
        assert_eq!(table.rows.len(), 2);

        let x = Value::text("X");
        let y = Value::text("Y");
        let recharge = Value::text("Recharge");
        let transfer = Value::text("Transfer");
        assert_eq!(table.get(&x, &recharge), Some(MetricValue::Float(100.0)));
        assert_eq!(table.get(&x, &transfer), Some(MetricValue::Float(50.0)));
        assert_eq!(table.get(&y, &recharge), Some(MetricValue::Float(50.0)));
        assert_eq!(table.get(&y, &transfer), Some(MetricValue::Float(0.0)));

        // Every observed pair exactly once
        let observed = result.rows.len();
        let non_zero = table
            .rows
            .iter()
            .flat_map(|r| r.values.iter())
            .filter(|v| v.as_f64() != 0.0)
            .count();
        assert_eq!(observed, non_zero);
    }

    #[test]
    fn test_pivot_swaps_primary_axis() {
        let registry = create_wide_registry();
        let request = AggregationRequest::new(
            "Aggregate_Transaction",
            ["State", "Year"],
            ["Transaction_Amount"],
        )
        .with_order(SortOrder::GroupKey);
        let result = aggregate(&registry, &request).unwrap();

        let by_year = pivot(&result, "State").unwrap();
        assert_eq!(by_year.primary_field, "Year");
        assert_eq!(by_year.rows.len(), 2);
        assert_eq!(by_year.columns.len(), 4);
    }

    #[test]
    fn test_pivot_shape_errors() {
        let registry = create_test_registry();
        let one_dim = aggregate(
            &registry,
            &AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Amount"]),
        )
        .unwrap();
        assert!(matches!(
            pivot(&one_dim, "State"),
            Err(PipelineError::PivotShape(_))
        ));

        let two_dim = aggregate(
            &registry,
            &AggregationRequest::new("Aggregate_Transaction", ["State", "Year"], ["Transaction_Amount"]),
        )
        .unwrap();
        assert!(matches!(
            pivot(&two_dim, "Quarter"),
            Err(PipelineError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_pivot_rejects_duplicate_pairs() {
        let row = GroupRow {
            key: GroupKey(vec![Value::text("X"), Value::text("Recharge")]),
            values: vec![MetricValue::Int(1)],
        };
        let result = AggregationResult {
            dataset: "Aggregate_Transaction".to_string(),
            group_by: vec!["State".to_string(), "Transaction_Name".to_string()],
            metrics: vec!["Transaction_Count".to_string()],
            order: SortOrder::Descending,
            matched_records: 2,
            rows: vec![row.clone(), row],
        };
        assert!(matches!(
            pivot(&result, "Transaction_Name"),
            Err(PipelineError::DuplicateGroup { .. })
        ));
    }

    #[test]
    fn test_ratio_of_sums_is_not_mean_of_ratios() {
        // Map_User: State, Year, Quarter, District, Registered_Users, App_Count
        let user = |district: &str, registered: i64, opens: i64| {
            Record::new(vec![
                Value::text("Goa"),
                Value::Int(2023),
                Value::Int(1),
                Value::text(district),
                Value::Int(registered),
                Value::Int(opens),
            ])
        };
        let records = vec![
            user("North Goa", 10, 100),
            user("North Goa", 990, 990),
            user("South Goa", 100, 50),
            user("Empty", 0, 0),
        ];
        let registry =
            DatasetRegistry::from_datasets([Dataset::with_records(DatasetKind::MapUser, records)]);

        let request = AggregationRequest::new(
            "Map_User",
            ["State", "District"],
            ["App_Count", "Registered_Users"],
        );
        let result = aggregate(&registry, &request).unwrap();
        let rate = ratio_of_sums(&result, "App_Count", "Registered_Users", "Engagement_Rate").unwrap();

        assert_eq!(rate.metrics, vec!["Engagement_Rate"]);
        assert_eq!(rate.len(), 2);
        assert_eq!(rate.rows[0].key.label(), "Goa / North Goa");
        // (100 + 990) / (10 + 990), whereas the mean of ratios would be 5.5
        assert_eq!(rate.rows[0].values[0], MetricValue::Float(1.09));
        assert_eq!(rate.rows[1].values[0], MetricValue::Float(0.5));
    }

    #[test]
    fn test_ratio_unknown_metric() {
        let registry = create_test_registry();
        let result = aggregate(
            &registry,
            &AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Amount"]),
        )
        .unwrap();
        assert!(matches!(
            ratio_of_sums(&result, "Transaction_Amount", "Transaction_Count", "Avg"),
            Err(PipelineError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_integer_overflow_is_reported() {
        let records = vec![
            txn("X", 2023, 1, "Recharge", i64::MAX, 1.0),
            txn("X", 2023, 1, "Recharge", 1, 1.0),
        ];
        let registry = DatasetRegistry::from_datasets([Dataset::with_records(
            DatasetKind::AggregateTransaction,
            records,
        )]);
        let request = AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Count"]);
        assert!(matches!(
            aggregate(&registry, &request),
            Err(PipelineError::Overflow(_))
        ));
    }
}
