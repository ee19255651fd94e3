//! Declarative dashboard views.
//!
//! A view names one aggregation (dataset, grouping, metrics, default filter,
//! order and limit) plus the tables derived from its result. Running a view
//! performs exactly one backend call.

mod catalog;

pub use catalog::{build_catalog, builtin_views, sections, select_views, CatalogError};

use crate::error::PipelineResult;
use crate::loader::DatasetRegistry;
use crate::models::{
    AggregationRequest, AggregationResult, Dataset, DatasetKind, FilterSpec, PivotTable,
    SortOrder, Value,
};
use crate::pipeline::{self, QueryBackend};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rendering hint for a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[default]
    Bar,
    Line,
    Pie,
    Choropleth,
    Table,
}

impl ChartKind {
    pub fn label(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar chart",
            ChartKind::Line => "line chart",
            ChartKind::Pie => "pie chart",
            ChartKind::Choropleth => "choropleth map",
            ChartKind::Table => "table",
        }
    }
}

/// A table computed from a view's aggregation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    /// Largest `n` groups by the first metric.
    Top { n: usize },
    /// Smallest `n` groups by the first metric.
    Bottom { n: usize },
    /// Pivot a two-field grouping on `secondary`.
    Pivot { secondary: String },
    /// `SUM(numerator) / SUM(denominator)` per group, optionally truncated.
    Ratio {
        numerator: String,
        denominator: String,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
}

/// One entry of the view catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSpec {
    pub id: String,
    #[serde(default = "default_section")]
    pub section: String,
    pub title: String,
    pub dataset: String,
    /// Empty grouping sums everything into a single `ALL` group.
    #[serde(default)]
    pub group_by: Vec<String>,
    pub metrics: Vec<String>,
    #[serde(default)]
    pub filter: FilterSpec,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub chart: ChartKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derive: Vec<Derivation>,
    /// Pin an unset year or quarter to the latest period in the dataset.
    #[serde(default)]
    pub latest_period: bool,
}

fn default_section() -> String {
    "Custom".to_string()
}

impl ViewSpec {
    /// Effective filter: the view's defaults overlaid with user constraints.
    ///
    /// A user category is dropped for datasets without a category field;
    /// the view's own category constraint is kept as written.
    pub fn effective_filter(&self, user: &FilterSpec) -> FilterSpec {
        let mut user = user.clone();
        let has_category = DatasetKind::from_name(&self.dataset)
            .map(|kind| kind.schema().category.is_some())
            .unwrap_or(true);
        if !has_category && user.category.take().is_some() {
            debug!("View {} ignores the category filter", self.id);
        }
        self.filter.merged_with(&user)
    }

    /// Effective filter with the period pinned for `latest_period` views.
    pub fn resolved_filter(&self, registry: &DatasetRegistry, user: &FilterSpec) -> FilterSpec {
        let mut filter = self.effective_filter(user);
        if !self.latest_period || (filter.year.is_some() && filter.quarter.is_some()) {
            return filter;
        }
        let Ok(dataset) = registry.get(&self.dataset) else {
            return filter;
        };
        if let Some((year, quarter)) = latest_period(dataset, filter.year, filter.quarter) {
            debug!("View {} defaults to {}-Q{}", self.id, year, quarter);
            filter.year = Some(year);
            filter.quarter = Some(quarter);
        }
        filter
    }

    /// The single request this view issues.
    pub fn request(&self, filter: FilterSpec) -> AggregationRequest {
        AggregationRequest {
            dataset: self.dataset.clone(),
            filter,
            group_by: self.group_by.clone(),
            metrics: self.metrics.clone(),
            order: self.order,
            limit: self.limit,
        }
    }
}

/// Latest (year, quarter) among records matching the given period parts.
fn latest_period(dataset: &Dataset, year: Option<i64>, quarter: Option<i64>) -> Option<(i64, i64)> {
    let y = dataset.schema.index_of("Year")?;
    let q = dataset.schema.index_of("Quarter")?;
    dataset
        .records
        .iter()
        .filter_map(|r| match (r.get(y), r.get(q)) {
            (Value::Int(ry), Value::Int(rq)) => Some((*ry, *rq)),
            _ => None,
        })
        .filter(|(ry, rq)| year.map_or(true, |w| w == *ry) && quarter.map_or(true, |w| w == *rq))
        .max()
}

/// A derived table in a view's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivedTable {
    Top { n: usize, result: AggregationResult },
    Bottom { n: usize, result: AggregationResult },
    Pivot { table: PivotTable },
    Ratio { result: AggregationResult },
}

impl DerivedTable {
    pub fn title(&self) -> String {
        match self {
            DerivedTable::Top { n, .. } => format!("Top {}", n),
            DerivedTable::Bottom { n, .. } => format!("Least {}", n),
            DerivedTable::Pivot { table } => {
                format!("{} by {}", table.primary_field, table.secondary_field)
            }
            DerivedTable::Ratio { result } => result.metrics.join(", "),
        }
    }
}

/// The result of running one view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewOutput {
    pub id: String,
    pub section: String,
    pub title: String,
    pub chart: ChartKind,
    /// Filter actually applied.
    pub filter: FilterSpec,
    pub result: AggregationResult,
    /// Row limit the aggregation ran with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived: Vec<DerivedTable>,
}

/// A view that could not be produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewFailure {
    pub id: String,
    pub title: String,
    pub error: String,
}

/// Run one view: a single aggregation, then its derivations.
pub fn run_view(
    backend: &dyn QueryBackend,
    view: &ViewSpec,
    user_filter: &FilterSpec,
) -> PipelineResult<ViewOutput> {
    let filter = view.resolved_filter(backend.registry(), user_filter);

    let result = if view.group_by.is_empty() {
        backend.aggregate_total(&view.dataset, &filter, &view.metrics)?
    } else {
        backend.aggregate(&view.request(filter.clone()))?
    };

    let derived = view
        .derive
        .iter()
        .map(|derivation| derive(&result, derivation))
        .collect::<PipelineResult<Vec<_>>>()?;

    debug!(
        "View {} on {}: {} groups, {} derived tables",
        view.id,
        backend.name(),
        result.len(),
        derived.len()
    );

    Ok(ViewOutput {
        id: view.id.clone(),
        section: view.section.clone(),
        title: view.title.clone(),
        chart: view.chart,
        filter,
        result,
        limit: view.limit,
        derived,
    })
}

/// Whether two outputs of the same view agree, up to float drift.
pub fn outputs_agree(a: &ViewOutput, b: &ViewOutput) -> bool {
    use DerivedTable::{Bottom, Pivot, Ratio, Top};

    pipeline::results_agree(&a.result, &b.result)
        && a.derived.len() == b.derived.len()
        && a.derived.iter().zip(&b.derived).all(|pair| match pair {
            (Top { result: p, .. }, Top { result: q, .. })
            | (Bottom { result: p, .. }, Bottom { result: q, .. })
            | (Ratio { result: p }, Ratio { result: q }) => pipeline::results_agree(p, q),
            (Pivot { table: p }, Pivot { table: q }) => pivots_agree(p, q),
            _ => false,
        })
}

fn pivots_agree(a: &PivotTable, b: &PivotTable) -> bool {
    a.primary_field == b.primary_field
        && a.secondary_field == b.secondary_field
        && a.metric == b.metric
        && a.columns == b.columns
        && a.rows.len() == b.rows.len()
        && a.rows.iter().zip(&b.rows).all(|(p, q)| {
            p.key == q.key
                && p.values.len() == q.values.len()
                && p.values
                    .iter()
                    .zip(&q.values)
                    .all(|(x, y)| pipeline::metrics_agree(x, y))
        })
}

fn derive(result: &AggregationResult, derivation: &Derivation) -> PipelineResult<DerivedTable> {
    Ok(match derivation {
        Derivation::Top { n } => DerivedTable::Top {
            n: *n,
            result: pipeline::top(result, *n, false)?,
        },
        Derivation::Bottom { n } => DerivedTable::Bottom {
            n: *n,
            result: pipeline::top(result, *n, true)?,
        },
        Derivation::Pivot { secondary } => DerivedTable::Pivot {
            table: pipeline::pivot(result, secondary)?,
        },
        Derivation::Ratio {
            numerator,
            denominator,
            label,
            limit,
        } => {
            let ratio = pipeline::ratio_of_sums(result, numerator, denominator, label)?;
            let ratio = match limit {
                Some(n) => pipeline::top(&ratio, *n, false)?,
                None => ratio,
            };
            DerivedTable::Ratio { result: ratio }
        }
    })
}
