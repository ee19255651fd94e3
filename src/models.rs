//! Data models for the aggregation pipeline.
//!
//! This module contains the core data structures used throughout
//! the application for representing datasets, filters, aggregation
//! requests and their results, and the final report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::views::{ViewFailure, ViewOutput};

/// The nine fixed dataset shapes of a Pulse extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DatasetKind {
    #[serde(rename = "Aggregate_Transaction")]
    AggregateTransaction,
    #[serde(rename = "Aggregate_User")]
    AggregateUser,
    #[serde(rename = "Aggregate_Insurance")]
    AggregateInsurance,
    #[serde(rename = "Map_Transaction")]
    MapTransaction,
    #[serde(rename = "Map_User")]
    MapUser,
    #[serde(rename = "Map_Insurance")]
    MapInsurance,
    #[serde(rename = "Top_Transaction")]
    TopTransaction,
    #[serde(rename = "Top_User")]
    TopUser,
    #[serde(rename = "Top_Insurance")]
    TopInsurance,
}

impl DatasetKind {
    /// Every dataset kind, in load order.
    pub const ALL: [DatasetKind; 9] = [
        DatasetKind::AggregateTransaction,
        DatasetKind::AggregateUser,
        DatasetKind::AggregateInsurance,
        DatasetKind::MapTransaction,
        DatasetKind::MapUser,
        DatasetKind::MapInsurance,
        DatasetKind::TopTransaction,
        DatasetKind::TopUser,
        DatasetKind::TopInsurance,
    ];

    /// Table name, also used as the CSV file stem.
    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::AggregateTransaction => "Aggregate_Transaction",
            DatasetKind::AggregateUser => "Aggregate_User",
            DatasetKind::AggregateInsurance => "Aggregate_Insurance",
            DatasetKind::MapTransaction => "Map_Transaction",
            DatasetKind::MapUser => "Map_User",
            DatasetKind::MapInsurance => "Map_Insurance",
            DatasetKind::TopTransaction => "Top_Transaction",
            DatasetKind::TopUser => "Top_User",
            DatasetKind::TopInsurance => "Top_Insurance",
        }
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            DatasetKind::AggregateTransaction => "Transaction Aggregated",
            DatasetKind::AggregateUser => "User Aggregated",
            DatasetKind::AggregateInsurance => "Insurance Aggregated",
            DatasetKind::MapTransaction => "Transaction Map",
            DatasetKind::MapUser => "User Map",
            DatasetKind::MapInsurance => "Insurance Map",
            DatasetKind::TopTransaction => "Transaction Top",
            DatasetKind::TopUser => "User Top",
            DatasetKind::TopInsurance => "Insurance Top",
        }
    }

    /// Resolve a dataset kind from its table name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().to_lowercase() == wanted)
    }

    /// The fixed schema of this dataset kind.
    pub fn schema(&self) -> Schema {
        use FieldKind::{Decimal, Integer, Text};

        let mut fields = vec![
            FieldDef::required("State", Text),
            FieldDef::required("Year", Integer),
            FieldDef::required("Quarter", Integer).with_aliases(&["Quater"]),
        ];

        let category = match self {
            DatasetKind::AggregateTransaction | DatasetKind::AggregateInsurance => {
                Some("Transaction_Name")
            }
            DatasetKind::AggregateUser => Some("User_Brand"),
            _ => None,
        };
        if let Some(name) = category {
            fields.push(FieldDef::required(name, Text));
        }

        match self {
            DatasetKind::MapTransaction | DatasetKind::MapUser | DatasetKind::MapInsurance => {
                fields.push(FieldDef::optional("District", Text));
            }
            DatasetKind::TopTransaction | DatasetKind::TopUser | DatasetKind::TopInsurance => {
                fields.push(FieldDef::optional("Pincode", Text));
            }
            _ => {}
        }

        match self {
            DatasetKind::AggregateTransaction
            | DatasetKind::MapTransaction
            | DatasetKind::TopTransaction => {
                fields.push(FieldDef::required("Transaction_Count", Integer));
                fields.push(FieldDef::required("Transaction_Amount", Decimal));
            }
            DatasetKind::AggregateInsurance
            | DatasetKind::MapInsurance
            | DatasetKind::TopInsurance => {
                fields.push(FieldDef::required("Insurance_Count", Integer));
                fields.push(FieldDef::required("Insurance_Amount", Decimal));
            }
            DatasetKind::AggregateUser => {
                fields.push(FieldDef::required("User_Count", Integer));
            }
            DatasetKind::MapUser => {
                fields.push(
                    FieldDef::required("Registered_Users", Integer)
                        .with_aliases(&["Registerd_Users"]),
                );
                fields.push(FieldDef::required("App_Count", Integer));
            }
            DatasetKind::TopUser => {
                fields.push(
                    FieldDef::required("Registered_Users", Integer)
                        .with_aliases(&["Registerd_Users"]),
                );
            }
        }

        Schema { fields, category }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Integer,
    Decimal,
}

impl FieldKind {
    /// Whether values of this kind can be summed.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Integer | FieldKind::Decimal)
    }

    /// SQLite column affinity.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Text => "TEXT",
            FieldKind::Integer => "INTEGER",
            FieldKind::Decimal => "REAL",
        }
    }
}

/// A single named column of a dataset schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Empty cells are rejected when true, stored as `Null` otherwise.
    pub required: bool,
    /// Alternate header spellings found in the source extracts.
    pub aliases: &'static [&'static str],
}

impl FieldDef {
    fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            aliases: &[],
        }
    }

    fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            aliases: &[],
        }
    }

    fn with_aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    /// Whether a CSV header names this field.
    pub fn matches_header(&self, header: &str) -> bool {
        let header = header.trim();
        header == self.name || self.aliases.contains(&header)
    }
}

/// Ordered field list shared by every record of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub fields: Vec<FieldDef>,
    /// Name of the category dimension, if the dataset has one.
    pub category: Option<&'static str>,
}

impl Schema {
    /// Position of a field in each record.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    #[allow(dead_code)] // Lookup counterpart of index_of
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of the numeric fields.
    pub fn metric_names(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.kind.is_numeric() && f.name != "Year" && f.name != "Quarter")
            .map(|f| f.name)
            .collect()
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Numeric view of the value, if it has one.
    pub fn as_metric(&self) -> Option<MetricValue> {
        match self {
            Value::Int(i) => Some(MetricValue::Int(*i)),
            Value::Float(f) => Some(MetricValue::Float(*f)),
            _ => None,
        }
    }

    /// Total order used for group keys: `Null` first, numbers numerically,
    /// then text by bytes.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Int(_) | Value::Float(_) => 1,
                Value::Text(_) => 2,
            }
        }

        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let a = self.as_metric().map(|m| m.as_f64()).unwrap_or_default();
                let b = other.as_metric().map(|m| m.as_f64()).unwrap_or_default();
                a.total_cmp(&b)
            }
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "(none)"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

/// A summed metric, keeping the dataset's native numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    /// Zero of the given field kind.
    pub fn zero(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Decimal => MetricValue::Float(0.0),
            _ => MetricValue::Int(0),
        }
    }

    /// Zero of the same numeric type as `self`.
    pub fn zero_like(&self) -> Self {
        match self {
            MetricValue::Int(_) => MetricValue::Int(0),
            MetricValue::Float(_) => MetricValue::Float(0.0),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Int(i) => *i as f64,
            MetricValue::Float(x) => *x,
        }
    }

    /// Add two metric values. Returns `None` on integer overflow.
    pub fn checked_add(&self, other: MetricValue) -> Option<MetricValue> {
        match (self, other) {
            (MetricValue::Int(a), MetricValue::Int(b)) => a.checked_add(b).map(MetricValue::Int),
            _ => Some(MetricValue::Float(self.as_f64() + other.as_f64())),
        }
    }

    /// Total order over metric values.
    pub fn total_cmp(&self, other: &MetricValue) -> Ordering {
        match (self, other) {
            (MetricValue::Int(a), MetricValue::Int(b)) => a.cmp(b),
            _ => self.as_f64().total_cmp(&other.as_f64()),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(i) => write!(f, "{}", i),
            MetricValue::Float(x) => write!(f, "{}", x),
        }
    }
}

/// One row of a flat fact table, positional against its dataset's schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&Value::Null)
    }
}

/// A named, homogeneous, read-only set of records.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub kind: DatasetKind,
    pub schema: Schema,
    pub records: Vec<Record>,
}

impl Dataset {
    /// Creates an empty dataset of the given kind.
    pub fn new(kind: DatasetKind) -> Self {
        Self {
            kind,
            schema: kind.schema(),
            records: Vec::new(),
        }
    }

    pub fn with_records(kind: DatasetKind, records: Vec<Record>) -> Self {
        Self {
            kind,
            schema: kind.schema(),
            records,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[allow(dead_code)] // Pairs with len()
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct values of a field, in group-key order.
    pub fn distinct(&self, field: &str) -> Vec<Value> {
        let Some(idx) = self.schema.index_of(field) else {
            return Vec::new();
        };
        let mut values: Vec<Value> = self.records.iter().map(|r| r.get(idx).clone()).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
        values
    }
}

/// Which field a filter constraint applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Year,
    Quarter,
    State,
    Category,
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterField::Year => write!(f, "Year"),
            FilterField::Quarter => write!(f, "Quarter"),
            FilterField::State => write!(f, "State"),
            FilterField::Category => write!(f, "Category"),
        }
    }
}

/// Conjunction of optional equality constraints.
///
/// A `None` field places no restriction on that field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn year(mut self, year: i64) -> Self {
        self.year = Some(year);
        self
    }

    pub fn quarter(mut self, quarter: i64) -> Self {
        self.quarter = Some(quarter);
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    #[allow(dead_code)] // CLI builds the struct directly
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.constraints().is_empty()
    }

    /// The present constraints, in a fixed field order.
    pub fn constraints(&self) -> Vec<(FilterField, Value)> {
        let mut out = Vec::new();
        if let Some(year) = self.year {
            out.push((FilterField::Year, Value::Int(year)));
        }
        if let Some(quarter) = self.quarter {
            out.push((FilterField::Quarter, Value::Int(quarter)));
        }
        if let Some(ref state) = self.state {
            out.push((FilterField::State, Value::text(state.clone())));
        }
        if let Some(ref category) = self.category {
            out.push((FilterField::Category, Value::text(category.clone())));
        }
        out
    }

    /// Overlay `overrides` on top of this filter; present override fields win.
    pub fn merged_with(&self, overrides: &FilterSpec) -> FilterSpec {
        FilterSpec {
            year: overrides.year.or(self.year),
            quarter: overrides.quarter.or(self.quarter),
            state: overrides.state.clone().or_else(|| self.state.clone()),
            category: overrides.category.clone().or_else(|| self.category.clone()),
        }
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .constraints()
            .into_iter()
            .map(|(field, value)| format!("{}={}", field, value))
            .collect();

        if parts.is_empty() {
            write!(f, "(all records)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// How an aggregation result is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Largest first metric first.
    #[default]
    Descending,
    /// Smallest first metric first.
    Ascending,
    /// Natural group-key order, for trend tables.
    GroupKey,
    /// First group field ascending, then largest first metric within it.
    LeadingKey,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Descending => write!(f, "descending"),
            SortOrder::Ascending => write!(f, "ascending"),
            SortOrder::GroupKey => write!(f, "group key"),
            SortOrder::LeadingKey => write!(f, "leading key, then descending"),
        }
    }
}

/// A group-by + sum request against one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRequest {
    pub dataset: String,
    #[serde(default)]
    pub filter: FilterSpec,
    pub group_by: Vec<String>,
    pub metrics: Vec<String>,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl AggregationRequest {
    /// Creates a descending, unfiltered, unlimited request.
    pub fn new<G, M>(dataset: impl Into<String>, group_by: G, metrics: M) -> Self
    where
        G: IntoIterator,
        G::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            dataset: dataset.into(),
            filter: FilterSpec::default(),
            group_by: group_by.into_iter().map(Into::into).collect(),
            metrics: metrics.into_iter().map(Into::into).collect(),
            order: SortOrder::Descending,
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Composite group key with a total order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(pub Vec<Value>);

impl GroupKey {
    /// Key rendered as `a / b / c`.
    pub fn label(&self) -> String {
        self.0
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = a.total_cmp(b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// One group of an aggregation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRow {
    pub key: GroupKey,
    /// One value per requested metric, in request order.
    pub values: Vec<MetricValue>,
}

impl GroupRow {
    /// The value the row is sorted by.
    pub fn primary(&self) -> MetricValue {
        self.values.first().copied().unwrap_or(MetricValue::Int(0))
    }
}

/// Ordered output of an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub dataset: String,
    pub group_by: Vec<String>,
    pub metrics: Vec<String>,
    pub order: SortOrder,
    /// Records that satisfied the filter, before grouping.
    pub matched_records: usize,
    pub rows: Vec<GroupRow>,
}

impl AggregationResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Zero groups is a valid result; callers render a neutral state.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn metric_index(&self, name: &str) -> Option<usize> {
        self.metrics.iter().position(|m| m == name)
    }

    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.group_by.iter().position(|g| g == name)
    }

    /// Sum of one metric over all rows.
    pub fn total(&self, metric: usize) -> Option<MetricValue> {
        let first = self.rows.first()?.values.get(metric)?.zero_like();
        self.rows
            .iter()
            .filter_map(|r| r.values.get(metric).copied())
            .try_fold(first, |acc, v| acc.checked_add(v))
    }
}

/// One primary-key row of a pivot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotRow {
    pub key: Value,
    /// One value per pivot column.
    pub values: Vec<MetricValue>,
}

/// Two-dimensional re-expression of an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotTable {
    pub primary_field: String,
    pub secondary_field: String,
    pub metric: String,
    pub columns: Vec<Value>,
    pub rows: Vec<PivotRow>,
}

impl PivotTable {
    /// Cell at (primary, secondary), if both keys exist.
    #[allow(dead_code)] // Report renders rows positionally
    pub fn get(&self, primary: &Value, secondary: &Value) -> Option<MetricValue> {
        let col = self.columns.iter().position(|c| c == secondary)?;
        let row = self.rows.iter().find(|r| &r.key == primary)?;
        row.values.get(col).copied()
    }
}

/// A dataset the loader could not provide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableDataset {
    pub dataset: String,
    pub reason: String,
}

/// Metadata about the generated report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Directory the extracts were loaded from.
    pub data_dir: String,
    /// Date and time the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Query backend that executed the views.
    pub backend: String,
    /// User filters applied on top of each view's defaults.
    pub filter: FilterSpec,
    /// Number of datasets loaded.
    pub datasets_loaded: usize,
    /// Total records across loaded datasets.
    pub records_loaded: usize,
    /// Duration of the run in seconds.
    pub duration_seconds: f64,
}

/// The complete dashboard report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    /// Rendered views, in catalog order.
    pub views: Vec<ViewOutput>,
    /// Views that failed with a pipeline error.
    pub failures: Vec<ViewFailure>,
    /// Datasets the loader could not provide.
    pub unavailable: Vec<UnavailableDataset>,
}
