//! Embedded SQLite backend.
//!
//! Mirrors every loaded dataset into an in-memory SQLite database and
//! answers requests with one parameterized `GROUP BY` query each.

use super::aggregate::{self, QueryPlan};
use super::backend::QueryBackend;
use crate::error::PipelineResult;
use crate::loader::DatasetRegistry;
use crate::models::{
    AggregationRequest, AggregationResult, Dataset, FieldKind, FilterSpec, GroupKey, GroupRow,
    MetricValue, SortOrder, Value,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info};

/// Column alias carrying the number of records matched by the filter.
const MATCHED_ALIAS: &str = "matched_records";

/// A rendered statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlQuery {
    /// The statement with parameters inlined as literals, for display only.
    pub fn display(&self) -> String {
        let mut out = self.sql.clone();
        // Highest index first so `?1` never clobbers `?10`
        for (i, param) in self.params.iter().enumerate().rev() {
            let literal = match param {
                SqlValue::Null => "NULL".to_string(),
                SqlValue::Integer(n) => n.to_string(),
                SqlValue::Real(x) => x.to_string(),
                SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
                SqlValue::Blob(_) => "X''".to_string(),
            };
            out = out.replace(&format!("?{}", i + 1), &literal);
        }
        out
    }
}

/// Render a validated plan as a parameterized SQL statement.
pub fn render_sql(plan: &QueryPlan<'_>) -> SqlQuery {
    let groups: Vec<String> = plan.group_by.iter().map(|(_, n)| quote_ident(n)).collect();

    let mut select = groups.clone();
    for (i, (_, name, _)) in plan.metrics.iter().enumerate() {
        select.push(format!("SUM({}) AS {}", quote_ident(name), metric_alias(i)));
    }
    select.push(format!("SUM(COUNT(*)) OVER () AS {}", quote_ident(MATCHED_ALIAS)));

    let mut sql = format!(
        "SELECT {} FROM {}",
        select.join(", "),
        quote_ident(plan.dataset.name())
    );

    let mut params = Vec::with_capacity(plan.filters.len());
    if !plan.filters.is_empty() {
        let clauses: Vec<String> = plan
            .filters
            .iter()
            .enumerate()
            .map(|(i, (_, name, _))| format!("{} = ?{}", quote_ident(name), i + 1))
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
        params.extend(plan.filters.iter().map(|(_, _, value)| to_sql_value(value)));
    }

    if !groups.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&groups.join(", "));
    }

    let key_order: Vec<String> = groups.iter().map(|g| format!("{} ASC", g)).collect();
    let mut order_by = Vec::new();
    match plan.order {
        SortOrder::Descending => order_by.push(format!("{} DESC", metric_alias(0))),
        SortOrder::Ascending => order_by.push(format!("{} ASC", metric_alias(0))),
        SortOrder::GroupKey => {}
        SortOrder::LeadingKey => {
            if let Some(lead) = groups.first() {
                order_by.push(format!("{} ASC", lead));
            }
            order_by.push(format!("{} DESC", metric_alias(0)));
        }
    }
    order_by.extend(key_order);
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by.join(", "));
    }

    if let Some(limit) = plan.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    SqlQuery { sql, params }
}

fn metric_alias(index: usize) -> String {
    format!("\"m{}\"", index)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(x) => SqlValue::Real(*x),
        Value::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn from_sql_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Integer(i) => Value::Int(i),
        SqlValue::Real(x) => Value::Float(x),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Null | SqlValue::Blob(_) => Value::Null,
    }
}

fn metric_from_sql(value: SqlValue, kind: FieldKind) -> MetricValue {
    match (value, kind) {
        (SqlValue::Integer(i), FieldKind::Decimal) => MetricValue::Float(i as f64),
        (SqlValue::Integer(i), _) => MetricValue::Int(i),
        (SqlValue::Real(x), FieldKind::Integer) if x.fract() == 0.0 => MetricValue::Int(x as i64),
        (SqlValue::Real(x), _) => MetricValue::Float(x),
        // SUM over only NULLs
        _ => MetricValue::zero(kind),
    }
}

/// Backend answering requests from an in-memory SQLite mirror.
pub struct SqliteBackend<'a> {
    registry: &'a DatasetRegistry,
    conn: Connection,
}

impl<'a> SqliteBackend<'a> {
    /// Create the database and copy every loaded dataset into it.
    pub fn from_registry(registry: &'a DatasetRegistry) -> PipelineResult<Self> {
        let mut conn = Connection::open_in_memory()?;

        for dataset in registry.datasets() {
            load_table(&mut conn, dataset)?;
        }
        info!(
            "SQLite store ready: {} tables, {} rows",
            registry.len(),
            registry.total_records()
        );

        Ok(Self { registry, conn })
    }
}

/// Create one table and insert all of its records in a transaction.
fn load_table(conn: &mut Connection, dataset: &Dataset) -> rusqlite::Result<()> {
    let columns: Vec<String> = dataset
        .schema
        .fields
        .iter()
        .map(|f| format!("{} {}", quote_ident(f.name), f.kind.sql_type()))
        .collect();
    let table = quote_ident(dataset.name());

    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({});",
        columns.join(", ")
    ))?;

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let insert = format!("INSERT INTO {} VALUES ({})", table, placeholders.join(", "));

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(&insert)?;
        for record in &dataset.records {
            stmt.execute(params_from_iter(record.values.iter().map(to_sql_value)))?;
        }
    }
    tx.commit()?;

    debug!("Mirrored {} ({} rows)", dataset.name(), dataset.len());
    Ok(())
}

impl QueryBackend for SqliteBackend<'_> {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn registry(&self) -> &DatasetRegistry {
        self.registry
    }

    fn aggregate(&self, request: &AggregationRequest) -> PipelineResult<AggregationResult> {
        let plan = aggregate::plan(self.registry, request)?;
        self.run(&plan)
    }

    fn aggregate_total(
        &self,
        dataset: &str,
        filter: &FilterSpec,
        metrics: &[String],
    ) -> PipelineResult<AggregationResult> {
        let plan = aggregate::plan_total(self.registry, dataset, filter, metrics)?;
        self.run(&plan).map(aggregate::label_total)
    }
}

impl SqliteBackend<'_> {
    /// Execute a validated plan against the mirrored tables.
    fn run(&self, plan: &QueryPlan<'_>) -> PipelineResult<AggregationResult> {
        let query = render_sql(plan);
        debug!("SQL: {}", query.display());

        let group_count = plan.group_by.len();
        let mut stmt = self.conn.prepare(&query.sql)?;
        let mut rows = stmt.query(params_from_iter(query.params.iter()))?;

        let mut out = Vec::new();
        let mut matched = 0usize;
        while let Some(row) = rows.next()? {
            let count: Option<i64> = row.get(group_count + plan.metrics.len())?;
            matched = count.unwrap_or(0).max(0) as usize;
            // An ungrouped SELECT yields one row even when nothing matched
            if matched == 0 {
                continue;
            }

            let mut key = Vec::with_capacity(group_count);
            for i in 0..group_count {
                key.push(from_sql_value(row.get(i)?));
            }

            let mut values = Vec::with_capacity(plan.metrics.len());
            for (j, (_, _, kind)) in plan.metrics.iter().enumerate() {
                values.push(metric_from_sql(row.get(group_count + j)?, *kind));
            }

            out.push(GroupRow {
                key: GroupKey(key),
                values,
            });
        }

        Ok(AggregationResult {
            dataset: plan.dataset.name().to_string(),
            group_by: plan.group_by.iter().map(|(_, n)| n.to_string()).collect(),
            metrics: plan.metrics.iter().map(|(_, n, _)| n.to_string()).collect(),
            order: plan.order,
            matched_records: matched,
            rows: out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::models::{DatasetKind, FilterSpec, Record};
    use crate::pipeline::backend::{results_agree, MemoryBackend};

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
            txn("Y", 2022, 4, "Recharge", 2, 30.0),
            txn("Z", 2023, 2, "Merchant", 8, 30.0),
        ];
        let pincodes = vec![
            Record::new(vec![
                Value::text("X"),
                Value::Int(2023),
                Value::Int(1),
                Value::text("560001"),
                Value::Int(5),
                Value::Float(10.5),
            ]),
            Record::new(vec![
                Value::text("X"),
                Value::Int(2023),
                Value::Int(1),
                Value::Null,
                Value::Int(3),
                Value::Float(2.25),
            ]),
        ];
        DatasetRegistry::from_datasets([
            Dataset::with_records(DatasetKind::AggregateTransaction, records),
            Dataset::with_records(DatasetKind::TopTransaction, pincodes),
        ])
    }

    #[test]
    fn test_render_sql() {
        let registry = create_test_registry();
        let request = AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Amount"])
            .with_filter(FilterSpec::new().year(2023).quarter(1))
            .with_limit(10);
        let plan = aggregate::plan(&registry, &request).unwrap();
        let query = render_sql(&plan);

        assert_eq!(
            query.sql,
            "SELECT \"State\", SUM(\"Transaction_Amount\") AS \"m0\", \
             SUM(COUNT(*)) OVER () AS \"matched_records\" \
             FROM \"Aggregate_Transaction\" WHERE \"Year\" = ?1 AND \"Quarter\" = ?2 \
             GROUP BY \"State\" ORDER BY \"m0\" DESC, \"State\" ASC LIMIT 10"
        );
        assert_eq!(
            query.params,
            vec![SqlValue::Integer(2023), SqlValue::Integer(1)]
        );
        assert!(query.display().contains("\"Year\" = 2023 AND \"Quarter\" = 1"));
    }

    #[test]
    fn test_render_sql_group_key_order() {
        let registry = create_test_registry();
        let request = AggregationRequest::new(
            "Aggregate_Transaction",
            ["Year", "Quarter"],
            ["Transaction_Amount"],
        )
        .with_order(SortOrder::GroupKey)
        .with_filter(FilterSpec::new().state("O'Neil"));
        let plan = aggregate::plan(&registry, &request).unwrap();
        let query = render_sql(&plan);

        assert!(query
            .sql
            .ends_with("GROUP BY \"Year\", \"Quarter\" ORDER BY \"Year\" ASC, \"Quarter\" ASC"));
        assert!(query.display().contains("'O''Neil'"));
    }

    #[test]
    fn test_render_sql_leading_key_order() {
        let registry = create_test_registry();
        let request = AggregationRequest::new(
            "Aggregate_Transaction",
            ["State", "Transaction_Name"],
            ["Transaction_Amount"],
        )
        .with_order(SortOrder::LeadingKey);
        let plan = aggregate::plan(&registry, &request).unwrap();

        assert!(render_sql(&plan).sql.ends_with(
            "GROUP BY \"State\", \"Transaction_Name\" \
             ORDER BY \"State\" ASC, \"m0\" DESC, \"State\" ASC, \"Transaction_Name\" ASC"
        ));
    }

    #[test]
    fn test_sqlite_matches_memory() {
        let registry = create_test_registry();
        let memory = MemoryBackend::new(&registry);
        let sqlite = SqliteBackend::from_registry(&registry).unwrap();

        let requests = vec![
            AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Amount"])
                .with_filter(FilterSpec::new().year(2023).quarter(1)),
            AggregationRequest::new(
                "Aggregate_Transaction",
                ["State", "Transaction_Name"],
                ["Transaction_Count", "Transaction_Amount"],
            ),
            AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Amount"])
                .with_order(SortOrder::Ascending)
                .with_limit(2),
            AggregationRequest::new("Aggregate_Transaction", ["Year", "Quarter"], ["Transaction_Count"])
                .with_order(SortOrder::GroupKey),
            AggregationRequest::new(
                "Aggregate_Transaction",
                ["State", "Transaction_Name"],
                ["Transaction_Amount"],
            )
            .with_order(SortOrder::LeadingKey),
            AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Count"])
                .with_filter(FilterSpec::new().year(1990)),
            AggregationRequest::new("Top_Transaction", ["Pincode"], ["Transaction_Amount"]),
        ];

        for request in &requests {
            let a = memory.aggregate(request).unwrap();
            let b = sqlite.aggregate(request).unwrap();
            assert!(results_agree(&a, &b), "mismatch for {:?}:\n{:?}\n{:?}", request, a, b);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_sqlite_totals_match_memory() {
        let registry = create_test_registry();
        let memory = MemoryBackend::new(&registry);
        let sqlite = SqliteBackend::from_registry(&registry).unwrap();
        let metrics = vec!["Transaction_Count".to_string(), "Transaction_Amount".to_string()];

        let filter = FilterSpec::new().year(2023);
        let a = memory.aggregate_total("Aggregate_Transaction", &filter, &metrics).unwrap();
        let b = sqlite.aggregate_total("Aggregate_Transaction", &filter, &metrics).unwrap();
        assert_eq!(a, b);
        assert_eq!(b.rows[0].values, vec![MetricValue::Int(15), MetricValue::Float(210.0)]);

        let nothing = FilterSpec::new().state("Nowhere");
        let empty = sqlite.aggregate_total("Aggregate_Transaction", &nothing, &metrics).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.matched_records, 0);
    }

    #[test]
    fn test_sqlite_limit_keeps_matched_count() {
        let registry = create_test_registry();
        let sqlite = SqliteBackend::from_registry(&registry).unwrap();
        let request = AggregationRequest::new("Aggregate_Transaction", ["State"], ["Transaction_Count"])
            .with_limit(1);
        let result = sqlite.aggregate(&request).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.matched_records, 5);
        assert_eq!(result.rows[0].key.label(), "Z");
    }

    #[test]
    fn test_sqlite_reports_schema_errors_like_memory() {
        let registry = create_test_registry();
        let sqlite = SqliteBackend::from_registry(&registry).unwrap();
        let request = AggregationRequest::new("Aggregate_Transaction", ["Province"], ["Transaction_Amount"]);
        assert!(matches!(
            sqlite.aggregate(&request),
            Err(PipelineError::UnknownField { .. })
        ));

        let request = AggregationRequest::new("Map_User", ["District"], ["App_Count"]);
        assert!(matches!(
            sqlite.aggregate(&request),
            Err(PipelineError::DatasetNotFound(_))
        ));
    }
}
