//! Built-in dashboard views and catalog selection.

use super::{ChartKind, Derivation, ViewSpec};
use crate::models::{FilterSpec, SortOrder};
use std::collections::HashSet;
use thiserror::Error;

const HOME: &str = "Home";
const EXPLORER: &str = "Explorer";
const TRANSACTION_DYNAMICS: &str = "Transaction Dynamics";
const DEVICE_DOMINANCE: &str = "Device Dominance";
const USER_ENGAGEMENT: &str = "User Engagement";
const MARKET_EXPANSION: &str = "Market Expansion";
const STATES_AND_DISTRICTS: &str = "States and Districts";
const INSURANCE: &str = "Insurance";

/// Errors raised while assembling or selecting from the catalog.
#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("duplicate view id '{0}'")]
    DuplicateId(String),

    #[error("view id must not be empty")]
    EmptyId,

    #[error("unknown view '{0}'")]
    UnknownView(String),

    #[error("unknown section '{0}'")]
    UnknownSection(String),
}

/// Builder shorthand for catalog entries.
fn view(id: &str, section: &str, title: &str, dataset: &str) -> ViewSpec {
    ViewSpec {
        id: id.to_string(),
        section: section.to_string(),
        title: title.to_string(),
        dataset: dataset.to_string(),
        group_by: Vec::new(),
        metrics: Vec::new(),
        filter: FilterSpec::default(),
        order: SortOrder::Descending,
        limit: None,
        chart: ChartKind::Bar,
        derive: Vec::new(),
        latest_period: false,
    }
}

impl ViewSpec {
    fn by(mut self, fields: &[&str]) -> Self {
        self.group_by = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    fn sum(mut self, metrics: &[&str]) -> Self {
        self.metrics = metrics.iter().map(|m| m.to_string()).collect();
        self
    }

    fn chart(mut self, chart: ChartKind) -> Self {
        self.chart = chart;
        self
    }

    fn key_order(mut self) -> Self {
        self.order = SortOrder::GroupKey;
        self
    }

    fn leading_order(mut self) -> Self {
        self.order = SortOrder::LeadingKey;
        self
    }

    fn latest_period(mut self) -> Self {
        self.latest_period = true;
        self
    }

    fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    fn derive(mut self, derivation: Derivation) -> Self {
        self.derive.push(derivation);
        self
    }

    fn pivot_on(self, secondary: &str) -> Self {
        self.derive(Derivation::Pivot {
            secondary: secondary.to_string(),
        })
    }
}

/// The dashboard's fixed views, grouped by section in display order.
pub fn builtin_views() -> Vec<ViewSpec> {
    use ChartKind::{Choropleth, Line, Pie, Table};

    let top10 = || Derivation::Top { n: 10 };
    let bottom10 = || Derivation::Bottom { n: 10 };

    vec![
        // Home: state totals per data type, with leaders and laggards
        view("home-transactions", HOME, "Transactions by State", "Aggregate_Transaction")
            .by(&["State"])
            .sum(&["Transaction_Amount", "Transaction_Count"])
            .chart(Choropleth)
            .latest_period()
            .derive(top10())
            .derive(bottom10()),
        view("home-users", HOME, "Users by State", "Aggregate_User")
            .by(&["State"])
            .sum(&["User_Count"])
            .chart(Choropleth)
            .latest_period()
            .derive(top10())
            .derive(bottom10()),
        view("home-insurance", HOME, "Insurance by State", "Aggregate_Insurance")
            .by(&["State"])
            .sum(&["Insurance_Amount", "Insurance_Count"])
            .chart(Choropleth)
            .latest_period()
            .derive(top10())
            .derive(bottom10()),
        // Explorer: meant to be narrowed with --year, --quarter and --state
        view("explorer-districts", EXPLORER, "District-wise Transactions", "Map_Transaction")
            .by(&["District"])
            .sum(&["Transaction_Count"]),
        view("explorer-insurance-types", EXPLORER, "Insurance Transactions by Type", "Aggregate_Insurance")
            .by(&["Transaction_Name"])
            .sum(&["Insurance_Count"]),
        view("explorer-transaction-types", EXPLORER, "Transactions by Type", "Aggregate_Transaction")
            .by(&["Transaction_Name"])
            .sum(&["Transaction_Count"]),
        view("explorer-amount-distribution", EXPLORER, "Transaction Amount Distribution", "Aggregate_Transaction")
            .by(&["Transaction_Name"])
            .sum(&["Transaction_Amount"])
            .chart(Pie),
        view("explorer-top-pincodes", EXPLORER, "Top 15 Pincode Transactions", "Top_Transaction")
            .by(&["Pincode"])
            .sum(&["Transaction_Count"])
            .limit(15),
        view("explorer-yearly-trend", EXPLORER, "Yearly Transaction Trends", "Aggregate_Transaction")
            .by(&["Year", "Quarter"])
            .sum(&["Transaction_Count"])
            .key_order(),
        // Transaction Dynamics
        view("txn-amount-by-state", TRANSACTION_DYNAMICS, "Total Transaction Amount by State", "Aggregate_Transaction")
            .by(&["State"])
            .sum(&["Transaction_Amount"]),
        view("txn-quarterly-trends", TRANSACTION_DYNAMICS, "Quarterly Transaction Trends by State", "Aggregate_Transaction")
            .by(&["State", "Year", "Quarter"])
            .sum(&["Transaction_Amount"])
            .key_order()
            .chart(Line),
        view("txn-type-by-state", TRANSACTION_DYNAMICS, "Transaction Type Breakdown by State", "Aggregate_Transaction")
            .by(&["State", "Transaction_Name"])
            .sum(&["Transaction_Amount"])
            .leading_order()
            .chart(Pie),
        view("txn-yearly-growth-by-type", TRANSACTION_DYNAMICS, "Yearly Growth by Transaction Type", "Aggregate_Transaction")
            .by(&["Year", "Transaction_Name"])
            .sum(&["Transaction_Amount"])
            .key_order()
            .chart(Line)
            .pivot_on("Transaction_Name"),
        view("txn-top-types", TRANSACTION_DYNAMICS, "Top Transaction Types Overall", "Aggregate_Transaction")
            .by(&["Transaction_Name"])
            .sum(&["Transaction_Amount"]),
        view("txn-overall-trend", TRANSACTION_DYNAMICS, "Overall Transaction Trend", "Aggregate_Transaction")
            .by(&["Year", "Quarter"])
            .sum(&["Transaction_Amount"])
            .key_order()
            .chart(Line),
        view("txn-totals", TRANSACTION_DYNAMICS, "Transaction Totals", "Aggregate_Transaction")
            .sum(&["Transaction_Count", "Transaction_Amount"])
            .chart(Table),
        // Device Dominance
        view("device-users-by-brand", DEVICE_DOMINANCE, "Total Registered Users by Device Brand", "Aggregate_User")
            .by(&["User_Brand"])
            .sum(&["User_Count"]),
        view("device-brand-by-state", DEVICE_DOMINANCE, "Device Brand Usage by State", "Aggregate_User")
            .by(&["State", "User_Brand"])
            .sum(&["User_Count"])
            .leading_order(),
        view("device-yearly-trends", DEVICE_DOMINANCE, "Yearly Trends by Device Brand", "Aggregate_User")
            .by(&["User_Brand", "Year"])
            .sum(&["User_Count"])
            .key_order()
            .chart(Line),
        view("device-quarterly-growth", DEVICE_DOMINANCE, "Quarterly Growth by Device Brand", "Aggregate_User")
            .by(&["User_Brand", "Year", "Quarter"])
            .sum(&["User_Count"])
            .key_order()
            .chart(Line),
        view("device-state-vs-brand", DEVICE_DOMINANCE, "State vs Device Brand Usage", "Aggregate_User")
            .by(&["State", "User_Brand"])
            .sum(&["User_Count"])
            .key_order()
            .chart(Table)
            .pivot_on("User_Brand"),
        // User Engagement
        view("engagement-registered-by-state", USER_ENGAGEMENT, "Total Registered Users by State", "Map_User")
            .by(&["State"])
            .sum(&["Registered_Users"]),
        view("engagement-app-opens-by-state", USER_ENGAGEMENT, "Total App Opens by State", "Map_User")
            .by(&["State"])
            .sum(&["App_Count"]),
        view("engagement-districts", USER_ENGAGEMENT, "District-Level Engagement", "Map_User")
            .by(&["State", "District"])
            .sum(&["App_Count", "Registered_Users"])
            .leading_order(),
        view("engagement-rate", USER_ENGAGEMENT, "Engagement Ratio by District", "Map_User")
            .by(&["State", "District"])
            .sum(&["App_Count", "Registered_Users"])
            .derive(Derivation::Ratio {
                numerator: "App_Count".to_string(),
                denominator: "Registered_Users".to_string(),
                label: "Engagement_Rate".to_string(),
                limit: Some(20),
            }),
        view("engagement-quarterly-app-opens", USER_ENGAGEMENT, "Quarterly Growth in App Opens", "Map_User")
            .by(&["State", "Year", "Quarter"])
            .sum(&["App_Count"])
            .key_order()
            .chart(Line),
        // Market Expansion
        view("market-amount-by-state", MARKET_EXPANSION, "Total Transaction by State", "Aggregate_Transaction")
            .by(&["State"])
            .sum(&["Transaction_Amount"])
            .key_order(),
        view("market-yearly-growth", MARKET_EXPANSION, "Yearly Growth by State", "Aggregate_Transaction")
            .by(&["State", "Year"])
            .sum(&["Transaction_Amount"])
            .key_order()
            .chart(Line)
            .pivot_on("State"),
        view("market-quarterly-by-type", MARKET_EXPANSION, "Quarterly Trends by Type", "Aggregate_Transaction")
            .by(&["State", "Transaction_Name", "Year", "Quarter"])
            .sum(&["Transaction_Amount"])
            .key_order()
            .chart(Line),
        view("market-top-pincodes", MARKET_EXPANSION, "Top Pincodes by Amount", "Top_Transaction")
            .by(&["Pincode"])
            .sum(&["Transaction_Amount"])
            .derive(top10()),
        view("market-pincodes-by-state", MARKET_EXPANSION, "State-Wise Pincode Performance", "Top_Transaction")
            .by(&["State", "Pincode"])
            .sum(&["Transaction_Amount"])
            .leading_order(),
        // States and Districts
        view("geo-states-by-amount", STATES_AND_DISTRICTS, "Top States by Amount", "Aggregate_Transaction")
            .by(&["State"])
            .sum(&["Transaction_Amount"]),
        view("geo-states-by-volume", STATES_AND_DISTRICTS, "Top States by Volume", "Aggregate_Transaction")
            .by(&["State"])
            .sum(&["Transaction_Count"]),
        view("geo-districts-by-amount", STATES_AND_DISTRICTS, "Top Districts by Amount", "Map_Transaction")
            .by(&["District"])
            .sum(&["Transaction_Amount"]),
        view("geo-districts-by-volume", STATES_AND_DISTRICTS, "Top Districts by Volume", "Map_Transaction")
            .by(&["District"])
            .sum(&["Transaction_Count"]),
        view("geo-pincodes-by-amount", STATES_AND_DISTRICTS, "Top Pincodes by Amount", "Top_Transaction")
            .by(&["Pincode"])
            .sum(&["Transaction_Amount"])
            .limit(10),
        view("geo-pincodes-by-volume", STATES_AND_DISTRICTS, "Top Pincodes by Volume", "Top_Transaction")
            .by(&["Pincode"])
            .sum(&["Transaction_Count"])
            .limit(10),
        // Insurance
        view("insurance-by-state", INSURANCE, "Insurance Transactions by State", "Aggregate_Insurance")
            .by(&["State"])
            .sum(&["Insurance_Count"]),
        view("insurance-by-district", INSURANCE, "Insurance Transactions by District", "Map_Insurance")
            .by(&["District"])
            .sum(&["Insurance_Count"]),
        view("insurance-top-pincodes", INSURANCE, "Top Pincodes by Insurance Transactions", "Top_Insurance")
            .by(&["Pincode"])
            .sum(&["Insurance_Count"])
            .limit(10),
        view("insurance-quarterly-trend", INSURANCE, "Quarterly Insurance Trend by State", "Aggregate_Insurance")
            .by(&["State", "Year", "Quarter"])
            .sum(&["Insurance_Count"])
            .key_order()
            .chart(Line),
        view("insurance-year-quarter", INSURANCE, "Year-Quarter Breakdown Across States", "Aggregate_Insurance")
            .by(&["State"])
            .sum(&["Insurance_Count"]),
    ]
}

/// Built-in views followed by user-declared ones. Ids must be unique.
pub fn build_catalog(custom: &[ViewSpec]) -> Result<Vec<ViewSpec>, CatalogError> {
    let mut catalog = builtin_views();
    catalog.extend(custom.iter().cloned());

    let mut seen = HashSet::new();
    for view in &catalog {
        if view.id.trim().is_empty() {
            return Err(CatalogError::EmptyId);
        }
        if !seen.insert(view.id.as_str()) {
            return Err(CatalogError::DuplicateId(view.id.clone()));
        }
    }

    Ok(catalog)
}

/// Distinct section names in catalog order.
pub fn sections(catalog: &[ViewSpec]) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for view in catalog {
        if !out.contains(&view.section.as_str()) {
            out.push(&view.section);
        }
    }
    out
}

/// Section names compare case-insensitively, with `-`/`_` as spaces.
fn section_key(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pick views by id and/or section. No selectors means the whole catalog.
pub fn select_views<'a>(
    catalog: &'a [ViewSpec],
    ids: &[String],
    section: Option<&str>,
) -> Result<Vec<&'a ViewSpec>, CatalogError> {
    let mut selected: Vec<&ViewSpec> = Vec::new();

    if let Some(section) = section {
        let wanted = section_key(section);
        let matching: Vec<&ViewSpec> = catalog
            .iter()
            .filter(|v| section_key(&v.section) == wanted)
            .collect();
        if matching.is_empty() {
            return Err(CatalogError::UnknownSection(section.to_string()));
        }
        selected.extend(matching);
    }

    for id in ids {
        let view = catalog
            .iter()
            .find(|v| v.id == *id)
            .ok_or_else(|| CatalogError::UnknownView(id.clone()))?;
        if !selected.iter().any(|v| v.id == view.id) {
            selected.push(view);
        }
    }

    if section.is_none() && ids.is_empty() {
        selected.extend(catalog.iter());
    }

    Ok(selected)
}
