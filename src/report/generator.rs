//! Markdown report generation.
//!
//! This module renders the dashboard report: one section per catalog
//! section, one table per view, and the derived tables beneath it.

use super::format::{escape_cell, format_int, format_key, format_metric, DECIMAL_PLACES, RATIO_PLACES};
use crate::models::{AggregationResult, PivotTable, Report, ReportMetadata, UnavailableDataset};
use crate::views::{DerivedTable, ViewFailure, ViewOutput};
use anyhow::Result;

/// Text shown for views whose aggregation produced zero groups.
pub const NO_DATA: &str = "No data available for the selected filters.";

/// Rendering options for the Markdown report.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub title: String,
    /// Maximum rows rendered per table.
    pub max_rows: usize,
    /// Render top/bottom/pivot/ratio tables under each view.
    pub include_derived: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            title: "PhonePe Pulse Dashboard".to_string(),
            max_rows: 50,
            include_derived: true,
        }
    }
}

impl From<&crate::config::ReportConfig> for ReportOptions {
    fn from(config: &crate::config::ReportConfig) -> Self {
        Self {
            title: config.title.clone(),
            max_rows: config.max_rows,
            include_derived: config.include_derived,
        }
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report, options: &ReportOptions) -> String {
    let mut output = String::new();

    // Title
    output.push_str(&format!("# {}\n\n", options.title));

    // Metadata section
    output.push_str(&generate_metadata_section(&report.metadata, &report.unavailable));

    // Table of contents
    output.push_str(&generate_table_of_contents(report));

    // Views, grouped by section in catalog order
    let mut current_section: Option<&str> = None;
    for view in &report.views {
        if current_section != Some(view.section.as_str()) {
            output.push_str(&format!("## {}\n\n", view.section));
            current_section = Some(&view.section);
        }
        output.push_str(&generate_view_section(view, options));
    }

    // Problems
    output.push_str(&generate_unavailable_section(&report.unavailable));
    output.push_str(&generate_failures_section(&report.failures));

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata, unavailable: &[UnavailableDataset]) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Data Directory:** `{}`\n", metadata.data_dir));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Backend:** `{}`\n", metadata.backend));
    section.push_str(&format!("- **Filters:** {}\n", metadata.filter));
    section.push_str(&format!(
        "- **Datasets Loaded:** {}\n",
        metadata.datasets_loaded
    ));
    if !unavailable.is_empty() {
        section.push_str(&format!(
            "- **Datasets Unavailable:** {}\n",
            unavailable.len()
        ));
    }
    section.push_str(&format!(
        "- **Records Loaded:** {}\n",
        format_int(metadata.records_loaded as i64)
    ));
    section.push_str(&format!(
        "- **Duration:** {:.2}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");

    let mut current_section: Option<&str> = None;
    for view in &report.views {
        if current_section != Some(view.section.as_str()) {
            toc.push_str(&format!("- [{}](#{})\n", view.section, anchor(&view.section)));
            current_section = Some(&view.section);
        }
        toc.push_str(&format!("  - [{}](#{})\n", view.title, view.id));
    }

    if !report.unavailable.is_empty() {
        toc.push_str("- [Unavailable Datasets](#unavailable-datasets)\n");
    }
    if !report.failures.is_empty() {
        toc.push_str("- [Failed Views](#failed-views)\n");
    }

    toc.push('\n');

    toc
}

fn anchor(heading: &str) -> String {
    heading
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .collect::<String>()
        .replace(' ', "-")
}

/// Generate the section for a single view.
fn generate_view_section(view: &ViewOutput, options: &ReportOptions) -> String {
    let mut section = String::new();

    section.push_str(&format!("<a id=\"{}\"></a>\n\n### {}\n\n", view.id, view.title));
    section.push_str(&format!(
        "*Dataset: {} | Chart: {} | Filter: {} | Matched records: {}*\n\n",
        view.result.dataset,
        view.chart.label(),
        view.filter,
        format_int(view.result.matched_records as i64)
    ));

    if view.result.is_empty() {
        section.push_str(&format!("{}\n\n", NO_DATA));
        return section;
    }

    section.push_str(&generate_result_table(&view.result, DECIMAL_PLACES, options.max_rows));
    if view.limit.is_none() {
        section.push_str(&generate_totals_line(&view.result));
    }

    if options.include_derived {
        for derived in &view.derived {
            section.push_str(&generate_derived_block(derived, options));
        }
    }

    section
}

/// Generate one derived table under a view.
fn generate_derived_block(derived: &DerivedTable, options: &ReportOptions) -> String {
    let mut block = format!("#### {}\n\n", derived.title());

    match derived {
        DerivedTable::Top { result, .. } | DerivedTable::Bottom { result, .. } => {
            block.push_str(&generate_result_table(result, DECIMAL_PLACES, options.max_rows));
        }
        DerivedTable::Ratio { result } => {
            if result.is_empty() {
                block.push_str(&format!("{}\n\n", NO_DATA));
            } else {
                block.push_str(&generate_result_table(result, RATIO_PLACES, options.max_rows));
            }
        }
        DerivedTable::Pivot { table } => {
            block.push_str(&generate_pivot_table(table, options.max_rows));
        }
    }

    block
}

/// Render an aggregation result as a Markdown table.
fn generate_result_table(result: &AggregationResult, places: usize, max_rows: usize) -> String {
    let mut table = String::new();

    let headers: Vec<String> = result
        .group_by
        .iter()
        .chain(&result.metrics)
        .map(|h| escape_cell(h))
        .collect();
    table.push_str(&format!("| # | {} |\n", headers.join(" | ")));

    let alignment: Vec<&str> = result
        .group_by
        .iter()
        .map(|_| ":---")
        .chain(result.metrics.iter().map(|_| "---:"))
        .collect();
    table.push_str(&format!("|---:|{}|\n", alignment.join("|")));

    for (i, row) in result.rows.iter().take(max_rows).enumerate() {
        let cells: Vec<String> = row
            .key
            .0
            .iter()
            .map(format_key)
            .chain(row.values.iter().map(|v| format_metric(v, places)))
            .collect();
        table.push_str(&format!("| {} | {} |\n", i + 1, cells.join(" | ")));
    }
    table.push('\n');

    if result.len() > max_rows {
        table.push_str(&format!(
            "_Showing {} of {} groups._\n\n",
            max_rows,
            result.len()
        ));
    }

    table
}

/// Per-metric totals over every group of a multi-group result.
fn generate_totals_line(result: &AggregationResult) -> String {
    if result.len() < 2 {
        return String::new();
    }

    let totals: Vec<String> = result
        .metrics
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            result
                .total(i)
                .map(|t| format!("{} {}", name, format_metric(&t, DECIMAL_PLACES)))
        })
        .collect();

    format!("**Total:** {}\n\n", totals.join(", "))
}

/// Render a pivot as a primary-by-secondary grid.
fn generate_pivot_table(pivot: &PivotTable, max_rows: usize) -> String {
    let mut table = String::new();

    let columns: Vec<String> = pivot.columns.iter().map(format_key).collect();
    table.push_str(&format!(
        "| {} \\ {} | {} |\n",
        escape_cell(&pivot.primary_field),
        escape_cell(&pivot.secondary_field),
        columns.join(" | ")
    ));
    table.push_str(&format!("|:---|{}|\n", vec!["---:"; columns.len()].join("|")));

    for row in pivot.rows.iter().take(max_rows) {
        let cells: Vec<String> = row
            .values
            .iter()
            .map(|v| format_metric(v, DECIMAL_PLACES))
            .collect();
        table.push_str(&format!("| {} | {} |\n", format_key(&row.key), cells.join(" | ")));
    }
    table.push('\n');

    if pivot.rows.len() > max_rows {
        table.push_str(&format!(
            "_Showing {} of {} rows._\n\n",
            max_rows,
            pivot.rows.len()
        ));
    }

    table
}

/// Generate the unavailable datasets section.
fn generate_unavailable_section(unavailable: &[UnavailableDataset]) -> String {
    if unavailable.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Unavailable Datasets\n\n");
    section.push_str("| Dataset | Reason |\n");
    section.push_str("|:---|:---|\n");
    for entry in unavailable {
        section.push_str(&format!(
            "| {} | {} |\n",
            entry.dataset,
            escape_cell(&entry.reason)
        ));
    }
    section.push('\n');

    section
}

/// Generate the failed views section.
fn generate_failures_section(failures: &[ViewFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Failed Views\n\n");
    for failure in failures {
        section.push_str(&format!(
            "- **{}** (`{}`): {}\n",
            failure.title, failure.id, failure.error
        ));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by pulsedash v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
