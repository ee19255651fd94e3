//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::loader::normalize_state;
use crate::models::{AggregationRequest, FilterSpec, SortOrder};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// pulsedash - PhonePe Pulse dashboard aggregations from the command line
///
/// Loads the Pulse CSV extracts, runs the dashboard's views (or an ad-hoc
/// group-by query) and writes a Markdown or JSON report.
///
/// Examples:
///   pulsedash --data-dir ./data
///   pulsedash --section home --year 2023 --quarter 1
///   pulsedash --view engagement-rate --backend sqlite --show-sql
///   pulsedash --dataset Map_Transaction --group-by District --metric Transaction_Amount --limit 10
///   pulsedash --verify --strict
///   pulsedash --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Directory holding the CSV extracts
    ///
    /// Default: from config or ./data.
    #[arg(short, long, value_name = "DIR", env = "PULSEDASH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .pulsedash.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Views to run, by id (comma-separated)
    ///
    /// Example: --view home-users,engagement-rate
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    pub view: Vec<String>,

    /// Run every view of one dashboard section
    ///
    /// Example: --section "Device Dominance" or --section device-dominance
    #[arg(long, value_name = "NAME")]
    pub section: Option<String>,

    /// Dataset for an ad-hoc query (e.g. Aggregate_Transaction)
    #[arg(long, value_name = "NAME", conflicts_with_all = ["view", "section"])]
    pub dataset: Option<String>,

    /// Group-by fields for an ad-hoc query (comma-separated)
    #[arg(long, value_name = "FIELDS", value_delimiter = ',')]
    pub group_by: Vec<String>,

    /// Metric fields for an ad-hoc query (comma-separated)
    #[arg(long, value_name = "FIELDS", value_delimiter = ',')]
    pub metric: Vec<String>,

    /// Sort order for an ad-hoc query
    #[arg(long, default_value = "desc", value_name = "ORDER")]
    pub order: OrderArg,

    /// Row limit for an ad-hoc query
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Restrict to one year
    #[arg(long, value_name = "YEAR")]
    pub year: Option<i64>,

    /// Restrict to one quarter (1-4)
    #[arg(long, value_name = "Q")]
    pub quarter: Option<i64>,

    /// Restrict to one state (normalized like the extracts)
    #[arg(long, value_name = "STATE")]
    pub state: Option<String>,

    /// Restrict to one transaction type or device brand
    #[arg(long, value_name = "NAME")]
    pub category: Option<String>,

    /// Query backend
    #[arg(long, value_name = "BACKEND", env = "PULSEDASH_BACKEND")]
    pub backend: Option<BackendKind>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Output file path for the report
    ///
    /// Default: from config or pulse_report.md
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print the SQL each view issues
    #[arg(long)]
    pub show_sql: bool,

    /// Run every selected view on both backends and compare the results
    #[arg(long)]
    pub verify: bool,

    /// Exit with code 2 if any view failed or a dataset was unavailable
    #[arg(long)]
    pub strict: bool,

    /// List the view catalog and exit
    #[arg(long)]
    pub list_views: bool,

    /// List datasets with their schemas and load status, then exit
    #[arg(long)]
    pub list_datasets: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .pulsedash.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Sort order for ad-hoc queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OrderArg {
    /// Largest first
    #[default]
    Desc,
    /// Smallest first
    Asc,
    /// Group-key order
    Key,
    /// First group field, then largest first
    Leading,
}

impl From<OrderArg> for SortOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Desc => SortOrder::Descending,
            OrderArg::Asc => SortOrder::Ascending,
            OrderArg::Key => SortOrder::GroupKey,
            OrderArg::Leading => SortOrder::LeadingKey,
        }
    }
}

/// Which query backend executes requests.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Scan records in memory
    #[default]
    Memory,
    /// Mirror datasets into an in-memory SQLite database
    Sqlite,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether an ad-hoc query was requested.
    pub fn is_adhoc(&self) -> bool {
        self.dataset.is_some()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(quarter) = self.quarter {
            if !(1..=4).contains(&quarter) {
                return Err("Quarter must be between 1 and 4".to_string());
            }
        }

        if self.limit == Some(0) {
            return Err("Limit must be at least 1".to_string());
        }

        // Ad-hoc query shape
        if self.is_adhoc() {
            if self.group_by.is_empty() {
                return Err("--dataset requires at least one --group-by field".to_string());
            }
            if self.metric.is_empty() {
                return Err("--dataset requires at least one --metric field".to_string());
            }
        } else if !self.group_by.is_empty() || !self.metric.is_empty() || self.limit.is_some() {
            return Err("--group-by, --metric and --limit require --dataset".to_string());
        }

        // Validate data directory if provided
        if let Some(ref dir) = self.data_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(format!(
                    "Data path is not a directory: {}",
                    dir.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Filter constraints given on the command line.
    pub fn filter(&self) -> FilterSpec {
        FilterSpec {
            year: self.year,
            quarter: self.quarter,
            state: self.state.as_deref().map(normalize_state),
            category: self.category.as_ref().map(|c| c.trim().to_string()),
        }
    }

    /// The ad-hoc request, if `--dataset` was given.
    pub fn adhoc_request(&self, filter: FilterSpec) -> Option<AggregationRequest> {
        let dataset = self.dataset.as_ref()?;
        Some(AggregationRequest {
            dataset: dataset.clone(),
            filter,
            group_by: self.group_by.clone(),
            metrics: self.metric.clone(),
            order: self.order.into(),
            limit: self.limit,
        })
    }
}
