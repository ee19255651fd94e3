//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.pulsedash.toml` files.

use crate::cli::BackendKind;
use crate::models::FilterSpec;
use crate::views::ViewSpec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".pulsedash.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Data location settings.
    #[serde(default)]
    pub data: DataConfig,

    /// Query settings.
    #[serde(default)]
    pub query: QueryConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,

    /// Extra views appended to the built-in catalog.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<ViewSpec>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Exit with code 2 when a view fails or a dataset is unavailable.
    #[serde(default)]
    pub strict: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            strict: false,
        }
    }
}

fn default_output() -> String {
    "pulse_report.md".to_string()
}

/// Where the CSV extracts live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory searched for `<Dataset>.csv` files.
    #[serde(default = "default_data_dir")]
    pub dir: String,

    /// Explicit dataset name to path (relative to `dir`) overrides.
    #[serde(default)]
    pub files: BTreeMap<String, String>,

    /// How deep below `dir` to search.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            files: BTreeMap::new(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_max_depth() -> usize {
    2
}

/// Query execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Backend that executes aggregations.
    #[serde(default)]
    pub backend: BackendKind,

    /// Baseline filter applied to every view; CLI filters override it.
    #[serde(default)]
    pub filter: FilterSpec,
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Report title.
    #[serde(default = "default_title")]
    pub title: String,

    /// Maximum rows rendered per table.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    /// Render derived tables (top, least, pivot, ratio) under each view.
    #[serde(default = "default_true")]
    pub include_derived: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            max_rows: default_max_rows(),
            include_derived: true,
        }
    }
}

fn default_title() -> String {
    "PhonePe Pulse Dashboard".to_string()
}

fn default_max_rows() -> usize {
    50
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if config.report.max_rows == 0 {
            anyhow::bail!("report.max_rows must be at least 1 in {}", path.display());
        }

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref dir) = args.data_dir {
            self.data.dir = dir.display().to_string();
        }

        if let Some(backend) = args.backend {
            self.query.backend = backend;
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        // Present CLI constraints win field by field
        self.query.filter = self.query.filter.merged_with(&args.filter());

        // Flags always override
        if args.strict {
            self.general.strict = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
