//! CSV loader for discovering and parsing Pulse extracts.
//!
//! This module finds the nine extract files under a data directory,
//! parses them against their fixed schemas, and normalizes region
//! names. Failures are recorded per dataset and never abort loading.

mod registry;

pub use registry::DatasetRegistry;

use crate::models::{Dataset, DatasetKind, FieldDef, FieldKind, Record, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Errors that can occur while loading a single extract.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("data directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("no CSV file found for dataset")]
    FileNotFound,

    #[error("missing column '{0}'")]
    MissingColumn(&'static str),

    #[error("row {row}, column '{column}': invalid value '{value}' ({reason})")]
    InvalidCell {
        row: u64,
        column: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("csv parse error at row {row}: {reason}")]
    Parse { row: u64, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration for locating extract files.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Directory that holds the extracts.
    pub data_dir: PathBuf,
    /// Explicit dataset name to relative path overrides.
    pub files: BTreeMap<String, String>,
    /// How deep to search below `data_dir`.
    pub max_depth: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            files: BTreeMap::new(),
            max_depth: 2,
        }
    }
}

impl From<&crate::config::DataConfig> for LoadOptions {
    fn from(config: &crate::config::DataConfig) -> Self {
        Self {
            data_dir: PathBuf::from(&config.dir),
            files: config.files.clone(),
            max_depth: config.max_depth,
        }
    }
}

/// Load every dataset kind into a registry.
///
/// Datasets that fail to load are marked unavailable with a reason.
pub fn load_registry(options: &LoadOptions) -> DatasetRegistry {
    let mut registry = DatasetRegistry::new();

    let discovered = match discover_files(&options.data_dir, options.max_depth) {
        Ok(found) => found,
        Err(e) => {
            warn!("{}", e);
            for kind in DatasetKind::ALL {
                registry = registry.with_unavailable(kind, e.to_string());
            }
            return registry;
        }
    };

    for kind in DatasetKind::ALL {
        let path = options
            .files
            .get(kind.name())
            .map(|rel| options.data_dir.join(rel))
            .or_else(|| discovered.get(&kind.name().to_lowercase()).cloned());

        let result = match path {
            Some(ref path) => load_dataset_file(kind, path),
            None => Err(LoadError::FileNotFound),
        };

        match result {
            Ok(dataset) => {
                info!("Loaded {} ({} records)", kind.name(), dataset.len());
                registry = registry.with_dataset(dataset);
            }
            Err(e) => {
                warn!("Dataset {} unavailable: {}", kind.name(), e);
                registry = registry.with_unavailable(kind, e.to_string());
            }
        }
    }

    registry
}

/// Find `*.csv` files below `dir`, keyed by lowercase file stem.
///
/// The shallowest match wins when a stem occurs more than once.
pub fn discover_files(dir: &Path, max_depth: usize) -> Result<HashMap<String, PathBuf>, LoadError> {
    if !dir.is_dir() {
        return Err(LoadError::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut found: HashMap<String, PathBuf> = HashMap::new();

    let walker = WalkDir::new(dir)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.') || e.depth() == 0);

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if !is_csv {
            continue;
        }

        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            let key = stem.to_lowercase();
            let shallower = found
                .get(&key)
                .map(|existing| existing.components().count() > path.components().count())
                .unwrap_or(true);
            if shallower {
                found.insert(key, path.to_path_buf());
            }
        }
    }

    debug!("Discovered {} CSV files under {}", found.len(), dir.display());
    Ok(found)
}

/// Load one extract file.
pub fn load_dataset_file(kind: DatasetKind, path: &Path) -> Result<Dataset, LoadError> {
    debug!("Reading {} from {}", kind.name(), path.display());
    let file = File::open(path)?;
    read_dataset(kind, file)
}

/// Parse CSV content against the schema of `kind`.
pub fn read_dataset<R: Read>(kind: DatasetKind, reader: R) -> Result<Dataset, LoadError> {
    let schema = kind.schema();

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| map_csv_error(e, 1))?
        .clone();

    // Column position of each schema field in the file
    let mut columns: Vec<Option<usize>> = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let position = headers.iter().position(|h| field.matches_header(h));
        if position.is_none() && field.required {
            return Err(LoadError::MissingColumn(field.name));
        }
        columns.push(position);
    }

    let state_idx = schema.index_of("State");
    let mut records = Vec::new();

    for (i, row) in csv_reader.records().enumerate() {
        let fallback_row = i as u64 + 2;
        let row = row.map_err(|e| map_csv_error(e, fallback_row))?;
        let row_number = row.position().map(|p| p.line()).unwrap_or(fallback_row);

        let mut values = Vec::with_capacity(schema.fields.len());
        for (field_idx, (field, column)) in schema.fields.iter().zip(&columns).enumerate() {
            let raw = column.and_then(|c| row.get(c)).unwrap_or("");
            let mut value = parse_cell(field, raw, row_number)?;
            if Some(field_idx) == state_idx {
                if let Value::Text(ref s) = value {
                    value = Value::Text(normalize_state(s));
                }
            }
            values.push(value);
        }

        records.push(Record::new(values));
    }

    Ok(Dataset::with_records(kind, records))
}

/// Parse a single trimmed cell according to its field definition.
fn parse_cell(field: &FieldDef, raw: &str, row: u64) -> Result<Value, LoadError> {
    let raw = raw.trim();

    if raw.is_empty() {
        if field.required {
            return Err(LoadError::InvalidCell {
                row,
                column: field.name,
                value: String::new(),
                reason: "empty",
            });
        }
        return Ok(Value::Null);
    }

    let invalid = |reason| LoadError::InvalidCell {
        row,
        column: field.name,
        value: raw.to_string(),
        reason,
    };

    match field.kind {
        FieldKind::Text => Ok(Value::Text(raw.to_string())),
        FieldKind::Integer => {
            if let Ok(i) = raw.parse::<i64>() {
                return Ok(Value::Int(i));
            }
            // Pandas exports often write whole numbers as `2023.0`
            let x: f64 = raw.parse().map_err(|_| invalid("not an integer"))?;
            if x.fract() == 0.0 && x.is_finite() && x.abs() < i64::MAX as f64 {
                Ok(Value::Int(x as i64))
            } else {
                Err(invalid("not an integer"))
            }
        }
        FieldKind::Decimal => raw
            .parse::<f64>()
            .ok()
            .filter(|x| x.is_finite())
            .map(Value::Float)
            .ok_or_else(|| invalid("not a number")),
    }
}

/// Normalize a region name: hyphens become spaces, whitespace collapses,
/// and each word is title-cased.
pub fn normalize_state(raw: &str) -> String {
    let spaced = raw.replace('-', " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut out = String::with_capacity(collapsed.len());
    let mut prev_alpha = false;
    for c in collapsed.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn map_csv_error(err: csv::Error, fallback_row: u64) -> LoadError {
    let reason = err.to_string();
    let pos = err.position().cloned();

    match err.into_kind() {
        csv::ErrorKind::Io(e) => LoadError::Io(e),
        _ => {
            let row = pos
                .map(|p| p.line())
                .filter(|r| *r > 0)
                .unwrap_or(fallback_row);
            LoadError::Parse { row, reason }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const TXN_CSV: &str = "\
State,Year,Quater,Transaction_Name,Transaction_Count,Transaction_Amount
andaman-&-nicobar-islands,2018,1,Recharge & bill payments,4200,1845307.47
  KARNATAKA ,2018.0,1,Peer-to-peer payments,10,250.5
";

    #[test]
    fn test_normalize_state() {
        assert_eq!(
            normalize_state("andaman-&-nicobar-islands"),
            "Andaman & Nicobar Islands"
        );
        assert_eq!(normalize_state("  tamil   NADU "), "Tamil Nadu");
        assert_eq!(normalize_state("Goa"), "Goa");
    }

    #[test]
    fn test_read_dataset_parses_and_normalizes() {
        let dataset = read_dataset(DatasetKind::AggregateTransaction, TXN_CSV.as_bytes()).unwrap();

        assert_eq!(dataset.len(), 2);
        let state = dataset.schema.index_of("State").unwrap();
        let year = dataset.schema.index_of("Year").unwrap();
        let amount = dataset.schema.index_of("Transaction_Amount").unwrap();

        assert_eq!(
            dataset.records[0].get(state),
            &Value::text("Andaman & Nicobar Islands")
        );
        assert_eq!(dataset.records[1].get(state), &Value::text("Karnataka"));
        assert_eq!(dataset.records[1].get(year), &Value::Int(2018));
        assert_eq!(dataset.records[1].get(amount), &Value::Float(250.5));
    }

    #[test]
    fn test_read_dataset_missing_column() {
        let csv = "State,Year,Quarter,Transaction_Count\nGoa,2020,1,5\n";
        let err = read_dataset(DatasetKind::AggregateTransaction, csv.as_bytes()).unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn("Transaction_Name")));
    }

    #[test]
    fn test_read_dataset_invalid_cell_reports_row() {
        let csv = "State,Year,Quarter,District,Registerd_Users,App_Count\n\
                   goa,2020,1,north goa district,12,abc\n";
        let err = read_dataset(DatasetKind::MapUser, csv.as_bytes()).unwrap_err();
        match err {
            LoadError::InvalidCell { row, column, .. } => {
                assert_eq!(row, 2);
                assert_eq!(column, "App_Count");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_optional_empty_cell_is_null() {
        let csv = "State,Year,Quarter,Pincode,Registered_Users\ngoa,2020,1,,40\n";
        let dataset = read_dataset(DatasetKind::TopUser, csv.as_bytes()).unwrap();
        let pincode = dataset.schema.index_of("Pincode").unwrap();
        assert_eq!(dataset.records[0].get(pincode), &Value::Null);
    }

    #[test]
    fn test_load_registry_marks_missing_files_unavailable() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("aggregated");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("aggregate_transaction.csv"), TXN_CSV).unwrap();

        let options = LoadOptions {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let registry = load_registry(&options);

        assert_eq!(registry.len(), 1);
        assert!(registry.get("Aggregate_Transaction").is_ok());

        let unavailable = registry.unavailable();
        assert_eq!(unavailable.len(), 8);
        assert!(matches!(
            registry.get("Map_User"),
            Err(crate::error::PipelineError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn test_load_registry_explicit_file_mapping() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("txn-2018.csv"), TXN_CSV).unwrap();

        let mut files = BTreeMap::new();
        files.insert("Aggregate_Transaction".to_string(), "txn-2018.csv".to_string());
        let options = LoadOptions {
            data_dir: dir.path().to_path_buf(),
            files,
            max_depth: 1,
        };

        let registry = load_registry(&options);
        assert_eq!(registry.get("Aggregate_Transaction").unwrap().len(), 2);
    }

    #[test]
    fn test_load_registry_missing_directory() {
        let options = LoadOptions {
            data_dir: PathBuf::from("/definitely/not/here"),
            ..Default::default()
        };
        let registry = load_registry(&options);
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.unavailable().len(), 9);
    }

    #[test]
    fn test_fixture_directory_loads_completely() {
        let options = LoadOptions {
            data_dir: Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/pulse"),
            ..Default::default()
        };
        let registry = load_registry(&options);
        assert!(registry.unavailable().is_empty());
        assert_eq!(registry.len(), 9);
    }
}
