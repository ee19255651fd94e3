//! pulsedash - PhonePe Pulse dashboard aggregations
//!
//! Loads the Pulse CSV extracts once, runs the dashboard's declarative
//! views (or an ad-hoc group-by query) through a query backend and writes
//! a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, I/O, invalid selection, etc.)
//!   2 - With --strict: a view failed or a dataset was unavailable

mod cli;
mod config;
mod error;
mod loader;
mod models;
mod pipeline;
mod report;
mod views;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, BackendKind, OutputFormat};
use config::{Config, CONFIG_FILE};
use loader::{DatasetRegistry, LoadOptions};
use models::{DatasetKind, FilterSpec, Report, ReportMetadata};
use pipeline::{aggregate, MemoryBackend, QueryBackend, SqliteBackend};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use views::{ChartKind, ViewFailure, ViewOutput, ViewSpec};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("pulsedash v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args) {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .pulsedash.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set the data directory, backend, filters and custom views.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete workflow. Returns the exit code.
fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let catalog = views::build_catalog(&config.views).context("Invalid view catalog")?;

    if args.list_views {
        print_views(&catalog);
        return Ok(0);
    }

    // Step 1: Load the extracts
    let load_options = LoadOptions::from(&config.data);
    println!("📂 Loading extracts from: {}", load_options.data_dir.display());
    let registry = loader::load_registry(&load_options);
    println!(
        "   Loaded {} of {} datasets ({} records)",
        registry.len(),
        DatasetKind::ALL.len(),
        registry.total_records()
    );

    if args.list_datasets {
        print_datasets(&registry);
        return Ok(0);
    }

    // Step 2: Pick the views
    let filter = config.query.filter.clone();
    if !filter.is_empty() {
        println!("   Filters: {}", filter);
    }
    let adhoc;
    let selected: Vec<&ViewSpec> = match args.adhoc_request(filter.clone()) {
        Some(request) => {
            adhoc = adhoc_view(&request);
            vec![&adhoc]
        }
        None => views::select_views(&catalog, &args.view, args.section.as_deref())?,
    };
    info!("Selected {} views", selected.len());

    if args.show_sql {
        print_sql(&registry, &selected, &filter, args.is_adhoc());
    }

    // Step 3: Build the backend
    println!("⚙️  Backend: {}", backend_name(config.query.backend));
    let backend: Box<dyn QueryBackend + '_> = match config.query.backend {
        BackendKind::Memory => Box::new(MemoryBackend::new(&registry)),
        BackendKind::Sqlite => Box::new(
            SqliteBackend::from_registry(&registry).context("Failed to build SQLite store")?,
        ),
    };

    // Step 4: Run every view
    println!("\n📊 Running {} views...", selected.len());
    let (outputs, mut failures) = run_views(backend.as_ref(), &selected, &filter, args.is_adhoc());

    if args.verify {
        println!("\n🔁 Verifying results against both backends...");
        let mismatches = verify_views(&registry, &selected, &filter, args.is_adhoc())?;
        if mismatches.is_empty() {
            println!("   All {} views agree", selected.len());
        } else {
            println!("   {} views disagree", mismatches.len());
        }
        failures.extend(mismatches);
    }

    // Step 5: Build the report
    println!("\n📝 Generating report...");

    let duration = start_time.elapsed().as_secs_f64();
    let unavailable = registry.unavailable();

    let metadata = ReportMetadata {
        data_dir: load_options.data_dir.display().to_string(),
        generated_at: Utc::now(),
        backend: backend.name().to_string(),
        filter,
        datasets_loaded: registry.len(),
        records_loaded: registry.total_records(),
        duration_seconds: duration,
    };

    let report = Report {
        metadata,
        views: outputs,
        failures,
        unavailable,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => {
            report::generate_markdown_report(&report, &(&config.report).into())
        }
    };

    let output_path = Path::new(&config.general.output);
    std::fs::write(output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    // Print summary
    let empty = report.views.iter().filter(|v| v.result.is_empty()).count();
    println!("\n📈 Summary:");
    println!("   Views rendered: {}", report.views.len());
    if empty > 0 {
        println!("   Views with no data: {}", empty);
    }
    println!("   Views failed: {}", report.failures.len());
    println!("   Datasets unavailable: {}", report.unavailable.len());
    println!("   Duration: {:.2}s", duration);
    println!("\n✅ Report saved to: {}", output_path.display());

    // Check --strict
    if config.general.strict && (!report.failures.is_empty() || !report.unavailable.is_empty()) {
        eprintln!("\n⛔ Failed views or unavailable datasets. Failing (exit code 2).");
        return Ok(2);
    }

    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}

fn backend_name(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Memory => "memory",
        BackendKind::Sqlite => "sqlite",
    }
}

/// Wrap an ad-hoc request as a one-off view.
///
/// The request's own filter is the view filter so that every constraint,
/// including a category, is applied as given.
fn adhoc_view(request: &models::AggregationRequest) -> ViewSpec {
    ViewSpec {
        id: "adhoc".to_string(),
        section: "Ad-hoc Query".to_string(),
        title: format!("{} by {}", request.dataset, request.group_by.join(", ")),
        dataset: request.dataset.clone(),
        group_by: request.group_by.clone(),
        metrics: request.metrics.clone(),
        filter: request.filter.clone(),
        order: request.order,
        limit: request.limit,
        chart: ChartKind::Table,
        derive: Vec::new(),
        latest_period: false,
    }
}

/// User filter for a view run. Ad-hoc views already carry it.
fn user_filter(filter: &FilterSpec, adhoc: bool) -> FilterSpec {
    if adhoc {
        FilterSpec::default()
    } else {
        filter.clone()
    }
}

/// Run each view once, collecting outputs and failures.
fn run_views(
    backend: &dyn QueryBackend,
    selected: &[&ViewSpec],
    filter: &FilterSpec,
    adhoc: bool,
) -> (Vec<ViewOutput>, Vec<ViewFailure>) {
    let user = user_filter(filter, adhoc);
    let mut outputs = Vec::with_capacity(selected.len());
    let mut failures = Vec::new();

    for view in selected {
        match views::run_view(backend, view, &user) {
            Ok(output) => {
                if output.result.is_empty() {
                    println!("   ⚪ {} (no data)", view.id);
                } else {
                    println!("   ✅ {} ({} groups)", view.id, output.result.len());
                }
                outputs.push(output);
            }
            Err(e) => {
                warn!("View {} failed: {}", view.id, e);
                println!("   ❌ {}: {}", view.id, e);
                failures.push(ViewFailure {
                    id: view.id.clone(),
                    title: view.title.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    (outputs, failures)
}

/// Run every view on both backends and report disagreements.
fn verify_views(
    registry: &DatasetRegistry,
    selected: &[&ViewSpec],
    filter: &FilterSpec,
    adhoc: bool,
) -> Result<Vec<ViewFailure>> {
    let memory = MemoryBackend::new(registry);
    let sqlite = SqliteBackend::from_registry(registry).context("Failed to build SQLite store")?;
    let user = user_filter(filter, adhoc);
    let mut mismatches = Vec::new();

    for view in selected {
        let agree = match (
            views::run_view(&memory, view, &user),
            views::run_view(&sqlite, view, &user),
        ) {
            (Ok(a), Ok(b)) => views::outputs_agree(&a, &b),
            (Err(a), Err(b)) => a.to_string() == b.to_string(),
            _ => false,
        };

        if agree {
            debug!("View {} agrees across backends", view.id);
        } else {
            warn!("View {} differs between memory and sqlite", view.id);
            mismatches.push(ViewFailure {
                id: view.id.clone(),
                title: view.title.clone(),
                error: "memory and sqlite backends returned different results".to_string(),
            });
        }
    }

    Ok(mismatches)
}

/// Print the SQL statement each view issues.
fn print_sql(registry: &DatasetRegistry, selected: &[&ViewSpec], filter: &FilterSpec, adhoc: bool) {
    let user = user_filter(filter, adhoc);

    println!("\n🧾 SQL:");
    for view in selected {
        let effective = view.resolved_filter(registry, &user);
        let plan = if view.group_by.is_empty() {
            aggregate::plan_total(registry, &view.dataset, &effective, &view.metrics)
        } else {
            aggregate::plan(registry, &view.request(effective))
        };

        match plan {
            Ok(plan) => println!("-- {}\n{};", view.id, pipeline::render_sql(&plan).display()),
            Err(e) => println!("-- {}: {}", view.id, e),
        }
    }
}

/// Handle --list-views: print the catalog grouped by section.
fn print_views(catalog: &[ViewSpec]) {
    for section in views::sections(catalog) {
        println!("\n📁 {}", section);
        for view in catalog.iter().filter(|v| v.section == section) {
            println!("   {:<34} {} [{}]", view.id, view.title, view.dataset);
        }
    }
    println!("\n   Total: {} views", catalog.len());
}

/// Handle --list-datasets: print schemas and load status.
fn print_datasets(registry: &DatasetRegistry) {
    for kind in DatasetKind::ALL {
        println!("\n📄 {} ({})", kind.name(), kind.label());

        let schema = kind.schema();
        let fields: Vec<String> = schema
            .fields
            .iter()
            .map(|f| format!("{}:{}", f.name, f.kind.sql_type().to_lowercase()))
            .collect();
        println!("   Fields: {}", fields.join(", "));
        println!("   Metrics: {}", schema.metric_names().join(", "));

        match registry.get(kind.name()) {
            Ok(dataset) => {
                let years: Vec<String> =
                    dataset.distinct("Year").iter().map(|y| y.to_string()).collect();
                println!(
                    "   ✅ {} records, {} states, years {}",
                    dataset.len(),
                    dataset.distinct("State").len(),
                    years.join(", ")
                );
            }
            Err(e) => println!("   ❌ {}", e),
        }
    }
}
