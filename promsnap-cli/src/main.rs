//! CLI for promsnap.
//!
//! Loads metric snapshots (JSON observation batches) into an in-memory store
//! and runs PromQL queries or label lookups against them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use promsnap::config::Config;
use promsnap::engine::{SelectorEngine, parse_selector};
use promsnap::materialize::{Materializer, RangeMode, ResultRow, sort_rows};
use promsnap::observation::ObservationBatch;
use promsnap::query::{Querier, QueryContext, Queryable};
use promsnap::store::{Store, now_millis};
use tracing_subscriber::EnvFilter;

/// promsnap: PromQL over point-in-time metric snapshots.
#[derive(Parser)]
#[command(name = "promsnap", version, about)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Load snapshots and evaluate a PromQL query over them.
    Query {
        /// PromQL expression, e.g. `apiserver_request_total{method="GET"}`.
        query: String,

        /// Snapshot files; each one is ingested as a separate batch.
        #[arg(long = "input", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        /// JSON config file for the store and engine.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,

        /// How range-vector results are flattened.
        #[arg(long, default_value = "latest")]
        range_mode: RangeArg,

        /// Query timeout in seconds (overrides the config file).
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// List label names, or the values of one label.
    Labels {
        /// Snapshot files; each one is ingested as a separate batch.
        #[arg(long = "input", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        /// JSON config file for the store.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the values of this label instead of label names.
        #[arg(long)]
        name: Option<String>,

        /// Only consider series matching this selector, e.g. `up{job="api"}`.
        #[arg(long = "match")]
        selector: Option<String>,
    },
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Aligned columns.
    Table,
    /// JSON array of rows.
    Json,
    /// Comma-separated values.
    Csv,
}

/// Range-vector flattening.
#[derive(Clone, Copy, ValueEnum)]
enum RangeArg {
    /// Newest sample of each series.
    Latest,
    /// Every sample.
    All,
}

impl From<RangeArg> for RangeMode {
    fn from(arg: RangeArg) -> Self {
        match arg {
            RangeArg::Latest => RangeMode::Latest,
            RangeArg::All => RangeMode::AllPoints,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let result = match cli.command {
        Commands::Query {
            query,
            inputs,
            config,
            format,
            range_mode,
            timeout,
        } => cmd_query(&query, &inputs, config.as_deref(), &format, range_mode, timeout),
        Commands::Labels {
            inputs,
            config,
            name,
            selector,
        } => cmd_labels(&inputs, config.as_deref(), name.as_deref(), selector.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Installs a stderr subscriber; `RUST_LOG` wins over `--debug`.
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Implements `promsnap query <QUERY> --input <FILE>...`.
fn cmd_query(
    query: &str,
    inputs: &[PathBuf],
    config_path: Option<&Path>,
    format: &OutputFormat,
    range_mode: RangeArg,
    timeout: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    if let Some(secs) = timeout {
        config.engine.timeout = Duration::try_from_secs_f64(secs)?;
        config.engine.validate()?;
    }

    let store = load_store(&config, inputs)?;
    let engine = SelectorEngine::new(config.engine);
    let materializer = Materializer::new(range_mode.into());

    let mut rows = store.execute(&QueryContext::new(), query, now_millis(), &engine, &materializer)?;
    sort_rows(&mut rows);

    match format {
        OutputFormat::Table => print!("{}", render_table(&rows)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Csv => print!("{}", render_csv(&rows)),
    }

    Ok(())
}

/// Implements `promsnap labels --input <FILE>...`.
fn cmd_labels(
    inputs: &[PathBuf],
    config_path: Option<&Path>,
    name: Option<&str>,
    selector: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let store = load_store(&config, inputs)?;
    let matchers = selector.map(parse_selector).transpose()?.unwrap_or_default();

    let ctx = QueryContext::new();
    let querier = store.querier(i64::MIN, i64::MAX);
    let values = match name {
        Some(name) => querier.label_values(&ctx, name, &matchers)?,
        None => querier.label_names(&ctx, &matchers)?,
    };

    for value in values {
        println!("{value}");
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Config::from_json_file(path)?),
        None => Ok(Config::default()),
    }
}

/// Reads one snapshot file.
fn load_batch(path: &Path) -> Result<ObservationBatch, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
    let batch = serde_json::from_str(&data)
        .map_err(|e| format!("failed to parse '{}': {e}", path.display()))?;
    Ok(batch)
}

/// Builds a store and ingests every input file in order, one batch each.
fn load_store(config: &Config, inputs: &[PathBuf]) -> Result<Store, Box<dyn std::error::Error>> {
    let store = Store::new(config.store)?;
    for path in inputs {
        let batch = load_batch(path)?;
        let report = store.ingest(&batch);
        tracing::info!(
            path = %path.display(),
            accepted = report.accepted,
            dropped = report.dropped,
            "loaded snapshot"
        );
    }
    Ok(store)
}

/// Renders labels as `{k=v,...}`, or `{}` when there are none.
fn format_labels(labels: &BTreeMap<String, String>) -> String {
    let pairs: Vec<_> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", pairs.join(","))
}

/// Formats a millisecond timestamp as a UTC wall-clock time, `HH:MM:SS`.
fn format_clock(timestamp_ms: i64) -> String {
    let secs_of_day = timestamp_ms.div_euclid(1000).rem_euclid(86_400);
    format!(
        "{:02}:{:02}:{:02}",
        secs_of_day / 3600,
        secs_of_day % 3600 / 60,
        secs_of_day % 60
    )
}

fn render_table(rows: &[ResultRow]) -> String {
    let header = ["METRIC", "LABELS", "VALUE", "TIMESTAMP"].map(String::from);
    let mut lines = vec![header];
    for row in rows {
        lines.push([
            row.metric_name.clone(),
            format_labels(&row.labels),
            format!("{:.6}", row.value),
            format_clock(row.timestamp),
        ]);
    }

    let mut widths = [0usize; 4];
    for line in &lines {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for line in &lines {
        let mut cells = Vec::with_capacity(4);
        for (i, cell) in line.iter().enumerate() {
            if i + 1 == line.len() {
                cells.push(cell.clone());
            } else {
                cells.push(format!("{cell:<width$}", width = widths[i]));
            }
        }
        out.push_str(&cells.join("  "));
        out.push('\n');
    }
    out
}

/// Quotes a CSV field when it contains a separator, quote or newline.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn render_csv(rows: &[ResultRow]) -> String {
    let mut out = String::from("metric,labels,value,timestamp\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_field(&row.metric_name),
            csv_field(&format_labels(&row.labels)),
            row.value,
            row.timestamp
        ));
    }
    out
}
