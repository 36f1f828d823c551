//! Developer front end: applies the schema migrations and prints metrics
//! query plans for JSON requests.
//!
//! Usage:
//!   spans-metrics migrate --db ./spans.db
//!   spans-metrics plan --request request.json --timeseries

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use spans_metrics_lib::db::Database;
use spans_metrics_lib::models::QueryRequest;
use spans_metrics_lib::query::{Dataset, InMemoryIndexer, TopEvents};
use spans_metrics_lib::settings::Settings;
use spans_metrics_lib::telemetry::init_tracing;
use spans_metrics_lib::{plan_query, PlanMode};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations
    Migrate {
        /// Database file, overrides the settings file
        #[arg(long)]
        db: Option<PathBuf>,

        /// Also run migrations flagged as post deployment
        #[arg(long, default_value = "false")]
        post_deployment: bool,
    },
    /// Resolve a JSON query request into a query plan
    Plan {
        /// JSON file holding the request
        #[arg(short, long)]
        request: PathBuf,

        #[arg(short, long, value_enum, default_value_t = DatasetArg::Spans)]
        dataset: DatasetArg,

        /// Bucket the results at the request interval
        #[arg(long, default_value = "false")]
        timeseries: bool,

        /// JSON file with previously ranked top events
        #[arg(long)]
        top_events: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DatasetArg {
    Spans,
    ProfileFunctions,
}

impl From<DatasetArg> for Dataset {
    fn from(value: DatasetArg) -> Self {
        match value {
            DatasetArg::Spans => Dataset::SpansMetrics,
            DatasetArg::ProfileFunctions => Dataset::ProfileFunctionsMetrics,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => Settings::load(path).with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    init_tracing(&settings.log)?;

    match args.command {
        Command::Migrate { db, post_deployment } => {
            let path = db.unwrap_or_else(|| settings.database.path.clone());
            let run_post_deployment = post_deployment || settings.database.run_post_deployment;
            let database = Database::new_with_options(&path, run_post_deployment)
                .with_context(|| format!("migrating database {}", path.display()))?;
            let applied = database.applied_migrations()?;
            tracing::info!(path = %database.path().display(), applied = applied.len(), "migrations complete");
            println!("{}", serde_json::to_string_pretty(&applied)?);
        }
        Command::Plan {
            request,
            dataset,
            timeseries,
            top_events,
        } => {
            let request: QueryRequest = read_json(&request)?;
            let mode = match top_events {
                Some(path) => PlanMode::Top(read_json::<TopEvents>(&path)?),
                None if timeseries => PlanMode::Timeseries,
                None => PlanMode::Aggregate,
            };
            let plan = plan_query(dataset.into(), mode, InMemoryIndexer::new(true), request, settings.query)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
