use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use blockconn_core::db::open::{open_read_only, DbOpenConfig};
use blockconn_core::db::schema;
use blockconn_core::pipeline::SourceOutcome;
use blockconn_core::{BuildConfig, Database, Pipeline, RunOptions, StressRegime};

pub mod progress;

#[derive(Parser, Debug)]
#[command(name = "blockconn-builder", version, about = "Build the census block connectivity graph in a SQLite database")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Select sources, write their connection rows, then reclassify and index
    Run(RunArgs),
    /// Apply the low-stress rule to every connection row
    Reclassify(BuildArgs),
    /// Audit duplicates and build the connection indexes
    Index(BuildArgs),
    /// Print progress and stage as JSON
    Status(DbArgs),
    /// Delete all connection rows, progress markers and graph indexes
    Reset(ResetArgs),
    /// Create the input and output tables in an empty database
    Init(DbArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// SQLite database holding inputs and outputs
    #[arg(long = "db", value_name = "PATH")]
    pub db: PathBuf,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TuningArgs {
    /// JSON config file; flags override it, and it overrides BLOCKCONN_* variables
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Neighbor search radius in CRS units
    #[arg(long = "radius", value_name = "UNITS")]
    pub radius: Option<f64>,

    /// Maximum low/high stress cost ratio still counted as low stress
    #[arg(long = "cost-ratio", value_name = "RATIO")]
    pub cost_ratio: Option<f64>,

    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Emit a row from each source to itself
    #[arg(long = "include-self-pairs")]
    pub include_self_pairs: bool,

    /// Relation read for high_stress_cost (high_stress or low_stress)
    #[arg(long = "high-stress-source", value_name = "REGIME")]
    pub high_stress_source: Option<StressRegime>,

    #[arg(long = "block-cache", value_name = "N")]
    pub block_cache: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub db: DbArgs,
    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub build: BuildArgs,

    /// Process at most N sources, then stop; rerun to resume
    #[arg(long = "limit", value_name = "N")]
    pub limit: Option<usize>,

    /// Commit sources only; run `reclassify` and `index` separately
    #[arg(long = "skip-finalize")]
    pub skip_finalize: bool,

    #[arg(long = "no-progress")]
    pub no_progress: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResetArgs {
    #[command(flatten)]
    pub db: DbArgs,

    /// Required; reset discards the whole graph
    #[arg(long = "yes")]
    pub yes: bool,
}

/// Defaults, then the JSON file, then environment, then flags.
pub fn resolve_config(t: &TuningArgs) -> Result<BuildConfig> {
    let base = match &t.config {
        Some(p) => BuildConfig::from_json_file(p).with_context(|| format!("reading config {:?}", p))?,
        None => BuildConfig::default(),
    };
    let mut cfg = base.with_env()?;
    if let Some(v) = t.radius { cfg.search_radius = v; }
    if let Some(v) = t.cost_ratio { cfg.cost_ratio_threshold = v; }
    if let Some(v) = t.workers { cfg.workers = v; }
    if t.include_self_pairs { cfg.include_self_pairs = true; }
    if let Some(v) = t.high_stress_source { cfg.high_stress_source = v; }
    if let Some(v) = t.block_cache { cfg.block_cache_capacity = v; }
    cfg.validate()?;
    Ok(cfg)
}

fn pipeline(args: &BuildArgs) -> Result<Pipeline> {
    let cfg = resolve_config(&args.tuning)?;
    info!(?cfg, db = ?args.db.db, "resolved build config");
    Ok(Pipeline::new(&args.db.db, DbOpenConfig::from_env(), cfg)?)
}

fn open(args: &DbArgs, create: bool) -> Result<Database> {
    let cfg = DbOpenConfig::from_env();
    let db = if create { Database::open(&args.db, &cfg) } else { Database::open_existing(&args.db, &cfg) };
    db.with_context(|| format!("failed to open {:?}", args.db))
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

pub fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => run(&args),
        Command::Reclassify(args) => {
            let n = pipeline(&args)?.reclassify()?;
            print_json(&serde_json::json!({ "reclassified": n }))
        }
        Command::Index(args) => {
            let report = pipeline(&args)?.build_indexes()?;
            print_json(&report)
        }
        Command::Status(args) => {
            let conn = open_read_only(&args.db).with_context(|| format!("failed to open {:?}", args.db))?;
            let status = Database::from_connection(conn)
                .status()
                .with_context(|| format!("no graph tables in {:?}; run `init` or `run` first", args.db))?;
            print_json(&status)
        }
        Command::Reset(args) => {
            if !args.yes {
                bail!("reset deletes every connection row; pass --yes to confirm");
            }
            open(&args.db, false)?.reset()?;
            Ok(())
        }
        Command::Init(args) => {
            let db = open(&args, true)?;
            schema::create_input_tables(db.conn())?;
            db.init()?;
            info!(db = ?args.db, "created tables");
            Ok(())
        }
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let pipeline = pipeline(&args.build)?;
    let candidates = pipeline.prepare()?;
    let total = args.limit.map_or(candidates.len(), |l| l.min(candidates.len()));
    let pb = if args.no_progress { indicatif::ProgressBar::hidden() } else { progress::create_progress_bar(total as u64)? };
    let on_commit = |_: &SourceOutcome| pb.inc(1);

    let cancel = AtomicBool::new(false);
    let opts = RunOptions { limit: args.limit, skip_finalize: args.skip_finalize };
    let summary = pipeline.run_prepared(&candidates, &opts, &cancel, &on_commit)?;
    pb.finish_and_clear();
    print_json(&summary)
}
