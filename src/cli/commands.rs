//! CLI command definitions for sweep-forge.
//!
//! Three commands: `run` expands a sweep and drives it to completion,
//! `list` prints what a sweep would launch, and `scrape` aggregates the
//! output of finished stage directories by hand.

use crate::export::sink_for_path;
use crate::params::{ParamSet, ParamValue};
use crate::pipeline::{RunContext, RunError, Runner, RunnerConfig};
use crate::scheduler::{DryRunSubstrate, ExecutionSubstrate, LocalSubstrate};
use crate::scrape::{scrape_dirs, ScrapeEngine};
use crate::sweep::{build_graph, expand, subset, SweepDefinition};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default root directory for run output.
const DEFAULT_ROOT_DIR: &str = "./sweeps";

/// Experiment sweep runner: compose, submit, monitor and scrape.
#[derive(Parser)]
#[command(name = "sweep-forge")]
#[command(about = "Compose, run and scrape experiment sweeps")]
#[command(version)]
#[command(
    long_about = "sweep-forge expands a YAML sweep into experiments, runs them as a dependency graph of batch jobs, and scrapes their logs into tabular results.\n\nExample usage:\n  sweep-forge run sweeps/bnb.yaml --root ./sweeps --fast"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Expand a sweep and run every stage to completion.
    Run(RunArgs),

    /// Print the experiments a sweep expands to.
    #[command(alias = "ls")]
    List(ListArgs),

    /// Scrape finished stage directories into a result file.
    Scrape(ScrapeArgs),
}

/// Arguments for `sweep-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Sweep definition file.
    pub sweep: PathBuf,

    /// Root directory; the run writes under `<root>/<sweep name>`.
    #[arg(short = 'r', long, default_value = DEFAULT_ROOT_DIR)]
    pub root: PathBuf,

    /// Write scripts and parameters without launching anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Apply the sweep's fast overrides and limit.
    #[arg(long)]
    pub fast: bool,

    /// Only run experiments matching these `key=value` pairs.
    #[arg(long = "where", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Default retry budget (overrides SWEEP_MAX_RETRIES).
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Seconds between polls (overrides SWEEP_POLL_INTERVAL_SECS).
    #[arg(long)]
    pub poll_secs: Option<u64>,

    /// Global deadline in seconds (overrides SWEEP_TIMEOUT_SECS).
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Resubmit stages even when their earlier output is complete.
    #[arg(long)]
    pub no_skip: bool,

    /// Seed for the random experiment seeds.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output the summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `sweep-forge list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Sweep definition file.
    pub sweep: PathBuf,

    /// Apply the sweep's fast overrides and limit.
    #[arg(long)]
    pub fast: bool,

    /// Only list experiments matching these `key=value` pairs.
    #[arg(long = "where", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,
}

/// Arguments for `sweep-forge scrape`.
#[derive(Parser, Debug)]
pub struct ScrapeArgs {
    /// Scrape family (bnb, curnode, incumbent).
    #[arg(short = 't', long = "type")]
    pub family: String,

    /// Result file; `.tsv`, `.csv` or `.parquet`.
    #[arg(short = 'o', long)]
    pub out: PathBuf,

    /// Leading result columns, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,

    /// Directories searched for stage output.
    #[arg(required = true)]
    pub dirs: Vec<PathBuf>,
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_sweep_command(args).await,
        Commands::List(args) => run_list_command(args),
        Commands::Scrape(args) => run_scrape_command(args),
    }
}

async fn run_sweep_command(args: RunArgs) -> anyhow::Result<()> {
    let definition = SweepDefinition::load(&args.sweep)?;

    let ctx = match args.seed {
        Some(seed) => RunContext::with_seed(&args.root, &definition.name, seed),
        None => RunContext::new(&args.root, &definition.name),
    };
    let ctx = Arc::new(ctx);

    let mut experiments = expand(&definition, &ctx, args.fast)?;
    if !args.filters.is_empty() {
        let filter = parse_filters(&args.filters)?;
        experiments = subset(&experiments, &filter);
    }
    if experiments.is_empty() {
        warn!(sweep = %definition.name, "No experiments selected");
    }

    let graph = build_graph(&definition, &ctx, experiments)?;
    let config = runner_config(&args)?;

    let substrate: Arc<dyn ExecutionSubstrate> = if args.dry_run {
        Arc::new(DryRunSubstrate::new(ctx.run_dir()))
    } else {
        Arc::new(LocalSubstrate::new(ctx.run_dir()))
    };

    info!(
        sweep = %definition.name,
        run_id = %ctx.run_id(),
        substrate = substrate.name(),
        stages = graph.len(),
        run_dir = %ctx.run_dir().display(),
        "Starting sweep"
    );

    let mut runner = Runner::new(graph, Arc::clone(&ctx), substrate, config)?;
    let summary = match runner.run().await {
        Ok(summary) => summary,
        Err(RunError::Timeout {
            elapsed,
            unfinished,
            summary,
        }) => {
            warn!(
                elapsed_secs = elapsed.as_secs(),
                unfinished = unfinished.len(),
                "Sweep timed out"
            );
            *summary
        }
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Sweep '{}' ({})", definition.name, ctx.run_id());
        println!("  Output dir: {}", ctx.run_dir().display());
        println!("  {}", summary);
        for report in &summary.reports {
            println!(
                "  - {} [{}] after {} attempt(s): {}",
                report.stage, report.state, report.attempts, report.diagnostic
            );
        }
    }

    if !summary.is_success() {
        anyhow::bail!(
            "{} of {} stages did not succeed",
            summary.total - summary.succeeded,
            summary.total
        );
    }
    Ok(())
}

fn runner_config(args: &RunArgs) -> anyhow::Result<RunnerConfig> {
    let mut config = RunnerConfig::from_env().context("Invalid runner environment")?;
    if let Some(retries) = args.max_retries {
        config = config.with_max_retries(retries);
    }
    if let Some(secs) = args.poll_secs {
        config = config.with_poll_interval(Duration::from_secs(secs));
    } else if args.dry_run {
        config = config.with_poll_interval(Duration::from_secs(1));
    }
    if let Some(secs) = args.timeout_secs {
        config = config.with_global_timeout(Duration::from_secs(secs));
    }
    if args.no_skip {
        config = config.with_skip_completed(false);
    }
    config.validate()?;
    Ok(config)
}

fn run_list_command(args: ListArgs) -> anyhow::Result<()> {
    let definition = SweepDefinition::load(&args.sweep)?;
    let ctx = RunContext::new(".", &definition.name);
    let mut experiments = expand(&definition, &ctx, args.fast)?;
    if !args.filters.is_empty() {
        experiments = subset(&experiments, &parse_filters(&args.filters)?);
    }

    for experiment in &experiments {
        println!("{}", experiment.render_name());
        println!("  args: {}", experiment.render_arguments().join(" "));
        match experiment.compute_resource_request() {
            Ok(resources) => println!(
                "  resources: {} MB, {} thread(s), {} min",
                resources.memory_megabytes, resources.thread_count, resources.wall_clock_minutes
            ),
            Err(e) => println!("  resources: invalid ({})", e),
        }
    }
    println!("{} experiment(s)", experiments.len());
    Ok(())
}

fn run_scrape_command(args: ScrapeArgs) -> anyhow::Result<()> {
    let engine = ScrapeEngine::for_family(&args.family)?;
    let records = scrape_dirs(&engine, &args.dirs)?;
    if records.is_empty() {
        warn!(family = %args.family, "No records found");
        println!("No records found.");
        return Ok(());
    }

    let mut sink = sink_for_path(&args.out, &args.columns);
    let rows = sink.write(&records)?;
    println!("Wrote {} rows to {}", rows, sink.path().display());
    Ok(())
}

/// Parses `key=value` filters; values are typed like YAML scalars.
fn parse_filters(filters: &[String]) -> anyhow::Result<ParamSet> {
    let mut params = ParamSet::new();
    for filter in filters {
        let (key, raw) = filter
            .split_once('=')
            .with_context(|| format!("Filter '{}' is not of the form key=value", filter))?;
        let value: ParamValue = serde_yaml::from_str(raw)
            .with_context(|| format!("Filter '{}' has an unsupported value", filter))?;
        params.update(key.trim(), value);
    }
    Ok(params)
}
