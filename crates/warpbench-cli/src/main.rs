use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warpbench_runner::{
    collect, filter_stat, load_experiment, write_table, Aggregate, ExperimentFile,
    ExperimentRunner, ParseMode, Registry, Supervisor, SupervisorOptions,
};

#[derive(Parser)]
#[command(
    name = "warpbench",
    version,
    about = "Run a GPU simulator over scheduling configs x benchmarks and collect its stats"
)]
struct Cli {
    /// Debug-level diagnostics on stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Selection {
    /// Experiment registry (YAML)
    #[arg(long, short)]
    registry: PathBuf,
    /// Configs to use, delimited by ':' (default: all)
    #[arg(long, short)]
    configs: Option<String>,
    /// Log directory (default: registry log_dir, else $MACSIM_DIR/log)
    #[arg(long, short)]
    log_dir: Option<PathBuf>,
    /// Simulator checkout; its log/ directory is the last-resort log dir
    #[arg(long, env = "MACSIM_DIR")]
    macsim_dir: Option<PathBuf>,
    /// Fail on malformed stats lines and missing logs
    #[arg(long)]
    strict: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every selected config against every benchmark
    Run {
        #[command(flatten)]
        selection: Selection,
        #[arg(long)]
        timeout_seconds: Option<u64>,
        #[arg(long)]
        simulator: Option<PathBuf>,
        /// Also dump the stats table here after the run
        #[arg(long, short)]
        dump_stats: Option<PathBuf>,
        /// Also export stats as JSON here after the run
        #[arg(long, short)]
        json: Option<PathBuf>,
        /// No banners or progress dots
        #[arg(long, short)]
        quiet: bool,
    },
    /// Write the fixed-width stats table from existing logs
    DumpStats {
        #[command(flatten)]
        selection: Selection,
        #[arg(long, short)]
        out: PathBuf,
    },
    /// Export stats from existing logs as JSON
    ExportJson {
        #[command(flatten)]
        selection: Selection,
        #[arg(long, short)]
        out: PathBuf,
    },
    /// Series of one stat across configs, for a bar chart
    PlotData {
        /// JSON written by export-json
        #[arg(long, short)]
        input: PathBuf,
        #[arg(long, short)]
        stat: String,
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
}

struct Resolved {
    experiment: ExperimentFile,
    configs: Registry,
    log_dir: PathBuf,
    mode: ParseMode,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let all_ok = run_command(cli.command)?;
    if !all_ok {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            selection,
            timeout_seconds,
            simulator,
            dump_stats,
            json,
            quiet,
        } => {
            let resolved = resolve(&selection)?;
            let simulator = simulator.unwrap_or_else(|| resolved.experiment.simulator.clone());
            let timeout = timeout_seconds.unwrap_or(resolved.experiment.timeout_seconds);
            let supervisor = Supervisor::new(SupervisorOptions {
                progress: !quiet,
                ..SupervisorOptions::default()
            });
            let runner = ExperimentRunner::new(simulator, supervisor);
            let outcome = runner
                .run_matrix(
                    &resolved.configs,
                    &resolved.experiment.benchmarks,
                    &resolved.log_dir,
                    Duration::from_secs(timeout),
                )
                .context("run failed")?;
            for cell in outcome.failed() {
                eprintln!(
                    "failed: {}:{} ({})",
                    cell.config,
                    cell.benchmark,
                    cell.status
                        .map(|s| s.as_str().to_string())
                        .or_else(|| cell.error.clone())
                        .unwrap_or_default()
                );
            }
            if let Some(path) = dump_stats {
                dump_table(&resolved, &path)?;
            }
            if let Some(path) = json {
                export_json(&resolved, &path)?;
            }
            Ok(outcome.overall_ok())
        }
        Commands::DumpStats { selection, out } => {
            dump_table(&resolve(&selection)?, &out)?;
            Ok(true)
        }
        Commands::ExportJson { selection, out } => {
            export_json(&resolve(&selection)?, &out)?;
            Ok(true)
        }
        Commands::PlotData { input, stat, out } => {
            let aggregate = Aggregate::read_json(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            info!(stat = %stat, "filtering plot series");
            let series = filter_stat(&aggregate, &stat);
            let payload = serde_json::to_value(&series)?;
            match out {
                Some(path) => {
                    let bytes = serde_json::to_vec_pretty(&payload)?;
                    std::fs::write(&path, bytes)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Writing: {}", path.display());
                }
                None => emit_json(&payload)?,
            }
            Ok(true)
        }
    }
}

fn resolve(selection: &Selection) -> Result<Resolved> {
    let experiment = load_experiment(&selection.registry)
        .with_context(|| format!("loading registry {}", selection.registry.display()))?;
    let configs = match selection.configs.as_deref().map(str::trim) {
        Some(list) if !list.is_empty() => {
            let ids: Vec<&str> = list.split(':').collect();
            experiment.gpu_configs.select(&ids)?
        }
        _ => experiment.gpu_configs.clone(),
    };
    let log_dir = match (&selection.log_dir, &experiment.log_dir) {
        (Some(dir), _) => dir.clone(),
        (None, Some(dir)) => dir.clone(),
        (None, None) => selection
            .macsim_dir
            .as_ref()
            .map(|root| root.join("log"))
            .context("no log dir given: pass --log-dir, set log_dir in the registry, or set MACSIM_DIR")?,
    };
    Ok(Resolved {
        experiment,
        configs,
        log_dir,
        mode: if selection.strict {
            ParseMode::Strict
        } else {
            ParseMode::Lenient
        },
    })
}

fn dump_table(resolved: &Resolved, path: &Path) -> Result<()> {
    let aggregate = collect(
        &resolved.configs,
        &resolved.experiment.benchmarks,
        &resolved.log_dir,
        resolved.mode,
    )?;
    write_table(&aggregate, &resolved.experiment.stats, path)?;
    println!("Dumped stats to {}", path.display());
    Ok(())
}

fn export_json(resolved: &Resolved, path: &Path) -> Result<()> {
    let aggregate = collect(
        &resolved.configs,
        &resolved.experiment.benchmarks,
        &resolved.log_dir,
        resolved.mode,
    )?;
    aggregate.write_json(path)?;
    println!("Exported stats to {}", path.display());
    Ok(())
}

fn emit_json(value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing plot series")?;
    println!("{}", text);
    Ok(())
}
