use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use geoflat::config::{ConfigLoader, ConfigOverrides};
use geoflat::domain::StageName;
use geoflat::error::GeoflatError;
use geoflat::geo::GeoHttpClient;
use geoflat::output::{JsonOutput, OutputMode};
use geoflat::pipeline::{
    Pipeline, ProgressEvent, ProgressSink, RunReport, StageOutcome, StatusReport,
};

#[derive(Parser)]
#[command(name = "geoflat")]
#[command(about = "Download a GEO dataset archive and flatten its sections into TSV tables")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the pipeline up to a stage (default: all stages)")]
    Run(RunArgs),
    #[command(about = "Show which stages are complete")]
    Status(CommonArgs),
}

#[derive(Args, Clone)]
struct CommonArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    accession: Option<String>,

    /// Working root; the data/ layout is resolved against it.
    #[arg(long)]
    root: Option<String>,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    no_lock: bool,

    /// One of resolve-url, fetch-archive, unpack-archive, assemble-tables.
    #[arg(long)]
    until: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<GeoflatError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GeoflatError) -> u8 {
    match error {
        GeoflatError::InvalidAccession(_)
        | GeoflatError::InvalidUrl(_)
        | GeoflatError::ConfigRead(_)
        | GeoflatError::ConfigParse(_)
        | GeoflatError::InvalidConfig(_)
        | GeoflatError::UnknownStage(_) => 2,
        GeoflatError::Transport(_)
        | GeoflatError::HttpStatus { .. }
        | GeoflatError::Resolution(_) => 3,
        GeoflatError::Parse { .. }
        | GeoflatError::MissingSection(_)
        | GeoflatError::Archive(_) => 4,
        GeoflatError::Locked(_) => 5,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Run(args) => run_pipeline(args, output_mode),
        Commands::Status(args) => run_status(args, output_mode),
    }
}

fn run_pipeline(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let target = args
        .until
        .as_deref()
        .map(str::parse::<StageName>)
        .transpose()?;
    let overrides = ConfigOverrides {
        accession: args.common.accession,
        max_workers: args.workers,
        no_lock: args.no_lock,
        root: args.common.root,
    };
    let config = ConfigLoader::resolve(args.common.config.as_deref(), &overrides)?;
    let pipeline = Pipeline::new(config, GeoHttpClient::new()?);

    match output_mode {
        OutputMode::Json => {
            let report = pipeline.run_until(target, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
        }
        OutputMode::Human => {
            let report = pipeline.run_until(target, &TracingSink)?;
            print_run_summary(&report);
        }
    }
    Ok(())
}

fn run_status(args: CommonArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        accession: args.accession,
        root: args.root,
        ..ConfigOverrides::default()
    };
    let config = ConfigLoader::resolve(args.config.as_deref(), &overrides)?;
    let status = Pipeline::new(config, GeoHttpClient::new()?).status();

    match output_mode {
        OutputMode::Json => JsonOutput::print_status(&status).into_diagnostic()?,
        OutputMode::Human => print_status(&status),
    }
    Ok(())
}

/// Forwards stage lifecycle events to the log.
struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::debug!("{}", event.message),
        }
    }
}

fn print_run_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}geoflat {} (root: {}){reset}", report.accession, report.root);
    for stage in &report.stages {
        match stage.outcome {
            StageOutcome::Ran => {
                println!("{green}  ran      {} ({} ms){reset}", stage.stage, stage.elapsed_ms)
            }
            StageOutcome::Skipped => println!("  skipped  {}", stage.stage),
        }
    }
    println!("{} of {} stages ran", report.ran(), report.stages.len());
}

fn print_status(status: &StatusReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let reset = "\x1b[0m";

    println!("geoflat {} (root: {})", status.accession, status.root);
    for stage in &status.stages {
        let (label, color) = if stage.complete {
            ("complete", green)
        } else {
            ("pending ", yellow)
        };
        println!("{color}  {label} {:<16} {}{reset}", stage.stage.as_str(), stage.artifact);
    }
    if !status.has_tsv_outputs {
        println!("no .tsv outputs yet");
    }
}
