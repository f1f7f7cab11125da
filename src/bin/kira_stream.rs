use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_readstream::app::{App, IngestRequest};
use kira_readstream::config::ConfigLoader;
use kira_readstream::domain::{PlatformClass, SubsampleTarget};
use kira_readstream::error::KiraError;
use kira_readstream::output::{JsonOutput, LogSink};
use kira_readstream::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "kira-stream")]
#[command(about = "Fetch bounded FASTQ subsets of public sequencing runs without downloading whole files")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve short- and long-read runs for an organism and subsample them")]
    Ingest(IngestArgs),
    #[command(about = "Resolve one run for an organism and print its metadata")]
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct IngestArgs {
    #[arg(long)]
    organism: String,

    #[arg(long)]
    strategy: Option<String>,

    #[arg(long)]
    cov_short: Option<f64>,

    #[arg(long)]
    cov_long: Option<f64>,

    #[arg(long)]
    genome_size: Option<u64>,

    /// Cap long reads by compressed output size instead of coverage.
    #[arg(long)]
    long_mb: Option<u64>,

    #[arg(long, default_value = "reads")]
    out: Utf8PathBuf,

    #[arg(long, conflicts_with = "skip_long")]
    skip_short: bool,

    #[arg(long)]
    skip_long: bool,
}

#[derive(Args)]
struct ResolveArgs {
    #[arg(long)]
    organism: String,

    #[arg(long, value_enum, default_value = "short")]
    platform: PlatformClass,

    #[arg(long)]
    strategy: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(kira) = report.downcast_ref::<KiraError>() {
                return ExitCode::from(map_exit_code(kira));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::NotFound(_) => 2,
        err if err.is_transport() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let transport = HttpTransport::new(&config)?;
    let app = App::new(transport, config);

    match cli.command {
        Commands::Ingest(args) => {
            let long_target = args.long_mb.map(SubsampleTarget::Megabytes);
            if let Some(target) = long_target {
                target.validate()?;
            }
            let mut request = IngestRequest::new(args.organism, args.out);
            request.strategy = args.strategy;
            request.coverage_short = args.cov_short;
            request.coverage_long = args.cov_long;
            request.genome_size = args.genome_size;
            request.long_target = long_target;
            request.short = !args.skip_short;
            request.long = !args.skip_long;

            let result = app.ingest(&request, &LogSink)?;
            JsonOutput::print_ingest(&result).into_diagnostic()?;
            if result.has_not_found() {
                return Ok(ExitCode::from(2));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resolve(args) => {
            let run = app.resolve(&args.organism, args.platform, args.strategy.as_deref())?;
            JsonOutput::print_run(&run).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
