use clap::Parser;
use leviso_relocate::{Options, Pipeline, Platform, RunMode, SystemRunner};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Bundle shared-library dependencies for an executable or library.
#[derive(Parser)]
#[command(name = "leviso-relocate", version)]
struct Cli {
    /// The main library or executable to fix up
    #[arg(short, long)]
    input: PathBuf,

    /// The directory to copy dependencies into (must already exist)
    #[arg(short, long)]
    output: PathBuf,

    /// Additional directories to search for libraries
    #[arg(short, long)]
    search: Vec<PathBuf>,

    /// Library filename to leave out of the bundle (exact match)
    #[arg(short = 'x', long)]
    exclude: Vec<String>,

    /// Regex matched against whole library filenames to leave out
    #[arg(short = 'r', long)]
    exclude_regex: Vec<String>,

    /// Print what would be done without touching anything
    #[arg(short, long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match run(cli) {
        Ok(()) => {
            println!("Relocation complete.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("An error occurred: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let relocator = Platform::current()?.relocator();
    let options = Options {
        search_paths: cli.search,
        exclude: cli.exclude,
        exclude_regex: cli.exclude_regex,
        mode: RunMode::from_dry_run(cli.dry_run),
    };

    let report =
        Pipeline::new(relocator.as_ref(), &SystemRunner, options).run(&cli.input, &cli.output)?;

    if !report.rewrite.failures.is_empty() {
        tracing::warn!(
            "{} rewrite command(s) failed, see warnings above",
            report.rewrite.failures.len()
        );
    }
    Ok(())
}
