use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

mod config;
mod error;
mod generator;
mod repair;

#[derive(Parser)]
#[command(name = "autofix")]
#[command(
    author,
    version,
    about = "Guarded test-failure repair - ask a model for a patch, keep it only if the tests pass"
)]
struct Cli {
    /// File containing the captured test-failure output
    transcript: PathBuf,

    /// Repository to repair
    #[arg(short = 'C', long, default_value = ".")]
    repo: PathBuf,

    /// Config file (defaults to autofix.toml in the repository, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model identity (overrides OPENAI_MODEL and the config file)
    #[arg(long)]
    model: Option<String>,

    /// Command that runs the test suite
    #[arg(long, env = "AUTOFIX_TEST_COMMAND")]
    test_command: Option<String>,

    /// Stop once this many marked commits are in recent history
    #[arg(long)]
    max_attempts: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_logging(verbose: bool, format: LogFormat) {
    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("autofix=debug")
        } else {
            EnvFilter::new("autofix=info")
        }
    });

    // Logs go to stderr; stdout carries the run summary
    let layer = match format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let args = repair::RunArgs {
        transcript: cli.transcript,
        repo: cli.repo,
        config: cli.config,
        model: cli.model,
        test_command: cli.test_command,
        max_attempts: cli.max_attempts,
    };

    ExitCode::from(repair::run(args).await)
}
