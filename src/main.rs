//! modelbench CLI entry point

use anyhow::{Context, Result};
use modelbench::config::cli::Cli;
use modelbench::config::validator::validate_config;
use modelbench::output::Reporter;
use modelbench::{bench, ReactorError};
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::FmtSubscriber;

/// Exit status for a fatal reactor failure
const EXIT_REACTOR: i32 = 2;

fn build_subscriber<W>(level: Level, ansi: bool, writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_ansi(ansi)
        .with_writer(writer)
        .finish()
}

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // Colour only when a terminal will interpret the escapes
    let subscriber = build_subscriber(level, std::io::stderr().is_terminal(), std::io::stderr);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: tracing subscriber already installed");
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.into_config();
    validate_config(&config).context("Configuration validation failed")?;

    let cpus = num_cpus::get();
    info!("modelbench v{} (pid {}, {} CPUs)", env!("CARGO_PKG_VERSION"), std::process::id(), cpus);
    info!("config: {}", config);

    let reporter = Reporter::new(config.output.format, cpus);
    reporter.begin(&config);
    let reports = bench::run(&config, |report| reporter.suite(report))?;
    reporter.finish(&config, &reports)
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    setup_logging(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.chain().any(|e| e.is::<ReactorError>()) => {
            error!("fatal reactor error: {:#}", err);
            // No report, no unwinding through engine state
            std::process::exit(EXIT_REACTOR);
        }
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
