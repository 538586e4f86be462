#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use clap::error::ErrorKind;
use healthq::cli::app::{Cli, Command, RuntimeArgs};
use healthq::cli::commands;
use healthq::config::RuntimePaths;
use healthq::models::{FailureClass, QueryEnvelopeCommandFailure};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_VALIDATION_FAILURE: i32 = 2;
const EXIT_USAGE_ERROR: i32 = 64;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    init_tracing();

    let command_name = command_name(&cli.command);
    tracing::debug!(command = command_name, "starting");

    match execute(cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(error) => {
            let exit_code = report_failure(&error);
            tracing::debug!(command = command_name, exit_code, "failed");
            exit_code
        }
    }
}

fn init_tracing() {
    // stdout carries envelopes only; diagnostics go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Schema(args) => commands::schema::run(&args),
        Command::Catalog(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::catalog::run(&args, &runtime_paths)
        }
        Command::Query(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::query::run(&args, &runtime_paths, cli.runtime.query_limits()?)
        }
        Command::Explain(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::explain::run(&args, &runtime_paths, cli.runtime.query_limits()?)
        }
        Command::Explore(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::explore::run(&args, &runtime_paths, cli.runtime.query_limits()?)
        }
    }
}

/// Envelope failures are printed on stdout like any other response; every
/// other error is plumbing and goes to stderr.
fn report_failure(error: &anyhow::Error) -> i32 {
    let Some(failure) = error.downcast_ref::<QueryEnvelopeCommandFailure>() else {
        eprintln!("healthq: {error:#}");
        return EXIT_RUNTIME_FAILURE;
    };

    println!("{failure}");
    match failure.class() {
        FailureClass::Validation => EXIT_VALIDATION_FAILURE,
        FailureClass::Runtime => EXIT_RUNTIME_FAILURE,
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Query(_) => "query",
        Command::Explain(_) => "explain",
        Command::Catalog(_) => "catalog",
        Command::Schema(_) => "schema",
        Command::Explore(_) => "explore",
    }
}

fn resolve_runtime_paths(args: &RuntimeArgs) -> Result<RuntimePaths> {
    let home_dir = match &args.home_dir {
        Some(path) => path.clone(),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("HOME is not set; pass --home-dir"))?,
    };

    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    healthq::config::resolve_runtime_paths(&home_dir, &cwd, args.path_overrides())
}
