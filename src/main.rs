use anyhow::Result;
use clap::Parser;
use linkback::backup::{BackupEngine, RunSummary};
use linkback::cli::Cli;
use linkback::config::Config;
use linkback::error::{LinkbackError, exit_code_for};
use linkback::linker::platform_linker;
use linkback::output::{self, ConsoleReporter, Verbosity};
use linkback::{EXIT_SUCCESS, EXIT_USAGE};
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not errors
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS };
            let _ = e.print();
            process::exit(code);
        }
    };

    init_tracing(&cli);
    let verbosity = Verbosity::from_flags(cli.verbose, cli.quiet);

    match run(&cli, verbosity) {
        Ok(summary) => {
            output::print_summary(&summary, verbosity);
            process::exit(EXIT_SUCCESS);
        }
        Err(e) => {
            output::error(&format!("{e:#}"));
            let wants_usage = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<LinkbackError>())
                .is_some_and(LinkbackError::wants_usage);
            if wants_usage {
                eprintln!("Run 'linkback --help' for usage.");
            }
            process::exit(exit_code_for(&e));
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_env("LINKBACK_LOG")
        .unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli, verbosity: Verbosity) -> Result<RunSummary> {
    let config = match cli.config_path() {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let context = cli.run_context(&config)?;
    let (sources, destination) = cli.sources_and_destination()?;
    debug!("Run context: {context:?}");

    let linker = platform_linker();
    debug!("Using {} linker", linker.name());

    let engine = BackupEngine::new(context, linker);
    let mut reporter = ConsoleReporter::new(verbosity);
    engine.run(&sources, &destination, &mut reporter)
}
