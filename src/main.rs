//! # TCP Harness - Main Entry Point
//!
//! Runs the selected suites against the server and client executables and
//! exits with status 0 only if every recorded scenario passed.
//!
//! 1. **Parse arguments**: clap derive
//! 2. **Initialize logging**: colored diagnostics on stderr, optional log file
//! 3. **Validate**: arguments into `HarnessConfig`
//! 4. **Run suites**: strictly one after another
//! 5. **Report**: summary line, optional JSON report, exit status
//!
//! A fatal configuration error (the TCP teardown timeout cannot be read)
//! stops the run unless `--continue-on-error` is given.

use anyhow::Result;
use clap::Parser;
use colored::*;
use std::process::ExitCode;
use tcp_harness::{
    cli::{Args, HarnessConfig},
    logging,
    reporter::Reporter,
    scenarios::{should_abort, ScenarioRunner},
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

    info!("Starting TCP Harness {}", tcp_harness::VERSION);
    info!("Configuration: {:?}", args);

    let config = HarnessConfig::from_args(&args)?;
    let continue_on_error = config.continue_on_error;
    let suites = config.suites.clone();
    let runner = ScenarioRunner::new(config);
    let mut reporter = Reporter::new();

    let mut fatal = None;
    for suite in suites {
        info!("Running suite: {:?}", suite);
        if let Err(e) = runner.run_suite(suite, &mut reporter).await {
            error!("Suite {:?} aborted: {}", suite, e);
            if should_abort(&e, continue_on_error) {
                fatal = Some(e);
                break;
            }
        }
    }

    if let Some(path) = &args.output_file {
        reporter.write_json(path)?;
    }

    let summary = reporter.summary();
    let line = format!(
        "{} passed, {} failed ({} scenarios)",
        summary.passed,
        summary.failed,
        summary.total()
    );
    if summary.all_passed() && fatal.is_none() {
        println!("{}", line.green());
    } else {
        println!("{}", line.red());
    }

    if let Some(e) = fatal {
        return Err(e.into());
    }
    Ok(if summary.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
