/// modbus-query command line tool
///
/// Reads holding registers from a Modbus RTU device and prints them to
/// stdout. Diagnostics go to stderr.
///
/// Exit status: 0 once the session ran (even if some addresses never
/// answered), 1 on a fatal error, 130 when interrupted.

use std::process::ExitCode;
use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};

use modbus_query::cli::{normalize_args, Cli};
use modbus_query::logging::init_logging;
use modbus_query::{run_query, QueryReport};

const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    match cli.level_filter() {
        Ok(level) => init_logging(level),
        Err(e) => {
            init_logging(log::LevelFilter::Warn);
            warn!("{}; using warn", e);
        }
    }

    let session = run(&cli);
    tokio::select! {
        result = session => match result {
            Ok(report) => {
                summarize(&report);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{:#}", e);
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, releasing device");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<QueryReport> {
    let config = cli.to_config().context("Invalid arguments")?;
    info!(
        "Querying {} address(es) on {} (slave {}, {} baud)",
        config.addresses().len(),
        config.port(),
        config.device_id(),
        config.baud_rate()
    );

    let mut stdout = std::io::stdout();
    let report = run_query(&config, &mut stdout)
        .await
        .with_context(|| format!("Query on {} failed", config.port()))?;

    Ok(report)
}

fn summarize(report: &QueryReport) {
    for failure in &report.failures {
        info!(
            "No value for {:#06x} after {} attempt(s): {}",
            failure.address, failure.attempts, failure.last_error
        );
    }

    info!(
        "{} address(es) answered, {} dropped, {} ms",
        report.results.len(),
        report.failures.len(),
        (report.finished_at - report.started_at).num_milliseconds()
    );
}
