//! Comic Sage - comic cover valuation client core
//!
//! Submits a cover image to the valuation service (primary endpoint, then a
//! fallback), tracks heuristic progress while the request is in flight and
//! drives the loading animation from that progress.

// Module declarations
pub mod application;
pub mod commands;
pub mod domain;
pub mod infrastructure;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::collections::HashMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::commands::{CliCommand, CommandResponse, CompletedSubmission};
use crate::domain::outcome::ValuationReport;
use crate::infrastructure::config::{AppConfig, ConfigManager};
use crate::infrastructure::logging::{init_logging_with_config, log_system_info};

/// Entry point for the `comic-sage` binary.
///
/// Exit codes: 0 on a successful valuation, 1 when the submission or
/// startup failed, 2 on bad usage.
#[must_use]
pub fn run() -> ExitCode {
    let command = match commands::parse_args(std::env::args_os()) {
        Ok(command) => command,
        Err(e) => {
            // Help and version land here too, with exit code 0
            let _ = e.print();
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(2));
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_command(command)) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_command(command: CliCommand) -> Result<ExitCode> {
    let config = load_config(&command).await?;

    if let Err(e) = init_logging_with_config(&config.logging) {
        eprintln!("Failed to initialize logging: {e:#}");
    }
    log_system_info();

    match command {
        CliCommand::ShowConfig { .. } => {
            println!("{}", commands::show_config_command(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Submit(request) => {
            let completed = commands::submit_image_command(&config, &request).await?;
            print_outcome(&completed)?;
            if completed.outcome.report().is_some() {
                info!("Valuation finished");
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

async fn load_config(command: &CliCommand) -> Result<AppConfig> {
    let env: HashMap<String, String> = std::env::vars().collect();
    match command.config_file() {
        Some(path) => AppConfig::load_layered(Some(path), &env)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => ConfigManager::new()?.initialize_on_first_run(&env).await,
    }
}

fn print_outcome(completed: &CompletedSubmission) -> Result<()> {
    let response = CommandResponse::<ValuationReport>::from(completed);
    let json = serde_json::to_string_pretty(&response).context("Failed to serialize outcome")?;
    println!("{json}");
    Ok(())
}
