//! Commands for the headless client
//!
//! Parses the command line and runs one submission end to end: controller,
//! HTTP client and phase animator, printing the outcome as JSON.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::application::phase_animator::PhaseAnimator;
use crate::application::upload_controller::UploadController;
use crate::domain::outcome::{SubmissionOutcome, ValuationReport};
use crate::domain::phase::{AnimationPhase, PhaseSchedule};
use crate::domain::upload::UploadFile;
use crate::domain::valuation_service::ValuationClient;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::{HttpClientConfig, HttpValuationClient};

/// Command line of the `comic-sage` binary.
#[derive(Debug, Parser)]
#[command(name = "comic-sage")]
#[command(about = "Value a comic cover image with the Comic Sage service")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
#[command(after_help = "Environment:\n  \
    COMIC_SAGE_API__BASE_URL    valuation service base URL\n  \
    NEXT_PUBLIC_API_URL         legacy base URL override\n  \
    RUST_LOG                    log filter")]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Viewport width used for the animation geometry
    #[arg(long, value_name = "PX")]
    pub viewport: Option<u32>,

    /// Cover image to submit (use `-- <IMAGE>` for names that look like options)
    #[arg(required = true, value_name = "IMAGE")]
    pub image: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Commands {
    #[command(about = "Print the effective configuration as JSON")]
    Config,
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Submit(SubmitRequest),
    ShowConfig { config_file: Option<PathBuf> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub image: PathBuf,
    pub config_file: Option<PathBuf>,
    pub viewport_width: Option<u32>,
}

impl CliCommand {
    #[must_use]
    pub fn config_file(&self) -> Option<&Path> {
        match self {
            Self::Submit(request) => request.config_file.as_deref(),
            Self::ShowConfig { config_file } => config_file.as_deref(),
        }
    }
}

impl From<Cli> for CliCommand {
    fn from(cli: Cli) -> Self {
        match (cli.command, cli.image) {
            (Some(Commands::Config), _) | (None, None) => Self::ShowConfig {
                config_file: cli.config,
            },
            (None, Some(image)) => Self::Submit(SubmitRequest {
                image,
                config_file: cli.config,
                viewport_width: cli.viewport,
            }),
        }
    }
}

/// Parse a full argument list (program name first).
///
/// Help, version and usage errors come back as [`clap::Error`]; its
/// `exit_code()` is 0 for help/version and 2 for bad usage.
pub fn parse_args<I, T>(args: I) -> Result<CliCommand, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args).map(CliCommand::from)
}

/// Response wrapper printed on stdout
#[derive(Debug, Serialize)]
pub struct CommandResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl<T> CommandResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

impl From<&SubmissionOutcome> for CommandResponse<ValuationReport> {
    fn from(outcome: &SubmissionOutcome) -> Self {
        match outcome {
            SubmissionOutcome::Succeeded(report) => Self::success(report.clone()),
            SubmissionOutcome::Failed(error) => Self::error(error.user_message().to_string())
                .with_metadata("kind", error_kind(error))
                .with_metadata("detail", error.to_string()),
            SubmissionOutcome::Pending => Self::error("Submission did not finish".to_string()),
        }
    }
}

fn error_kind(error: &crate::domain::outcome::SubmissionError) -> String {
    serde_json::to_value(error)
        .ok()
        .and_then(|value| value.get("kind").and_then(|kind| kind.as_str().map(str::to_string)))
        .unwrap_or_default()
}

/// Result of one CLI submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSubmission {
    pub outcome: SubmissionOutcome,
    /// Animation phase when the animator was shut down.
    pub final_phase: AnimationPhase,
}

impl From<&CompletedSubmission> for CommandResponse<ValuationReport> {
    fn from(completed: &CompletedSubmission) -> Self {
        Self::from(&completed.outcome).with_metadata("animation", completed.final_phase.as_str())
    }
}

/// Submit an image file with the reqwest client.
pub async fn submit_image_command(
    config: &AppConfig,
    request: &SubmitRequest,
) -> Result<CompletedSubmission> {
    let client = HttpValuationClient::new(HttpClientConfig::from_api_config(&config.api))?;
    submit_with_client(config, Arc::new(client), request).await
}

/// Run one submission against `client` with the animation driven alongside.
pub async fn submit_with_client(
    config: &AppConfig,
    client: Arc<dyn ValuationClient>,
    request: &SubmitRequest,
) -> Result<CompletedSubmission> {
    let file = UploadFile::from_path(&request.image)
        .await
        .with_context(|| format!("Failed to read {}", request.image.display()))?;

    let controller = UploadController::from_config(config, client)?;
    info!(
        "Submitting {} to {}",
        file.file_name(),
        controller.endpoints().primary
    );

    let animator = PhaseAnimator::spawn(
        &controller.progress(),
        PhaseSchedule::from(&config.animation),
    );
    if let Some(width) = request.viewport_width {
        animator.set_viewport_width(width);
    }

    let mut changes = animator.phase_changes();
    let change_logger = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => info!(
                    "Animation: {} -> {} at {:.0}%",
                    change.from, change.to, change.progress
                ),
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} phase changes", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome = controller.submit(file).await;

    // Let the closing animation play out when progress reached the end
    if controller.progress().value() > 0.0 {
        let linger = Duration::from_millis(config.animation.final_clash_ms + 100);
        let mut frames = animator.frames();
        let settled = tokio::time::timeout(
            linger,
            frames.wait_for(|frame| frame.phase == AnimationPhase::Settled),
        )
        .await;
        if settled.is_err() {
            warn!("Animation did not settle within {:?}", linger);
        }
    }

    let final_phase = animator.current().phase;
    animator.shutdown().await;
    let _ = change_logger.await;
    Ok(CompletedSubmission {
        outcome,
        final_phase,
    })
}

/// Print the effective configuration as JSON.
pub fn show_config_command(config: &AppConfig) -> Result<String> {
    serde_json::to_string_pretty(config).context("Failed to serialize configuration")
}
