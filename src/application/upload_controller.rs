//! Upload controller
//!
//! Owns the single [`ProgressWriter`] and the published outcome. Each call
//! to [`UploadController::submit`] takes a fresh generation; whatever an
//! older generation produces afterwards is discarded (last submission wins).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::progress_source::{HeuristicProgress, ProgressSink, ProgressSource};
use crate::application::submission_pipeline::{Endpoints, SubmissionPipeline};
use crate::domain::outcome::{SubmissionError, SubmissionOutcome};
use crate::domain::progress::{ProgressSignal, ProgressWriter, progress_channel};
use crate::domain::upload::UploadFile;
use crate::domain::valuation_service::ValuationClient;
use crate::infrastructure::config::{AppConfig, ConfigError};

#[derive(Debug, Default)]
struct ActiveSubmission {
    generation: u64,
    cancel: CancellationToken,
}

/// Identifies one `submit` call.
#[derive(Debug, Clone)]
struct Ticket {
    generation: u64,
    cancel: CancellationToken,
}

pub struct UploadController {
    pipeline: SubmissionPipeline,
    source: Arc<dyn ProgressSource>,
    progress: ProgressWriter,
    outcome_tx: watch::Sender<SubmissionOutcome>,
    active: Mutex<ActiveSubmission>,
    max_file_bytes: u64,
    progress_cap: f64,
}

impl UploadController {
    pub fn new(
        pipeline: SubmissionPipeline,
        source: Arc<dyn ProgressSource>,
        max_file_bytes: u64,
        progress_cap: f64,
    ) -> Self {
        let (progress, _) = progress_channel();
        let (outcome_tx, _) = watch::channel(SubmissionOutcome::Pending);
        Self {
            pipeline,
            source,
            progress,
            outcome_tx,
            active: Mutex::new(ActiveSubmission::default()),
            max_file_bytes,
            progress_cap,
        }
    }

    /// Build a controller with the heuristic progress source and the
    /// configured endpoints.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<dyn ValuationClient>,
    ) -> Result<Self, ConfigError> {
        let endpoints =
            Endpoints::from_api_config(&config.api).map_err(|e| ConfigError::Validation {
                message: format!("invalid endpoint URL: {e}"),
            })?;
        Ok(Self::new(
            SubmissionPipeline::new(client, endpoints),
            Arc::new(HeuristicProgress::from(&config.progress)),
            config.upload.max_file_bytes,
            config.progress.cap,
        ))
    }

    /// Swap the progress source, e.g. for one fed by a real transport.
    #[must_use]
    pub fn with_progress_source(mut self, source: Arc<dyn ProgressSource>) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub const fn endpoints(&self) -> &Endpoints {
        self.pipeline.endpoints()
    }

    /// Read handle on the progress value.
    #[must_use]
    pub fn progress(&self) -> ProgressSignal {
        self.progress.signal()
    }

    /// Outcome of the current submission.
    #[must_use]
    pub fn outcomes(&self) -> watch::Receiver<SubmissionOutcome> {
        self.outcome_tx.subscribe()
    }

    /// Submit `file` and wait for its terminal outcome.
    ///
    /// Invalid files fail immediately without a request and without
    /// touching progress. If another submission or a [`reset`](Self::reset)
    /// replaces this one, the call resolves to `Failed(Superseded)` and its
    /// request is dropped.
    pub async fn submit(&self, file: UploadFile) -> SubmissionOutcome {
        if let Err(invalid) = file.validate(self.max_file_bytes) {
            warn!(file = file.file_name(), reason = %invalid, "Rejected upload");
            return SubmissionOutcome::Failed(SubmissionError::InvalidInput(invalid));
        }

        let submission_id = Uuid::new_v4();
        let ticket = self.begin();
        info!(
            %submission_id,
            generation = ticket.generation,
            file = file.file_name(),
            bytes = file.len(),
            "Submission started"
        );

        let sink = TicketSink {
            controller: self,
            ticket: &ticket,
        };
        let pipeline = self.pipeline.run(submission_id, &file);
        let progress = self.source.run(&sink);
        tokio::pin!(pipeline);
        tokio::pin!(progress);

        let mut progress_done = false;
        let result = loop {
            tokio::select! {
                biased;
                () = ticket.cancel.cancelled() => break None,
                result = &mut pipeline => break Some(result),
                () = &mut progress, if !progress_done => progress_done = true,
            }
        };

        match result {
            Some(result) => self.finish(submission_id, &ticket, SubmissionOutcome::from(result)),
            None => {
                info!(%submission_id, "Submission superseded");
                SubmissionOutcome::Failed(SubmissionError::Superseded)
            }
        }
    }

    /// Cancel whatever is in flight, zero the progress and publish `Pending`.
    pub fn reset(&self) {
        let mut active = self.lock_active();
        active.cancel.cancel();
        active.generation += 1;
        active.cancel = CancellationToken::new();
        self.progress.reset();
        self.outcome_tx.send_replace(SubmissionOutcome::Pending);
        debug!(generation = active.generation, "Upload state reset");
    }

    fn begin(&self) -> Ticket {
        let mut active = self.lock_active();
        active.cancel.cancel();
        active.generation += 1;
        active.cancel = CancellationToken::new();
        self.progress.reset();
        self.outcome_tx.send_replace(SubmissionOutcome::Pending);
        Ticket {
            generation: active.generation,
            cancel: active.cancel.clone(),
        }
    }

    fn finish(
        &self,
        submission_id: Uuid,
        ticket: &Ticket,
        outcome: SubmissionOutcome,
    ) -> SubmissionOutcome {
        let active = self.lock_active();
        if active.generation != ticket.generation {
            info!(%submission_id, "Discarding result of superseded submission");
            return SubmissionOutcome::Failed(SubmissionError::Superseded);
        }

        self.progress.complete();
        match &outcome {
            SubmissionOutcome::Failed(error) => {
                warn!(%submission_id, error = %error, "Submission failed");
            }
            _ => info!(%submission_id, "Submission succeeded"),
        }
        self.outcome_tx.send_replace(outcome.clone());
        outcome
    }

    fn report_progress(&self, ticket: &Ticket, value: f64) {
        let active = self.lock_active();
        if active.generation != ticket.generation || ticket.cancel.is_cancelled() {
            return;
        }
        self.progress.advance(value.min(self.progress_cap));
    }

    fn lock_active(&self) -> MutexGuard<'_, ActiveSubmission> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for UploadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadController")
            .field("pipeline", &self.pipeline)
            .field("progress", &self.progress)
            .field("max_file_bytes", &self.max_file_bytes)
            .finish_non_exhaustive()
    }
}

/// Progress sink bound to one submission's ticket.
struct TicketSink<'a> {
    controller: &'a UploadController,
    ticket: &'a Ticket,
}

impl ProgressSink for TicketSink<'_> {
    fn report(&self, value: f64) {
        self.controller.report_progress(self.ticket, value);
    }
}
