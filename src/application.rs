//! Application layer module
//!
//! Orchestrates the domain types: the controller that owns a submission,
//! the two-attempt pipeline, progress sources and the animation driver.

pub mod phase_animator;
pub mod progress_source;
pub mod submission_pipeline;
pub mod upload_controller;

pub use phase_animator::{PhaseAnimator, PhaseChange};
pub use progress_source::{HeuristicProgress, ProgressSink, ProgressSource};
pub use submission_pipeline::{Endpoints, SubmissionPipeline};
pub use upload_controller::UploadController;
