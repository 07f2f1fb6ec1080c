//! Domain module - core types of the submission flow
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod outcome;
pub mod phase;
pub mod progress;
pub mod upload;
pub mod valuation_service;

pub use outcome::{
    ComicDetails, ComicIdentification, EndpointKind, InvalidInput, PriceSummary,
    SubmissionError, SubmissionOutcome, ValuationReport,
};
pub use phase::{AnimationPhase, PhaseFrame, PhaseMachine, PhaseRule, PhaseSchedule};
pub use progress::{ProgressSignal, ProgressSubscription, ProgressWriter, progress_channel};
pub use upload::UploadFile;
pub use valuation_service::{AttemptError, ValuationClient};
