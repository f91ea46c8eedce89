//! VERITRACE Validation Orchestrator
//!
//! Drives each reference program through capture, translation and build,
//! candidate capture and comparison, then classifies what went wrong.
//!
//! The translator and compiler sit behind [`CandidateBuilder`]; nothing
//! else in the workspace knows they exist. Finished batches become a
//! [`ValidationReport`] that serializes to JSON for the corpus builder.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod classify;
pub mod config;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod report;

pub use builder::{CandidateBuilder, CommandBuilder, CommandTemplate, ExternalFailure, PrebuiltCandidate};
pub use classify::{FailureClass, classify};
pub use config::{
    BatchManifest, BuilderConfig, DEFAULT_BUILD_TIMEOUT_MS, DEFAULT_CAPTURE_TIMEOUT_MS, DEFAULT_WORKERS, ManifestEntry,
    OrchestratorConfig, ValidatorConfig,
};
pub use error::{OrchestratorError, OrchestratorResult};
pub use job::{JobOutcome, JobSpec, MAX_DIAGNOSTIC_BYTES, Role, Stage, ValidationJob};
pub use orchestrator::Orchestrator;
pub use report::{DivergentSubject, ReportEntry, ValidationReport};
