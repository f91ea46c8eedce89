//! Validation jobs and their forward-only stage machine.

use crate::classify::FailureClass;
use crate::error::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::info;
use veritrace_compare::ComparisonResult;
use veritrace_core::{JobId, SubjectId, TraceId, truncate_utf8};

/// Longest diagnostic a failed job keeps
pub const MAX_DIAGNOSTIC_BYTES: usize = 512;

/// Which program a capture stage runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The original program
    Reference,
    /// The translated program
    Candidate,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => f.write_str("reference"),
            Self::Candidate => f.write_str("candidate"),
        }
    }
}

/// Where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Submitted, nothing has run
    Pending,
    /// A capture is in flight
    Capturing(Role),
    /// Waiting for the translator and compiler
    AwaitingCandidate,
    /// Traces are being compared
    Comparing,
    /// Terminal
    Done,
}

impl Stage {
    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Capturing(Role::Reference) => 1,
            Self::AwaitingCandidate => 2,
            Self::Capturing(Role::Candidate) => 3,
            Self::Comparing => 4,
            Self::Done => 5,
        }
    }

    /// Whether moving from `self` to `next` goes strictly forward
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }

    /// Whether this is the terminal stage
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Capturing(role) => write!(f, "capturing({role})"),
            Self::AwaitingCandidate => f.write_str("awaiting-candidate"),
            Self::Comparing => f.write_str("comparing"),
            Self::Done => f.write_str("done"),
        }
    }
}

/// How a finished job ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Both traces exist (or one side had no tracer) and were compared
    Compared {
        /// Comparator output
        result: ComparisonResult,
    },
    /// The pipeline stopped early
    Failed {
        /// Why it stopped
        class: FailureClass,
        /// Bounded diagnostic text
        diagnostic: String,
    },
}

/// What to validate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Program under validation
    pub subject_id: SubjectId,
    /// Reference artifact (executable, or script run by the interpreter)
    pub reference: PathBuf,
    /// Arguments for both programs
    #[serde(default)]
    pub args: Vec<String>,
    /// Bytes fed to stdin of both programs
    #[serde(default)]
    pub input: Option<Vec<u8>>,
    /// Prebuilt candidate; skips the translator and compiler
    #[serde(default)]
    pub candidate: Option<PathBuf>,
}

impl JobSpec {
    /// Spec for `reference`, named after its file name
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the path has no usable file name
    pub fn for_reference(reference: impl Into<PathBuf>) -> OrchestratorResult<Self> {
        let reference = reference.into();
        let name = reference
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let subject_id = SubjectId::new(name).map_err(|e| OrchestratorError::InvalidConfig {
            reason: format!("{}: {e}", reference.display()),
        })?;
        Ok(Self {
            subject_id,
            reference,
            args: Vec::new(),
            input: None,
            candidate: None,
        })
    }

    /// Set program arguments
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Set stdin bytes
    #[must_use]
    pub fn with_input(mut self, input: Option<Vec<u8>>) -> Self {
        self.input = input;
        self
    }

    /// Use a prebuilt candidate
    #[must_use]
    pub fn with_candidate(mut self, candidate: impl Into<PathBuf>) -> Self {
        self.candidate = Some(candidate.into());
        self
    }
}

/// One reference program's trip through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationJob {
    job_id: JobId,
    spec: JobSpec,
    candidate: Option<PathBuf>,
    stage: Stage,
    outcome: Option<JobOutcome>,
    reference_trace: Option<TraceId>,
    candidate_trace: Option<TraceId>,
}

impl ValidationJob {
    /// New pending job with a fresh id
    #[must_use]
    pub fn new(spec: JobSpec) -> Self {
        Self {
            job_id: JobId::new(),
            spec,
            candidate: None,
            stage: Stage::Pending,
            outcome: None,
            reference_trace: None,
            candidate_trace: None,
        }
    }

    /// Job id
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// What was submitted
    #[must_use]
    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    /// Subject under validation
    #[must_use]
    pub fn subject_id(&self) -> &SubjectId {
        &self.spec.subject_id
    }

    /// Current stage
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Outcome, once done
    #[must_use]
    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.as_ref()
    }

    /// Candidate executable, once built
    #[must_use]
    pub fn candidate(&self) -> Option<&PathBuf> {
        self.candidate.as_ref()
    }

    /// Stored reference trace
    #[must_use]
    pub fn reference_trace(&self) -> Option<TraceId> {
        self.reference_trace
    }

    /// Stored candidate trace
    #[must_use]
    pub fn candidate_trace(&self) -> Option<TraceId> {
        self.candidate_trace
    }

    /// Move to a later stage.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransition` unless `next` is strictly after the
    /// current stage. Use [`ValidationJob::finish`] to reach `Done`.
    pub fn advance(&mut self, next: Stage) -> OrchestratorResult<()> {
        if next.is_done() || !self.stage.can_advance_to(next) {
            return Err(OrchestratorError::IllegalTransition {
                from: self.stage,
                to: next,
            });
        }
        info!(job = %self.job_id, subject = %self.spec.subject_id, from = %self.stage, to = %next, "stage");
        self.stage = next;
        Ok(())
    }

    /// Record the built candidate executable
    pub fn set_candidate(&mut self, path: PathBuf) {
        self.candidate = Some(path);
    }

    /// Record a stored trace id for `role`
    pub fn set_trace(&mut self, role: Role, id: TraceId) {
        match role {
            Role::Reference => self.reference_trace = Some(id),
            Role::Candidate => self.candidate_trace = Some(id),
        }
    }

    /// Forget both trace ids, for a job whose run was abandoned
    pub fn clear_traces(&mut self) {
        self.reference_trace = None;
        self.candidate_trace = None;
    }

    /// End the job with `outcome`; a failure diagnostic is cut to
    /// [`MAX_DIAGNOSTIC_BYTES`].
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransition` if the job is already done
    pub fn finish(&mut self, outcome: JobOutcome) -> OrchestratorResult<()> {
        if self.stage.is_done() {
            return Err(OrchestratorError::IllegalTransition {
                from: self.stage,
                to: Stage::Done,
            });
        }
        let outcome = match outcome {
            JobOutcome::Failed { class, diagnostic } => JobOutcome::Failed {
                class,
                diagnostic: truncate_utf8(&diagnostic, MAX_DIAGNOSTIC_BYTES),
            },
            compared => compared,
        };
        info!(job = %self.job_id, subject = %self.spec.subject_id, from = %self.stage, "done");
        self.stage = Stage::Done;
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Shorthand for finishing with a failure
    ///
    /// # Errors
    ///
    /// Same as [`ValidationJob::finish`]
    pub fn fail(&mut self, class: FailureClass, diagnostic: impl Into<String>) -> OrchestratorResult<()> {
        self.finish(JobOutcome::Failed {
            class,
            diagnostic: diagnostic.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn job() -> ValidationJob {
        ValidationJob::new(JobSpec::for_reference("/srv/progs/fib.py").unwrap())
    }

    #[test]
    fn test_clear_traces() {
        let mut job = job();
        job.set_trace(Role::Reference, TraceId::new());
        job.set_trace(Role::Candidate, TraceId::new());
        job.clear_traces();
        assert_eq!(job.reference_trace(), None);
        assert_eq!(job.candidate_trace(), None);
    }

    #[test]
    fn test_spec_subject_from_file_name() {
        let spec = JobSpec::for_reference("/srv/progs/fib.py").unwrap();
        assert_eq!(spec.subject_id.as_str(), "fib.py");
        assert!(JobSpec::for_reference("/").is_err());
    }

    #[test]
    fn test_forward_path() {
        let mut job = job();
        job.advance(Stage::Capturing(Role::Reference)).unwrap();
        job.advance(Stage::AwaitingCandidate).unwrap();
        job.advance(Stage::Capturing(Role::Candidate)).unwrap();
        job.advance(Stage::Comparing).unwrap();
        job.fail(FailureClass::OutputDivergence, "x").unwrap();
        assert_eq!(job.stage(), Stage::Done);
    }

    #[test]
    fn test_backward_rejected() {
        let mut job = job();
        job.advance(Stage::AwaitingCandidate).unwrap();
        let err = job.advance(Stage::Capturing(Role::Reference)).unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::IllegalTransition {
                from: Stage::AwaitingCandidate,
                to: Stage::Capturing(Role::Reference),
            }
        );
        assert!(job.advance(Stage::AwaitingCandidate).is_err());
    }

    #[test]
    fn test_done_is_terminal() {
        let mut job = job();
        job.fail(FailureClass::BuildFailed, "cc exited 1").unwrap();
        assert!(job.fail(FailureClass::Timeout, "again").is_err());
        assert!(job.advance(Stage::Comparing).is_err());
        assert!(matches!(
            job.outcome(),
            Some(JobOutcome::Failed { class: FailureClass::BuildFailed, .. })
        ));
    }

    #[test]
    fn test_advance_cannot_skip_outcome() {
        let mut job = job();
        assert!(job.advance(Stage::Done).is_err());
    }

    #[test]
    fn test_diagnostic_bounded() {
        let mut job = job();
        job.fail(FailureClass::TranslationFailed, "e".repeat(4096)).unwrap();
        let Some(JobOutcome::Failed { diagnostic, .. }) = job.outcome() else {
            panic!("expected failure");
        };
        assert!(diagnostic.len() <= MAX_DIAGNOSTIC_BYTES);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Capturing(Role::Candidate).to_string(), "capturing(candidate)");
        assert_eq!(Stage::AwaitingCandidate.to_string(), "awaiting-candidate");
    }

    fn arb_stage() -> impl Strategy<Value = Stage> {
        prop_oneof![
            Just(Stage::Pending),
            Just(Stage::Capturing(Role::Reference)),
            Just(Stage::AwaitingCandidate),
            Just(Stage::Capturing(Role::Candidate)),
            Just(Stage::Comparing),
            Just(Stage::Done),
        ]
    }

    proptest! {
        #[test]
        fn prop_stage_never_moves_backward(steps in proptest::collection::vec(arb_stage(), 0..16)) {
            let mut job = job();
            for next in steps {
                let before = job.stage();
                let accepted = job.advance(next).is_ok();
                prop_assert_eq!(accepted, !next.is_done() && before.can_advance_to(next));
                prop_assert!(job.stage() == before || before.can_advance_to(job.stage()));
                prop_assert!(!job.stage().is_done());
            }
        }
    }
}
