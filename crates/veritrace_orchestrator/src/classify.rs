//! Failure classification.

use crate::job::{JobOutcome, ValidationJob};
use serde::{Deserialize, Serialize};
use std::fmt;
use veritrace_compare::{InconclusiveReason, Side, Verdict};

/// Why a job did not validate; exactly one per failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The translator rejected the reference
    TranslationFailed,
    /// The translated source did not compile
    BuildFailed,
    /// The reference could not be traced or stored
    ReferenceCaptureFailed,
    /// The candidate could not be traced or stored
    CandidateCaptureFailed,
    /// stdout differs
    OutputDivergence,
    /// stdout matches but syscall patterns differ beyond the threshold
    SyscallDivergence,
    /// A capture or build ran out of time, or the job was cancelled
    Timeout,
}

impl FailureClass {
    /// Every class, in declaration order
    pub const ALL: [Self; 7] = [
        Self::TranslationFailed,
        Self::BuildFailed,
        Self::ReferenceCaptureFailed,
        Self::CandidateCaptureFailed,
        Self::OutputDivergence,
        Self::SyscallDivergence,
        Self::Timeout,
    ];

    /// Whether the class is a behavioral divergence rather than a
    /// pipeline failure
    #[must_use]
    pub const fn is_divergence(self) -> bool {
        matches!(self, Self::OutputDivergence | Self::SyscallDivergence)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TranslationFailed => "translation-failed",
            Self::BuildFailed => "build-failed",
            Self::ReferenceCaptureFailed => "reference-capture-failed",
            Self::CandidateCaptureFailed => "candidate-capture-failed",
            Self::OutputDivergence => "output-divergence",
            Self::SyscallDivergence => "syscall-divergence",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Failure class of a job; `None` for unfinished and equivalent jobs
#[must_use]
pub fn classify(job: &ValidationJob) -> Option<FailureClass> {
    if !job.stage().is_done() {
        return None;
    }
    match job.outcome()? {
        JobOutcome::Failed { class, .. } => Some(*class),
        JobOutcome::Compared { result } => match result.verdict {
            Verdict::Equivalent => None,
            Verdict::Divergent if result.output_diff.is_some() => Some(FailureClass::OutputDivergence),
            Verdict::Divergent => Some(FailureClass::SyscallDivergence),
            Verdict::Inconclusive => match &result.inconclusive {
                Some(InconclusiveReason::TracerUnavailable { side: Side::Candidate, .. }) => {
                    Some(FailureClass::CandidateCaptureFailed)
                }
                Some(InconclusiveReason::TracerUnavailable { .. }) => {
                    Some(FailureClass::ReferenceCaptureFailed)
                }
                Some(InconclusiveReason::Truncated { .. }) | None => Some(FailureClass::Timeout),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobSpec, Role, Stage};
    use veritrace_compare::{ComparisonResult, ExitStatuses, OutputDiff};

    fn done_with(outcome: JobOutcome) -> ValidationJob {
        let mut job = ValidationJob::new(JobSpec::for_reference("prog").unwrap());
        job.finish(outcome).unwrap();
        job
    }

    fn result(verdict: Verdict) -> ComparisonResult {
        ComparisonResult {
            verdict,
            output_diff: None,
            syscall_divergence_score: 0.0,
            first_divergence: None,
            sample_mismatches: Vec::new(),
            inconclusive: None,
            exit_statuses: ExitStatuses::default(),
        }
    }

    #[test]
    fn test_unfinished_is_unclassified() {
        let mut job = ValidationJob::new(JobSpec::for_reference("prog").unwrap());
        assert_eq!(classify(&job), None);
        job.advance(Stage::Capturing(Role::Reference)).unwrap();
        assert_eq!(classify(&job), None);
    }

    #[test]
    fn test_failed_passes_class_through() {
        for class in FailureClass::ALL {
            let job = done_with(JobOutcome::Failed {
                class,
                diagnostic: String::new(),
            });
            assert_eq!(classify(&job), Some(class));
        }
    }

    #[test]
    fn test_compared_verdicts() {
        let equivalent = done_with(JobOutcome::Compared { result: result(Verdict::Equivalent) });
        assert_eq!(classify(&equivalent), None);

        let syscall = done_with(JobOutcome::Compared { result: result(Verdict::Divergent) });
        assert_eq!(classify(&syscall), Some(FailureClass::SyscallDivergence));

        let mut with_diff = result(Verdict::Divergent);
        with_diff.output_diff = OutputDiff::between(b"42\n", b"43\n", 16);
        let output = done_with(JobOutcome::Compared { result: with_diff });
        assert_eq!(classify(&output), Some(FailureClass::OutputDivergence));
    }

    #[test]
    fn test_inconclusive_reasons() {
        let mut truncated = result(Verdict::Inconclusive);
        truncated.inconclusive = Some(InconclusiveReason::Truncated { side: Side::Reference });
        assert_eq!(
            classify(&done_with(JobOutcome::Compared { result: truncated })),
            Some(FailureClass::Timeout)
        );

        let reference = ComparisonResult::tracer_unavailable(Side::Reference, "no strace");
        assert_eq!(
            classify(&done_with(JobOutcome::Compared { result: reference })),
            Some(FailureClass::ReferenceCaptureFailed)
        );

        let candidate = ComparisonResult::tracer_unavailable(Side::Candidate, "no strace");
        assert_eq!(
            classify(&done_with(JobOutcome::Compared { result: candidate })),
            Some(FailureClass::CandidateCaptureFailed)
        );
    }
}
