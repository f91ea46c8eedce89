//! Comparison outcome types.

use crate::output::OutputDiff;
use serde::{Deserialize, Serialize};
use std::fmt;
use veritrace_trace::ExitStatus;

/// Overall judgement of a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Same observable behavior within tolerance
    Equivalent,
    /// Output differs, or syscall patterns differ beyond the threshold
    Divergent,
    /// Not enough evidence to decide
    Inconclusive,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equivalent => "equivalent",
            Self::Divergent => "divergent",
            Self::Inconclusive => "inconclusive",
        };
        f.write_str(s)
    }
}

/// Which trace of a comparison something refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The original program
    Reference,
    /// The translated program
    Candidate,
    /// Both programs
    Both,
}

impl Side {
    /// Side from the truncation flags of both traces
    #[must_use]
    pub const fn from_flags(reference: bool, candidate: bool) -> Option<Self> {
        match (reference, candidate) {
            (true, true) => Some(Self::Both),
            (true, false) => Some(Self::Reference),
            (false, true) => Some(Self::Candidate),
            (false, false) => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reference => "reference",
            Self::Candidate => "candidate",
            Self::Both => "both",
        };
        f.write_str(s)
    }
}

/// Why a comparison could not decide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InconclusiveReason {
    /// A capture hit its timeout
    Truncated {
        /// Which trace was cut short
        side: Side,
    },
    /// A side produced no trace because the tracer could not run
    TracerUnavailable {
        /// Which side lacked a trace
        side: Side,
        /// Tracer diagnostic
        reason: String,
    },
}

impl fmt::Display for InconclusiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { side } => write!(f, "{side} trace truncated"),
            Self::TracerUnavailable { side, reason } => {
                write!(f, "no {side} trace: {reason}")
            }
        }
    }
}

/// Exit status of each side, for diagnostics only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatuses {
    /// Reference exit
    pub reference: Option<ExitStatus>,
    /// Candidate exit
    pub candidate: Option<ExitStatus>,
}

impl ExitStatuses {
    /// Whether both sides ended the same way
    #[must_use]
    pub fn agree(&self) -> bool {
        self.reference == self.candidate
    }
}

/// Everything a comparison found out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Overall judgement
    pub verdict: Verdict,
    /// First differing stdout range, if stdout was compared and differs
    pub output_diff: Option<OutputDiff>,
    /// Histogram divergence in `[0, 1]`
    pub syscall_divergence_score: f64,
    /// Reference event index of the first disagreement
    pub first_divergence: Option<usize>,
    /// Human-readable examples of what differs
    pub sample_mismatches: Vec<String>,
    /// Set exactly when the verdict is inconclusive
    pub inconclusive: Option<InconclusiveReason>,
    /// Exit statuses of both traces
    pub exit_statuses: ExitStatuses,
}

impl ComparisonResult {
    /// Result for a comparison where one side has no trace at all
    #[must_use]
    pub fn tracer_unavailable(side: Side, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Inconclusive,
            output_diff: None,
            syscall_divergence_score: 0.0,
            first_divergence: None,
            sample_mismatches: Vec::new(),
            inconclusive: Some(InconclusiveReason::TracerUnavailable {
                side,
                reason: reason.into(),
            }),
            exit_statuses: ExitStatuses::default(),
        }
    }

    /// Whether the verdict is [`Verdict::Equivalent`]
    #[must_use]
    pub fn is_equivalent(&self) -> bool {
        self.verdict == Verdict::Equivalent
    }

    /// One-line summary for logs and terminal output
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} (syscall score {:.3}",
            self.verdict, self.syscall_divergence_score
        );
        if let Some(index) = self.first_divergence {
            line.push_str(&format!(", first divergence at event {index}"));
        }
        line.push(')');
        if let Some(diff) = &self.output_diff {
            line.push_str(&format!("; {diff}"));
        }
        if let Some(reason) = &self.inconclusive {
            line.push_str(&format!("; {reason}"));
        }
        line
    }
}

impl fmt::Display for ComparisonResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "verdict: {}", self.verdict)?;
        if let Some(reason) = &self.inconclusive {
            writeln!(f, "reason: {reason}")?;
        }
        writeln!(f, "syscall divergence: {:.3}", self.syscall_divergence_score)?;
        if let Some(diff) = &self.output_diff {
            writeln!(f, "{diff}")?;
        }
        if let Some(index) = self.first_divergence {
            writeln!(f, "first divergence: event {index}")?;
        }
        let fmt_exit = |s: Option<ExitStatus>| s.map_or_else(|| "none".to_string(), |s| s.to_string());
        writeln!(
            f,
            "exit: reference {}, candidate {}",
            fmt_exit(self.exit_statuses.reference),
            fmt_exit(self.exit_statuses.candidate)
        )?;
        for sample in &self.sample_mismatches {
            writeln!(f, "  - {sample}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_from_flags() {
        assert_eq!(Side::from_flags(true, true), Some(Side::Both));
        assert_eq!(Side::from_flags(false, true), Some(Side::Candidate));
        assert_eq!(Side::from_flags(false, false), None);
    }

    #[test]
    fn test_tracer_unavailable_result() {
        let result = ComparisonResult::tracer_unavailable(Side::Candidate, "ptrace denied");
        assert_eq!(result.verdict, Verdict::Inconclusive);
        assert!(!result.is_equivalent());
        assert_eq!(result.summary(), "inconclusive (syscall score 0.000); no candidate trace: ptrace denied");
    }

    #[test]
    fn test_json_shape() {
        let result = ComparisonResult {
            verdict: Verdict::Inconclusive,
            output_diff: None,
            syscall_divergence_score: 0.0,
            first_divergence: None,
            sample_mismatches: vec![],
            inconclusive: Some(InconclusiveReason::Truncated { side: Side::Reference }),
            exit_statuses: ExitStatuses {
                reference: Some(ExitStatus::TimedOut),
                candidate: Some(ExitStatus::Code(0)),
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["verdict"], "inconclusive");
        assert_eq!(json["inconclusive"]["kind"], "truncated");
        assert_eq!(json["inconclusive"]["side"], "reference");
        let back: ComparisonResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
