//! Batch reports for the corpus builder.

use crate::classify::{FailureClass, classify};
use crate::job::{JobOutcome, MAX_DIAGNOSTIC_BYTES, Stage, ValidationJob};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use veritrace_compare::{ComparisonResult, Verdict};
use veritrace_core::{JobId, SubjectId, TraceId, truncate_utf8};

/// One submitted job as reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Job id
    pub job_id: JobId,
    /// Program under validation
    pub subject_id: SubjectId,
    /// Final stage; always `Done` for a finished batch
    pub stage: Stage,
    /// Comparator verdict, when the traces were compared
    pub verdict: Option<Verdict>,
    /// Failure class, absent for equivalent jobs
    pub class: Option<FailureClass>,
    /// Bounded diagnostic for failed jobs
    pub diagnostic: Option<String>,
    /// Stored reference trace
    pub reference_trace: Option<TraceId>,
    /// Stored candidate trace
    pub candidate_trace: Option<TraceId>,
}

impl ReportEntry {
    fn from_job(job: &ValidationJob) -> Self {
        let class = classify(job);
        let (verdict, diagnostic) = match job.outcome() {
            Some(JobOutcome::Compared { result }) => (
                Some(result.verdict),
                class.map(|_| result.summary()),
            ),
            Some(JobOutcome::Failed { diagnostic, .. }) => (None, Some(diagnostic.clone())),
            None => (None, None),
        };
        Self {
            job_id: job.job_id(),
            subject_id: job.subject_id().clone(),
            stage: job.stage(),
            verdict,
            class,
            diagnostic: diagnostic.map(|d| truncate_utf8(&d, MAX_DIAGNOSTIC_BYTES)),
            reference_trace: job.reference_trace(),
            candidate_trace: job.candidate_trace(),
        }
    }
}

/// A divergent subject with the comparison that found it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergentSubject {
    /// Program under validation
    pub subject_id: SubjectId,
    /// Comparator output
    pub result: ComparisonResult,
}

/// Outcome of a batch: every submitted job exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// One entry per job, in submission order
    pub entries: Vec<ReportEntry>,
    /// Jobs per failure class, every class listed
    pub counts: IndexMap<FailureClass, usize>,
    /// Jobs judged equivalent
    pub equivalent: usize,
    /// Divergent subjects
    pub divergent: Vec<DivergentSubject>,
}

impl ValidationReport {
    /// Summarize finished jobs
    #[must_use]
    pub fn from_jobs(jobs: &[ValidationJob]) -> Self {
        let mut counts: IndexMap<FailureClass, usize> =
            FailureClass::ALL.iter().map(|c| (*c, 0)).collect();
        let mut equivalent = 0;
        let mut divergent = Vec::new();
        let mut entries = Vec::with_capacity(jobs.len());

        for job in jobs {
            let entry = ReportEntry::from_job(job);
            match entry.class {
                Some(class) => *counts.entry(class).or_insert(0) += 1,
                None if job.stage().is_done() => equivalent += 1,
                None => {}
            }
            if let Some(JobOutcome::Compared { result }) = job.outcome() {
                if result.verdict == Verdict::Divergent {
                    divergent.push(DivergentSubject {
                        subject_id: job.subject_id().clone(),
                        result: result.clone(),
                    });
                }
            }
            entries.push(entry);
        }

        Self {
            entries,
            counts,
            equivalent,
            divergent,
        }
    }

    /// Number of jobs
    #[must_use]
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    /// Jobs that did not validate
    #[must_use]
    pub fn failed(&self) -> usize {
        self.counts.values().sum()
    }

    /// Jobs in `class`
    #[must_use]
    pub fn count(&self, class: FailureClass) -> usize {
        self.counts.get(&class).copied().unwrap_or(0)
    }

    /// Pretty JSON
    ///
    /// # Errors
    ///
    /// Returns the serializer error; not expected for well-formed reports
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} jobs: {} equivalent, {} failed",
            self.total(),
            self.equivalent,
            self.failed()
        )?;
        for (class, n) in self.counts.iter().filter(|(_, n)| **n > 0) {
            writeln!(f, "  {class}: {n}")?;
        }
        for entry in self.entries.iter().filter(|e| e.class.is_some()) {
            let class = entry.class.map(|c| c.to_string()).unwrap_or_default();
            let diagnostic = entry.diagnostic.as_deref().unwrap_or("");
            writeln!(f, "  {} [{class}] {diagnostic}", entry.subject_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;
    use veritrace_compare::{ExitStatuses, OutputDiff};

    fn finished(name: &str, outcome: JobOutcome) -> ValidationJob {
        let mut job = ValidationJob::new(JobSpec::for_reference(name).unwrap());
        job.finish(outcome).unwrap();
        job
    }

    fn compared(verdict: Verdict, diff: Option<OutputDiff>) -> JobOutcome {
        JobOutcome::Compared {
            result: ComparisonResult {
                verdict,
                output_diff: diff,
                syscall_divergence_score: 0.0,
                first_divergence: None,
                sample_mismatches: Vec::new(),
                inconclusive: None,
                exit_statuses: ExitStatuses::default(),
            },
        }
    }

    #[test]
    fn test_counts() {
        let jobs = vec![
            finished("a", compared(Verdict::Equivalent, None)),
            finished("b", compared(Verdict::Divergent, OutputDiff::between(b"42\n", b"43\n", 8))),
            finished(
                "c",
                JobOutcome::Failed {
                    class: FailureClass::BuildFailed,
                    diagnostic: "rustc exit status: 1: error[E0308]".to_string(),
                },
            ),
            finished("d", compared(Verdict::Equivalent, None)),
        ];
        let report = ValidationReport::from_jobs(&jobs);
        assert_eq!(report.total(), 4);
        assert_eq!(report.equivalent, 2);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.count(FailureClass::OutputDivergence), 1);
        assert_eq!(report.count(FailureClass::BuildFailed), 1);
        assert_eq!(report.count(FailureClass::Timeout), 0);
        assert_eq!(report.divergent.len(), 1);
        assert_eq!(report.divergent[0].subject_id.as_str(), "b");
        assert_eq!(report.counts.len(), FailureClass::ALL.len());

        let entry = &report.entries[2];
        assert_eq!(entry.class, Some(FailureClass::BuildFailed));
        assert_eq!(entry.verdict, None);
        assert!(entry.diagnostic.as_deref().unwrap().contains("E0308"));
        assert_eq!(report.entries[0].diagnostic, None);
    }

    #[test]
    fn test_json() {
        let jobs = vec![finished("a", compared(Verdict::Equivalent, None))];
        let report = ValidationReport::from_jobs(&jobs);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["equivalent"], 1);
        assert_eq!(json["counts"]["build_failed"], 0);
        assert_eq!(json["entries"][0]["verdict"], "equivalent");
        let back: ValidationReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_display() {
        let jobs = vec![finished(
            "fib.py",
            JobOutcome::Failed {
                class: FailureClass::TranslationFailed,
                diagnostic: "unsupported: yield".to_string(),
            },
        )];
        let text = ValidationReport::from_jobs(&jobs).to_string();
        assert!(text.starts_with("1 jobs: 0 equivalent, 1 failed"));
        assert!(text.contains("fib.py [translation-failed] unsupported: yield"));
    }
}
