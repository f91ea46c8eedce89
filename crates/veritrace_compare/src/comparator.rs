//! The equivalence decision.

use crate::config::CompareConfig;
use crate::divergence::first_divergence_detail;
use crate::error::CompareError;
use crate::filter::EventFilter;
use crate::histogram::SyscallHistogram;
use crate::output::OutputDiff;
use crate::result::{ComparisonResult, ExitStatuses, InconclusiveReason, Side, Verdict};
use tracing::debug;
use veritrace_trace::TraceRecord;

/// Compare a candidate trace against a reference trace.
///
/// Rules, in priority order:
/// 1. a truncated trace on either side makes the result inconclusive
/// 2. any stdout difference is divergent, unless output is ignored
/// 3. a syscall histogram score above the threshold is divergent
///
/// Everything else is equivalent. Exit statuses and the first divergence
/// are reported but never decide the verdict.
#[must_use]
pub fn compare(
    reference: &TraceRecord,
    candidate: &TraceRecord,
    config: &CompareConfig,
) -> ComparisonResult {
    let filter = EventFilter::new(config);
    let ref_kept = filter.retained(reference.events());
    let cand_kept = filter.retained(candidate.events());

    let ref_hist = SyscallHistogram::from_events(ref_kept.iter().map(|(_, e)| *e), config);
    let cand_hist = SyscallHistogram::from_events(cand_kept.iter().map(|(_, e)| *e), config);
    let score = ref_hist.divergence_score(&cand_hist);

    let output_diff = if config.ignore_output {
        None
    } else {
        OutputDiff::between(&reference.stdout(), &candidate.stdout(), config.excerpt_len)
    };

    let divergence = first_divergence_detail(reference, candidate, config);
    let exit_statuses = ExitStatuses {
        reference: reference.exit_status(),
        candidate: candidate.exit_status(),
    };

    let inconclusive = Side::from_flags(reference.is_truncated(), candidate.is_truncated())
        .map(|side| InconclusiveReason::Truncated { side });

    let verdict = if inconclusive.is_some() {
        Verdict::Inconclusive
    } else if output_diff.is_some() || score > config.syscall_threshold {
        Verdict::Divergent
    } else {
        Verdict::Equivalent
    };

    let mut samples = Vec::new();
    if let Some(diff) = &output_diff {
        samples.push(diff.to_string());
    }
    if !exit_statuses.agree() {
        samples.push(format!(
            "exit status: reference {}, candidate {}",
            describe_exit(exit_statuses.reference),
            describe_exit(exit_statuses.candidate)
        ));
    }
    if let Some(d) = &divergence {
        samples.push(format!(
            "event {}: reference {}, candidate {}",
            d.index, d.reference, d.candidate
        ));
    }
    for (name, a, b) in ref_hist.differences(&cand_hist) {
        if samples.len() >= config.max_samples {
            break;
        }
        samples.push(format!("syscall {name}: reference {a}, candidate {b}"));
    }
    samples.truncate(config.max_samples);

    let result = ComparisonResult {
        verdict,
        output_diff,
        syscall_divergence_score: score,
        first_divergence: divergence.map(|d| d.index),
        sample_mismatches: samples,
        inconclusive,
        exit_statuses,
    };

    debug!(
        subject = %reference.subject_id(),
        verdict = %result.verdict,
        score = result.syscall_divergence_score,
        "compared traces"
    );
    result
}

fn describe_exit(status: Option<veritrace_trace::ExitStatus>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

/// A validated comparison configuration, reusable across many pairs
#[derive(Debug, Clone, Default)]
pub struct Comparator {
    config: CompareConfig,
}

impl Comparator {
    /// Wrap a configuration after validating it
    ///
    /// # Errors
    ///
    /// Returns the first problem [`CompareConfig::validate`] finds
    pub fn new(config: CompareConfig) -> Result<Self, CompareError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &CompareConfig {
        &self.config
    }

    /// Compare a pair of traces
    #[must_use]
    pub fn compare(&self, reference: &TraceRecord, candidate: &TraceRecord) -> ComparisonResult {
        compare(reference, candidate, &self.config)
    }
}
