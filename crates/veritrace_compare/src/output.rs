//! Byte-level stdout comparison.

use serde::{Deserialize, Serialize};
use std::fmt;

/// First differing byte range between two outputs.
///
/// The common prefix and common suffix are trimmed; what remains is
/// `reference[offset..reference_end]` vs `candidate[offset..candidate_end]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDiff {
    /// First differing byte
    pub offset: usize,
    /// End of the differing range in the reference (exclusive)
    pub reference_end: usize,
    /// End of the differing range in the candidate (exclusive)
    pub candidate_end: usize,
    /// Reference bytes from `offset`, escaped and shortened
    pub reference_excerpt: String,
    /// Candidate bytes from `offset`, escaped and shortened
    pub candidate_excerpt: String,
}

impl OutputDiff {
    /// Diff two outputs; `None` when they are identical
    #[must_use]
    pub fn between(reference: &[u8], candidate: &[u8], excerpt_len: usize) -> Option<Self> {
        if reference == candidate {
            return None;
        }
        let offset = reference
            .iter()
            .zip(candidate)
            .take_while(|(a, b)| a == b)
            .count();
        let max_suffix = reference.len().min(candidate.len()) - offset;
        let suffix = reference
            .iter()
            .rev()
            .zip(candidate.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();
        let reference_end = reference.len() - suffix;
        let candidate_end = candidate.len() - suffix;

        Some(Self {
            offset,
            reference_end,
            candidate_end,
            reference_excerpt: excerpt(reference, offset, excerpt_len),
            candidate_excerpt: excerpt(candidate, offset, excerpt_len),
        })
    }
}

/// Escaped `bytes[offset..]`, cut to `max` bytes
fn excerpt(bytes: &[u8], offset: usize, max: usize) -> String {
    let stop = bytes.len().min(offset + max);
    let mut text = bytes[offset..stop].escape_ascii().to_string();
    if stop < bytes.len() {
        text.push_str("...");
    }
    text
}

impl fmt::Display for OutputDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stdout differs at byte {}: reference \"{}\" vs candidate \"{}\"",
            self.offset, self.reference_excerpt, self.candidate_excerpt
        )
    }
}
