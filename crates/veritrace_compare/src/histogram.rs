//! Order-insensitive syscall histograms.

use crate::config::CompareConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use veritrace_trace::Event;

/// Count of each (possibly folded) syscall name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallHistogram {
    counts: BTreeMap<String, u64>,
}

impl SyscallHistogram {
    /// Empty histogram
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Histogram of the syscalls among already-filtered events
    #[must_use]
    pub fn from_events<'a>(
        events: impl IntoIterator<Item = &'a Event>,
        config: &CompareConfig,
    ) -> Self {
        let mut histogram = Self::new();
        for call in events.into_iter().filter_map(Event::as_syscall) {
            histogram.add(config.compared_name(&call.name));
        }
        histogram
    }

    /// Count one occurrence
    pub fn add(&mut self, name: &str) {
        *self.counts.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Occurrences of `name`
    #[must_use]
    pub fn count(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    /// Total occurrences
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Whether nothing was counted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Frequency-weighted symmetric difference over the size of the
    /// multiset union: `Σ|a−b| / Σ max(a,b)`.
    ///
    /// 0.0 for identical histograms (including two empty ones), 1.0 for
    /// disjoint ones.
    #[must_use]
    pub fn divergence_score(&self, other: &Self) -> f64 {
        let mut difference = 0u64;
        let mut union = 0u64;
        for name in self.names_with(other) {
            let (a, b) = (self.count(name), other.count(name));
            difference += a.abs_diff(b);
            union += a.max(b);
        }
        if union == 0 {
            0.0
        } else {
            difference as f64 / union as f64
        }
    }

    /// Names whose counts differ, largest difference first, then by name
    #[must_use]
    pub fn differences(&self, other: &Self) -> Vec<(String, u64, u64)> {
        let mut diffs: Vec<(String, u64, u64)> = self
            .names_with(other)
            .into_iter()
            .map(|name| (name.to_string(), self.count(name), other.count(name)))
            .filter(|(_, a, b)| a != b)
            .collect();
        diffs.sort_by(|x, y| y.1.abs_diff(y.2).cmp(&x.1.abs_diff(x.2)).then_with(|| x.0.cmp(&y.0)));
        diffs
    }

    fn names_with<'a>(&'a self, other: &'a Self) -> BTreeSet<&'a str> {
        self.counts
            .keys()
            .chain(other.counts.keys())
            .map(String::as_str)
            .collect()
    }
}
