//! VERITRACE Equivalence Comparator
//!
//! Decides whether a candidate trace behaves like a reference trace.
//! Two checks feed the verdict:
//!
//! - stdout bytes must match exactly (unless output is ignored)
//! - the order-insensitive syscall histograms must differ by no more than
//!   the configured threshold
//!
//! Noise that differs between a program and its translation (loader and
//! interpreter startup, memory management, how output is split into
//! writes) is removed by [`IgnoreRule`]s before either check runs.
//! A truncated trace always makes the result inconclusive.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod comparator;
pub mod config;
pub mod divergence;
pub mod error;
pub mod families;
pub mod filter;
pub mod histogram;
pub mod output;
pub mod result;

pub use comparator::{Comparator, compare};
pub use config::{CompareConfig, DEFAULT_MAX_SAMPLES, DEFAULT_SYSCALL_THRESHOLD, IgnoreRule};
pub use divergence::{Divergence, first_divergence, first_divergence_detail};
pub use error::CompareError;
pub use families::fold_family;
pub use filter::EventFilter;
pub use histogram::SyscallHistogram;
pub use output::OutputDiff;
pub use result::{ComparisonResult, ExitStatuses, InconclusiveReason, Side, Verdict};
