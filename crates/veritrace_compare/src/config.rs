//! Comparator configuration.

use crate::error::CompareError;
use crate::families::fold_family;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use veritrace_trace::{Event, SyscallEvent};

/// Default histogram score above which traces diverge
pub const DEFAULT_SYSCALL_THRESHOLD: f64 = 0.30;

/// Default cap on reported sample mismatches
pub const DEFAULT_MAX_SAMPLES: usize = 8;

/// Default excerpt length for output diffs
pub const DEFAULT_EXCERPT_LEN: usize = 48;

/// Syscalls issued by language runtimes and allocators rather than by the
/// program's own logic
pub const RUNTIME_NOISE_SYSCALLS: &[&str] = &[
    "brk",
    "mmap",
    "mmap2",
    "munmap",
    "mremap",
    "mprotect",
    "madvise",
    "rt_sigaction",
    "rt_sigprocmask",
    "rt_sigreturn",
    "sigaltstack",
    "arch_prctl",
    "set_tid_address",
    "set_robust_list",
    "rseq",
    "prlimit64",
    "getrandom",
    "futex",
    "sched_getaffinity",
    "sched_yield",
    "getuid",
    "geteuid",
    "getgid",
    "getegid",
    "getpid",
    "getppid",
    "gettid",
    "getcwd",
    "uname",
    "sysinfo",
    "clock_gettime",
    "clock_getres",
    "gettimeofday",
    "poll",
];

/// Paths a language runtime or the dynamic loader opens on its own.
///
/// Interpreter files only count when they live outside the job's own
/// directories, i.e. after normalization they sit under `<abs>`.
static RUNTIME_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        \.so(\.[0-9]+)*"            # shared objects
        | ld\.so\.(cache|preload)"  # loader configuration
        | /__pycache__
        | "<abs>/(
            [^"/]*\.(py|pyc|pth|zip)"
            | pyvenv\.cfg" | site-packages" | lib-dynload" | encodings"
            | python[0-9.]*" | lib" | lib64"
        )
        "#,
    )
    .expect("static regex")
});

/// Events removed before comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreRule {
    /// Syscalls with these names (raw or family name)
    Syscalls(Vec<String>),
    /// Reads and writes that transferred zero bytes
    EmptyIo,
    /// Reads on fd 0 and writes on fd 1/2; their bytes are covered by the
    /// output check
    StdioTransfers,
    /// Non-transfer operations on fds 0-2 (`fstat`, `ioctl`, `lseek`,
    /// `fcntl`) that runtimes issue to query the terminal
    StdioQueries,
    /// Dynamic loader and interpreter module access, plus every later
    /// operation on the descriptors those opens returned
    RuntimeLoading,
    /// All stderr chunks
    Stderr,
}

impl IgnoreRule {
    /// The default rule set
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::EmptyIo,
            Self::StdioTransfers,
            Self::StdioQueries,
            Self::RuntimeLoading,
            Self::Syscalls(RUNTIME_NOISE_SYSCALLS.iter().map(|s| (*s).to_string()).collect()),
        ]
    }

    /// Whether this rule removes `event` on its own.
    ///
    /// Descriptor tracking for [`IgnoreRule::RuntimeLoading`] lives in
    /// [`crate::EventFilter`]; here only the opening access matches.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match (self, event) {
            (Self::Stderr, Event::StderrChunk(_)) => true,
            (Self::Syscalls(names), Event::Syscall(call)) => {
                let family = fold_family(&call.name);
                names.iter().any(|n| n == &call.name || n == family)
            }
            (Self::EmptyIo, Event::Syscall(call)) => {
                matches!(fold_family(&call.name), "read" | "write") && call.result == Some(0)
            }
            (Self::StdioTransfers, Event::Syscall(call)) => is_stdio_transfer(call),
            (Self::StdioQueries, Event::Syscall(call)) => is_stdio_query(call),
            (Self::RuntimeLoading, Event::Syscall(call)) => is_runtime_access(call),
            _ => false,
        }
    }
}

fn is_stdio_transfer(call: &SyscallEvent) -> bool {
    match (fold_family(&call.name), call.first_fd()) {
        ("read", Some(0)) => true,
        ("write", Some(1 | 2)) => true,
        _ => false,
    }
}

fn is_stdio_query(call: &SyscallEvent) -> bool {
    matches!(call.first_fd(), Some(0..=2))
        && matches!(
            fold_family(&call.name),
            "stat" | "ioctl" | "lseek" | "fcntl" | "fstatfs"
        )
}

pub(crate) fn is_runtime_access(call: &SyscallEvent) -> bool {
    RUNTIME_PATH.is_match(&call.args)
}

/// Comparator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// Skip the stdout check
    pub ignore_output: bool,
    /// Histogram score above which traces diverge, within `[0, 1]`
    pub syscall_threshold: f64,
    /// Events removed before comparing
    pub ignore_rules: Vec<IgnoreRule>,
    /// Compare syscall families instead of raw names
    pub fold_families: bool,
    /// Cap on `sample_mismatches`
    pub max_samples: usize,
    /// Bytes shown per side in an output diff excerpt
    pub excerpt_len: usize,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            ignore_output: false,
            syscall_threshold: DEFAULT_SYSCALL_THRESHOLD,
            ignore_rules: IgnoreRule::defaults(),
            fold_families: true,
            max_samples: DEFAULT_MAX_SAMPLES,
            excerpt_len: DEFAULT_EXCERPT_LEN,
        }
    }
}

impl CompareConfig {
    /// Set whether stdout is compared
    #[must_use]
    pub fn with_ignore_output(mut self, ignore: bool) -> Self {
        self.ignore_output = ignore;
        self
    }

    /// Set the syscall threshold
    #[must_use]
    pub fn with_syscall_threshold(mut self, threshold: f64) -> Self {
        self.syscall_threshold = threshold;
        self
    }

    /// Replace the ignore rules
    #[must_use]
    pub fn with_ignore_rules(mut self, rules: Vec<IgnoreRule>) -> Self {
        self.ignore_rules = rules;
        self
    }

    /// Add one ignore rule
    #[must_use]
    pub fn with_rule(mut self, rule: IgnoreRule) -> Self {
        self.ignore_rules.push(rule);
        self
    }

    /// Set family folding
    #[must_use]
    pub fn with_fold_families(mut self, fold: bool) -> Self {
        self.fold_families = fold;
        self
    }

    /// Set the sample cap
    #[must_use]
    pub fn with_max_samples(mut self, max: usize) -> Self {
        self.max_samples = max;
        self
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidThreshold` for a threshold outside `[0, 1]` and
    /// `InvalidRule` for an empty syscall list
    pub fn validate(&self) -> Result<(), CompareError> {
        if !(0.0..=1.0).contains(&self.syscall_threshold) {
            return Err(CompareError::InvalidThreshold {
                value: self.syscall_threshold,
            });
        }
        for rule in &self.ignore_rules {
            if let IgnoreRule::Syscalls(names) = rule {
                if names.is_empty() {
                    return Err(CompareError::InvalidRule {
                        reason: "syscalls rule lists no names".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Syscall name as compared: the family name when folding
    #[must_use]
    pub fn compared_name<'a>(&self, name: &'a str) -> &'a str {
        if self.fold_families {
            fold_family(name)
        } else {
            name
        }
    }
}
