//! Capture configuration and requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use veritrace_core::SubjectId;

/// Default capture timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Which interception backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TracerKind {
    /// Syscall interception through strace
    #[default]
    Strace,
    /// Output and exit status only
    OutputOnly,
}

impl fmt::Display for TracerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strace => f.write_str("strace"),
            Self::OutputOnly => f.write_str("output-only"),
        }
    }
}

impl FromStr for TracerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strace" => Ok(Self::Strace),
            "output-only" => Ok(Self::OutputOnly),
            other => Err(format!("unknown tracer '{other}'")),
        }
    }
}

/// Capture engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Backend
    pub tracer: TracerKind,
    /// strace binary, looked up on PATH when relative
    pub strace_path: PathBuf,
    /// Syscall classes passed as `-e trace=`
    pub trace_set: String,
    /// Longest string argument strace prints (`-s`)
    pub string_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tracer: TracerKind::Strace,
            strace_path: PathBuf::from("strace"),
            trace_set: "%file,%network,%process,%desc".to_string(),
            string_size: 64,
        }
    }
}

impl CaptureConfig {
    /// Set the backend
    #[must_use]
    pub fn with_tracer(mut self, tracer: TracerKind) -> Self {
        self.tracer = tracer;
        self
    }

    /// Set the strace binary
    #[must_use]
    pub fn with_strace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.strace_path = path.into();
        self
    }

    /// Set the traced syscall classes
    #[must_use]
    pub fn with_trace_set(mut self, set: impl Into<String>) -> Self {
        self.trace_set = set.into();
        self
    }
}

/// One program run to capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Program to launch (path or PATH-resolvable name)
    pub program: PathBuf,
    /// Program arguments
    pub args: Vec<String>,
    /// Bytes fed to stdin; stdin is null when absent
    pub input: Option<Vec<u8>>,
    /// Wall-clock budget
    pub timeout_ms: u64,
    /// Subject the trace belongs to
    pub subject_id: SubjectId,
    /// Child working directory
    pub workdir: PathBuf,
    /// Directory normalized to `<exe>`; defaults to the program's directory
    pub exe_dir: Option<PathBuf>,
}

impl CaptureRequest {
    /// Request with the default timeout, run in the current directory
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, subject_id: SubjectId) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            input: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            subject_id,
            workdir: PathBuf::from("."),
            exe_dir: None,
        }
    }

    /// Set arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set stdin contents
    #[must_use]
    pub fn with_input(mut self, input: Option<Vec<u8>>) -> Self {
        self.input = input;
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Set the directory normalized to `<exe>`
    #[must_use]
    pub fn with_exe_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.exe_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}
