//! Tracer backend abstraction.
//!
//! A backend launches the program, supervises it and reports what it saw as
//! typed records. The engine never parses free-form tracer text.

use crate::error::CaptureError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use veritrace_trace::{ExitStatus, Stream};

/// Fully resolved launch parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    /// Absolute path of the program
    pub program: PathBuf,
    /// Program arguments
    pub args: Vec<String>,
    /// Bytes fed to stdin
    pub input: Option<Vec<u8>>,
    /// Child working directory
    pub workdir: PathBuf,
    /// Wall-clock budget
    pub timeout: Duration,
}

/// One syscall reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallRecord {
    /// Issuing process, when the backend reports it
    pub pid: Option<u32>,
    /// Microseconds since the epoch at syscall entry
    pub at_micros: u64,
    /// Syscall name
    pub name: String,
    /// Raw argument text
    pub args: String,
    /// Return value, `None` when unfinished or not an integer
    pub result: Option<i64>,
}

/// Bytes read from one of the child's output pipes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Source stream
    pub stream: Stream,
    /// Raw bytes
    pub bytes: Vec<u8>,
}

/// Everything a backend observed during one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCapture {
    /// Syscalls in log order
    pub syscalls: Vec<SyscallRecord>,
    /// Output chunks in read order per stream
    pub chunks: Vec<OutputChunk>,
    /// How the child ended
    pub exit: ExitStatus,
    /// The timeout fired and the child was killed
    pub timed_out: bool,
}

impl RawCapture {
    /// Capture with output only
    #[must_use]
    pub fn output_only(chunks: Vec<OutputChunk>, exit: ExitStatus, timed_out: bool) -> Self {
        Self {
            syscalls: Vec::new(),
            chunks,
            exit,
            timed_out,
        }
    }
}

/// Interception backend
#[async_trait]
pub trait Tracer: Send + Sync {
    /// Backend name used in errors and logs
    fn name(&self) -> &'static str;

    /// Check the backend can run on this host
    ///
    /// # Errors
    ///
    /// Returns `TracerUnavailable` when it cannot
    async fn ensure_available(&self) -> Result<(), CaptureError>;

    /// Run the program to completion, timeout, or cancellation
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the token fires, `SpawnFailed` or `Io`
    /// when supervision fails
    async fn run(&self, launch: &Launch, cancel: &CancellationToken)
    -> Result<RawCapture, CaptureError>;
}
