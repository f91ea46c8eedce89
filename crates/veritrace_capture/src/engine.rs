//! Capture engine.
//!
//! Resolves the program, hands it to the tracer backend, then merges the
//! backend's syscall and output observations into one canonical,
//! normalized trace.

use crate::config::{CaptureConfig, CaptureRequest, TracerKind};
use crate::error::CaptureError;
use crate::output_only::OutputOnlyTracer;
use crate::strace::StraceTracer;
use crate::tracer::{Launch, RawCapture, SyscallRecord, Tracer};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use veritrace_core::SubjectId;
use veritrace_trace::{Event, ExitStatus, Normalizer, Stream, TraceBuilder, TraceRecord};

/// Runs programs and turns what they did into [`TraceRecord`]s
#[derive(Clone)]
pub struct CaptureEngine {
    tracer: Arc<dyn Tracer>,
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("tracer", &self.tracer.name())
            .finish()
    }
}

impl CaptureEngine {
    /// Engine over an explicit backend
    #[must_use]
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }

    /// Engine with the backend named in `config`
    #[must_use]
    pub fn from_config(config: &CaptureConfig) -> Self {
        let tracer: Arc<dyn Tracer> = match config.tracer {
            TracerKind::Strace => Arc::new(StraceTracer::new(config)),
            TracerKind::OutputOnly => Arc::new(OutputOnlyTracer::new()),
        };
        Self::new(tracer)
    }

    /// Name of the backend in use
    #[must_use]
    pub fn tracer_name(&self) -> &'static str {
        self.tracer.name()
    }

    /// Capture one run.
    ///
    /// A timeout yields `Ok` with a truncated trace ending in
    /// `Exit(TimedOut)`.
    ///
    /// # Errors
    ///
    /// - `SpawnFailed` when the program or working directory is unusable
    /// - `TracerUnavailable` when the backend cannot run here
    /// - `Cancelled` when `cancel` fires first
    #[instrument(skip_all, fields(subject = %request.subject_id, tracer = self.tracer.name()))]
    pub async fn capture(
        &self,
        request: &CaptureRequest,
        cancel: &CancellationToken,
    ) -> Result<TraceRecord, CaptureError> {
        let program = resolve_program(&request.program)?;
        let workdir = tokio::fs::canonicalize(&request.workdir)
            .await
            .map_err(|e| CaptureError::SpawnFailed {
                program: request.program.display().to_string(),
                reason: format!("working directory {}: {e}", request.workdir.display()),
            })?;

        self.tracer.ensure_available().await?;

        let launch = Launch {
            program: program.clone(),
            args: request.args.clone(),
            input: request.input.clone(),
            workdir: workdir.clone(),
            timeout: Duration::from_millis(request.timeout_ms),
        };
        debug!(program = %program.display(), args = ?launch.args, "capture starting");
        let raw = self.tracer.run(&launch, cancel).await?;

        let exe_dir = request
            .exe_dir
            .clone()
            .or_else(|| program.parent().map(Path::to_path_buf));
        let normalizer = Normalizer::for_run(&workdir, exe_dir.as_deref());
        let trace = assemble(raw, &normalizer, request.subject_id.clone());

        info!(
            events = trace.len(),
            syscalls = trace.syscall_count(),
            truncated = trace.is_truncated(),
            exit = ?trace.exit_status(),
            "capture finished"
        );
        Ok(trace)
    }

    /// Capture `executable` run in the current directory with a fresh
    /// cancellation token; the subject is the executable's file name.
    ///
    /// # Errors
    ///
    /// Same as [`CaptureEngine::capture`]
    pub async fn capture_program(
        &self,
        executable: &Path,
        args: &[String],
        input: Option<Vec<u8>>,
        timeout_ms: u64,
    ) -> Result<TraceRecord, CaptureError> {
        let name = executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let subject_id = SubjectId::new(name).map_err(|e| CaptureError::SpawnFailed {
            program: executable.display().to_string(),
            reason: e.to_string(),
        })?;
        let request = CaptureRequest::new(executable, subject_id)
            .with_args(args.iter().cloned())
            .with_input(input)
            .with_timeout_ms(timeout_ms);
        self.capture(&request, &CancellationToken::new()).await
    }
}

impl Default for CaptureEngine {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

/// Resolve a program to an absolute, executable file.
///
/// Bare names are searched on `PATH`; relative paths resolve against the
/// current directory.
///
/// # Errors
///
/// Returns `SpawnFailed` when nothing executable is found
pub fn resolve_program(program: &Path) -> Result<PathBuf, CaptureError> {
    let spawn_failed = |reason: String| CaptureError::SpawnFailed {
        program: program.display().to_string(),
        reason,
    };

    if program.as_os_str().is_empty() {
        return Err(spawn_failed("empty program path".to_string()));
    }

    if program.components().count() == 1 && !program.is_absolute() {
        let path = std::env::var_os("PATH").unwrap_or_default();
        return std::env::split_paths(&path)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
            .ok_or_else(|| spawn_failed("not found on PATH".to_string()));
    }

    let absolute = if program.is_absolute() {
        program.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| spawn_failed(e.to_string()))?
            .join(program)
    };

    match std::fs::metadata(&absolute) {
        Err(e) => Err(spawn_failed(e.to_string())),
        Ok(meta) if !meta.is_file() => Err(spawn_failed("not a regular file".to_string())),
        Ok(meta) if meta.permissions().mode() & 0o111 == 0 => {
            Err(spawn_failed("not executable".to_string()))
        }
        Ok(_) => Ok(absolute),
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Syscalls that move bytes from a descriptor's caller to stdout/stderr
const WRITE_FAMILY: &[&str] = &["write", "writev", "pwrite64", "pwritev", "pwritev2"];

/// Stream and byte count a syscall wrote to the child's stdout or stderr
fn output_write(call: &SyscallRecord) -> Option<(Stream, usize)> {
    if !WRITE_FAMILY.contains(&call.name.as_str()) {
        return None;
    }
    let stream = match call.args.split(',').next()?.trim().parse::<i64>().ok()? {
        1 => Stream::Stdout,
        2 => Stream::Stderr,
        _ => return None,
    };
    let written = usize::try_from(call.result?).ok().filter(|n| *n > 0)?;
    Some((stream, written))
}

/// Bytes of one stream not yet placed in the trace
struct Pending {
    bytes: Vec<u8>,
    placed: usize,
}

impl Pending {
    fn take(&mut self, n: usize) -> Option<Vec<u8>> {
        let end = self.placed.saturating_add(n).min(self.bytes.len());
        let taken = self.bytes[self.placed..end].to_vec();
        self.placed = end;
        (!taken.is_empty()).then_some(taken)
    }

    fn rest(&mut self) -> Option<Vec<u8>> {
        self.take(usize::MAX)
    }
}

/// Build the canonical trace for a run.
///
/// How the pipes happened to be read never shows in the result: each
/// stream is first joined into one buffer. Syscalls keep their timestamp
/// order, and every successful write to fd 1 or 2 is followed by the bytes
/// it wrote, taken in order from that stream's buffer. Bytes no traced
/// write accounts for (all of them for output-only capture) close the
/// trace as one stdout chunk then one stderr chunk, before the exit event.
fn assemble(raw: RawCapture, normalizer: &Normalizer, subject_id: SubjectId) -> TraceRecord {
    let mut stdout = Pending { bytes: Vec::new(), placed: 0 };
    let mut stderr = Pending { bytes: Vec::new(), placed: 0 };
    for chunk in raw.chunks {
        match chunk.stream {
            Stream::Stdout => stdout.bytes.extend(chunk.bytes),
            Stream::Stderr => stderr.bytes.extend(chunk.bytes),
        }
    }

    let mut syscalls = raw.syscalls;
    syscalls.sort_by_key(|call| call.at_micros);

    let mut builder = TraceBuilder::new(subject_id);
    for call in &syscalls {
        builder.push(Event::Syscall(normalizer.normalize_call(&call.name, &call.args, call.result)));
        let placed = match output_write(call) {
            Some((Stream::Stdout, n)) => stdout.take(n).map(|b| Event::chunk(Stream::Stdout, b)),
            Some((Stream::Stderr, n)) => stderr.take(n).map(|b| Event::chunk(Stream::Stderr, b)),
            None => None,
        };
        if let Some(event) = placed {
            builder.push(event);
        }
    }
    if let Some(rest) = stdout.rest() {
        builder.push(Event::chunk(Stream::Stdout, rest));
    }
    if let Some(rest) = stderr.rest() {
        builder.push(Event::chunk(Stream::Stderr, rest));
    }

    let exit = if raw.timed_out {
        ExitStatus::TimedOut
    } else {
        raw.exit
    };
    builder.push(Event::Exit(exit));
    builder.truncated(raw.timed_out).finish()
}
