//! Supervised child processes.
//!
//! The child gets its own process group so a timeout or cancellation can
//! kill everything it spawned. Output pipes are drained concurrently with
//! the wait.

use crate::error::CaptureError;
use crate::tracer::OutputChunk;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use veritrace_trace::{ExitStatus, Stream};

const READ_BUF_LEN: usize = 8 * 1024;

/// Result of a supervised run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supervised {
    /// Output in read order per stream
    pub chunks: Vec<OutputChunk>,
    /// How the child ended; `TimedOut` when killed by the timeout
    pub exit: ExitStatus,
    /// The timeout fired
    pub timed_out: bool,
}

enum Waited {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Run a prepared command under supervision.
///
/// Stdio of `command` is overridden: stdin is piped when `input` is given
/// and null otherwise; stdout and stderr are piped.
///
/// # Errors
///
/// Returns `SpawnFailed` if the command cannot start, `Cancelled` if the
/// token fires first, `Io` if waiting on the child fails
pub async fn run_supervised(
    mut command: Command,
    label: &str,
    input: Option<Vec<u8>>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Supervised, CaptureError> {
    if cancel.is_cancelled() {
        return Err(CaptureError::Cancelled);
    }

    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .process_group(0);

    let mut child = command.spawn().map_err(|e| CaptureError::SpawnFailed {
        program: label.to_string(),
        reason: e.to_string(),
    })?;
    let pgid = child.id();
    debug!(program = label, pid = ?pgid, "child spawned");

    if let (Some(mut stdin), Some(data)) = (child.stdin.take(), input) {
        tokio::spawn(async move {
            // The child may exit without reading its input
            if let Err(e) = stdin.write_all(&data).await {
                debug!(error = %e, "stdin write ended early");
            }
        });
    }

    let stdout = child.stdout.take().map(|out| drain(out, Stream::Stdout));
    let stderr = child.stderr.take().map(|err| drain(err, Stream::Stderr));

    let waited = tokio::select! {
        status = child.wait() => Waited::Exited(status.map_err(CaptureError::io)?),
        () = tokio::time::sleep(timeout) => Waited::TimedOut,
        () = cancel.cancelled() => Waited::Cancelled,
    };

    // Descendants that outlive the leader would hold the pipes open
    if let Some(pgid) = pgid {
        kill_group(pgid);
    }

    let exit = match waited {
        Waited::Exited(status) => exit_status(status),
        Waited::TimedOut => {
            reap(&mut child).await;
            debug!(program = label, ?timeout, "child killed after timeout");
            ExitStatus::TimedOut
        }
        Waited::Cancelled => {
            reap(&mut child).await;
            debug!(program = label, "child killed on cancellation");
            return Err(CaptureError::Cancelled);
        }
    };

    let mut chunks = collect(stdout).await;
    chunks.extend(collect(stderr).await);

    Ok(Supervised {
        chunks,
        timed_out: exit == ExitStatus::TimedOut,
        exit,
    })
}

fn drain<R>(mut reader: R, stream: Stream) -> JoinHandle<Vec<OutputChunk>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunks = Vec::new();
        let mut buf = vec![0u8; READ_BUF_LEN];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => chunks.push(OutputChunk {
                    stream,
                    bytes: buf[..n].to_vec(),
                }),
                Err(e) => {
                    debug!(?stream, error = %e, "output pipe read failed");
                    break;
                }
            }
        }
        chunks
    })
}

async fn collect(handle: Option<JoinHandle<Vec<OutputChunk>>>) -> Vec<OutputChunk> {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

async fn reap(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "kill of leader failed");
    }
    if let Err(e) = child.wait().await {
        debug!(error = %e, "wait after kill failed");
    }
}

/// SIGKILL every process in the group; a group that is already gone is fine
fn kill_group(pgid: u32) {
    let Ok(raw) = i32::try_from(pgid) else {
        warn!(pgid, "process group id out of range");
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "kill of process group failed"),
    }
}

fn exit_status(status: std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitStatus::Code(code),
        (None, Some(signal)) => ExitStatus::Signal(signal),
        (None, None) => ExitStatus::Code(-1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        command
    }

    fn stdout_of(run: &Supervised) -> Vec<u8> {
        run.chunks
            .iter()
            .filter(|c| c.stream == Stream::Stdout)
            .flat_map(|c| c.bytes.iter().copied())
            .collect()
    }

    #[tokio::test]
    async fn test_run_collects_output_and_exit() {
        let run = run_supervised(
            sh("printf 'hello\\n'; printf 'oops' >&2; exit 3"),
            "sh",
            None,
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(stdout_of(&run), b"hello\n");
        assert_eq!(run.exit, ExitStatus::Code(3));
        assert!(!run.timed_out);
        assert!(run.chunks.iter().any(|c| c.stream == Stream::Stderr));
    }

    #[tokio::test]
    async fn test_input_fed_to_stdin() {
        let run = run_supervised(
            sh("cat"),
            "sh",
            Some(b"piped input".to_vec()),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(stdout_of(&run), b"piped input");
    }

    #[tokio::test]
    async fn test_timeout_kills_group() {
        let started = std::time::Instant::now();
        let run = run_supervised(
            sh("printf 'start\\n'; sleep 30 & sleep 30"),
            "sh",
            None,
            Duration::from_millis(300),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(run.timed_out);
        assert_eq!(run.exit, ExitStatus::TimedOut);
        assert_eq!(stdout_of(&run), b"start\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    /// Running and not a zombie
    fn is_alive(pid: &str) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| stat.rsplit_once(") ").map(|(_, rest)| !rest.starts_with('Z')))
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_timeout_kills_background_grandchild() {
        let run = run_supervised(
            sh("sleep 30 & echo $!; sleep 30"),
            "sh",
            None,
            Duration::from_millis(300),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(run.timed_out);
        let stdout = String::from_utf8(stdout_of(&run)).unwrap();
        let pid = stdout.trim();
        assert!(!pid.is_empty());
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while is_alive(pid) && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!is_alive(pid), "background sleep {pid} survived the timeout");
    }

    #[tokio::test]
    async fn test_cancel_returns_cancelled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let result = run_supervised(sh("sleep 30"), "sh", None, Duration::from_secs(30), &cancel).await;
        assert_eq!(result, Err(CaptureError::Cancelled));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let result = run_supervised(
            Command::new("/nonexistent/veritrace-test-binary"),
            "missing",
            None,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CaptureError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_signal_exit() {
        let run = run_supervised(
            sh("kill -TERM $$"),
            "sh",
            None,
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(run.exit, ExitStatus::Signal(15));
    }
}
