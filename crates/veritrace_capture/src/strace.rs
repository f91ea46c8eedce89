//! strace backend.
//!
//! The child runs as `strace -f -qq -ttt -s <n> -e trace=<set> -o <log> --
//! <program> <args>`. The log goes to a private temp directory so it never
//! shows up in the traced program's working directory. After the run the
//! log is parsed into [`SyscallRecord`]s.

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::supervise::run_supervised;
use crate::tracer::{Launch, OutputChunk, RawCapture, SyscallRecord, Tracer};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use veritrace_trace::Stream;

static LINE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<pid>\d+)\s+)?(?P<secs>\d+)\.(?P<frac>\d+)\s+(?P<rest>.*)$")
        .expect("static regex")
});

static COMPLETE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>\w+)\((?P<args>.*)\)\s+=\s+(?P<ret>-?\d+|0x[0-9a-fA-F]+|\?)(?:\s.*)?$")
        .expect("static regex")
});

static UNFINISHED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>\w+)\((?P<args>.*?)\s*<unfinished \.\.\.>$").expect("static regex")
});

static RESUMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^<\.\.\. (?P<name>\w+) resumed>\s*(?P<args>.*)\)\s+=\s+(?P<ret>-?\d+|0x[0-9a-fA-F]+|\?)(?:\s.*)?$",
    )
    .expect("static regex")
});

/// Syscall interception through strace
#[derive(Debug)]
pub struct StraceTracer {
    strace_path: PathBuf,
    trace_set: String,
    string_size: usize,
    availability: OnceCell<Result<(), CaptureError>>,
}

impl StraceTracer {
    /// Backend using the given configuration
    #[must_use]
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            strace_path: config.strace_path.clone(),
            trace_set: config.trace_set.clone(),
            string_size: config.string_size,
            availability: OnceCell::new(),
        }
    }

    fn command(&self, launch: &Launch, log: &std::path::Path) -> Command {
        let mut command = Command::new(&self.strace_path);
        command
            .args(["-f", "-qq", "-ttt", "-s"])
            .arg(self.string_size.to_string())
            .arg("-e")
            .arg(format!("trace={}", self.trace_set))
            .arg("-o")
            .arg(log)
            .arg("--")
            .arg(&launch.program)
            .args(&launch.args)
            .current_dir(&launch.workdir);
        command
    }

    async fn check_version(&self) -> Result<(), CaptureError> {
        let unavailable = |reason: String| CaptureError::TracerUnavailable {
            tracer: self.strace_path.display().to_string(),
            reason,
        };
        let output = Command::new(&self.strace_path)
            .arg("-V")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if output.status.success() {
            debug!(version = %String::from_utf8_lossy(&output.stdout).trim(), "strace available");
            Ok(())
        } else {
            Err(unavailable(format!("`-V` exited with {}", output.status)))
        }
    }
}

impl Default for StraceTracer {
    fn default() -> Self {
        Self::new(&CaptureConfig::default())
    }
}

#[async_trait]
impl Tracer for StraceTracer {
    fn name(&self) -> &'static str {
        "strace"
    }

    async fn ensure_available(&self) -> Result<(), CaptureError> {
        self.availability.get_or_init(|| self.check_version()).await.clone()
    }

    async fn run(
        &self,
        launch: &Launch,
        cancel: &CancellationToken,
    ) -> Result<RawCapture, CaptureError> {
        let log_dir = tempfile::Builder::new()
            .prefix("veritrace-strace-")
            .tempdir()
            .map_err(CaptureError::io)?;
        let log_path = log_dir.path().join("trace.log");

        let label = launch.program.display().to_string();
        let run = run_supervised(
            self.command(launch, &log_path),
            &label,
            launch.input.clone(),
            launch.timeout,
            cancel,
        )
        .await?;

        // A killed strace may never have created the log
        let log = match tokio::fs::read(&log_path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && run.timed_out => String::new(),
            Err(e) => return Err(CaptureError::io(e)),
        };

        let mut parser = StraceParser::new();
        for line in log.lines() {
            parser.feed(line);
        }
        if parser.skipped() > 0 {
            warn!(program = %label, skipped = parser.skipped(), "unparseable strace lines");
        }
        let syscalls = parser.finish();
        debug!(program = %label, syscalls = syscalls.len(), "strace log parsed");

        if syscalls.is_empty() && !run.timed_out {
            if let Some(reason) = strace_diagnostic(&run.chunks) {
                return Err(CaptureError::TracerUnavailable {
                    tracer: self.strace_path.display().to_string(),
                    reason,
                });
            }
        }

        Ok(RawCapture {
            syscalls,
            chunks: strip_tracer_lines(run.chunks),
            exit: run.exit,
            timed_out: run.timed_out,
        })
    }
}

/// Incremental parser for `strace -f -ttt` logs.
///
/// Handles optional pid prefixes and joins `<unfinished ...>` entries with
/// their `<... name resumed>` continuation. Signal and exit notices are
/// skipped silently; any other unrecognized line is counted.
#[derive(Debug, Default)]
pub struct StraceParser {
    records: Vec<SyscallRecord>,
    pending: HashMap<Option<u32>, (usize, String)>,
    skipped: usize,
}

impl StraceParser {
    /// Empty parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one log line
    pub fn feed(&mut self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }
        let Some(caps) = LINE_PREFIX.captures(line) else {
            self.skipped += 1;
            return;
        };
        let pid = caps.name("pid").and_then(|m| m.as_str().parse().ok());
        let at_micros = parse_micros(&caps["secs"], &caps["frac"]);
        let rest = caps.name("rest").map_or("", |m| m.as_str());

        if rest.starts_with("---") || rest.starts_with("+++") {
            return;
        }

        if let Some(c) = COMPLETE.captures(rest) {
            self.records.push(SyscallRecord {
                pid,
                at_micros,
                name: c["name"].to_string(),
                args: c["args"].to_string(),
                result: parse_result(&c["ret"]),
            });
        } else if let Some(c) = UNFINISHED.captures(rest) {
            let index = self.records.len();
            self.records.push(SyscallRecord {
                pid,
                at_micros,
                name: c["name"].to_string(),
                args: c["args"].to_string(),
                result: None,
            });
            self.pending.insert(pid, (index, c["name"].to_string()));
        } else if let Some(c) = RESUMED.captures(rest) {
            let name = &c["name"];
            match self.pending.remove(&pid) {
                Some((index, pending_name)) if pending_name == name => {
                    let record = &mut self.records[index];
                    record.args = join_args(&record.args, &c["args"]);
                    record.result = parse_result(&c["ret"]);
                }
                other => {
                    if let Some(entry) = other {
                        self.pending.insert(pid, entry);
                    }
                    self.records.push(SyscallRecord {
                        pid,
                        at_micros,
                        name: name.to_string(),
                        args: c["args"].to_string(),
                        result: parse_result(&c["ret"]),
                    });
                }
            }
        } else {
            debug!(line, "unrecognized strace line");
            self.skipped += 1;
        }
    }

    /// Lines that could not be parsed
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Records in entry order. Calls never resumed keep `result: None`.
    #[must_use]
    pub fn finish(self) -> Vec<SyscallRecord> {
        self.records
    }
}

/// strace's own complaint on stderr, e.g. when ptrace is denied
fn strace_diagnostic(chunks: &[OutputChunk]) -> Option<String> {
    let stderr: Vec<u8> = chunks
        .iter()
        .filter(|c| c.stream == Stream::Stderr)
        .flat_map(|c| c.bytes.iter().copied())
        .collect();
    String::from_utf8_lossy(&stderr)
        .lines()
        .find(|line| line.starts_with("strace: "))
        .map(str::to_string)
}

/// Drop strace's own `strace: ` lines from the child's stderr.
///
/// strace shares the child's stderr, so its messages would otherwise show
/// up as program output. Stdout chunks pass through untouched and the
/// remaining stderr comes back as a single chunk.
fn strip_tracer_lines(chunks: Vec<OutputChunk>) -> Vec<OutputChunk> {
    let mut stderr = Vec::new();
    let mut kept: Vec<OutputChunk> = Vec::with_capacity(chunks.len() + 1);
    for chunk in chunks {
        match chunk.stream {
            Stream::Stdout => kept.push(chunk),
            Stream::Stderr => stderr.extend(chunk.bytes),
        }
    }
    let program_stderr: Vec<u8> = stderr
        .split_inclusive(|b| *b == b'\n')
        .filter(|line| !line.starts_with(b"strace: "))
        .flatten()
        .copied()
        .collect();
    if !program_stderr.is_empty() {
        kept.push(OutputChunk {
            stream: Stream::Stderr,
            bytes: program_stderr,
        });
    }
    kept
}

fn parse_micros(secs: &str, frac: &str) -> u64 {
    let secs: u64 = secs.parse().unwrap_or(0);
    let digits: String = frac.chars().chain(std::iter::repeat('0')).take(6).collect();
    secs.saturating_mul(1_000_000)
        .saturating_add(digits.parse::<u64>().unwrap_or(0))
}

fn parse_result(ret: &str) -> Option<i64> {
    ret.parse().ok()
}

fn join_args(head: &str, tail: &str) -> String {
    match (head.trim_end(), tail.trim_start()) {
        ("", tail) => tail.to_string(),
        (head, "") => head.to_string(),
        (head, tail) if head.ends_with(',') => format!("{head} {tail}"),
        (head, tail) => format!("{head}{tail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TracerKind;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_parse_complete_with_pid() {
        let mut parser = StraceParser::new();
        parser.feed(r#"4242 1700000000.123456 openat(AT_FDCWD, "/etc/ld.so.cache", O_RDONLY|O_CLOEXEC) = 3"#);
        let records = parser.finish();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pid, Some(4242));
        assert_eq!(records[0].at_micros, 1_700_000_000_123_456);
        assert_eq!(records[0].name, "openat");
        assert_eq!(records[0].args, r#"AT_FDCWD, "/etc/ld.so.cache", O_RDONLY|O_CLOEXEC"#);
        assert_eq!(records[0].result, Some(3));
    }

    #[test]
    fn test_parse_without_pid_and_error_result() {
        let mut parser = StraceParser::new();
        parser.feed(r#"1700000000.5 access("/etc/ld.so.preload", R_OK) = -1 ENOENT (No such file or directory)"#);
        let records = parser.finish();
        assert_eq!(records[0].pid, None);
        assert_eq!(records[0].at_micros, 1_700_000_000_500_000);
        assert_eq!(records[0].result, Some(-1));
    }

    #[test]
    fn test_parse_unknown_and_hex_results() {
        let mut parser = StraceParser::new();
        parser.feed("1 1700000000.000001 exit_group(0) = ?");
        parser.feed("1 1700000000.000002 mmap(NULL, 8192, PROT_READ, MAP_PRIVATE, 3, 0) = 0x7f1c2b3a4000");
        let records = parser.finish();
        assert_eq!(records[0].result, None);
        assert_eq!(records[1].result, None);
    }

    #[test]
    fn test_unfinished_resumed_pair() {
        let mut parser = StraceParser::new();
        parser.feed("10 1700000000.000100 read(0,  <unfinished ...>");
        parser.feed("11 1700000000.000150 write(1, \"x\", 1) = 1");
        parser.feed("10 1700000000.000200 <... read resumed>\"abc\", 4096) = 3");
        let records = parser.finish();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "read");
        assert_eq!(records[0].args, "0, \"abc\", 4096");
        assert_eq!(records[0].result, Some(3));
        assert_eq!(records[0].at_micros, 1_700_000_000_000_100);
        assert_eq!(records[1].name, "write");
    }

    #[test]
    fn test_never_resumed_keeps_none() {
        let mut parser = StraceParser::new();
        parser.feed("10 1700000000.000100 wait4(-1,  <unfinished ...>");
        let records = parser.finish();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, None);
    }

    #[test]
    fn test_signals_and_exits_skipped_silently() {
        let mut parser = StraceParser::new();
        parser.feed("10 1700000000.1 --- SIGCHLD {si_signo=SIGCHLD, si_code=CLD_EXITED} ---");
        parser.feed("10 1700000000.2 +++ exited with 0 +++");
        parser.feed("garbage");
        assert_eq!(parser.skipped(), 1);
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn test_strace_diagnostic() {
        let chunks = vec![OutputChunk {
            stream: Stream::Stderr,
            bytes: b"strace: test_ptrace_get_syscall_info: PTRACE_TRACEME: Operation not permitted\n".to_vec(),
        }];
        assert!(strace_diagnostic(&chunks).unwrap().contains("PTRACE_TRACEME"));
        assert_eq!(strace_diagnostic(&[]), None);
    }

    #[test]
    fn test_tracer_lines_removed_from_stderr() {
        let chunks = vec![
            OutputChunk {
                stream: Stream::Stderr,
                bytes: b"warning: low disk\nstrace: Process 42 atta".to_vec(),
            },
            OutputChunk {
                stream: Stream::Stdout,
                bytes: b"result\n".to_vec(),
            },
            OutputChunk {
                stream: Stream::Stderr,
                bytes: b"ched\nstrace: exit of pid 42 ignored\ndone".to_vec(),
            },
        ];
        let kept = strip_tracer_lines(chunks);
        assert_eq!(
            kept,
            vec![
                OutputChunk {
                    stream: Stream::Stdout,
                    bytes: b"result\n".to_vec(),
                },
                OutputChunk {
                    stream: Stream::Stderr,
                    bytes: b"warning: low disk\ndone".to_vec(),
                },
            ]
        );
    }

    #[test]
    fn test_stderr_without_tracer_lines_is_kept_whole() {
        let chunks = vec![OutputChunk {
            stream: Stream::Stderr,
            bytes: b"my strace: not at line start\n".to_vec(),
        }];
        assert_eq!(strip_tracer_lines(chunks.clone()), chunks);
        assert!(strip_tracer_lines(vec![OutputChunk {
            stream: Stream::Stderr,
            bytes: b"strace: only noise\n".to_vec(),
        }])
        .is_empty());
    }

    #[test]
    fn test_args_containing_parens() {
        let mut parser = StraceParser::new();
        parser.feed(r#"1700000000.000001 write(1, "f(x) = y\n", 9) = 9"#);
        let records = parser.finish();
        assert_eq!(records[0].args, r#"1, "f(x) = y\n", 9"#);
        assert_eq!(records[0].result, Some(9));
    }

    #[tokio::test]
    async fn test_missing_strace_is_unavailable() {
        let config = CaptureConfig::default()
            .with_tracer(TracerKind::Strace)
            .with_strace_path("/nonexistent/strace");
        let tracer = StraceTracer::new(&config);
        let err = tracer.ensure_available().await.unwrap_err();
        assert!(err.is_tracer_unavailable());
    }

    #[tokio::test]
    async fn test_strace_run_records_syscalls() {
        let tracer = StraceTracer::default();
        if tracer.ensure_available().await.is_err() {
            eprintln!("strace not installed, skipping");
            return;
        }
        let workdir = tempfile::tempdir().unwrap();
        let launch = Launch {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), "echo hi > out.txt; cat out.txt".to_string()],
            input: None,
            workdir: workdir.path().to_path_buf(),
            timeout: Duration::from_secs(20),
        };
        let raw = match tracer.run(&launch, &CancellationToken::new()).await {
            Ok(raw) => raw,
            Err(e) => {
                // ptrace is often denied inside containers
                eprintln!("strace run failed ({e}), skipping");
                return;
            }
        };
        if raw.syscalls.is_empty() {
            eprintln!("strace produced no records, skipping");
            return;
        }
        assert!(raw.syscalls.iter().any(|r| r.name.starts_with("open")));
        assert!(!workdir.path().join("trace.log").exists());
    }

    proptest! {
        #[test]
        fn prop_parser_yields_at_most_one_record_per_line(lines in proptest::collection::vec(".{0,80}", 0..20)) {
            let mut parser = StraceParser::new();
            for line in &lines {
                parser.feed(line);
            }
            let skipped = parser.skipped();
            prop_assert!(parser.finish().len() + skipped <= lines.len());
        }

        #[test]
        fn prop_complete_lines_parse(
            pid in 1u32..100_000,
            secs in 0u64..4_000_000_000,
            name in "[a-z][a-z0-9_]{0,15}",
            ret in -4095i64..1_000_000,
        ) {
            let mut parser = StraceParser::new();
            parser.feed(&format!("{pid} {secs}.000001 {name}(3, \"x\", 1) = {ret}"));
            let records = parser.finish();
            prop_assert_eq!(records.len(), 1);
            prop_assert_eq!(records[0].pid, Some(pid));
            prop_assert_eq!(records[0].at_micros, secs * 1_000_000 + 1);
            prop_assert_eq!(&records[0].name, &name);
            prop_assert_eq!(records[0].result, Some(ret));
        }
    }
}
