//! Event types recorded in a trace.

use crate::encoding::CanonicalEncode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fieldless event discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// A syscall-equivalent operation
    Syscall,
    /// Bytes written to stdout
    StdoutChunk,
    /// Bytes written to stderr
    StderrChunk,
    /// Process exit
    Exit,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Syscall => "syscall",
            Self::StdoutChunk => "stdout",
            Self::StderrChunk => "stderr",
            Self::Exit => "exit",
        };
        f.write_str(s)
    }
}

/// Output stream of the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// How the child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Normal exit with a status code
    Code(i32),
    /// Killed by a signal
    Signal(i32),
    /// Forcibly terminated after the capture timeout
    TimedOut,
}

impl ExitStatus {
    /// Whether the process exited with status zero
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit {code}"),
            Self::Signal(sig) => write!(f, "signal {sig}"),
            Self::TimedOut => f.write_str("timed-out"),
        }
    }
}

/// A syscall with its normalized argument summary
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyscallEvent {
    /// Syscall name as reported by the tracer
    pub name: String,
    /// Normalized argument summary; never raw pointers
    pub args: String,
    /// Normalized return value, if known
    pub result: Option<i64>,
}

impl SyscallEvent {
    /// Create a syscall event
    #[must_use]
    pub fn new(name: impl Into<String>, args: impl Into<String>, result: Option<i64>) -> Self {
        Self {
            name: name.into(),
            args: args.into(),
            result,
        }
    }

    /// First argument parsed as a file descriptor, if it is a plain integer
    #[must_use]
    pub fn first_fd(&self) -> Option<i64> {
        self.args.split(',').next()?.trim().parse().ok()
    }
}

/// One observable action of a traced program
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    /// Syscall-equivalent operation
    Syscall(SyscallEvent),
    /// Raw bytes written to stdout
    StdoutChunk(Vec<u8>),
    /// Raw bytes written to stderr
    StderrChunk(Vec<u8>),
    /// Process exit
    Exit(ExitStatus),
}

impl Event {
    /// Shorthand for a syscall event
    #[must_use]
    pub fn syscall(name: impl Into<String>, args: impl Into<String>, result: Option<i64>) -> Self {
        Self::Syscall(SyscallEvent::new(name, args, result))
    }

    /// Output chunk on the given stream
    #[must_use]
    pub fn chunk(stream: Stream, bytes: Vec<u8>) -> Self {
        match stream {
            Stream::Stdout => Self::StdoutChunk(bytes),
            Stream::Stderr => Self::StderrChunk(bytes),
        }
    }

    /// Discriminant of this event
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Syscall(_) => EventKind::Syscall,
            Self::StdoutChunk(_) => EventKind::StdoutChunk,
            Self::StderrChunk(_) => EventKind::StderrChunk,
            Self::Exit(_) => EventKind::Exit,
        }
    }

    /// The syscall payload, if this is a syscall
    #[must_use]
    pub const fn as_syscall(&self) -> Option<&SyscallEvent> {
        match self {
            Self::Syscall(call) => Some(call),
            _ => None,
        }
    }

    /// Stream and bytes, if this is an output chunk
    #[must_use]
    pub fn as_chunk(&self) -> Option<(Stream, &[u8])> {
        match self {
            Self::StdoutChunk(bytes) => Some((Stream::Stdout, bytes)),
            Self::StderrChunk(bytes) => Some((Stream::Stderr, bytes)),
            _ => None,
        }
    }

    /// Short human-readable description for diagnostics
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Syscall(call) => match call.result {
                Some(ret) => format!("{}({}) = {}", call.name, call.args, ret),
                None => format!("{}({})", call.name, call.args),
            },
            Self::StdoutChunk(bytes) => format!("stdout[{}]", bytes.len()),
            Self::StderrChunk(bytes) => format!("stderr[{}]", bytes.len()),
            Self::Exit(status) => status.to_string(),
        }
    }
}

impl CanonicalEncode for Event {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::CanonicalDecode;

    #[test]
    fn test_event_kind() {
        assert_eq!(Event::syscall("openat", "", None).kind(), EventKind::Syscall);
        assert_eq!(Event::chunk(Stream::Stdout, vec![]).kind(), EventKind::StdoutChunk);
        assert_eq!(Event::chunk(Stream::Stderr, vec![]).kind(), EventKind::StderrChunk);
        assert_eq!(Event::Exit(ExitStatus::Code(0)).kind(), EventKind::Exit);
    }

    #[test]
    fn test_first_fd() {
        let call = SyscallEvent::new("write", "1, \"hi\\n\", 3", Some(3));
        assert_eq!(call.first_fd(), Some(1));
        let call = SyscallEvent::new("openat", "AT_FDCWD, \"<cwd>/x\"", Some(3));
        assert_eq!(call.first_fd(), None);
    }

    #[test]
    fn test_as_chunk() {
        let event = Event::StdoutChunk(b"hi".to_vec());
        assert_eq!(event.as_chunk(), Some((Stream::Stdout, &b"hi"[..])));
        assert!(Event::Exit(ExitStatus::TimedOut).as_chunk().is_none());
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            Event::syscall("close", "3", Some(0)).describe(),
            "close(3) = 0"
        );
        assert_eq!(Event::StdoutChunk(vec![0; 4]).describe(), "stdout[4]");
        assert_eq!(Event::Exit(ExitStatus::TimedOut).describe(), "timed-out");
    }

    #[test]
    fn test_exit_status_success() {
        assert!(ExitStatus::Code(0).is_success());
        assert!(!ExitStatus::Code(1).is_success());
        assert!(!ExitStatus::Signal(9).is_success());
        assert!(!ExitStatus::TimedOut.is_success());
    }

    #[test]
    fn test_event_encode_decode() {
        let event = Event::syscall("read", "0, \"\", 4096", Some(0));
        let bytes = event.encode().unwrap();
        assert_eq!(Event::decode(&bytes).unwrap(), event);
    }
}
