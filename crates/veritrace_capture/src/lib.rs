//! VERITRACE Trace Capture Engine
//!
//! Runs a program as a supervised child process and records what it did:
//! syscalls (through a [`Tracer`] backend), stdout/stderr bytes and the exit
//! status. Captures are bounded by a timeout and by a cancellation token;
//! either one kills the child's whole process group.
//!
//! A timeout is not an error. It yields a trace marked truncated, ending
//! in `Exit(TimedOut)`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod output_only;
pub mod strace;
pub mod supervise;
pub mod tracer;

pub use config::{CaptureConfig, CaptureRequest, TracerKind};
pub use engine::{CaptureEngine, resolve_program};
pub use error::{CaptureError, CaptureResult};
pub use output_only::OutputOnlyTracer;
pub use strace::{StraceParser, StraceTracer};
pub use tracer::{Launch, OutputChunk, RawCapture, SyscallRecord, Tracer};
