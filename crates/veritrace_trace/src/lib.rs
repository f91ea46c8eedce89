//! VERITRACE Trace Model
//!
//! Ordered, immutable records of what a program did: syscalls, bytes on
//! stdout/stderr, and how it exited. Records are canonically encoded so two
//! captures of the same behavior produce byte-identical event lists.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod event;
pub mod normalize;
pub mod record;

pub use encoding::{CanonicalDecode, CanonicalEncode, DecodeError, EncodeError, FrameReader, FrameWriter};
pub use event::{Event, EventKind, ExitStatus, Stream, SyscallEvent};
pub use normalize::{Normalizer, Placeholder};
pub use record::{TraceBuilder, TraceMeta, TraceRecord};
