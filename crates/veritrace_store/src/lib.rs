//! VERITRACE Trace Store
//!
//! Append-only storage of trace records keyed by fresh [`TraceId`]s.
//! Stored traces are never overwritten: writing an id that already exists
//! is an [`StoreError::IdCollision`].
//!
//! [`TraceId`]: veritrace_core::TraceId

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod format;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use format::{FILE_EXTENSION, MAGIC, decode_trace, encode_trace, read_trace_file, write_trace_file};
pub use store::{FsTraceStore, MemoryTraceStore, TraceStore};
