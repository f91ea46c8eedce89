//! VERITRACE Core Types
//!
//! Pure types shared by every crate in the workspace: identifiers,
//! digests, wall-clock metadata, and version tags. No I/O happens here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod id;
pub mod text;
pub mod time;
pub mod version;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use hash::Digest;
pub use id::{JobId, SubjectId, TraceId};
pub use text::{tail_utf8, truncate_utf8};
pub use time::Timestamp;
pub use version::{FormatVersion, Version, VersionError, TOOL_VERSION};
