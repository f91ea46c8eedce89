//! Immutable trace records.

use crate::encoding::{CanonicalEncode, EncodeError};
use crate::event::{Event, ExitStatus, Stream};
use serde::{Deserialize, Serialize};
use veritrace_core::{Digest, SubjectId, Timestamp, Version};

/// Metadata attached to a trace; never part of trace equality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceMeta {
    /// Program the trace belongs to
    pub subject_id: SubjectId,
    /// When the capture finished
    pub captured_at: Timestamp,
    /// Version of the capturing tool
    pub tool_version: Version,
    /// Capture was cut short (timeout); the event list is partial
    pub truncated: bool,
}

impl TraceMeta {
    /// Metadata stamped with the current time and tool version
    #[must_use]
    pub fn new(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            captured_at: Timestamp::now(),
            tool_version: Version::current(),
            truncated: false,
        }
    }
}

/// An immutable ordered sequence of events plus metadata.
///
/// There are no mutating accessors: a re-capture produces a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    meta: TraceMeta,
    events: Vec<Event>,
}

impl TraceRecord {
    /// Assemble a record
    #[must_use]
    pub fn new(meta: TraceMeta, events: Vec<Event>) -> Self {
        Self { meta, events }
    }

    /// Metadata
    #[must_use]
    pub fn meta(&self) -> &TraceMeta {
        &self.meta
    }

    /// Events in occurrence order
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Subject this trace belongs to
    #[must_use]
    pub fn subject_id(&self) -> &SubjectId {
        &self.meta.subject_id
    }

    /// Whether capture was cut short
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.meta.truncated
    }

    /// Number of events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the trace has no events
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Concatenation of all chunks on one stream, in order
    #[must_use]
    pub fn output(&self, stream: Stream) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(Event::as_chunk)
            .filter(|(s, _)| *s == stream)
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect()
    }

    /// Concatenated stdout
    #[must_use]
    pub fn stdout(&self) -> Vec<u8> {
        self.output(Stream::Stdout)
    }

    /// Concatenated stderr
    #[must_use]
    pub fn stderr(&self) -> Vec<u8> {
        self.output(Stream::Stderr)
    }

    /// Exit status from the last exit event
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.events.iter().rev().find_map(|e| match e {
            Event::Exit(status) => Some(*status),
            _ => None,
        })
    }

    /// Number of syscall events
    #[must_use]
    pub fn syscall_count(&self) -> usize {
        self.events.iter().filter(|e| e.as_syscall().is_some()).count()
    }

    /// Digest over the canonical encoding of the events only.
    ///
    /// Metadata (timestamps, tool version) is excluded, so equal fingerprints
    /// mean trace-equal modulo normalized fields.
    ///
    /// # Errors
    ///
    /// Returns error if an event cannot be encoded
    pub fn fingerprint(&self) -> Result<Digest, EncodeError> {
        let encoded = self
            .events
            .iter()
            .map(CanonicalEncode::encode)
            .collect::<Result<Vec<_>, _>>()?;
        let count = (self.events.len() as u64).to_be_bytes();
        Ok(Digest::compute_parts(
            std::iter::once(&count[..]).chain(encoded.iter().map(Vec::as_slice)),
        ))
    }

    /// Trace equality modulo metadata
    #[must_use]
    pub fn trace_eq(&self, other: &Self) -> bool {
        self.events == other.events
    }
}

/// Incremental builder used while a capture is running
#[derive(Debug)]
pub struct TraceBuilder {
    meta: TraceMeta,
    events: Vec<Event>,
}

impl TraceBuilder {
    /// Start a trace for a subject
    #[must_use]
    pub fn new(subject_id: SubjectId) -> Self {
        Self {
            meta: TraceMeta::new(subject_id),
            events: Vec::new(),
        }
    }

    /// Append an event
    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Append an event, builder style
    #[must_use]
    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    /// Mark the trace as truncated
    #[must_use]
    pub fn truncated(mut self, truncated: bool) -> Self {
        self.meta.truncated = truncated;
        self
    }

    /// Number of events so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events have been pushed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Freeze into an immutable record, stamping the capture time
    #[must_use]
    pub fn finish(mut self) -> TraceRecord {
        self.meta.captured_at = Timestamp::now();
        TraceRecord::new(self.meta, self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> SubjectId {
        SubjectId::new("hello.py").unwrap()
    }

    fn hello_trace() -> TraceRecord {
        TraceBuilder::new(subject())
            .with_event(Event::syscall("write", "1, \"hel\", 3", Some(3)))
            .with_event(Event::StdoutChunk(b"hel".to_vec()))
            .with_event(Event::StderrChunk(b"warn".to_vec()))
            .with_event(Event::StdoutChunk(b"lo\n".to_vec()))
            .with_event(Event::Exit(ExitStatus::Code(0)))
            .finish()
    }

    #[test]
    fn test_stdout_concatenation() {
        let trace = hello_trace();
        assert_eq!(trace.stdout(), b"hello\n");
        assert_eq!(trace.stderr(), b"warn");
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(hello_trace().exit_status(), Some(ExitStatus::Code(0)));
        let empty = TraceBuilder::new(subject()).finish();
        assert_eq!(empty.exit_status(), None);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_syscall_count() {
        assert_eq!(hello_trace().syscall_count(), 1);
    }

    #[test]
    fn test_fingerprint_ignores_metadata() {
        let a = hello_trace();
        let b = TraceRecord::new(
            TraceMeta {
                subject_id: SubjectId::new("renamed").unwrap(),
                captured_at: Timestamp::new(1, 0),
                tool_version: Version::new(9, 9, 9),
                truncated: false,
            },
            a.events().to_vec(),
        );
        assert!(a.trace_eq(&b));
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_fingerprint_sensitive_to_order() {
        let a = hello_trace();
        let mut reversed = a.events().to_vec();
        reversed.reverse();
        let b = TraceRecord::new(a.meta().clone(), reversed);
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_builder_truncated_flag() {
        let trace = TraceBuilder::new(subject())
            .with_event(Event::Exit(ExitStatus::TimedOut))
            .truncated(true)
            .finish();
        assert!(trace.is_truncated());
        assert_eq!(trace.len(), 1);
    }
}
