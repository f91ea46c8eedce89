//! Versioned trace file format.
//!
//! ```text
//! magic "VTRC" | u16 BE format version | frame(header) | frame(event)*
//! ```
//!
//! Frames are length-prefixed postcard values. The header carries the event
//! count and the events' BLAKE3 fingerprint, both checked on read.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use veritrace_core::{Digest, FormatVersion, SubjectId, Timestamp, Version};
use veritrace_trace::{Event, FrameReader, FrameWriter, TraceMeta, TraceRecord};

/// File magic
pub const MAGIC: [u8; 4] = *b"VTRC";

/// Extension of trace files
pub const FILE_EXTENSION: &str = "vtrace";

const PREAMBLE_LEN: usize = MAGIC.len() + 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FileHeader {
    subject_id: SubjectId,
    captured_at: Timestamp,
    tool_version: Version,
    truncated: bool,
    event_count: u64,
    events_digest: Digest,
}

fn encode_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Encode {
        reason: e.to_string(),
    }
}

fn corrupt(reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        reason: reason.into(),
    }
}

/// Encode a trace in the current format
///
/// # Errors
///
/// Returns `Encode` if an event cannot be serialized
pub fn encode_trace(trace: &TraceRecord) -> Result<Vec<u8>, StoreError> {
    let meta = trace.meta();
    let header = FileHeader {
        subject_id: meta.subject_id.clone(),
        captured_at: meta.captured_at,
        tool_version: meta.tool_version,
        truncated: meta.truncated,
        event_count: trace.len() as u64,
        events_digest: trace.fingerprint().map_err(encode_err)?,
    };

    let mut out = Vec::with_capacity(PREAMBLE_LEN + 64 * trace.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FormatVersion::CURRENT.0.to_be_bytes());

    let mut writer = FrameWriter::new(&mut out);
    let header_bytes = postcard::to_allocvec(&header).map_err(encode_err)?;
    writer.write_frame(&header_bytes).map_err(encode_err)?;
    for event in trace.events() {
        writer.encode(event).map_err(encode_err)?;
    }
    Ok(out)
}

/// Decode and verify a trace.
///
/// Magic is checked before the version, and unknown versions are rejected
/// without looking at the rest of the file.
///
/// # Errors
///
/// `BadMagic`, `UnsupportedVersion`, or `Corrupt` on a count, digest or
/// decoding mismatch
pub fn decode_trace(bytes: &[u8]) -> Result<TraceRecord, StoreError> {
    if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC {
        return Err(StoreError::BadMagic);
    }
    if bytes.len() < PREAMBLE_LEN {
        return Err(corrupt("missing format version"));
    }
    let found = u16::from_be_bytes([bytes[4], bytes[5]]);
    if !FormatVersion(found).is_supported() {
        return Err(StoreError::UnsupportedVersion {
            found,
            supported: FormatVersion::CURRENT.0,
        });
    }

    let mut reader = FrameReader::new(&bytes[PREAMBLE_LEN..]);
    let header: FileHeader = reader
        .decode()
        .map_err(|e| corrupt(format!("header: {e}")))?
        .ok_or_else(|| corrupt("missing header"))?;

    let mut events = Vec::new();
    while let Some(event) = reader
        .decode::<Event>()
        .map_err(|e| corrupt(format!("event {}: {e}", events.len())))?
    {
        events.push(event);
    }

    if events.len() as u64 != header.event_count {
        return Err(corrupt(format!(
            "expected {} events, found {}",
            header.event_count,
            events.len()
        )));
    }

    let trace = TraceRecord::new(
        TraceMeta {
            subject_id: header.subject_id,
            captured_at: header.captured_at,
            tool_version: header.tool_version,
            truncated: header.truncated,
        },
        events,
    );
    let digest = trace
        .fingerprint()
        .map_err(|e| corrupt(e.to_string()))?;
    if digest != header.events_digest {
        return Err(corrupt(format!(
            "events digest {} does not match header {}",
            digest.short(),
            header.events_digest.short()
        )));
    }
    Ok(trace)
}

/// Write a trace file, replacing any file at `path`
///
/// # Errors
///
/// Returns `Encode` or `Io`
pub fn write_trace_file(path: &Path, trace: &TraceRecord) -> Result<(), StoreError> {
    let bytes = encode_trace(trace)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Read and verify a trace file
///
/// # Errors
///
/// Returns `Io` or any [`decode_trace`] error
pub fn read_trace_file(path: &Path) -> Result<TraceRecord, StoreError> {
    let bytes = std::fs::read(path)?;
    decode_trace(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use veritrace_trace::{ExitStatus, TraceBuilder};

    fn sample() -> TraceRecord {
        TraceBuilder::new(SubjectId::new("fizzbuzz.py").unwrap())
            .with_event(Event::syscall("openat", r#"AT_FDCWD, "<cwd>/in", O_RDONLY"#, Some(3)))
            .with_event(Event::StdoutChunk(b"1\n2\nFizz\n".to_vec()))
            .with_event(Event::Exit(ExitStatus::Code(0)))
            .finish()
    }

    #[test]
    fn test_encode_decode_preserves_trace() {
        let trace = sample();
        let decoded = decode_trace(&encode_trace(&trace).unwrap()).unwrap();
        assert_eq!(decoded, trace);
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(decode_trace(b"NOPE\x00\x01"), Err(StoreError::BadMagic));
        assert_eq!(decode_trace(b"VT"), Err(StoreError::BadMagic));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = encode_trace(&sample()).unwrap();
        bytes[4] = 0;
        bytes[5] = 2;
        assert_eq!(
            decode_trace(&bytes),
            Err(StoreError::UnsupportedVersion {
                found: 2,
                supported: 1
            })
        );
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let bytes = encode_trace(&sample()).unwrap();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(decode_trace(cut), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_dropped_event_detected() {
        let trace = sample();
        let bytes = encode_trace(&trace).unwrap();
        // Cut the final event frame
        let last = trace.events().last().unwrap();
        let frame_len = postcard::to_allocvec(last).unwrap().len() + 4;
        let short = &bytes[..bytes.len() - frame_len];
        let err = decode_trace(short).unwrap_err();
        assert!(err.to_string().contains("expected 3 events"));
    }

    #[test]
    fn test_tampered_event_detected() {
        let mut bytes = encode_trace(&sample()).unwrap();
        let pos = bytes
            .windows(4)
            .position(|w| w == b"Fizz")
            .unwrap();
        bytes[pos] = b'B';
        let err = decode_trace(&bytes).unwrap_err();
        assert!(err.to_string().contains("digest"));
    }

    #[test]
    fn test_file_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.vtrace");
        let trace = sample();
        write_trace_file(&path, &trace).unwrap();
        assert_eq!(read_trace_file(&path).unwrap(), trace);
    }

    fn arb_event() -> impl Strategy<Value = Event> {
        prop_oneof![
            ("[a-z_0-9]{1,12}", ".{0,40}", proptest::option::of(any::<i64>()))
                .prop_map(|(n, a, r)| Event::syscall(n, a, r)),
            proptest::collection::vec(any::<u8>(), 0..32).prop_map(Event::StdoutChunk),
            proptest::collection::vec(any::<u8>(), 0..32).prop_map(Event::StderrChunk),
            any::<i32>().prop_map(|c| Event::Exit(ExitStatus::Code(c))),
            Just(Event::Exit(ExitStatus::TimedOut)),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(events in proptest::collection::vec(arb_event(), 0..24), truncated in any::<bool>()) {
            let mut builder = TraceBuilder::new(SubjectId::new("prop").unwrap());
            for e in events {
                builder.push(e);
            }
            let trace = builder.truncated(truncated).finish();
            let decoded = decode_trace(&encode_trace(&trace).unwrap()).unwrap();
            prop_assert_eq!(decoded, trace);
        }
    }
}
