//! First point where two traces stop agreeing.
//!
//! Both traces are filtered, reduced to signatures, and walked in step.
//! Adjacent output chunks on one stream are merged first, so a program
//! that prints in one write and a translation that prints in two agree.

use crate::config::CompareConfig;
use crate::filter::EventFilter;
use veritrace_trace::{Event, ExitStatus, Stream, TraceRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Signature<'a> {
    Syscall(&'a str),
    Output(Stream, Vec<u8>),
    Exit(ExitStatus),
}

impl Signature<'_> {
    fn describe(&self) -> String {
        match self {
            Self::Syscall(name) => format!("syscall {name}"),
            Self::Output(Stream::Stdout, bytes) => format!("stdout \"{}\"", short(bytes)),
            Self::Output(Stream::Stderr, bytes) => format!("stderr \"{}\"", short(bytes)),
            Self::Exit(status) => status.to_string(),
        }
    }
}

fn short(bytes: &[u8]) -> String {
    const MAX: usize = 32;
    let mut text = bytes[..bytes.len().min(MAX)].escape_ascii().to_string();
    if bytes.len() > MAX {
        text.push_str("...");
    }
    text
}

/// Where two traces first disagree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Index into the reference event list
    pub index: usize,
    /// Reference side at that point, or `end of trace`
    pub reference: String,
    /// Candidate side at that point, or `end of trace`
    pub candidate: String,
}

fn signatures<'t>(
    events: &'t [Event],
    config: &CompareConfig,
) -> Vec<(usize, Signature<'t>)> {
    let mut out: Vec<(usize, Signature<'t>)> = Vec::new();
    for (index, event) in EventFilter::new(config).retained(events) {
        match event {
            Event::Syscall(call) => {
                out.push((index, Signature::Syscall(config.compared_name(&call.name))));
            }
            Event::StdoutChunk(_) | Event::StderrChunk(_) => {
                let Some((stream, bytes)) = event.as_chunk() else {
                    continue;
                };
                if stream == Stream::Stdout && config.ignore_output {
                    continue;
                }
                if let Some((_, Signature::Output(last, merged))) = out.last_mut() {
                    if *last == stream {
                        merged.extend_from_slice(bytes);
                        continue;
                    }
                }
                out.push((index, Signature::Output(stream, bytes.to_vec())));
            }
            Event::Exit(status) => out.push((index, Signature::Exit(*status))),
        }
    }
    out
}

/// Lowest reference index where the filtered signatures disagree, with a
/// description of both sides.
///
/// When the candidate runs past the end of the reference, the index is the
/// reference length.
#[must_use]
pub fn first_divergence_detail(
    reference: &TraceRecord,
    candidate: &TraceRecord,
    config: &CompareConfig,
) -> Option<Divergence> {
    const END: &str = "end of trace";
    let ref_sigs = signatures(reference.events(), config);
    let cand_sigs = signatures(candidate.events(), config);

    let position = ref_sigs
        .iter()
        .zip(&cand_sigs)
        .position(|((_, a), (_, b))| a != b);

    match position {
        Some(k) => Some(Divergence {
            index: ref_sigs[k].0,
            reference: ref_sigs[k].1.describe(),
            candidate: cand_sigs[k].1.describe(),
        }),
        None if ref_sigs.len() > cand_sigs.len() => {
            let (index, sig) = &ref_sigs[cand_sigs.len()];
            Some(Divergence {
                index: *index,
                reference: sig.describe(),
                candidate: END.to_string(),
            })
        }
        None if cand_sigs.len() > ref_sigs.len() => Some(Divergence {
            index: reference.len(),
            reference: END.to_string(),
            candidate: cand_sigs[ref_sigs.len()].1.describe(),
        }),
        None => None,
    }
}

/// Lowest reference event index where the filtered traces disagree
#[must_use]
pub fn first_divergence(
    reference: &TraceRecord,
    candidate: &TraceRecord,
    config: &CompareConfig,
) -> Option<usize> {
    first_divergence_detail(reference, candidate, config).map(|d| d.index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritrace_core::SubjectId;
    use veritrace_trace::TraceBuilder;

    fn trace(events: Vec<Event>) -> TraceRecord {
        let mut builder = TraceBuilder::new(SubjectId::new("t").unwrap());
        for e in events {
            builder.push(e);
        }
        builder.finish()
    }

    #[test]
    fn test_identical_has_no_divergence() {
        let t = trace(vec![
            Event::syscall("openat", "AT_FDCWD, \"<cwd>/in\"", Some(3)),
            Event::StdoutChunk(b"x".to_vec()),
            Event::Exit(ExitStatus::Code(0)),
        ]);
        assert_eq!(first_divergence(&t, &t, &CompareConfig::default()), None);
    }

    #[test]
    fn test_split_writes_coalesce() {
        let reference = trace(vec![
            Event::syscall("write", "1, \"hello\\n\", 6", Some(6)),
            Event::StdoutChunk(b"hello\n".to_vec()),
            Event::Exit(ExitStatus::Code(0)),
        ]);
        let candidate = trace(vec![
            Event::syscall("write", "1, \"hel\", 3", Some(3)),
            Event::StdoutChunk(b"hel".to_vec()),
            Event::syscall("write", "1, \"lo\\n\", 3", Some(3)),
            Event::StdoutChunk(b"lo\n".to_vec()),
            Event::Exit(ExitStatus::Code(0)),
        ]);
        assert_eq!(first_divergence(&reference, &candidate, &CompareConfig::default()), None);
    }

    #[test]
    fn test_reports_reference_index() {
        let reference = trace(vec![
            Event::syscall("brk", "NULL", Some(0)),
            Event::syscall("openat", "AT_FDCWD, \"<cwd>/a\"", Some(3)),
            Event::syscall("unlink", "\"<cwd>/a\"", Some(0)),
            Event::Exit(ExitStatus::Code(0)),
        ]);
        let candidate = trace(vec![
            Event::syscall("open", "\"<cwd>/a\"", Some(3)),
            Event::syscall("mkdir", "\"<cwd>/b\"", Some(0)),
            Event::Exit(ExitStatus::Code(0)),
        ]);
        let detail = first_divergence_detail(&reference, &candidate, &CompareConfig::default()).unwrap();
        assert_eq!(detail.index, 2);
        assert_eq!(detail.reference, "syscall unlink");
        assert_eq!(detail.candidate, "syscall mkdir");
    }

    #[test]
    fn test_candidate_longer_reports_reference_len() {
        let reference = trace(vec![Event::StdoutChunk(b"a".to_vec())]);
        let candidate = trace(vec![
            Event::StdoutChunk(b"a".to_vec()),
            Event::Exit(ExitStatus::Code(1)),
        ]);
        let detail = first_divergence_detail(&reference, &candidate, &CompareConfig::default()).unwrap();
        assert_eq!(detail.index, 1);
        assert_eq!(detail.reference, "end of trace");
        assert_eq!(detail.candidate, "exit 1");
    }

    #[test]
    fn test_reference_longer() {
        let reference = trace(vec![
            Event::StdoutChunk(b"a".to_vec()),
            Event::syscall("unlink", "\"<cwd>/tmp\"", Some(0)),
            Event::Exit(ExitStatus::Code(0)),
        ]);
        let candidate = trace(vec![Event::StdoutChunk(b"a".to_vec())]);
        assert_eq!(first_divergence(&reference, &candidate, &CompareConfig::default()), Some(1));
    }

    #[test]
    fn test_ignore_output_skips_stdout() {
        let reference = trace(vec![Event::StdoutChunk(b"1".to_vec()), Event::Exit(ExitStatus::Code(0))]);
        let candidate = trace(vec![Event::StdoutChunk(b"2".to_vec()), Event::Exit(ExitStatus::Code(0))]);
        let config = CompareConfig::default().with_ignore_output(true);
        assert_eq!(first_divergence(&reference, &candidate, &config), None);
        assert_eq!(first_divergence(&reference, &candidate, &CompareConfig::default()), Some(0));
    }
}
