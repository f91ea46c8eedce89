//! Event filtering ahead of comparison.

use crate::config::{CompareConfig, IgnoreRule, is_runtime_access};
use crate::families::fold_family;
use std::collections::HashSet;
use veritrace_trace::Event;

/// Applies a configuration's ignore rules to an event list.
///
/// With [`IgnoreRule::RuntimeLoading`] enabled the filter is stateful: a
/// descriptor returned by a runtime open stays ignored until it is closed
/// or the process execs. Only calls whose first argument is a descriptor
/// are matched against it, so `exit_group(3)` or `kill(3, ..)` survive.
/// Events carry no pid, so descriptors are tracked per trace rather than
/// per process.
#[derive(Debug, Clone, Copy)]
pub struct EventFilter<'c> {
    config: &'c CompareConfig,
    track_runtime_fds: bool,
}

impl<'c> EventFilter<'c> {
    /// Filter for a configuration
    #[must_use]
    pub fn new(config: &'c CompareConfig) -> Self {
        Self {
            config,
            track_runtime_fds: config.ignore_rules.contains(&IgnoreRule::RuntimeLoading),
        }
    }

    /// Events that survive filtering, with their original indices
    #[must_use]
    pub fn retained<'t>(&self, events: &'t [Event]) -> Vec<(usize, &'t Event)> {
        let mut runtime_fds: HashSet<i64> = HashSet::new();
        let mut kept = Vec::with_capacity(events.len());

        for (index, event) in events.iter().enumerate() {
            if self.track_runtime_fds {
                if let Event::Syscall(call) = event {
                    let family = fold_family(&call.name);
                    if family == "exec" {
                        runtime_fds.clear();
                    }
                    let on_runtime_fd = takes_descriptor(family)
                        && call.first_fd().is_some_and(|fd| runtime_fds.contains(&fd));
                    if on_runtime_fd && family == "close" {
                        if let Some(fd) = call.first_fd() {
                            runtime_fds.remove(&fd);
                        }
                    }
                    if on_runtime_fd || is_runtime_access(call) {
                        if let (Some(fd), "open") = (call.result, family) {
                            if fd >= 0 {
                                runtime_fds.insert(fd);
                            }
                        }
                        continue;
                    }
                }
            }

            if self.config.ignore_rules.iter().any(|rule| rule.matches(event)) {
                continue;
            }
            kept.push((index, event));
        }
        kept
    }
}

/// Families whose first argument is a file descriptor
fn takes_descriptor(family: &str) -> bool {
    matches!(
        family,
        "read"
            | "write"
            | "close"
            | "stat"
            | "lseek"
            | "ioctl"
            | "fcntl"
            | "fstatfs"
            | "getdents"
            | "dup"
            | "open"
            | "fadvise64"
            | "flock"
            | "fsync"
            | "fdatasync"
            | "ftruncate"
    )
}
