//! Argument normalization.
//!
//! Raw tracer output carries run-specific values: absolute paths under the
//! working directory, heap addresses, environment sizes, child pids. The
//! normalizer rewrites these to stable placeholders so two runs of the same
//! program in different scratch directories produce equal events.

use crate::event::SyscallEvent;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

static QUOTED_ABS_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""/(?:[^"/]*/)*([^"/]*)""#).expect("static regex")
});

static HEX_ADDR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"0x[0-9a-fA-F]{4,}").expect("static regex"));

static ENV_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\* \d+ vars? \*/").expect("static regex"));

/// Syscalls whose return value is a pid, tid or pgid
const PROCESS_IDENTITY: &[&str] = &[
    "clone", "clone3", "fork", "vfork", "getpid", "getppid", "gettid", "getpgid", "getpgrp",
    "getsid", "setsid", "wait4", "waitid", "waitpid", "set_tid_address",
];

/// Stable token substituted for a run-specific directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Placeholder {
    /// Child working directory
    Cwd,
    /// Directory holding the executable
    Exe,
    /// System temp directory
    Tmp,
}

impl Placeholder {
    /// Replacement text
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Cwd => "<cwd>",
            Self::Exe => "<exe>",
            Self::Tmp => "<tmp>",
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone)]
struct RootRule {
    root: String,
    pattern: Regex,
    placeholder: Placeholder,
}

/// Rewrites raw syscall arguments into stable summaries
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    roots: Vec<RootRule>,
}

impl Normalizer {
    /// Normalizer with no root substitutions
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizer for one run: working directory, executable directory and
    /// the system temp directory
    #[must_use]
    pub fn for_run(cwd: &Path, exe_dir: Option<&Path>) -> Self {
        let mut normalizer = Self::new().with_root(cwd, Placeholder::Cwd);
        if let Some(dir) = exe_dir {
            normalizer = normalizer.with_root(dir, Placeholder::Exe);
        }
        normalizer.with_root(std::env::temp_dir(), Placeholder::Tmp)
    }

    /// Replace `path` (and anything below it) with a placeholder.
    ///
    /// Longer roots win, so a cwd inside the temp dir becomes `<cwd>`.
    /// The filesystem root and duplicate roots are ignored.
    #[must_use]
    pub fn with_root(mut self, path: impl AsRef<Path>, placeholder: Placeholder) -> Self {
        let root = path.as_ref().to_string_lossy().trim_end_matches('/').to_string();
        if root.is_empty() || self.roots.iter().any(|r| r.root == root) {
            return self;
        }
        let pattern = match Regex::new(&format!(r#"{}(/|"|$)"#, regex::escape(&root))) {
            Ok(pattern) => pattern,
            Err(_) => return self,
        };
        self.roots.push(RootRule {
            root,
            pattern,
            placeholder,
        });
        self.roots.sort_by(|a, b| b.root.len().cmp(&a.root.len()));
        self
    }

    /// Normalize an argument summary
    #[must_use]
    pub fn normalize_args(&self, raw: &str) -> String {
        let mut out = raw.to_string();
        for rule in &self.roots {
            let replacement = format!("{}$1", rule.placeholder.token());
            out = rule.pattern.replace_all(&out, replacement.as_str()).into_owned();
        }
        let out = QUOTED_ABS_PATH.replace_all(&out, "\"<abs>/$1\"");
        let out = HEX_ADDR.replace_all(&out, "<addr>");
        ENV_COUNT.replace_all(&out, "/* <n> vars */").into_owned()
    }

    /// Drop results that identify processes; keep everything else
    #[must_use]
    pub fn normalize_result(&self, name: &str, result: Option<i64>) -> Option<i64> {
        if PROCESS_IDENTITY.contains(&name) {
            None
        } else {
            result
        }
    }

    /// Normalize a whole syscall
    #[must_use]
    pub fn normalize_call(&self, name: &str, args: &str, result: Option<i64>) -> SyscallEvent {
        SyscallEvent::new(
            name,
            self.normalize_args(args),
            self.normalize_result(name, result),
        )
    }
}
