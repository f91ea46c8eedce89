//! Producing the candidate executable.
//!
//! The translator and compiler are opaque: only success or failure, and
//! which of the two failed, are inspected. A failing command keeps the
//! tail of its stderr as the diagnostic.

use crate::classify::FailureClass;
use crate::config::BuilderConfig;
use crate::job::MAX_DIAGNOSTIC_BYTES;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;
use veritrace_core::tail_utf8;

/// Translator or compiler failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalFailure {
    /// The translator rejected the reference
    #[error("Translation failed: {diagnostic}")]
    TranslationFailed {
        /// Bounded tool output
        diagnostic: String,
    },
    /// The translated source did not build
    #[error("Build failed: {diagnostic}")]
    BuildFailed {
        /// Bounded tool output
        diagnostic: String,
    },
}

impl ExternalFailure {
    /// Failure class this maps to
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::TranslationFailed { .. } => FailureClass::TranslationFailed,
            Self::BuildFailed { .. } => FailureClass::BuildFailed,
        }
    }

    /// Diagnostic text
    #[must_use]
    pub fn diagnostic(&self) -> &str {
        match self {
            Self::TranslationFailed { diagnostic } | Self::BuildFailed { diagnostic } => diagnostic,
        }
    }
}

/// Turns a reference artifact into a candidate executable
#[async_trait]
pub trait CandidateBuilder: Send + Sync {
    /// Translate and build `reference` inside `workdir`, returning the
    /// executable's path.
    ///
    /// Dropping the future must stop any child process it started.
    async fn translate_and_build(&self, reference: &Path, workdir: &Path) -> Result<PathBuf, ExternalFailure>;
}

/// A whitespace-separated command line with `{input}`, `{workdir}` and
/// `{output}` placeholders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommandTemplate {
    words: Vec<String>,
}

impl CommandTemplate {
    /// Parse a template
    ///
    /// # Errors
    ///
    /// Returns a message for a blank template
    pub fn parse(text: &str) -> Result<Self, String> {
        let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        if words.is_empty() {
            return Err("command template is empty".to_string());
        }
        Ok(Self { words })
    }

    /// Program and arguments with placeholders filled in
    #[must_use]
    pub fn render(&self, input: &Path, workdir: &Path, output: &Path) -> (String, Vec<String>) {
        let fill = |word: &String| {
            word.replace("{input}", &input.to_string_lossy())
                .replace("{workdir}", &workdir.to_string_lossy())
                .replace("{output}", &output.to_string_lossy())
        };
        let mut words = self.words.iter().map(fill);
        let program = words.next().unwrap_or_default();
        (program, words.collect())
    }
}

impl TryFrom<String> for CommandTemplate {
    type Error = String;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::parse(&text)
    }
}

impl From<CommandTemplate> for String {
    fn from(template: CommandTemplate) -> Self {
        template.to_string()
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.words.join(" "))
    }
}

/// Runs a translator command, then an optional compiler command
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    translator: CommandTemplate,
    compiler: Option<CommandTemplate>,
    source_extension: String,
}

impl CommandBuilder {
    /// Builder whose translator output is already executable
    #[must_use]
    pub fn new(translator: CommandTemplate) -> Self {
        Self {
            translator,
            compiler: None,
            source_extension: "rs".to_string(),
        }
    }

    /// Builder from configuration; `None` without a translator
    #[must_use]
    pub fn from_config(config: &BuilderConfig) -> Option<Self> {
        let mut builder = Self::new(config.translator.clone()?);
        builder.compiler = config.compiler.clone();
        if let Some(ext) = &config.source_extension {
            builder.source_extension = ext.clone();
        }
        Some(builder)
    }

    /// Compile the translated source with `compiler`
    #[must_use]
    pub fn with_compiler(mut self, compiler: CommandTemplate) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Extension of the translated source file (default `rs`)
    #[must_use]
    pub fn with_source_extension(mut self, extension: impl Into<String>) -> Self {
        self.source_extension = extension.into();
        self
    }

    async fn run_step(
        template: &CommandTemplate,
        input: &Path,
        workdir: &Path,
        output: &Path,
        failure: fn(String) -> ExternalFailure,
    ) -> Result<(), ExternalFailure> {
        let (program, args) = template.render(input, workdir, output);
        debug!(%program, ?args, "running external step");
        let result = Command::new(&program)
            .args(&args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| failure(format!("cannot run {program}: {e}")))?;

        if !result.status.success() {
            let text = if result.stderr.is_empty() {
                String::from_utf8_lossy(&result.stdout).into_owned()
            } else {
                String::from_utf8_lossy(&result.stderr).into_owned()
            };
            let head = format!("{program} {}: ", result.status);
            let budget = MAX_DIAGNOSTIC_BYTES.saturating_sub(head.len());
            return Err(failure(format!("{head}{}", tail_utf8(text.trim_end(), budget))));
        }
        if tokio::fs::metadata(output).await.is_err() {
            return Err(failure(format!("{program} produced no {}", output.display())));
        }
        Ok(())
    }
}

#[async_trait]
impl CandidateBuilder for CommandBuilder {
    async fn translate_and_build(&self, reference: &Path, workdir: &Path) -> Result<PathBuf, ExternalFailure> {
        let stem = reference
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "candidate".to_string());
        let executable = workdir.join(&stem);
        let translate = |diagnostic: String| ExternalFailure::TranslationFailed { diagnostic };
        let build = |diagnostic: String| ExternalFailure::BuildFailed { diagnostic };

        match &self.compiler {
            None => {
                Self::run_step(&self.translator, reference, workdir, &executable, translate).await?;
            }
            Some(compiler) => {
                let source = workdir.join(format!("{stem}.{}", self.source_extension));
                Self::run_step(&self.translator, reference, workdir, &source, translate).await?;
                Self::run_step(compiler, &source, workdir, &executable, build).await?;
            }
        }
        Ok(executable)
    }
}

/// A candidate that already exists
#[derive(Debug, Clone)]
pub struct PrebuiltCandidate {
    path: PathBuf,
}

impl PrebuiltCandidate {
    /// Use the executable at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CandidateBuilder for PrebuiltCandidate {
    async fn translate_and_build(&self, _reference: &Path, _workdir: &Path) -> Result<PathBuf, ExternalFailure> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(self.path.clone()),
            Ok(_) => Err(ExternalFailure::BuildFailed {
                diagnostic: format!("{} is not a file", self.path.display()),
            }),
            Err(e) => Err(ExternalFailure::BuildFailed {
                diagnostic: format!("{}: {e}", self.path.display()),
            }),
        }
    }
}
