//! Orchestrator and whole-validator configuration.

use crate::builder::CommandTemplate;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::job::JobSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use veritrace_core::SubjectId;
use veritrace_capture::CaptureConfig;
use veritrace_compare::CompareConfig;

/// Default concurrent jobs
pub const DEFAULT_WORKERS: usize = 4;

/// Default per-capture timeout
pub const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 10_000;

/// Default translate-and-build timeout
pub const DEFAULT_BUILD_TIMEOUT_MS: u64 = 300_000;

/// How jobs are run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Jobs in flight at once
    pub workers: usize,
    /// Timeout for each capture
    pub capture_timeout_ms: u64,
    /// Timeout for translation plus build
    pub build_timeout_ms: u64,
    /// Program that runs the reference artifact (e.g. `python3`)
    pub reference_interpreter: Option<String>,
    /// Comparison settings
    pub compare: CompareConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            capture_timeout_ms: DEFAULT_CAPTURE_TIMEOUT_MS,
            build_timeout_ms: DEFAULT_BUILD_TIMEOUT_MS,
            reference_interpreter: None,
            compare: CompareConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Set worker count
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set capture timeout
    #[must_use]
    pub fn with_capture_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.capture_timeout_ms = timeout_ms;
        self
    }

    /// Set build timeout
    #[must_use]
    pub fn with_build_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.build_timeout_ms = timeout_ms;
        self
    }

    /// Run references through an interpreter
    #[must_use]
    pub fn with_reference_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.reference_interpreter = Some(interpreter.into());
        self
    }

    /// Set comparison settings
    #[must_use]
    pub fn with_compare(mut self, compare: CompareConfig) -> Self {
        self.compare = compare;
        self
    }

    /// Check the settings can run
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for zero workers or zero timeouts, and
    /// `Compare` for bad comparison settings
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.workers == 0 {
            return Err(OrchestratorError::InvalidConfig {
                reason: "workers must be at least 1".to_string(),
            });
        }
        if self.capture_timeout_ms == 0 || self.build_timeout_ms == 0 {
            return Err(OrchestratorError::InvalidConfig {
                reason: "timeouts must be positive".to_string(),
            });
        }
        self.compare.validate()?;
        Ok(())
    }
}

/// Translator and compiler commands
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Translator command template
    pub translator: Option<CommandTemplate>,
    /// Compiler command template; without one the translator output is
    /// the executable
    pub compiler: Option<CommandTemplate>,
    /// Extension of the translated source file
    pub source_extension: Option<String>,
}

/// Everything the validator needs, loadable from one JSON file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Capture backend settings
    pub capture: CaptureConfig,
    /// Job settings
    pub orchestrator: OrchestratorConfig,
    /// External translator and compiler
    pub builder: BuilderConfig,
}

impl ValidatorConfig {
    /// Parse from JSON text
    ///
    /// # Errors
    ///
    /// Returns `Load` when the JSON does not describe a configuration
    pub fn from_json(text: &str) -> OrchestratorResult<Self> {
        serde_json::from_str(text).map_err(|e| OrchestratorError::Load {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Load from a JSON file
    ///
    /// # Errors
    ///
    /// Returns `Load` when the file cannot be read or parsed
    pub fn load(path: &Path) -> OrchestratorResult<Self> {
        let load_err = |reason: String| OrchestratorError::Load {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| load_err(e.to_string()))
    }

    /// Check every section
    ///
    /// # Errors
    ///
    /// Same as [`OrchestratorConfig::validate`]
    pub fn validate(&self) -> OrchestratorResult<()> {
        self.orchestrator.validate()
    }
}

/// One program in a batch manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Reference artifact
    pub reference: PathBuf,
    /// Subject name; defaults to the reference file name
    #[serde(default)]
    pub subject: Option<String>,
    /// Program arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// File whose bytes are fed to stdin
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    /// Prebuilt candidate executable
    #[serde(default)]
    pub candidate: Option<PathBuf>,
}

/// A list of programs to validate in one batch.
///
/// Relative paths are resolved against the manifest's directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    /// Programs to validate
    pub jobs: Vec<ManifestEntry>,
}

impl BatchManifest {
    /// Load a manifest and turn it into job specs
    ///
    /// # Errors
    ///
    /// Returns `Load` when the manifest or an input file cannot be read,
    /// and `InvalidConfig` for an unusable subject name
    pub fn load_specs(path: &Path) -> OrchestratorResult<Vec<JobSpec>> {
        let load_err = |file: &Path, reason: String| OrchestratorError::Load {
            path: file.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| load_err(path, e.to_string()))?;
        let manifest: Self = serde_json::from_str(&text).map_err(|e| load_err(path, e.to_string()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        manifest.into_specs(base)
    }

    /// Job specs with paths resolved against `base`
    ///
    /// # Errors
    ///
    /// Same as [`BatchManifest::load_specs`]
    pub fn into_specs(self, base: &Path) -> OrchestratorResult<Vec<JobSpec>> {
        self.jobs
            .into_iter()
            .map(|entry| {
                let mut spec = JobSpec::for_reference(base.join(&entry.reference))?.with_args(entry.args);
                if let Some(subject) = entry.subject {
                    spec.subject_id = SubjectId::new(subject).map_err(|e| OrchestratorError::InvalidConfig {
                        reason: e.to_string(),
                    })?;
                }
                if let Some(file) = entry.input_file {
                    let file = base.join(file);
                    let bytes = std::fs::read(&file).map_err(|e| OrchestratorError::Load {
                        path: file.display().to_string(),
                        reason: e.to_string(),
                    })?;
                    spec = spec.with_input(Some(bytes));
                }
                if let Some(candidate) = entry.candidate {
                    spec = spec.with_candidate(base.join(candidate));
                }
                Ok(spec)
            })
            .collect()
    }
}
