//! Running validation jobs.
//!
//! Each job walks `Pending -> Capturing(Reference) -> AwaitingCandidate ->
//! Capturing(Candidate) -> Comparing -> Done` inside its own scratch
//! directory. Jobs run concurrently up to the configured worker count and
//! share nothing but the trace store. Any failure ends only the job it
//! belongs to.

use crate::builder::{CandidateBuilder, PrebuiltCandidate};
use crate::classify::FailureClass;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::job::{JobOutcome, JobSpec, Role, Stage, ValidationJob};
use crate::report::ValidationReport;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use veritrace_capture::{CaptureEngine, CaptureError, CaptureRequest};
use veritrace_compare::{ComparisonResult, Side, compare};
use veritrace_core::TraceId;
use veritrace_store::{StoreError, TraceStore};
use veritrace_trace::TraceRecord;

/// Why `drive` stopped early
enum Stop {
    /// Fail with this class
    Class(FailureClass, String),
    /// Fail with the class that owns the current stage
    AtStage(String),
    /// Finish with a comparison that could not be made
    NoTrace(ComparisonResult),
    /// The batch was cancelled
    Cancelled,
}

impl From<OrchestratorError> for Stop {
    fn from(e: OrchestratorError) -> Self {
        Self::AtStage(e.to_string())
    }
}

impl From<StoreError> for Stop {
    fn from(e: StoreError) -> Self {
        Self::AtStage(format!("trace store: {e}"))
    }
}

fn stage_class(stage: Stage) -> FailureClass {
    match stage {
        Stage::Pending | Stage::Capturing(Role::Reference) => FailureClass::ReferenceCaptureFailed,
        Stage::AwaitingCandidate => FailureClass::BuildFailed,
        Stage::Capturing(Role::Candidate) | Stage::Comparing | Stage::Done => {
            FailureClass::CandidateCaptureFailed
        }
    }
}

/// Runs validation jobs end to end
pub struct Orchestrator {
    engine: CaptureEngine,
    store: Arc<dyn TraceStore>,
    builder: Option<Arc<dyn CandidateBuilder>>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("engine", &self.engine)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator.
    ///
    /// Without a builder only jobs with a prebuilt candidate can pass the
    /// build stage.
    ///
    /// # Errors
    ///
    /// Returns the first problem [`OrchestratorConfig::validate`] finds
    pub fn new(
        engine: CaptureEngine,
        store: Arc<dyn TraceStore>,
        config: OrchestratorConfig,
    ) -> OrchestratorResult<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            store,
            builder: None,
            config,
        })
    }

    /// Translate and build candidates with `builder`
    #[must_use]
    pub fn with_builder(mut self, builder: Arc<dyn CandidateBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Trace store shared by all jobs
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TraceStore> {
        &self.store
    }

    /// Run every spec and summarize
    pub async fn run_batch(&self, specs: Vec<JobSpec>, cancel: &CancellationToken) -> ValidationReport {
        let jobs = self.run_jobs(specs, cancel).await;
        let report = ValidationReport::from_jobs(&jobs);
        info!(
            total = report.total(),
            equivalent = report.equivalent,
            failed = report.failed(),
            "batch finished"
        );
        report
    }

    /// Run every spec, returning finished jobs in submission order.
    ///
    /// Each job gets a child of `cancel`; cancelling the batch ends every
    /// unfinished job with [`FailureClass::Timeout`].
    pub async fn run_jobs(&self, specs: Vec<JobSpec>, cancel: &CancellationToken) -> Vec<ValidationJob> {
        let mut finished: Vec<(usize, ValidationJob)> = stream::iter(specs.into_iter().enumerate())
            .map(|(index, spec)| {
                let token = cancel.child_token();
                async move { (index, self.run_job(spec, token).await) }
            })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;
        finished.sort_by_key(|(index, _)| *index);
        finished.into_iter().map(|(_, job)| job).collect()
    }

    /// Run one job to `Done`
    #[instrument(skip_all, fields(subject = %spec.subject_id))]
    pub async fn run_job(&self, spec: JobSpec, cancel: CancellationToken) -> ValidationJob {
        let mut job = ValidationJob::new(spec);
        let outcome = match tempfile::Builder::new().prefix("veritrace-").tempdir() {
            Ok(scratch) => {
                let stop = self.drive(&mut job, scratch.path(), &cancel).await;
                match stop {
                    Ok(outcome) => outcome,
                    Err(Stop::NoTrace(result)) => JobOutcome::Compared { result },
                    Err(Stop::Class(class, diagnostic)) => JobOutcome::Failed { class, diagnostic },
                    Err(Stop::AtStage(diagnostic)) => JobOutcome::Failed {
                        class: stage_class(job.stage()),
                        diagnostic,
                    },
                    Err(Stop::Cancelled) => {
                        job.clear_traces();
                        JobOutcome::Failed {
                            class: FailureClass::Timeout,
                            diagnostic: "cancelled".to_string(),
                        }
                    }
                }
            }
            Err(e) => JobOutcome::Failed {
                class: FailureClass::ReferenceCaptureFailed,
                diagnostic: format!("scratch directory: {e}"),
            },
        };
        if let JobOutcome::Failed { class, diagnostic } = &outcome {
            warn!(job = %job.job_id(), %class, %diagnostic, "job failed");
        }
        if let Err(e) = job.finish(outcome) {
            warn!(job = %job.job_id(), error = %e, "job already finished");
        }
        job
    }

    async fn drive(
        &self,
        job: &mut ValidationJob,
        scratch: &Path,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, Stop> {
        let spec = job.spec().clone();
        checkpoint(cancel)?;
        let reference = tokio::fs::canonicalize(&spec.reference)
            .await
            .map_err(|e| Stop::AtStage(format!("{}: {e}", spec.reference.display())))?;

        let reference_dir = scratch.join("reference");
        let candidate_dir = scratch.join("candidate");
        let build_dir = scratch.join("build");
        for dir in [&reference_dir, &candidate_dir, &build_dir] {
            tokio::fs::create_dir(dir)
                .await
                .map_err(|e| Stop::AtStage(format!("scratch directory: {e}")))?;
        }

        job.advance(Stage::Capturing(Role::Reference))?;
        let request = self.reference_request(&spec, &reference, &reference_dir);
        let reference_trace = self.capture(&request, Side::Reference, cancel).await?;
        job.set_trace(Role::Reference, self.persist(&reference_trace).await?);

        checkpoint(cancel)?;
        job.advance(Stage::AwaitingCandidate)?;
        let candidate = self.build(&spec, &reference, &build_dir, cancel).await?;
        job.set_candidate(candidate.clone());

        checkpoint(cancel)?;
        job.advance(Stage::Capturing(Role::Candidate))?;
        let request = CaptureRequest::new(candidate, spec.subject_id.clone())
            .with_args(spec.args.iter().cloned())
            .with_input(spec.input.clone())
            .with_timeout_ms(self.config.capture_timeout_ms)
            .with_workdir(&candidate_dir);
        let candidate_trace = self.capture(&request, Side::Candidate, cancel).await?;
        job.set_trace(Role::Candidate, self.persist(&candidate_trace).await?);

        checkpoint(cancel)?;
        job.advance(Stage::Comparing)?;
        let result = compare(&reference_trace, &candidate_trace, &self.config.compare);
        Ok(JobOutcome::Compared { result })
    }

    fn reference_request(&self, spec: &JobSpec, reference: &Path, workdir: &Path) -> CaptureRequest {
        let request = match &self.config.reference_interpreter {
            Some(interpreter) => {
                let args = std::iter::once(reference.display().to_string()).chain(spec.args.iter().cloned());
                let mut request = CaptureRequest::new(interpreter, spec.subject_id.clone()).with_args(args);
                if let Some(dir) = reference.parent() {
                    request = request.with_exe_dir(dir);
                }
                request
            }
            None => CaptureRequest::new(reference, spec.subject_id.clone()).with_args(spec.args.iter().cloned()),
        };
        request
            .with_input(spec.input.clone())
            .with_timeout_ms(self.config.capture_timeout_ms)
            .with_workdir(workdir)
    }

    /// Write a trace through the blocking store API off the async workers
    async fn persist(&self, trace: &TraceRecord) -> Result<TraceId, Stop> {
        let store = Arc::clone(&self.store);
        let trace = trace.clone();
        tokio::task::spawn_blocking(move || store.write(&trace))
            .await
            .map_err(|e| Stop::AtStage(format!("trace store task: {e}")))?
            .map_err(Stop::from)
    }

    async fn capture(
        &self,
        request: &CaptureRequest,
        side: Side,
        cancel: &CancellationToken,
    ) -> Result<TraceRecord, Stop> {
        match self.engine.capture(request, cancel).await {
            Ok(trace) => Ok(trace),
            Err(CaptureError::Cancelled) => Err(Stop::Cancelled),
            Err(e @ CaptureError::TracerUnavailable { .. }) => {
                Err(Stop::NoTrace(ComparisonResult::tracer_unavailable(side, e.to_string())))
            }
            Err(e) => Err(Stop::AtStage(e.to_string())),
        }
    }

    async fn build(
        &self,
        spec: &JobSpec,
        reference: &Path,
        build_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, Stop> {
        let prebuilt;
        let builder: &dyn CandidateBuilder = match (&spec.candidate, &self.builder) {
            (Some(path), _) => {
                prebuilt = PrebuiltCandidate::new(path);
                &prebuilt
            }
            (None, Some(builder)) => builder.as_ref(),
            (None, None) => {
                return Err(Stop::Class(
                    FailureClass::BuildFailed,
                    "no candidate given and no translator configured".to_string(),
                ));
            }
        };
        let limit = Duration::from_millis(self.config.build_timeout_ms);
        tokio::select! {
            () = cancel.cancelled() => Err(Stop::Cancelled),
            built = tokio::time::timeout(limit, builder.translate_and_build(reference, build_dir)) => {
                match built {
                    Ok(Ok(path)) => Ok(path),
                    Ok(Err(failure)) => Err(Stop::Class(failure.class(), failure.diagnostic().to_string())),
                    Err(_) => Err(Stop::Class(
                        FailureClass::Timeout,
                        format!("translate and build exceeded {} ms", self.config.build_timeout_ms),
                    )),
                }
            }
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), Stop> {
    if cancel.is_cancelled() {
        Err(Stop::Cancelled)
    } else {
        Ok(())
    }
}
