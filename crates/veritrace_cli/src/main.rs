//! VERITRACE CLI
//!
//! Validates translated programs against their references by comparing
//! what both actually did when run.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use veritrace_capture::{CaptureEngine, CaptureRequest, TracerKind};
use veritrace_compare::{Comparator, ComparisonResult, Verdict};
use veritrace_core::SubjectId;
use veritrace_orchestrator::{
    BatchManifest, CommandBuilder, CommandTemplate, FailureClass, JobOutcome, JobSpec, Orchestrator,
    ValidationReport, ValidatorConfig, classify,
};
use veritrace_store::{FsTraceStore, MemoryTraceStore, TraceStore, read_trace_file, write_trace_file};
use veritrace_trace::{Event, TraceRecord};

const DEFAULT_LOG_FILTER: &str = "veritrace=info";

/// Exit code for internal errors and non-divergence failures
const EXIT_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "veritrace")]
#[command(about = "VERITRACE - behavioral equivalence validator for translated programs", long_about = None)]
#[command(version)]
struct Cli {
    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a translated program against its reference
    Validate {
        /// Reference program
        reference: PathBuf,
        /// Prebuilt candidate; skips translation
        #[arg(long)]
        candidate: Option<PathBuf>,
        /// File fed to both programs on stdin
        #[arg(long)]
        input: Option<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[command(flatten)]
        compare: CompareArgs,
        #[command(flatten)]
        common: CommonArgs,
        /// Arguments passed to both programs
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Compare two stored trace files
    CompareTraces {
        /// Reference trace file
        reference: PathBuf,
        /// Candidate trace file
        candidate: PathBuf,
        #[command(flatten)]
        compare: CompareArgs,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Capture one program run into a trace
    Capture {
        /// Program to run
        program: PathBuf,
        /// Subject name; defaults to the program's file name
        #[arg(long)]
        subject: Option<String>,
        /// File fed on stdin
        #[arg(long)]
        input: Option<PathBuf>,
        /// Timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Interception backend
        #[arg(long)]
        tracer: Option<TracerKind>,
        /// Write the trace to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write the trace into this store directory
        #[arg(long)]
        store: Option<PathBuf>,
        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Program arguments
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Print a trace file as JSON
    ShowTrace {
        /// Trace file
        file: PathBuf,
    },
    /// Validate every program in a manifest
    Batch {
        /// Manifest listing the jobs
        manifest: PathBuf,
        /// Jobs in flight at once
        #[arg(long)]
        workers: Option<usize>,
        /// Write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[command(flatten)]
        compare: CompareArgs,
        #[command(flatten)]
        common: CommonArgs,
    },
}

/// Translation, build and capture settings
#[derive(Args, Debug, Default)]
struct PipelineArgs {
    /// Translator command, e.g. "depyler transpile {input} -o {output}"
    #[arg(long, value_parser = CommandTemplate::parse)]
    translator: Option<CommandTemplate>,
    /// Compiler command, e.g. "rustc -O {input} -o {output}"
    #[arg(long, value_parser = CommandTemplate::parse)]
    compiler: Option<CommandTemplate>,
    /// Extension of the translated source file
    #[arg(long)]
    source_ext: Option<String>,
    /// Program that runs the reference, e.g. python3
    #[arg(long)]
    interpreter: Option<String>,
    /// Capture timeout in milliseconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Translate-and-build timeout in milliseconds
    #[arg(long)]
    build_timeout: Option<u64>,
    /// Interception backend
    #[arg(long)]
    tracer: Option<TracerKind>,
    /// Keep traces in this directory
    #[arg(long)]
    store: Option<PathBuf>,
}

impl PipelineArgs {
    fn apply(&self, config: &mut ValidatorConfig) {
        if let Some(translator) = &self.translator {
            config.builder.translator = Some(translator.clone());
        }
        if let Some(compiler) = &self.compiler {
            config.builder.compiler = Some(compiler.clone());
        }
        if let Some(ext) = &self.source_ext {
            config.builder.source_extension = Some(ext.clone());
        }
        if let Some(interpreter) = &self.interpreter {
            config.orchestrator.reference_interpreter = Some(interpreter.clone());
        }
        if let Some(timeout) = self.timeout {
            config.orchestrator.capture_timeout_ms = timeout;
        }
        if let Some(timeout) = self.build_timeout {
            config.orchestrator.build_timeout_ms = timeout;
        }
        if let Some(tracer) = self.tracer {
            config.capture.tracer = tracer;
        }
    }
}

/// Comparator overrides
#[derive(Args, Debug, Default)]
struct CompareArgs {
    /// Do not compare stdout
    #[arg(long)]
    ignore_output: bool,
    /// Histogram score above which traces diverge
    #[arg(long)]
    syscall_threshold: Option<f64>,
}

impl CompareArgs {
    fn apply(&self, config: &mut ValidatorConfig) {
        if self.ignore_output {
            config.orchestrator.compare.ignore_output = true;
        }
        if let Some(threshold) = self.syscall_threshold {
            config.orchestrator.compare.syscall_threshold = threshold;
        }
    }
}

#[derive(Args, Debug, Default)]
struct CommonArgs {
    /// JSON configuration file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Human)]
    format: Format,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum Format {
    #[default]
    Human,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            eprintln!("Error: {report:?}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run() -> Result<u8> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Commands::Validate {
            reference,
            candidate,
            input,
            pipeline,
            compare,
            common,
            args,
        } => {
            let config = load_config(common.config.as_deref(), &pipeline, &compare)?;
            let orchestrator = build_orchestrator(config, pipeline.store.as_deref())?;
            let mut spec = JobSpec::for_reference(reference)?
                .with_args(args)
                .with_input(read_input(input.as_deref())?);
            if let Some(candidate) = candidate {
                spec = spec.with_candidate(candidate);
            }

            let cancel = cancel_on_ctrl_c();
            let job = orchestrator.run_job(spec, cancel).await;
            let class = classify(&job);
            match common.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&job)?),
                Format::Human => {
                    println!("{}: {}", job.subject_id(), class.map_or("equivalent".to_string(), |c| c.to_string()));
                    match job.outcome() {
                        Some(JobOutcome::Compared { result }) => print!("{result}"),
                        Some(JobOutcome::Failed { diagnostic, .. }) => println!("{diagnostic}"),
                        None => {}
                    }
                }
            }
            Ok(class_exit_code(class))
        }
        Commands::CompareTraces {
            reference,
            candidate,
            compare,
            common,
        } => {
            let config = load_config(common.config.as_deref(), &PipelineArgs::default(), &compare)?;
            let comparator = Comparator::new(config.orchestrator.compare)?;
            let reference = read_trace_file(&reference).wrap_err("reading reference trace")?;
            let candidate = read_trace_file(&candidate).wrap_err("reading candidate trace")?;
            let result = comparator.compare(&reference, &candidate);
            print_result(&result, common.format)?;
            Ok(verdict_exit_code(result.verdict))
        }
        Commands::Capture {
            program,
            subject,
            input,
            timeout,
            tracer,
            output,
            store,
            config,
            args,
        } => {
            let mut config = match config {
                Some(path) => ValidatorConfig::load(&path)?,
                None => ValidatorConfig::default(),
            };
            if let Some(tracer) = tracer {
                config.capture.tracer = tracer;
            }
            let subject = match subject {
                Some(name) => name,
                None => file_name(&program)?,
            };
            let request = CaptureRequest::new(&program, SubjectId::new(subject)?)
                .with_args(args)
                .with_input(read_input(input.as_deref())?)
                .with_timeout_ms(timeout.unwrap_or(config.orchestrator.capture_timeout_ms));

            let engine = CaptureEngine::from_config(&config.capture);
            let trace = engine.capture(&request, &cancel_on_ctrl_c()).await?;

            if let Some(path) = &output {
                write_trace_file(path, &trace)?;
                info!(path = %path.display(), "trace written");
            }
            if let Some(root) = store {
                let id = FsTraceStore::open(root)?.write(&trace)?;
                println!("{id}");
            }
            if output.is_none() {
                println!("{}", serde_json::to_string_pretty(&trace_view(&trace)?)?);
            }
            Ok(0)
        }
        Commands::ShowTrace { file } => {
            let trace = read_trace_file(&file)?;
            println!("{}", serde_json::to_string_pretty(&trace_view(&trace)?)?);
            Ok(0)
        }
        Commands::Batch {
            manifest,
            workers,
            report,
            pipeline,
            compare,
            common,
        } => {
            let mut config = load_config(common.config.as_deref(), &pipeline, &compare)?;
            if let Some(workers) = workers {
                config.orchestrator.workers = workers;
            }
            let specs = BatchManifest::load_specs(&manifest)?;
            let orchestrator = build_orchestrator(config, pipeline.store.as_deref())?;
            info!(jobs = specs.len(), workers = orchestrator.config().workers, "batch starting");

            let summary = orchestrator.run_batch(specs, &cancel_on_ctrl_c()).await;
            if let Some(path) = report {
                std::fs::write(&path, summary.to_json()?)
                    .wrap_err_with(|| format!("writing report {}", path.display()))?;
            }
            match common.format {
                Format::Json => println!("{}", summary.to_json()?),
                Format::Human => print!("{summary}"),
            }
            Ok(batch_exit_code(&summary))
        }
    }
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init()?;
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).try_init()?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>, pipeline: &PipelineArgs, compare: &CompareArgs) -> Result<ValidatorConfig> {
    let mut config = match path {
        Some(path) => ValidatorConfig::load(path)?,
        None => ValidatorConfig::default(),
    };
    pipeline.apply(&mut config);
    compare.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn build_orchestrator(config: ValidatorConfig, store: Option<&Path>) -> Result<Orchestrator> {
    let store: Arc<dyn TraceStore> = match store {
        Some(root) => Arc::new(FsTraceStore::open(root)?),
        None => Arc::new(MemoryTraceStore::new()),
    };
    let engine = CaptureEngine::from_config(&config.capture);
    let builder = CommandBuilder::from_config(&config.builder);
    let mut orchestrator = Orchestrator::new(engine, store, config.orchestrator)?;
    if let Some(builder) = builder {
        orchestrator = orchestrator.with_builder(Arc::new(builder));
    }
    Ok(orchestrator)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

fn read_input(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    path.map(|p| std::fs::read(p).wrap_err_with(|| format!("reading input {}", p.display())))
        .transpose()
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| eyre!("{} has no file name", path.display()))
}

fn print_result(result: &ComparisonResult, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(result)?),
        Format::Human => print!("{result}"),
    }
    Ok(())
}

fn class_exit_code(class: Option<FailureClass>) -> u8 {
    match class {
        None => 0,
        Some(class) if class.is_divergence() => 1,
        Some(_) => EXIT_FAILURE,
    }
}

fn verdict_exit_code(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Equivalent => 0,
        Verdict::Divergent => 1,
        Verdict::Inconclusive => EXIT_FAILURE,
    }
}

/// Worst exit code over the batch
fn batch_exit_code(report: &ValidationReport) -> u8 {
    report
        .entries
        .iter()
        .map(|entry| class_exit_code(entry.class))
        .max()
        .unwrap_or(0)
}

fn event_view(event: &Event) -> Value {
    match event {
        Event::Syscall(call) => json!({ "syscall": call.name, "args": call.args, "result": call.result }),
        Event::StdoutChunk(bytes) => json!({ "stdout": String::from_utf8_lossy(bytes) }),
        Event::StderrChunk(bytes) => json!({ "stderr": String::from_utf8_lossy(bytes) }),
        Event::Exit(status) => json!({ "exit": status.to_string() }),
    }
}

fn trace_view(trace: &TraceRecord) -> Result<Value> {
    let meta = trace.meta();
    Ok(json!({
        "subject": meta.subject_id,
        "captured_at": meta.captured_at,
        "tool_version": meta.tool_version,
        "truncated": meta.truncated,
        "fingerprint": trace.fingerprint()?.to_hex(),
        "events": trace.events().iter().map(event_view).collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use veritrace_compare::{ExitStatuses, OutputDiff};
    use veritrace_orchestrator::ValidationJob;
    use veritrace_trace::{ExitStatus, TraceBuilder};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_validate() {
        let cli = Cli::try_parse_from([
            "veritrace",
            "validate",
            "fib.py",
            "--interpreter",
            "python3",
            "--translator",
            "depyler transpile {input} -o {output}",
            "--compiler",
            "rustc {input} -o {output}",
            "--syscall-threshold",
            "0.5",
            "--tracer",
            "output-only",
            "--format",
            "json",
            "--",
            "10",
            "-v",
        ])
        .unwrap();
        let Commands::Validate {
            reference,
            pipeline,
            compare,
            common,
            args,
            ..
        } = cli.command
        else {
            panic!("expected validate");
        };
        assert_eq!(reference, PathBuf::from("fib.py"));
        assert_eq!(args, vec!["10".to_string(), "-v".to_string()]);
        assert_eq!(common.format, Format::Json);

        let mut config = ValidatorConfig::default();
        pipeline.apply(&mut config);
        compare.apply(&mut config);
        assert_eq!(config.capture.tracer, TracerKind::OutputOnly);
        assert_eq!(config.orchestrator.reference_interpreter.as_deref(), Some("python3"));
        assert_eq!(config.orchestrator.compare.syscall_threshold, 0.5);
        assert_eq!(
            config.builder.compiler.map(|c| c.to_string()).as_deref(),
            Some("rustc {input} -o {output}")
        );
    }

    #[test]
    fn test_parse_rejects_unknown_tracer() {
        assert!(Cli::try_parse_from(["veritrace", "capture", "ls", "--tracer", "ptrace"]).is_err());
        assert!(Cli::try_parse_from(["veritrace", "validate", "a.py", "--translator", "  "]).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("veritrace.json");
        std::fs::write(
            &path,
            r#"{ "orchestrator": { "capture_timeout_ms": 2000, "compare": { "ignore_output": false } } }"#,
        )
        .unwrap();
        let pipeline = PipelineArgs {
            timeout: Some(500),
            ..PipelineArgs::default()
        };
        let compare = CompareArgs {
            ignore_output: true,
            syscall_threshold: None,
        };
        let config = load_config(Some(&path), &pipeline, &compare).unwrap();
        assert_eq!(config.orchestrator.capture_timeout_ms, 500);
        assert!(config.orchestrator.compare.ignore_output);
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let compare = CompareArgs {
            ignore_output: false,
            syscall_threshold: Some(1.5),
        };
        assert!(load_config(None, &PipelineArgs::default(), &compare).is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(class_exit_code(None), 0);
        assert_eq!(class_exit_code(Some(FailureClass::OutputDivergence)), 1);
        assert_eq!(class_exit_code(Some(FailureClass::SyscallDivergence)), 1);
        assert_eq!(class_exit_code(Some(FailureClass::BuildFailed)), 2);
        assert_eq!(class_exit_code(Some(FailureClass::Timeout)), 2);
        assert_eq!(verdict_exit_code(Verdict::Equivalent), 0);
        assert_eq!(verdict_exit_code(Verdict::Divergent), 1);
        assert_eq!(verdict_exit_code(Verdict::Inconclusive), 2);
    }

    fn finished(name: &str, outcome: JobOutcome) -> ValidationJob {
        let mut job = ValidationJob::new(JobSpec::for_reference(name).unwrap());
        job.finish(outcome).unwrap();
        job
    }

    #[test]
    fn test_batch_exit_is_worst_job() {
        let equivalent = || finished("a", JobOutcome::Compared { result: compared(Verdict::Equivalent) });
        let mut divergent = compared(Verdict::Divergent);
        divergent.output_diff = OutputDiff::between(b"42\n", b"43\n", 8);
        let divergent = finished("b", JobOutcome::Compared { result: divergent });
        let failed = finished(
            "c",
            JobOutcome::Failed {
                class: FailureClass::TranslationFailed,
                diagnostic: "unsupported".to_string(),
            },
        );

        assert_eq!(batch_exit_code(&ValidationReport::from_jobs(&[])), 0);
        assert_eq!(batch_exit_code(&ValidationReport::from_jobs(&[equivalent()])), 0);
        assert_eq!(
            batch_exit_code(&ValidationReport::from_jobs(&[equivalent(), divergent.clone()])),
            1
        );
        assert_eq!(
            batch_exit_code(&ValidationReport::from_jobs(&[divergent, failed, equivalent()])),
            2
        );
    }

    fn compared(verdict: Verdict) -> ComparisonResult {
        ComparisonResult {
            verdict,
            output_diff: None,
            syscall_divergence_score: 0.0,
            first_divergence: None,
            sample_mismatches: Vec::new(),
            inconclusive: None,
            exit_statuses: ExitStatuses::default(),
        }
    }

    #[test]
    fn test_trace_view() {
        let trace = TraceBuilder::new(SubjectId::new("hello").unwrap())
            .with_event(Event::syscall("write", "1, \"hello\\n\", 6", Some(6)))
            .with_event(Event::StdoutChunk(b"hello\n".to_vec()))
            .with_event(Event::Exit(ExitStatus::Code(0)))
            .finish();
        let view = trace_view(&trace).unwrap();
        assert_eq!(view["subject"], "hello");
        assert_eq!(view["truncated"], false);
        assert_eq!(view["events"][0]["syscall"], "write");
        assert_eq!(view["events"][0]["result"], 6);
        assert_eq!(view["events"][1]["stdout"], "hello\n");
        assert_eq!(view["events"][2]["exit"], "exit 0");
        assert_eq!(view["fingerprint"], trace.fingerprint().unwrap().to_hex());
    }

    #[test]
    fn test_read_input() {
        assert_eq!(read_input(None).unwrap(), None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "5\n").unwrap();
        assert_eq!(read_input(Some(&path)).unwrap(), Some(b"5\n".to_vec()));
        assert!(read_input(Some(&dir.path().join("missing"))).is_err());
    }
}
